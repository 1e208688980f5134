//! Commission records and their amount arithmetic.

use crate::domain::{CommissionId, Decimal, MemberId, PeriodId, TimeMs, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionType {
    Referral,
    TeamVolume,
    AchievementBonus,
    LeadershipBonus,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionType::Referral => "referral",
            CommissionType::TeamVolume => "team_volume",
            CommissionType::AchievementBonus => "achievement_bonus",
            CommissionType::LeadershipBonus => "leadership_bonus",
        }
    }
}

impl fmt::Display for CommissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CommissionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "referral" => Ok(CommissionType::Referral),
            "team_volume" => Ok(CommissionType::TeamVolume),
            "achievement_bonus" => Ok(CommissionType::AchievementBonus),
            "leadership_bonus" => Ok(CommissionType::LeadershipBonus),
            other => Err(format!("unknown commission type {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Disputed,
}

impl fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommissionStatus::Pending => write!(f, "pending"),
            CommissionStatus::Paid => write!(f, "paid"),
            CommissionStatus::Disputed => write!(f, "disputed"),
        }
    }
}

impl FromStr for CommissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommissionStatus::Pending),
            "paid" => Ok(CommissionStatus::Paid),
            "disputed" => Ok(CommissionStatus::Disputed),
            other => Err(format!("unknown commission status {:?}", other)),
        }
    }
}

/// Floor and ceiling applied to one commission type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionLimits {
    /// Minimum recorded amount.
    pub floor: Decimal,
    /// Maximum recorded amount as a percentage of the source amount.
    pub ceiling_percent: Decimal,
}

impl CommissionLimits {
    pub fn new(floor: Decimal, ceiling_percent: Decimal) -> Self {
        CommissionLimits {
            floor,
            ceiling_percent,
        }
    }

    pub fn ceiling(&self, source_amount: Decimal) -> Decimal {
        self.ceiling_percent.percent_of(source_amount)
    }

    /// `min(max(raw, floor), ceiling)`: when the floor exceeds the ceiling the
    /// ceiling wins.
    pub fn clamp(&self, raw: Decimal, source_amount: Decimal) -> Decimal {
        let ceiling = self.ceiling(source_amount);
        raw.max(self.floor).min(ceiling)
    }
}

/// A monetary credit to `beneficiary_member_id`.
///
/// Records are immutable apart from the payout status. The stored rate and
/// multipliers are enough to re-derive `amount` from `source_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub id: CommissionId,
    pub beneficiary_member_id: MemberId,
    pub source_transaction_id: TransactionId,
    pub source_member_id: MemberId,
    /// Relationship level (1 = direct sponsor); 0 for period bonuses.
    pub level: u32,
    pub commission_type: CommissionType,
    /// Transaction amount, or the bonus base for non-referral types.
    pub source_amount: Decimal,
    /// Percent.
    pub base_rate: Decimal,
    pub tier_multiplier: Decimal,
    pub performance_multiplier: Decimal,
    pub amount: Decimal,
    pub status: CommissionStatus,
    pub period: PeriodId,
    pub earned_at: TimeMs,
    pub paid_at: Option<TimeMs>,
    /// Set on compensating records: the commission being reversed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverses: Option<CommissionId>,
}

impl Commission {
    /// Stable id over the idempotency key.
    ///
    /// SHA-256 over length-prefixed fields, truncated to 128 bits.
    pub fn compute_id(
        source_transaction_id: &TransactionId,
        beneficiary: &MemberId,
        level: u32,
        commission_type: CommissionType,
    ) -> CommissionId {
        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hash_var(&mut hasher, source_transaction_id.as_str());
        hash_var(&mut hasher, beneficiary.as_str());
        hasher.update(level.to_le_bytes());
        hash_var(&mut hasher, commission_type.as_str());

        let hash = hasher.finalize();
        CommissionId::new(format!("cm:{}", hex::encode(&hash[..16])))
    }

    /// `source * base_rate/100 * tier_multiplier * performance_multiplier`.
    pub fn raw_amount(
        source_amount: Decimal,
        base_rate: Decimal,
        tier_multiplier: Decimal,
        performance_multiplier: Decimal,
    ) -> Decimal {
        base_rate.percent_of(source_amount) * tier_multiplier * performance_multiplier
    }

    /// Recompute the recorded amount from the stored factors.
    pub fn rederive_amount(&self, limits: &CommissionLimits) -> Decimal {
        let raw = Self::raw_amount(
            self.source_amount,
            self.base_rate,
            self.tier_multiplier,
            self.performance_multiplier,
        );
        limits.clamp(raw, self.source_amount).round_money()
    }

    /// Idempotency key: (source transaction, beneficiary, level, type).
    pub fn dedup_key(&self) -> (TransactionId, MemberId, u32, CommissionType) {
        (
            self.source_transaction_id.clone(),
            self.beneficiary_member_id.clone(),
            self.level,
            self.commission_type,
        )
    }

    /// Build the compensating record for this commission.
    ///
    /// Amount and source are negated; the original is left untouched.
    pub fn compensating(&self, at: TimeMs) -> Commission {
        let source_transaction_id = TransactionId::new(format!("reversal:{}", self.id));
        let id = Self::compute_id(
            &source_transaction_id,
            &self.beneficiary_member_id,
            self.level,
            self.commission_type,
        );
        Commission {
            id,
            beneficiary_member_id: self.beneficiary_member_id.clone(),
            source_transaction_id,
            source_member_id: self.source_member_id.clone(),
            level: self.level,
            commission_type: self.commission_type,
            source_amount: -self.source_amount,
            base_rate: self.base_rate,
            tier_multiplier: self.tier_multiplier,
            performance_multiplier: self.performance_multiplier,
            amount: -self.amount,
            status: CommissionStatus::Pending,
            period: PeriodId::containing(at),
            earned_at: at,
            paid_at: None,
            reverses: Some(self.id.clone()),
        }
    }
}
