//! Period bonuses: team volume, leadership override and tier achievement.

use crate::config::EngineConfig;
use crate::domain::{
    Commission, CommissionStatus, CommissionType, Decimal, InvestmentTier, Member, PeriodId,
    TierTable, TimeMs, TransactionId,
};
use crate::error::EngineError;
use std::sync::Arc;

/// Bonus commissions are not level-attributed.
pub const BONUS_LEVEL: u32 = 0;

pub fn team_volume_source(period: PeriodId) -> TransactionId {
    TransactionId::new(format!("team-volume:{}", period))
}

pub fn leadership_source(period: PeriodId) -> TransactionId {
    TransactionId::new(format!("leadership:{}", period))
}

pub fn achievement_source(member: &Member, tier: &InvestmentTier) -> TransactionId {
    TransactionId::new(format!("achievement:{}:{}", member.id, tier.id))
}

pub struct BonusCalculator {
    config: EngineConfig,
    tiers: Arc<TierTable>,
}

impl BonusCalculator {
    pub fn new(config: EngineConfig, tiers: Arc<TierTable>) -> Self {
        Self { config, tiers }
    }

    fn tier_of<'a>(&'a self, member: &Member) -> Result<&'a InvestmentTier, EngineError> {
        self.tiers
            .get(&member.tier_id)
            .ok_or_else(|| EngineError::UnknownTier {
                member_id: member.id.clone(),
                tier_id: member.tier_id.clone(),
            })
    }

    /// Team-volume bonus for `member` over its period volume.
    ///
    /// Paid once per member per period to active members whose volume reaches
    /// their tier's threshold.
    pub fn team_volume_bonus(
        &self,
        member: &Member,
        team_volume: Decimal,
        period: PeriodId,
        earned_at: TimeMs,
    ) -> Result<Option<Commission>, EngineError> {
        let tier = self.tier_of(member)?;
        if !member.is_active() || !team_volume.is_positive() {
            return Ok(None);
        }
        if team_volume < tier.team_volume_bonus_threshold {
            return Ok(None);
        }
        Ok(self.bonus(
            member,
            team_volume_source(period),
            CommissionType::TeamVolume,
            team_volume,
            tier.team_volume_bonus_rate,
            period,
            earned_at,
        ))
    }

    /// Leadership override on the team-volume bonuses earned by `member`'s
    /// direct referrals in the same period.
    pub fn leadership_bonus(
        &self,
        member: &Member,
        referral_bonus_total: Decimal,
        period: PeriodId,
        earned_at: TimeMs,
    ) -> Result<Option<Commission>, EngineError> {
        let tier = self.tier_of(member)?;
        if !member.is_active() || !referral_bonus_total.is_positive() {
            return Ok(None);
        }
        Ok(self.bonus(
            member,
            leadership_source(period),
            CommissionType::LeadershipBonus,
            referral_bonus_total,
            tier.leadership_bonus_rate,
            period,
            earned_at,
        ))
    }

    /// One-off bonus for advancing into `tier`, keyed per member and tier.
    pub fn achievement_bonus(
        &self,
        member: &Member,
        tier: &InvestmentTier,
        period: PeriodId,
        earned_at: TimeMs,
    ) -> Option<Commission> {
        if !tier.achievement_bonus.is_positive() {
            return None;
        }
        self.bonus(
            member,
            achievement_source(member, tier),
            CommissionType::AchievementBonus,
            tier.achievement_bonus,
            Decimal::hundred(),
            period,
            earned_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn bonus(
        &self,
        member: &Member,
        source: TransactionId,
        commission_type: CommissionType,
        base: Decimal,
        rate: Decimal,
        period: PeriodId,
        earned_at: TimeMs,
    ) -> Option<Commission> {
        if !rate.is_positive() {
            return None;
        }
        let raw = Commission::raw_amount(base, rate, Decimal::one(), Decimal::one());
        if raw.round_money().is_zero() {
            return None;
        }
        let amount = self
            .config
            .limits_for(commission_type)
            .clamp(raw, base)
            .round_money();

        Some(Commission {
            id: Commission::compute_id(&source, &member.id, BONUS_LEVEL, commission_type),
            beneficiary_member_id: member.id.clone(),
            source_transaction_id: source,
            source_member_id: member.id.clone(),
            level: BONUS_LEVEL,
            commission_type,
            source_amount: base,
            base_rate: rate,
            tier_multiplier: Decimal::one(),
            performance_multiplier: Decimal::one(),
            amount,
            status: CommissionStatus::Pending,
            period,
            earned_at,
            paid_at: None,
            reverses: None,
        })
    }
}
