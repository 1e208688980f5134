//! Investment tier configuration and the validated tier table.

use crate::domain::{Decimal, TierId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Maintenance bar for a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierRequirements {
    pub min_referrals: u32,
    pub min_team_volume: Decimal,
}

impl TierRequirements {
    pub fn is_met(&self, active_referrals: u32, team_volume: Decimal) -> bool {
        active_referrals >= self.min_referrals && team_volume >= self.min_team_volume
    }
}

/// One tier's rates, multipliers and thresholds. Read-only reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentTier {
    pub id: TierId,
    pub name: String,
    /// 0 for the entry tier; ranks are contiguous.
    pub rank: u32,
    /// Percent per commission level; index 0 is level 1.
    pub level_rates: Vec<Decimal>,
    pub tier_multiplier: Decimal,
    /// Percent of period team volume paid as the team-volume bonus.
    pub team_volume_bonus_rate: Decimal,
    /// Minimum period team volume that earns the bonus.
    pub team_volume_bonus_threshold: Decimal,
    /// Fixed amount paid once when a member advances into this tier.
    pub achievement_bonus: Decimal,
    /// Percent of direct referrals' team-volume bonuses paid as a leadership override.
    #[serde(default)]
    pub leadership_bonus_rate: Decimal,
    pub requirements: TierRequirements,
}

impl InvestmentTier {
    /// Rate for a 1-based commission level, zero when the tier pays nothing there.
    pub fn rate_for_level(&self, level: u32) -> Decimal {
        level
            .checked_sub(1)
            .and_then(|idx| self.level_rates.get(idx as usize))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TierTableError {
    #[error("tier table is empty")]
    Empty,
    #[error("duplicate tier id {0}")]
    DuplicateId(TierId),
    #[error("tier ranks must be contiguous from 0, found gap at rank {0}")]
    RankGap(u32),
    #[error("tier {tier}: {field} must not be negative")]
    Negative { tier: TierId, field: &'static str },
    #[error("tier {tier}: multiplier {multiplier} is lower than the tier below it")]
    MultiplierNotMonotonic { tier: TierId, multiplier: Decimal },
    #[error("invalid tier table json: {0}")]
    Json(String),
}

/// Validated, rank-ordered set of tiers, loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<InvestmentTier>,
    index: HashMap<TierId, usize>,
}

impl TierTable {
    /// Validate and index the tiers.
    ///
    /// # Errors
    /// Rejects empty tables, duplicate ids, non-contiguous ranks, negative
    /// rates or thresholds, and tier multipliers that decrease with rank.
    pub fn new(mut tiers: Vec<InvestmentTier>) -> Result<Self, TierTableError> {
        if tiers.is_empty() {
            return Err(TierTableError::Empty);
        }
        tiers.sort_by_key(|t| t.rank);

        let mut index = HashMap::with_capacity(tiers.len());
        for (pos, tier) in tiers.iter().enumerate() {
            if tier.rank != pos as u32 {
                return Err(TierTableError::RankGap(pos as u32));
            }
            if index.insert(tier.id.clone(), pos).is_some() {
                return Err(TierTableError::DuplicateId(tier.id.clone()));
            }
            validate_non_negative(tier)?;
            if pos > 0 && tier.tier_multiplier < tiers[pos - 1].tier_multiplier {
                return Err(TierTableError::MultiplierNotMonotonic {
                    tier: tier.id.clone(),
                    multiplier: tier.tier_multiplier,
                });
            }
        }

        Ok(TierTable { tiers, index })
    }

    /// Parse a JSON array of tiers and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, TierTableError> {
        let tiers: Vec<InvestmentTier> =
            serde_json::from_str(json).map_err(|e| TierTableError::Json(e.to_string()))?;
        Self::new(tiers)
    }

    pub fn get(&self, id: &TierId) -> Option<&InvestmentTier> {
        self.index.get(id).map(|&pos| &self.tiers[pos])
    }

    pub fn by_rank(&self, rank: u32) -> Option<&InvestmentTier> {
        self.tiers.get(rank as usize)
    }

    /// Rank-0 tier: the landing point of a full downgrade.
    pub fn entry_tier(&self) -> &InvestmentTier {
        &self.tiers[0]
    }

    pub fn highest_rank(&self) -> u32 {
        (self.tiers.len() - 1) as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = &InvestmentTier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

fn validate_non_negative(tier: &InvestmentTier) -> Result<(), TierTableError> {
    let negative = |field: &'static str| TierTableError::Negative {
        tier: tier.id.clone(),
        field,
    };
    if tier.level_rates.iter().any(|r| r.is_negative()) {
        return Err(negative("levelRates"));
    }
    if !tier.tier_multiplier.is_positive() {
        return Err(negative("tierMultiplier"));
    }
    if tier.team_volume_bonus_rate.is_negative() {
        return Err(negative("teamVolumeBonusRate"));
    }
    if tier.team_volume_bonus_threshold.is_negative() {
        return Err(negative("teamVolumeBonusThreshold"));
    }
    if tier.achievement_bonus.is_negative() {
        return Err(negative("achievementBonus"));
    }
    if tier.leadership_bonus_rate.is_negative() {
        return Err(negative("leadershipBonusRate"));
    }
    if tier.requirements.min_team_volume.is_negative() {
        return Err(negative("requirements.minTeamVolume"));
    }
    Ok(())
}
