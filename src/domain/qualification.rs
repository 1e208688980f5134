//! Tier qualification evidence and tier-change audit records.

use crate::domain::{Decimal, MemberId, PeriodId, TierId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stats a qualification decision is taken on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualificationStats {
    /// Direct referrals with active status.
    pub active_referrals: u32,
    /// Team volume for the evaluated period.
    pub team_volume: Decimal,
}

/// Rolling evidence of a member meeting a tier's bar.
///
/// One row per member per tier achieved; the latest row is current and older
/// rows are kept as superseded history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierQualification {
    pub member_id: MemberId,
    pub tier_id: TierId,
    pub active_referrals: u32,
    pub team_volume: Decimal,
    pub consecutive_months: u32,
    pub is_permanent: bool,
    /// Period this row was last evaluated for.
    pub period: PeriodId,
    pub evaluated_at: TimeMs,
}

/// Qualification state machine states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "tier", rename_all = "snake_case")]
pub enum QualificationState {
    NotQualified,
    Qualified(TierId),
    QualifiedPermanent(TierId),
}

impl QualificationState {
    pub fn from_current(current: Option<&TierQualification>) -> Self {
        match current {
            None => QualificationState::NotQualified,
            Some(q) if q.is_permanent => QualificationState::QualifiedPermanent(q.tier_id.clone()),
            Some(q) => QualificationState::Qualified(q.tier_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierChangeReason {
    Advancement,
    Downgrade,
}

impl fmt::Display for TierChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierChangeReason::Advancement => write!(f, "advancement"),
            TierChangeReason::Downgrade => write!(f, "downgrade"),
        }
    }
}

impl FromStr for TierChangeReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advancement" => Ok(TierChangeReason::Advancement),
            "downgrade" => Ok(TierChangeReason::Downgrade),
            other => Err(format!("unknown tier change reason {:?}", other)),
        }
    }
}

/// Audit record of a tier transition, consumed by notification and payout
/// collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierChange {
    pub member_id: MemberId,
    pub from_tier: TierId,
    pub to_tier: TierId,
    pub reason: TierChangeReason,
    pub active_referrals: u32,
    pub team_volume: Decimal,
    pub period: PeriodId,
    pub changed_at: TimeMs,
}
