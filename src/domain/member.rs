//! Network members and their per-period team volume.

use crate::domain::{Decimal, MemberId, PeriodId, TierId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Membership status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Active => write!(f, "active"),
            MemberStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MemberStatus::Active),
            "inactive" => Ok(MemberStatus::Inactive),
            other => Err(format!("unknown member status {:?}", other)),
        }
    }
}

/// A participant in the network.
///
/// `sponsor_id` links form a forest: a member without a sponsor is a root
/// (house account). The forest invariant is enforced when members are
/// registered, so traversals never need cycle detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Direct referrer.
    pub sponsor_id: Option<MemberId>,
    pub tier_id: TierId,
    pub joined_at: TimeMs,
    pub status: MemberStatus,
    /// Trailing performance score snapshot (0-10), if one has been computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_score: Option<Decimal>,
}

impl Member {
    pub fn new(id: MemberId, sponsor_id: Option<MemberId>, tier_id: TierId, joined_at: TimeMs) -> Self {
        Member {
            id,
            sponsor_id,
            tier_id,
            joined_at,
            status: MemberStatus::Active,
            performance_score: None,
        }
    }

    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_performance_score(mut self, score: Decimal) -> Self {
        self.performance_score = Some(score);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    pub fn is_root(&self) -> bool {
        self.sponsor_id.is_none()
    }
}

/// Team volume credited to a member's downline within one accounting period.
///
/// Volume is keyed by period rather than reset in place, so a new period
/// always starts from zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamVolume {
    pub member_id: MemberId,
    pub period: PeriodId,
    pub volume: Decimal,
}
