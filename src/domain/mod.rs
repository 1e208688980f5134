//! Domain types for the network placement and commission engine.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Identifiers, TimeMs and accounting periods
//! - Members, matrix positions, transactions and commissions
//! - Tier configuration and qualification records

pub mod commission;
pub mod decimal;
pub mod matrix;
pub mod member;
pub mod primitives;
pub mod qualification;
pub mod tier;
pub mod transaction;

pub use commission::{Commission, CommissionLimits, CommissionStatus, CommissionType};
pub use decimal::Decimal;
pub use matrix::{MatrixPosition, SlotClaim, SlotTarget};
pub use member::{Member, MemberStatus, TeamVolume};
pub use primitives::{
    CommissionId, MemberId, PeriodId, PeriodParseError, PositionId, TierId, TimeMs, TransactionId,
};
pub use qualification::{
    QualificationState, QualificationStats, TierChange, TierChangeReason, TierQualification,
};
pub use tier::{InvestmentTier, TierRequirements, TierTable, TierTableError};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
