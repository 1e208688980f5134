use crate::domain::{
    CommissionId, CommissionStatus, Decimal, MemberId, PeriodId, TierId, TierTableError,
    TransactionId, TransactionStatus,
};
use crate::engine::ComplianceViolation;
use crate::store::StoreError;
use thiserror::Error;

/// Errors raised by the placement, commission and qualification engines.
///
/// Member-scoped errors are isolated by the batch entry points; transaction-
/// scoped errors abort only that transaction's fan-out.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("matrix of {root_sponsor_id} has no open slot within {max_levels} levels")]
    MatrixFull {
        root_sponsor_id: MemberId,
        max_levels: u32,
    },
    #[error("transaction {transaction_id} is {status}, not in a commissionable state")]
    InvalidTransactionState {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },
    #[error("transaction {transaction_id} has non-positive amount {amount}")]
    InvalidTransactionAmount {
        transaction_id: TransactionId,
        amount: Decimal,
    },
    #[error("member {member_id} (tier {tier_id}) has commission rate {rate} at level {level}")]
    InvalidCommissionRate {
        member_id: MemberId,
        tier_id: TierId,
        level: u32,
        rate: Decimal,
    },
    #[error("compliance cap exceeded: {0}")]
    ComplianceCapExceeded(ComplianceViolation),
    #[error("stats unavailable for member {member_id} in {period}: {reason}")]
    StatsUnavailable {
        member_id: MemberId,
        period: PeriodId,
        reason: String,
    },
    #[error("{operation} for member {member_id} timed out after {after_ms}ms")]
    Timeout {
        member_id: MemberId,
        operation: &'static str,
        after_ms: u64,
    },
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("sponsor {0} not found")]
    SponsorNotFound(MemberId),
    #[error("sponsor {0} is inactive")]
    SponsorInactive(MemberId),
    #[error("invalid member: {0}")]
    InvalidMember(String),
    #[error("member {member_id} has unknown tier {tier_id}")]
    UnknownTier { member_id: MemberId, tier_id: TierId },
    #[error("commission {0} not found")]
    CommissionNotFound(CommissionId),
    #[error("commission {commission_id} cannot move from {from} to {to}")]
    InvalidCommissionTransition {
        commission_id: CommissionId,
        from: CommissionStatus,
        to: CommissionStatus,
    },
    #[error("placement of {member_id} lost {attempts} slot races")]
    PlacementContention { member_id: MemberId, attempts: u32 },
    #[error(transparent)]
    Tiers(#[from] TierTableError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True when the same call may succeed later without any input change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidTransactionState { .. }
                | EngineError::StatsUnavailable { .. }
                | EngineError::Timeout { .. }
                | EngineError::PlacementContention { .. }
                | EngineError::Store(_)
                | EngineError::Internal(_)
        )
    }
}
