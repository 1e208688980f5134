//! Persistence seams consumed by the engine.
//!
//! Every external collaborator the engine reads from or writes to is an
//! `async_trait` here. `MemoryStore` implements them in memory; the SQLite
//! repository lives in `crate::db`.

use crate::domain::{
    Commission, CommissionId, CommissionStatus, Decimal, MatrixPosition, Member, MemberId,
    PeriodId, SlotClaim, SlotTarget, TeamVolume, TierChange, TierId, TierQualification, TierTable,
    TimeMs, TransactionId,
};
use crate::engine::ComplianceViolation;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Member & sponsorship reader, plus the registration write path.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError>;

    /// Sponsors of `id`, nearest first, stopping at a root or after `max_depth`.
    async fn get_sponsor_chain(
        &self,
        id: &MemberId,
        max_depth: u32,
    ) -> Result<Vec<Member>, StoreError>;

    async fn get_direct_referrals(&self, id: &MemberId) -> Result<Vec<Member>, StoreError>;

    /// All member ids, sorted.
    async fn list_member_ids(&self) -> Result<Vec<MemberId>, StoreError>;

    /// Insert a new member. Fails with `Conflict` when the id exists.
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError>;

    async fn update_member_tier(&self, id: &MemberId, tier_id: &TierId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MatrixStore: Send + Sync {
    async fn get_position(
        &self,
        root_sponsor_id: &MemberId,
        member_id: &MemberId,
    ) -> Result<Option<MatrixPosition>, StoreError>;

    async fn list_positions(
        &self,
        root_sponsor_id: &MemberId,
    ) -> Result<Vec<MatrixPosition>, StoreError>;

    /// Atomically claim `target` for `member_id`.
    ///
    /// Never overwrites: an occupied `(root, level, row_offset)` yields
    /// `Collision`, an existing placement of the member yields `AlreadyPlaced`.
    async fn claim_slot(
        &self,
        root_sponsor_id: &MemberId,
        member_id: &MemberId,
        target: &SlotTarget,
        placed_at: TimeMs,
    ) -> Result<SlotClaim, StoreError>;
}

/// Read-only tier configuration.
#[async_trait]
pub trait TierProvider: Send + Sync {
    async fn load_tiers(&self) -> Result<TierTable, StoreError>;
}

#[async_trait]
pub trait CommissionSink: Send + Sync {
    /// Insert all records in one atomic unit, skipping any whose
    /// `(source transaction, beneficiary, level, type)` already exists.
    /// Returns the number of new records.
    async fn record_commissions(&self, commissions: &[Commission]) -> Result<usize, StoreError>;

    async fn get_commission(&self, id: &CommissionId) -> Result<Option<Commission>, StoreError>;

    async fn commissions_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Commission>, StoreError>;

    async fn commissions_for_period(&self, period: PeriodId)
        -> Result<Vec<Commission>, StoreError>;

    /// Compare-and-set on the payout status. Returns false when the record is
    /// not currently in `from`.
    async fn update_commission_status(
        &self,
        id: &CommissionId,
        from: CommissionStatus,
        to: CommissionStatus,
        paid_at: Option<TimeMs>,
    ) -> Result<bool, StoreError>;

    /// Persist a compliance review flag, once per scope. Returns true when new.
    async fn flag_for_review(
        &self,
        violation: &ComplianceViolation,
        flagged_at: TimeMs,
    ) -> Result<bool, StoreError>;

    async fn review_flags(&self) -> Result<Vec<ComplianceViolation>, StoreError>;
}

/// Per-period team volume and revenue.
#[async_trait]
pub trait VolumeLedger: Send + Sync {
    /// Credit `amount` to each beneficiary's team volume for `period` and to
    /// the period revenue. Keyed by transaction: a second credit of the same
    /// transaction is ignored and returns false.
    async fn credit_team_volume(
        &self,
        transaction_id: &TransactionId,
        period: PeriodId,
        beneficiaries: &[MemberId],
        amount: Decimal,
    ) -> Result<bool, StoreError>;

    /// Zero when nothing was credited.
    async fn team_volume(&self, member_id: &MemberId, period: PeriodId)
        -> Result<Decimal, StoreError>;

    /// Non-zero volumes of the period, sorted by member id.
    async fn team_volumes_for_period(&self, period: PeriodId)
        -> Result<Vec<TeamVolume>, StoreError>;

    async fn period_revenue(&self, period: PeriodId) -> Result<Decimal, StoreError>;
}

/// The writes of one tier evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationCommit<'a> {
    pub qualification: &'a TierQualification,
    /// When set, also recorded and applied to the member's tier.
    pub change: Option<&'a TierChange>,
    pub achievement_bonus: Option<&'a Commission>,
}

#[async_trait]
pub trait QualificationStore: Send + Sync {
    /// Latest row that has not been superseded.
    async fn current_qualification(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<TierQualification>, StoreError>;

    /// Upsert the row for `(member, tier)` and supersede the member's rows for
    /// other tiers.
    async fn save_qualification(&self, qualification: &TierQualification)
        -> Result<(), StoreError>;

    /// Every row ever written for the member, superseded ones included.
    async fn qualification_history(
        &self,
        member_id: &MemberId,
    ) -> Result<Vec<TierQualification>, StoreError>;

    /// Write the bonus, the tier change, the member's new tier and the
    /// qualification row as one unit. Nothing is written when any part fails.
    async fn commit_evaluation(&self, commit: EvaluationCommit<'_>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TierChangeSink: Send + Sync {
    /// Idempotent per member and period. Returns true when new.
    async fn record_tier_change(&self, change: &TierChange) -> Result<bool, StoreError>;

    async fn tier_changes_for(&self, member_id: &MemberId) -> Result<Vec<TierChange>, StoreError>;
}

/// Everything the engine reads and writes, behind one handle.
pub trait EngineStore:
    MemberDirectory + MatrixStore + CommissionSink + VolumeLedger + QualificationStore + TierChangeSink
{
}

impl<T> EngineStore for T where
    T: MemberDirectory
        + MatrixStore
        + CommissionSink
        + VolumeLedger
        + QualificationStore
        + TierChangeSink
{
}

/// Loads the tier table from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonTierProvider {
    path: PathBuf,
}

impl JsonTierProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TierProvider for JsonTierProvider {
    async fn load_tiers(&self) -> Result<TierTable, StoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        TierTable::from_json_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }
}

/// Fixed tier table, for tests and embedding.
#[derive(Debug, Clone)]
pub struct StaticTierProvider(pub TierTable);

#[async_trait]
impl TierProvider for StaticTierProvider {
    async fn load_tiers(&self) -> Result<TierTable, StoreError> {
        Ok(self.0.clone())
    }
}
