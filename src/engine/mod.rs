//! Pure computation engines: no I/O, deterministic given their inputs.

pub mod bonus;
pub mod commission;
pub mod compliance;
pub mod placement;
pub mod qualification;

pub use bonus::{BonusCalculator, BONUS_LEVEL};
pub use commission::{CommissionBatch, CommissionCalculator, SkipReason, SkippedAncestor};
pub use compliance::{check_cap, ComplianceScope, ComplianceViolation};
pub use placement::MatrixTree;
pub use qualification::{QualificationMachine, TierDecision, TierEvaluation};
