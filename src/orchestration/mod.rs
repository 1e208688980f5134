//! Service layer: store reads, the pure engines, and store writes, with the
//! locking and retry rules around them.

pub mod bonus_sweep;
pub mod commissions;
pub mod engine;
pub mod locks;
pub mod placement;
pub mod qualification;

pub use bonus_sweep::BonusSweepReport;
pub use commissions::{CatchUpReport, TransactionFailure, TransactionOutcome};
pub use engine::Engine;
pub use locks::{KeyGuard, KeyedLocks};
pub use placement::{NewMember, PlacementOutcome, Registration};
pub use qualification::{DecisionCounts, MemberFailure, TierSweepReport};
