pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod store;

pub use config::{Config, EngineConfig};
pub use db::{init_db, Repository};
pub use domain::{
    Commission, CommissionStatus, CommissionType, Decimal, Member, MemberId, PeriodId, TierTable,
    TimeMs, Transaction,
};
pub use error::EngineError;
pub use orchestration::{Engine, NewMember, PlacementOutcome};
pub use store::{EngineStore, JsonTierProvider, MemoryStore, StaticTierProvider};
