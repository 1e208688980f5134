use crate::config::EngineConfig;
use crate::domain::TierTable;
use crate::engine::{BonusCalculator, CommissionCalculator, QualificationMachine};
use crate::error::EngineError;
use crate::orchestration::locks::KeyedLocks;
use crate::store::{EngineStore, TierProvider};
use std::sync::{Arc, RwLock};

/// Service facade combining store reads, the pure engines and store writes.
///
/// Tiers are loaded once at construction and reused for every calculation
/// until `reload_tiers` is called.
pub struct Engine {
    pub(super) store: Arc<dyn EngineStore>,
    tier_provider: Arc<dyn TierProvider>,
    tiers: RwLock<Arc<TierTable>>,
    pub(super) config: EngineConfig,
    /// Per root sponsor: placement into one matrix is serialized.
    pub(super) placement_locks: KeyedLocks,
    /// Per member: team-volume writes and qualification evaluations.
    pub(super) member_locks: KeyedLocks,
}

impl Engine {
    pub async fn new(
        store: Arc<dyn EngineStore>,
        tier_provider: Arc<dyn TierProvider>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let tiers = tier_provider.load_tiers().await?;
        tracing::info!(tiers = tiers.len(), "Tier table loaded");
        Ok(Self {
            store,
            tier_provider,
            tiers: RwLock::new(Arc::new(tiers)),
            config,
            placement_locks: KeyedLocks::new(),
            member_locks: KeyedLocks::new(),
        })
    }

    /// Re-read the tier table; calculations already running keep their snapshot.
    pub async fn reload_tiers(&self) -> Result<(), EngineError> {
        let tiers = Arc::new(self.tier_provider.load_tiers().await?);
        tracing::info!(tiers = tiers.len(), "Tier table reloaded");
        *self.tiers.write().unwrap_or_else(|e| e.into_inner()) = tiers;
        Ok(())
    }

    pub fn tiers(&self) -> Arc<TierTable> {
        self.tiers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    pub(super) fn commission_calculator(&self) -> CommissionCalculator {
        CommissionCalculator::new(self.config.clone(), self.tiers())
    }

    pub(super) fn bonus_calculator(&self) -> BonusCalculator {
        BonusCalculator::new(self.config.clone(), self.tiers())
    }

    pub(super) fn qualification_machine(&self) -> QualificationMachine {
        QualificationMachine::new(self.config.clone(), self.tiers())
    }
}
