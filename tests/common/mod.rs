#![allow(dead_code)]

use netengine::domain::{
    InvestmentTier, MemberId, PeriodId, TierId, TierRequirements, TransactionId, TransactionType,
};
use netengine::store::{EngineStore, StaticTierProvider};
use netengine::{Decimal, Engine, EngineConfig, MemoryStore, NewMember, TierTable, TimeMs, Transaction};
use std::sync::Arc;

pub fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

pub fn id(s: &str) -> MemberId {
    MemberId::new(s)
}

#[allow(clippy::too_many_arguments)]
fn tier(
    id: &str,
    rank: u32,
    rates: &[&str],
    multiplier: &str,
    volume_bonus: (&str, &str),
    achievement: &str,
    leadership: &str,
    requirements: (u32, &str),
) -> InvestmentTier {
    InvestmentTier {
        id: TierId::new(id),
        name: id.to_uppercase(),
        rank,
        level_rates: rates.iter().map(|r| d(r)).collect(),
        tier_multiplier: d(multiplier),
        team_volume_bonus_rate: d(volume_bonus.0),
        team_volume_bonus_threshold: d(volume_bonus.1),
        achievement_bonus: d(achievement),
        leadership_bonus_rate: d(leadership),
        requirements: TierRequirements {
            min_referrals: requirements.0,
            min_team_volume: d(requirements.1),
        },
    }
}

/// bronze (entry) < silver < gold.
pub fn tiers() -> TierTable {
    TierTable::new(vec![
        tier("bronze", 0, &["10", "5", "3", "2", "1"], "1.0", ("1", "10000"), "0", "0", (0, "0")),
        tier("silver", 1, &["12", "6", "4", "2", "1"], "1.2", ("2", "20000"), "500", "5", (3, "10000")),
        tier("gold", 2, &["15", "8", "5", "3", "2"], "1.5", ("3", "50000"), "1500", "10", (5, "50000")),
    ])
    .unwrap()
}

pub fn period() -> PeriodId {
    "2026-03".parse().unwrap()
}

/// Midday on the 10th of `period`.
pub fn in_period(period: PeriodId) -> TimeMs {
    TimeMs::new(period.start().as_ms() + 9 * 86_400_000 + 43_200_000)
}

pub async fn engine_with(store: Arc<dyn EngineStore>, config: EngineConfig) -> Engine {
    Engine::new(store, Arc::new(StaticTierProvider(tiers())), config)
        .await
        .unwrap()
}

pub async fn memory_engine() -> (Arc<MemoryStore>, Engine) {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), EngineConfig::default()).await;
    (store, engine)
}

pub async fn register(engine: &Engine, member: &str, sponsor: Option<&str>) {
    engine
        .register_member(NewMember::new(member, sponsor.map(MemberId::new), TimeMs::new(0)))
        .await
        .unwrap();
}

pub async fn register_with_tier(engine: &Engine, member: &str, sponsor: Option<&str>, tier: &str) {
    let mut new = NewMember::new(member, sponsor.map(MemberId::new), TimeMs::new(0));
    new.tier_id = Some(TierId::new(tier));
    engine.register_member(new).await.unwrap();
}

pub fn purchase(tx_id: &str, member: &str, amount: &str) -> Transaction {
    Transaction::confirmed(
        TransactionId::new(tx_id),
        id(member),
        d(amount),
        "USD",
        TransactionType::Investment,
        in_period(period()),
    )
}
