use anyhow::{bail, Context};
use netengine::store::{EngineStore, JsonTierProvider, TierProvider};
use netengine::{config::Config, db::init_db, Engine, PeriodId, Repository};
use std::sync::Arc;

const USAGE: &str = "usage: netengine <tiers|team-volume|all> <YYYY-MM>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (sweep, period) = match args.as_slice() {
        [sweep, period] => (sweep.as_str(), period),
        _ => bail!(USAGE),
    };
    if !matches!(sweep, "tiers" | "team-volume" | "all") {
        bail!("unknown sweep {:?}; {}", sweep, USAGE);
    }
    let period: PeriodId = period
        .parse()
        .with_context(|| format!("invalid period {:?}", period))?;

    let config = Config::from_env().context("configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database {}", config.database_path))?;
    let store: Arc<dyn EngineStore> = Arc::new(Repository::new(pool));
    let tiers: Arc<dyn TierProvider> = Arc::new(JsonTierProvider::new(&config.tiers_file));
    let engine = Engine::new(store, tiers, config.engine.clone())
        .await
        .context("failed to load tier table")?;

    tracing::info!(sweep, period = %period, "Running scheduled sweep");

    if matches!(sweep, "tiers" | "all") {
        let report = engine.run_tier_evaluation_sweep(period).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if matches!(sweep, "team-volume" | "all") {
        let report = engine.run_team_volume_bonus_sweep(period).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
