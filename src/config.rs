use crate::domain::{CommissionLimits, CommissionType, Decimal, MemberId};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub tiers_file: String,
    pub engine: EngineConfig,
}

/// Tunables of the placement, commission and qualification engines.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Children per matrix position.
    pub matrix_width: u32,
    pub max_matrix_levels: u32,
    /// Sponsor-chain depth that earns referral commissions.
    pub commission_levels: u32,
    pub referral_limits: CommissionLimits,
    /// Limits for team-volume, achievement and leadership bonuses.
    pub bonus_limits: CommissionLimits,
    /// Max total commissions as a percentage of revenue.
    pub compliance_cap_percent: Decimal,
    /// Consecutive qualifying months before a tier becomes permanent.
    pub permanence_months: u32,
    /// House account used when a registration carries no sponsor.
    pub default_sponsor_id: Option<MemberId>,
    pub stats_timeout: Duration,
    pub sweep_concurrency: usize,
    pub placement_max_retries: u32,
    /// Upline depth credited with team volume per transaction.
    pub team_volume_depth: u32,
    /// Sorted by descending `min_score`.
    pub performance_bands: Vec<PerformanceBand>,
}

/// Performance score band: scores >= `min_score` earn `multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceBand {
    pub min_score: Decimal,
    pub multiplier: Decimal,
}

impl EngineConfig {
    pub fn limits_for(&self, commission_type: CommissionType) -> &CommissionLimits {
        match commission_type {
            CommissionType::Referral => &self.referral_limits,
            CommissionType::TeamVolume
            | CommissionType::AchievementBonus
            | CommissionType::LeadershipBonus => &self.bonus_limits,
        }
    }

    /// Multiplier for a performance score; members without a score get 1.0.
    pub fn performance_multiplier(&self, score: Option<Decimal>) -> Decimal {
        let Some(score) = score else {
            return Decimal::one();
        };
        self.performance_bands
            .iter()
            .find(|band| score >= band.min_score)
            .map(|band| band.multiplier)
            .unwrap_or_else(Decimal::one)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be at least 1".to_string(),
                ))
            } else {
                Ok(())
            }
        };
        positive("MATRIX_WIDTH", self.matrix_width as u64)?;
        positive("MATRIX_MAX_LEVELS", self.max_matrix_levels as u64)?;
        positive("COMMISSION_LEVELS", self.commission_levels as u64)?;
        positive("PERMANENCE_MONTHS", self.permanence_months as u64)?;
        positive("SWEEP_CONCURRENCY", self.sweep_concurrency as u64)?;
        positive("PLACEMENT_MAX_RETRIES", self.placement_max_retries as u64)?;
        positive("TEAM_VOLUME_DEPTH", self.team_volume_depth as u64)?;

        // Row offsets of the deepest level must fit in a u64.
        if u64::from(self.matrix_width)
            .checked_pow(self.max_matrix_levels)
            .is_none()
        {
            return Err(ConfigError::InvalidValue(
                "MATRIX_WIDTH".to_string(),
                format!(
                    "{} is too wide for {} levels",
                    self.matrix_width, self.max_matrix_levels
                ),
            ));
        }

        for (key, value) in [
            ("MIN_COMMISSION", self.referral_limits.floor),
            ("MAX_COMMISSION_PCT", self.referral_limits.ceiling_percent),
            ("COMPLIANCE_CAP_PCT", self.compliance_cap_percent),
        ] {
            if value.is_negative() {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let dec = |s: &str| Decimal::from_str_canonical(s).unwrap_or_default();
        EngineConfig {
            matrix_width: 3,
            max_matrix_levels: 7,
            commission_levels: 5,
            referral_limits: CommissionLimits::new(Decimal::from_i64(100), Decimal::from_i64(20)),
            bonus_limits: CommissionLimits::new(Decimal::zero(), Decimal::hundred()),
            compliance_cap_percent: Decimal::from_i64(25),
            permanence_months: 3,
            default_sponsor_id: None,
            stats_timeout: Duration::from_millis(5000),
            sweep_concurrency: 8,
            placement_max_retries: 5,
            team_volume_depth: 50,
            performance_bands: vec![
                PerformanceBand {
                    min_score: dec("9.0"),
                    multiplier: dec("1.3"),
                },
                PerformanceBand {
                    min_score: dec("8.0"),
                    multiplier: dec("1.2"),
                },
                PerformanceBand {
                    min_score: dec("7.0"),
                    multiplier: dec("1.1"),
                },
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let tiers_file = env_map
            .get("TIERS_FILE")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("TIERS_FILE".to_string()))?;

        let defaults = EngineConfig::default();

        let referral_limits = CommissionLimits::new(
            parse_or(&env_map, "MIN_COMMISSION", defaults.referral_limits.floor)?,
            parse_or(
                &env_map,
                "MAX_COMMISSION_PCT",
                defaults.referral_limits.ceiling_percent,
            )?,
        );

        let default_sponsor_id = env_map
            .get("DEFAULT_SPONSOR_ID")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(MemberId::new);

        let stats_timeout_ms: u64 = parse_or(
            &env_map,
            "STATS_TIMEOUT_MS",
            defaults.stats_timeout.as_millis() as u64,
        )?;

        let engine = EngineConfig {
            matrix_width: parse_or(&env_map, "MATRIX_WIDTH", defaults.matrix_width)?,
            max_matrix_levels: parse_or(&env_map, "MATRIX_MAX_LEVELS", defaults.max_matrix_levels)?,
            commission_levels: parse_or(&env_map, "COMMISSION_LEVELS", defaults.commission_levels)?,
            referral_limits,
            compliance_cap_percent: parse_or(
                &env_map,
                "COMPLIANCE_CAP_PCT",
                defaults.compliance_cap_percent,
            )?,
            permanence_months: parse_or(&env_map, "PERMANENCE_MONTHS", defaults.permanence_months)?,
            default_sponsor_id,
            stats_timeout: Duration::from_millis(stats_timeout_ms),
            sweep_concurrency: parse_or(&env_map, "SWEEP_CONCURRENCY", defaults.sweep_concurrency)?,
            placement_max_retries: parse_or(
                &env_map,
                "PLACEMENT_MAX_RETRIES",
                defaults.placement_max_retries,
            )?,
            team_volume_depth: parse_or(&env_map, "TEAM_VOLUME_DEPTH", defaults.team_volume_depth)?,
            ..defaults
        };
        engine.validate()?;

        Ok(Config {
            database_path,
            tiers_file,
            engine,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("cannot parse {:?}", raw))
        }),
    }
}
