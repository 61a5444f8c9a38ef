use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_DUE_DAYS: i64 = 45;
/// Longest accepted payment delay, ten years.
pub const MAX_DUE_DAYS: i64 = 3650;

/// Runtime settings for the lifecycle engine and its binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Days between ticket emission and the default payment due date.
    pub default_due_days: i64,
    pub telemetry: TelemetryConfig,
    /// RocksDB directory; the in-memory backend is used when unset.
    pub db_path: Option<PathBuf>,
}

/// Tracing controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_due_days: DEFAULT_DUE_DAYS,
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
            db_path: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("PVFLOW_DUE_DAYS must be between 1 and {MAX_DUE_DAYS} days, got '{0}'")]
    InvalidDueDays(String),
}

impl EngineConfig {
    /// Loads `.env` if present, then reads the `PVFLOW_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_due_days = match lookup("PVFLOW_DUE_DAYS") {
            Some(raw) => parse_due_days(&raw)?,
            None => defaults.default_due_days,
        };
        let log_level = lookup("PVFLOW_LOG_LEVEL").unwrap_or(defaults.telemetry.log_level);
        let db_path = lookup("PVFLOW_DB_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            default_due_days,
            telemetry: TelemetryConfig { log_level },
            db_path,
        })
    }
}

pub fn parse_due_days(raw: &str) -> Result<i64, ConfigError> {
    match raw.trim().parse::<i64>() {
        Ok(days) if (1..=MAX_DUE_DAYS).contains(&days) => Ok(days),
        _ => Err(ConfigError::InvalidDueDays(raw.to_string())),
    }
}
