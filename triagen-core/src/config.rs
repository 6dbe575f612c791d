//! Engine configuration
//!
//! Loaded from TOML, then overridden by `TRIAGEN_*` environment variables.
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! response_check_delay_secs = 120
//! journal_path = "/var/lib/triagen/escalations.json"
//! teams = ["DevOps", "Security"]
//!
//! [sla_hours]
//! critical = 1
//! high = 4
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::DEFAULT_OBSERVER_BUFFER;
use crate::model::Severity;

pub const ENV_RESPONSE_DELAY_SECS: &str = "TRIAGEN_RESPONSE_DELAY_SECS";
pub const ENV_JOURNAL_PATH: &str = "TRIAGEN_JOURNAL_PATH";
pub const ENV_OBSERVER_BUFFER: &str = "TRIAGEN_OBSERVER_BUFFER";
pub const ENV_UPDATE_RETRY_LIMIT: &str = "TRIAGEN_UPDATE_RETRY_LIMIT";
pub const ENV_PRESIGN_TTL_SECS: &str = "TRIAGEN_PRESIGN_TTL_SECS";
pub const ENV_BLOB_BUCKET: &str = "TRIAGEN_BLOB_BUCKET";

const DEFAULT_RESPONSE_DELAY_SECS: u64 = 120;
const DEFAULT_RETRY_LIMIT: u32 = 3;
const DEFAULT_PRESIGN_TTL_SECS: u64 = 900;
const DEFAULT_BLOB_BUCKET: &str = "triagen-attachments";

/// Teams created on first start
pub const DEFAULT_TEAMS: [&str; 6] = [
    "DevOps",
    "Backend Platform",
    "Frontend/UI",
    "SRE (Site Reliability)",
    "Security",
    "Customer Support",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// SLA window per severity, in hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaHours {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for SlaHours {
    fn default() -> Self {
        Self {
            critical: Severity::Critical.default_sla_hours(),
            high: Severity::High.default_sla_hours(),
            medium: Severity::Medium.default_sla_hours(),
            low: Severity::Low.default_sla_hours(),
        }
    }
}

impl SlaHours {
    pub fn hours(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay of the fixed response check
    pub response_check_delay_secs: u64,
    /// Escalation journal; `None` keeps pending checks in memory only
    pub journal_path: Option<PathBuf>,
    /// Per-observer channel capacity
    pub observer_buffer: usize,
    /// Attempts for an update that carries no expected version
    pub update_retry_limit: u32,
    /// Attempts for an escalation that loses a version race
    pub escalation_retry_limit: u32,
    pub presign_ttl_secs: u64,
    pub blob_bucket: String,
    /// Team names seeded on start
    pub teams: Vec<String>,
    /// Kept last so it serializes as a trailing TOML table
    pub sla_hours: SlaHours,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_check_delay_secs: DEFAULT_RESPONSE_DELAY_SECS,
            journal_path: None,
            observer_buffer: DEFAULT_OBSERVER_BUFFER,
            update_retry_limit: DEFAULT_RETRY_LIMIT,
            escalation_retry_limit: DEFAULT_RETRY_LIMIT,
            presign_ttl_secs: DEFAULT_PRESIGN_TTL_SECS,
            blob_bucket: DEFAULT_BLOB_BUCKET.to_string(),
            teams: DEFAULT_TEAMS.iter().map(|t| t.to_string()).collect(),
            sla_hours: SlaHours::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_RESPONSE_DELAY_SECS) {
            self.response_check_delay_secs = parse_env(ENV_RESPONSE_DELAY_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_JOURNAL_PATH) {
            self.journal_path = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_OBSERVER_BUFFER) {
            self.observer_buffer = parse_env(ENV_OBSERVER_BUFFER, value)?;
        }
        if let Some(value) = lookup(ENV_UPDATE_RETRY_LIMIT) {
            self.update_retry_limit = parse_env(ENV_UPDATE_RETRY_LIMIT, value)?;
        }
        if let Some(value) = lookup(ENV_PRESIGN_TTL_SECS) {
            self.presign_ttl_secs = parse_env(ENV_PRESIGN_TTL_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_BLOB_BUCKET) {
            self.blob_bucket = value;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observer_buffer == 0 {
            return Err(ConfigError::Invalid("observer_buffer must be > 0".to_string()));
        }
        if self.update_retry_limit == 0 || self.escalation_retry_limit == 0 {
            return Err(ConfigError::Invalid("retry limits must be > 0".to_string()));
        }
        for severity in Severity::ALL {
            if self.sla_hours.hours(severity) <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "sla_hours.{} must be > 0",
                    severity.to_string().to_lowercase()
                )));
            }
        }
        if self.blob_bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("blob_bucket must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn response_check_delay(&self) -> Duration {
        Duration::from_secs(self.response_check_delay_secs)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    /// SLA window for a severity
    pub fn sla_window(&self, severity: Severity) -> chrono::Duration {
        chrono::Duration::hours(self.sla_hours.hours(severity))
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}
