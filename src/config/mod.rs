//! Configuration management.
//!
//! Configuration is static: it is read once at startup and never reloaded.
//! Every section has defaults, so an empty file (or no file at all) yields
//! the built-in adapters and policies.

mod file_config;

pub use file_config::{default_config_path, find_config_file, load_or_default, save_config};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::lookup::ExecutionMode;
use crate::models::QueryKind;
use crate::sources::BUILTIN_SOURCES;
use crate::utils::{AcquireMode, TransportError};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lookup: LookupConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Adapters to build, one entry per adapter
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Per-kind fallback policies; kinds without one use capable adapters by priority
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup: LookupConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            sources: default_sources(),
            policies: default_policies(),
        }
    }
}

/// Lookup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Global deadline applied when the caller does not give one
    #[serde(default = "default_deadline_ms")]
    pub global_deadline_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            global_deadline_ms: default_deadline_ms(),
        }
    }
}

impl LookupConfig {
    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }
}

fn default_deadline_ms() -> u64 {
    15_000
}

/// Shared HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// One `[[sources]]` entry. Unset fields fall back to the adapter's built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub confidence: Option<i32>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub mailto: Option<String>,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl SourceConfig {
    /// An enabled entry with every setting left to the built-in defaults
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority: None,
            confidence: None,
            base_url: None,
            api_key: None,
            mailto: None,
            rate_limit: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Token bucket parameters for one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
    #[serde(default)]
    pub mode: AcquireMode,
}

/// One `[[policies]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub kind: QueryKind,
    #[serde(default)]
    pub mode: ExecutionMode,
    pub sources: Vec<String>,
}

impl PolicyConfig {
    pub fn new(kind: QueryKind, mode: ExecutionMode, sources: &[&str]) -> Self {
        Self {
            kind,
            mode,
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Every built-in adapter with its defaults spelled out
pub fn default_sources() -> Vec<SourceConfig> {
    BUILTIN_SOURCES
        .iter()
        .map(|builtin| SourceConfig {
            priority: Some(builtin.priority),
            confidence: Some(builtin.confidence),
            base_url: Some(builtin.base_url.to_string()),
            rate_limit: Some(RateLimitConfig {
                capacity: builtin.capacity,
                refill_per_second: builtin.refill_per_second,
                mode: AcquireMode::Wait,
            }),
            ..SourceConfig::named(builtin.name)
        })
        .collect()
}

pub fn default_policies() -> Vec<PolicyConfig> {
    let chemistry = ["pubchem", "pubchem_rest"];
    vec![
        PolicyConfig::new(QueryKind::Name, ExecutionMode::Sequential, &chemistry),
        PolicyConfig::new(QueryKind::Formula, ExecutionMode::Sequential, &chemistry),
        PolicyConfig::new(QueryKind::Smiles, ExecutionMode::Sequential, &chemistry),
        PolicyConfig::new(
            QueryKind::AbstractText,
            ExecutionMode::Parallel,
            &["pubtator", "semantic_scholar", "openalex", "paperlist"],
        ),
        PolicyConfig::new(
            QueryKind::Identifier,
            ExecutionMode::Sequential,
            &["semantic_scholar", "openalex", "crossref"],
        ),
    ]
}

impl Config {
    /// Check cross-references and numeric ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !BUILTIN_SOURCES.iter().any(|b| b.name == source.name) {
                return Err(ConfigError::UnknownSource(source.name.clone()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            if let Some(limit) = &source.rate_limit {
                if limit.capacity == 0 {
                    return Err(ConfigError::InvalidRateLimit {
                        source_name: source.name.clone(),
                        reason: "capacity must be at least 1".to_string(),
                    });
                }
                if !limit.refill_per_second.is_finite() || limit.refill_per_second <= 0.0 {
                    return Err(ConfigError::InvalidRateLimit {
                        source_name: source.name.clone(),
                        reason: "refill_per_second must be a positive number".to_string(),
                    });
                }
                if Duration::try_from_secs_f64(1.0 / limit.refill_per_second).is_err() {
                    return Err(ConfigError::InvalidRateLimit {
                        source_name: source.name.clone(),
                        reason: "refill_per_second is too small".to_string(),
                    });
                }
            }
        }

        let mut kinds = HashSet::new();
        for policy in &self.policies {
            if !kinds.insert(policy.kind) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "more than one policy for kind '{}'",
                    policy.kind
                )));
            }
            let mut names = HashSet::new();
            for name in &policy.sources {
                if !seen.contains(name.as_str()) {
                    return Err(ConfigError::UnknownSource(name.clone()));
                }
                if !names.insert(name.as_str()) {
                    return Err(ConfigError::InvalidPolicy(format!(
                        "'{}' listed twice in the {} policy",
                        name, policy.kind
                    )));
                }
            }
        }

        if self.lookup.global_deadline_ms == 0 {
            return Err(ConfigError::InvalidPolicy(
                "global_deadline_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Source entry by adapter name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("source '{0}' is configured more than once")]
    DuplicateSource(String),

    #[error("invalid rate limit for '{source_name}': {reason}")]
    InvalidRateLimit { source_name: String, reason: String },

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] TransportError),
}

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .build()?;

    let config: Config = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
