//! Configuration management for the sync runtime.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use checklist_engine::BackoffPolicy;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the checklist API
    pub api_url: String,
    /// Bearer token for the checklist API
    pub api_token: Option<String>,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Periodic drain interval
    pub drain_interval: Duration,
    /// Upper bound for a single remote submission
    pub request_timeout: Duration,
    /// Retry delays after transient failures
    pub backoff: BackoffPolicy,
    /// How long a cached checklist is served without refetching
    pub cache_ttl: Duration,
    /// Detect stale submissions with a read before each write
    pub precheck_stale: bool,
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("CHECKLIST_API_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingApiUrl)?;

        let api_token = lookup("CHECKLIST_API_TOKEN").filter(|token| !token.is_empty());

        let database_path = lookup("CHECKLIST_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("checklist-sync.db"));

        let drain_interval = number(&lookup, "CHECKLIST_DRAIN_INTERVAL_SECS", 30)?;
        let request_timeout = number(&lookup, "CHECKLIST_REQUEST_TIMEOUT_SECS", 15)?;
        let backoff_base = number(&lookup, "CHECKLIST_BACKOFF_BASE_MS", 1_000)?;
        let backoff_max = number(&lookup, "CHECKLIST_BACKOFF_MAX_MS", 300_000)?;
        let cache_ttl = number(&lookup, "CHECKLIST_CACHE_TTL_SECS", 300)?;

        let precheck_stale = match lookup("CHECKLIST_PRECHECK_STALE") {
            None => false,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidFlag {
                        name: "CHECKLIST_PRECHECK_STALE",
                        value,
                    })
                }
            },
        };

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token,
            database_path,
            drain_interval: Duration::from_secs(drain_interval.max(1)),
            request_timeout: Duration::from_secs(request_timeout.max(1)),
            backoff: BackoffPolicy::new(backoff_base, backoff_max),
            cache_ttl: Duration::from_secs(cache_ttl),
            precheck_stale,
        })
    }

    /// Runtime options for the engine.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            drain_interval: self.drain_interval,
            request_timeout: self.request_timeout,
            backoff: self.backoff,
            cache_ttl: self.cache_ttl,
        }
    }
}

fn number<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub drain_interval: Duration,
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub cache_ttl: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            backoff: BackoffPolicy::default(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CHECKLIST_API_URL environment variable is required")]
    MissingApiUrl,

    #[error("Invalid value for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Invalid flag for {name}: {value}")]
    InvalidFlag { name: &'static str, value: String },
}
