//! Configuration management for the client.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tasksync_engine::{DEFAULT_MAX_REJECTED_ATTEMPTS, DEFAULT_PAGE_LIMIT};

/// Default per-call timeout for the remote service.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the task service
    pub api_url: String,
    /// Directory holding the persisted snapshot
    pub data_dir: PathBuf,
    /// Engine settings
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url =
            env::var("TASKSYNC_API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let data_dir = env::var("TASKSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".tasksync"));

        let page_limit = parse_var("TASKSYNC_PAGE_LIMIT", DEFAULT_PAGE_LIMIT)
            .map_err(|_| ConfigError::InvalidPageLimit)?;
        if page_limit == 0 {
            return Err(ConfigError::InvalidPageLimit);
        }

        let timeout_secs = parse_var(
            "TASKSYNC_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )
        .map_err(|_| ConfigError::InvalidTimeout)?;
        let request_timeout = checked_timeout(timeout_secs)?;

        let max_rejected_attempts =
            parse_var("TASKSYNC_MAX_REJECTED_ATTEMPTS", DEFAULT_MAX_REJECTED_ATTEMPTS)
                .map_err(|_| ConfigError::InvalidMaxAttempts)?;

        Ok(Self {
            api_url,
            data_dir,
            sync: SyncSettings {
                page_limit,
                request_timeout,
                max_rejected_attempts,
            },
        })
    }
}

/// Runtime settings of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Tasks per page
    pub page_limit: u32,
    /// Timeout applied to every remote call
    pub request_timeout: Duration,
    /// Attempts a rejected operation gets before it is parked
    pub max_rejected_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_limit: DEFAULT_PAGE_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_rejected_attempts: DEFAULT_MAX_REJECTED_ATTEMPTS,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, T::Err> {
    match env::var(name) {
        Ok(value) => value.trim().parse(),
        Err(_) => Ok(default),
    }
}

/// A zero timeout would expire every remote call at once.
fn checked_timeout(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidTimeout);
    }
    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TASKSYNC_PAGE_LIMIT value")]
    InvalidPageLimit,

    #[error("Invalid TASKSYNC_REQUEST_TIMEOUT_SECS value")]
    InvalidTimeout,

    #[error("Invalid TASKSYNC_MAX_REJECTED_ATTEMPTS value")]
    InvalidMaxAttempts,
}
