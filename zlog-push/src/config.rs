//! Process configuration from environment variables.
//!
//! Supported variables:
//! - `DATABASE_URL`
//! - `PUSH_DB_MAX_CONNECTIONS`
//! - `PUSH_MODE` (`all`, `relay` or `drain`)
//! - `PUSH_BASELINE_ID`
//! - `PUSH_RELAY_INTERVAL_SECS`, `PUSH_RELAY_BATCH_SIZE`
//! - `PUSH_DRAIN_BATCH_SIZE`, `PUSH_POLL_INTERVAL_MS`
//! - `PUSH_LAG_WARN_THRESHOLD`, `PUSH_HEALTH_INTERVAL_SECS`
//! - `PUSH_SHUTDOWN_TIMEOUT_SECS`
//! - `PUSH_LOG_DIR`, `RUST_LOG`

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{DrainConfig, RelayConfig};
use crate::{Error, Result};

/// Watermark used when a stage has never persisted one.
pub const DEFAULT_BASELINE_ID: i64 = 28_000_000;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:zlog.db?mode=rwc";

/// Which pipeline stages this process runs.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    All,
    Relay,
    Drain,
}

impl RunMode {
    pub fn runs_relay(self) -> bool {
        matches!(self, Self::All | Self::Relay)
    }

    pub fn runs_drain(self) -> bool {
        matches!(self, Self::All | Self::Drain)
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Pool size override; derived from CPU count when unset.
    pub max_connections: Option<u32>,
    pub mode: RunMode,
    pub baseline_id: i64,
    pub relay_interval: Duration,
    pub relay_batch_size: i64,
    pub drain_batch_size: i64,
    pub poll_interval: Duration,
    /// Queue lag above which the pipeline reports itself degraded.
    pub lag_warn_threshold: i64,
    pub health_interval: Duration,
    pub shutdown_timeout: Duration,
    pub log_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: None,
            mode: RunMode::All,
            baseline_id: DEFAULT_BASELINE_ID,
            relay_interval: Duration::from_secs(10),
            relay_batch_size: 1000,
            drain_batch_size: 500,
            poll_interval: Duration::from_millis(1000),
            lag_warn_threshold: 10_000,
            health_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            log_dir: None,
            log_filter: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup; unset and blank variables take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let config = Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_opt(&get, "PUSH_DB_MAX_CONNECTIONS")?,
            mode: parse_opt(&get, "PUSH_MODE")?.unwrap_or(defaults.mode),
            baseline_id: parse_opt(&get, "PUSH_BASELINE_ID")?.unwrap_or(defaults.baseline_id),
            relay_interval: parse_opt(&get, "PUSH_RELAY_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.relay_interval),
            relay_batch_size: parse_opt(&get, "PUSH_RELAY_BATCH_SIZE")?
                .unwrap_or(defaults.relay_batch_size),
            drain_batch_size: parse_opt(&get, "PUSH_DRAIN_BATCH_SIZE")?
                .unwrap_or(defaults.drain_batch_size),
            poll_interval: parse_opt(&get, "PUSH_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            lag_warn_threshold: parse_opt(&get, "PUSH_LAG_WARN_THRESHOLD")?
                .unwrap_or(defaults.lag_warn_threshold),
            health_interval: parse_opt(&get, "PUSH_HEALTH_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_interval),
            shutdown_timeout: parse_opt(&get, "PUSH_SHUTDOWN_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            log_dir: get("PUSH_LOG_DIR").map(PathBuf::from),
            log_filter: get("RUST_LOG"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == Some(0) {
            return Err(Error::config("PUSH_DB_MAX_CONNECTIONS must be positive"));
        }
        if self.relay_batch_size <= 0 {
            return Err(Error::config("PUSH_RELAY_BATCH_SIZE must be positive"));
        }
        if self.drain_batch_size <= 0 {
            return Err(Error::config("PUSH_DRAIN_BATCH_SIZE must be positive"));
        }
        if self.relay_interval.is_zero() {
            return Err(Error::config("PUSH_RELAY_INTERVAL_SECS must be positive"));
        }
        if self.health_interval.is_zero() {
            return Err(Error::config("PUSH_HEALTH_INTERVAL_SECS must be positive"));
        }
        if self.baseline_id < 0 {
            return Err(Error::config("PUSH_BASELINE_ID must not be negative"));
        }
        Ok(())
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            baseline_id: self.baseline_id,
            batch_size: self.relay_batch_size,
            interval: self.relay_interval,
        }
    }

    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            baseline_id: self.baseline_id,
            batch_size: self.drain_batch_size,
            poll_interval: self.poll_interval,
        }
    }
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::config(format!("invalid {key}={raw:?}: {e}")))
        })
        .transpose()
}
