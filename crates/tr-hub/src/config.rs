//! # Engine Configuration
//!
//! Policy knobs for the query path. All values are enforced, not advisory:
//! the executor rejects wait timeouts above `max_wait_timeout_secs`, clamps
//! limits to `max_limit`, and the provider sweeps idle cursors on the
//! configured cadence.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Upper bound on a request's tail-wait, in seconds.
    #[serde(default = "default_max_wait_timeout")]
    pub max_wait_timeout_secs: i32,

    /// Upper bound on records returned per call.
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,

    /// How long a released cursor stays warm before eviction.
    #[serde(default = "default_cursor_idle")]
    pub cursor_idle_secs: u64,

    /// Cadence of the idle-eviction sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Parked payload buffers in the RPC byte pool.
    #[serde(default = "default_pool_buffers")]
    pub pool_buffers: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_wait_timeout_secs: 60,
            max_limit: 10_000,
            cursor_idle_secs: 60,
            sweep_interval_secs: 10,
            pool_buffers: 64,
        }
    }
}

fn default_max_wait_timeout() -> i32 {
    60
}
fn default_max_limit() -> i64 {
    10_000
}
fn default_cursor_idle() -> u64 {
    60
}
fn default_sweep_interval() -> u64 {
    10
}
fn default_pool_buffers() -> usize {
    64
}

impl HubConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_wait_timeout_secs < 0 {
            return Err(ConfigError::Invalid(
                "max_wait_timeout_secs must be non-negative".into(),
            ));
        }
        if self.max_limit < 0 {
            return Err(ConfigError::Invalid("max_limit must be non-negative".into()));
        }
        Ok(())
    }

    pub fn cursor_idle(&self) -> Duration {
        Duration::from_secs(self.cursor_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config {0}: {1}")]
    Read(String, String),
    #[error("could not parse config {0}: {1}")]
    Parse(String, String),
    #[error("invalid config: {0}")]
    Invalid(String),
}
