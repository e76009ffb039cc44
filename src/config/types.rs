//! Configuration data model.
//!
//! The TOML file deserializes straight into [`Config`]; every section and
//! field is optional and falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::{
    DEFAULT_BASE_URL, DEFAULT_LATEST_EVERY, DEFAULT_MAX_TOTAL_MS, DEFAULT_NO_MESSAGE_TIMEOUT_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_START_DELAY_MS, DEFAULT_QUIET_TIMEOUT_MS,
    DEFAULT_RECONCILE_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_STALL_TIMEOUT_MS,
    DEFAULT_STATUS_EVERY,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub finalizer: FinalizerConfig,
    pub stream: StreamConfig,
}

/// `[server]`: where the assistant service lives.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    /// Project directory sent as `?directory=` on every request.
    pub directory: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            directory: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// `[finalizer]`: poll loop budgets and cadences.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FinalizerConfig {
    pub poll_interval_ms: u64,
    pub quiet_timeout_ms: u64,
    pub max_total_ms: u64,
    /// 0 disables the no-message budget.
    pub no_message_timeout_ms: u64,
    pub latest_every: u32,
    pub status_every: u32,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            quiet_timeout_ms: DEFAULT_QUIET_TIMEOUT_MS,
            max_total_ms: DEFAULT_MAX_TOTAL_MS,
            no_message_timeout_ms: DEFAULT_NO_MESSAGE_TIMEOUT_MS,
            latest_every: DEFAULT_LATEST_EVERY,
            status_every: DEFAULT_STATUS_EVERY,
        }
    }
}

/// `[stream]`: event consumer behavior.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// 0 disables stall detection.
    pub stall_timeout_ms: u64,
    /// Run the finalizer alongside the stream, not only as a fallback.
    pub concurrent_poll: bool,
    pub poll_start_delay_ms: u64,
    pub reconcile_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
            concurrent_poll: false,
            poll_start_delay_ms: DEFAULT_POLL_START_DELAY_MS,
            reconcile_timeout_ms: DEFAULT_RECONCILE_TIMEOUT_MS,
        }
    }
}

/// Where the file layer of the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Explicit(PathBuf),
    Local(PathBuf),
    Global(PathBuf),
    BuiltInDefaults,
}

/// Non-fatal adjustments made while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    pub warnings: Vec<String>,
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub origin: ConfigOrigin,
    pub diagnostics: ConfigDiagnostics,
}
