//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`TURNSYNC_BASE_URL`, `TURNSYNC_DIRECTORY`,
//!    `TURNSYNC_QUIET_TIMEOUT_MS`, `TURNSYNC_MAX_TOTAL_MS`,
//!    `TURNSYNC_NO_MESSAGE_TIMEOUT_MS`, `TURNSYNC_POLL_INTERVAL_MS`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./turnsync.toml in the current directory
//! 4. $XDG_CONFIG_HOME/turnsync/turnsync.toml (or ~/.config/turnsync/turnsync.toml)
//! 5. Built-in defaults

mod defaults;
mod env;
mod loader;
mod sources;
mod types;

pub use loader::{load_config, load_config_with_diagnostics};
pub use sources::config_root_dir;
pub use types::{
    Config, ConfigDiagnostics, ConfigOrigin, FinalizerConfig, LoadedConfig, ServerConfig,
    StreamConfig,
};
