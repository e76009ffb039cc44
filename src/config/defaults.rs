//! Default configuration constants.
//!
//! Budgets are in milliseconds so env overrides and TOML share one unit.

/// Local opencode-style server.
pub(super) const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4096";
/// Per-request HTTP timeout for query calls.
pub(super) const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

pub(super) const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub(super) const DEFAULT_QUIET_TIMEOUT_MS: u64 = 20_000;
pub(super) const DEFAULT_MAX_TOTAL_MS: u64 = 180_000;
/// Zero disables the no-message budget.
pub(super) const DEFAULT_NO_MESSAGE_TIMEOUT_MS: u64 = 30_000;
pub(super) const DEFAULT_LATEST_EVERY: u32 = 3;
pub(super) const DEFAULT_STATUS_EVERY: u32 = 4;

/// Zero disables stall detection.
pub(super) const DEFAULT_STALL_TIMEOUT_MS: u64 = 45_000;
pub(super) const DEFAULT_POLL_START_DELAY_MS: u64 = 2_000;
pub(super) const DEFAULT_RECONCILE_TIMEOUT_MS: u64 = 3_000;

/// Local config file name, also used under the global config root.
pub(super) const CONFIG_FILE_NAME: &str = "turnsync.toml";
pub(super) const CONFIG_DIR_NAME: &str = "turnsync";
