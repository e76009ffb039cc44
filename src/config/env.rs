//! Environment overrides.
//!
//! `TURNSYNC_*` variables win over every file source.

use crate::error::ConfigError;

use super::Config;

pub(super) const ENV_BASE_URL: &str = "TURNSYNC_BASE_URL";
pub(super) const ENV_DIRECTORY: &str = "TURNSYNC_DIRECTORY";
pub(super) const ENV_QUIET_TIMEOUT_MS: &str = "TURNSYNC_QUIET_TIMEOUT_MS";
pub(super) const ENV_MAX_TOTAL_MS: &str = "TURNSYNC_MAX_TOTAL_MS";
pub(super) const ENV_NO_MESSAGE_TIMEOUT_MS: &str = "TURNSYNC_NO_MESSAGE_TIMEOUT_MS";
pub(super) const ENV_POLL_INTERVAL_MS: &str = "TURNSYNC_POLL_INTERVAL_MS";

pub(super) fn apply_runtime_env_overrides<FEnv>(
    config: &mut Config,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty(env_lookup, ENV_BASE_URL) {
        config.server.base_url = url;
    }
    if let Some(directory) = non_empty(env_lookup, ENV_DIRECTORY) {
        config.server.directory = Some(directory);
    }
    if let Some(ms) = parse_millis(env_lookup, ENV_QUIET_TIMEOUT_MS)? {
        config.finalizer.quiet_timeout_ms = ms;
    }
    if let Some(ms) = parse_millis(env_lookup, ENV_MAX_TOTAL_MS)? {
        config.finalizer.max_total_ms = ms;
    }
    if let Some(ms) = parse_millis(env_lookup, ENV_NO_MESSAGE_TIMEOUT_MS)? {
        config.finalizer.no_message_timeout_ms = ms;
    }
    if let Some(ms) = parse_millis(env_lookup, ENV_POLL_INTERVAL_MS)? {
        config.finalizer.poll_interval_ms = ms;
    }
    Ok(())
}

fn non_empty<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_millis<FEnv>(env_lookup: &FEnv, name: &str) -> Result<Option<u64>, ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(env_lookup, name) else {
        return Ok(None);
    };
    raw.parse::<u64>().map(Some).map_err(|_| {
        ConfigError::Invalid(format!(
            "invalid {name} value `{raw}`: expected non-negative integer milliseconds"
        ))
    })
}
