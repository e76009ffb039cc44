//! Top-level config loading pipeline.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::env::apply_runtime_env_overrides;
use super::sources::{config_root_dir, read_config_text_with_sources};
use super::{Config, ConfigDiagnostics, LoadedConfig};

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    Ok(load_config_with_diagnostics(path_override)?.config)
}

/// Load configuration and report where it came from.
pub fn load_config_with_diagnostics(
    path_override: Option<&str>,
) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

pub(super) fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (config_text, origin) =
        read_config_text_with_sources(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&config_text)?;
    apply_runtime_env_overrides(&mut config, &env_lookup)?;
    let diagnostics = validate(&mut config)?;
    Ok(LoadedConfig {
        config,
        origin,
        diagnostics,
    })
}

/// Reject unusable values and clamp inconsistent budgets.
fn validate(config: &mut Config) -> Result<ConfigDiagnostics, ConfigError> {
    let mut diagnostics = ConfigDiagnostics::default();
    let base_url = config.server.base_url.trim().trim_end_matches('/').to_string();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "server.base_url `{}` must start with http:// or https://",
            config.server.base_url
        )));
    }
    config.server.base_url = base_url;

    let finalizer = &mut config.finalizer;
    if finalizer.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "finalizer.poll_interval_ms must be greater than 0".to_string(),
        ));
    }
    if finalizer.max_total_ms == 0 {
        return Err(ConfigError::Invalid(
            "finalizer.max_total_ms must be greater than 0".to_string(),
        ));
    }
    if finalizer.quiet_timeout_ms > finalizer.max_total_ms {
        diagnostics.warnings.push(format!(
            "finalizer.quiet_timeout_ms ({}) exceeds max_total_ms ({}); clamped",
            finalizer.quiet_timeout_ms, finalizer.max_total_ms
        ));
        finalizer.quiet_timeout_ms = finalizer.max_total_ms;
    }
    if finalizer.latest_every == 0 || finalizer.status_every == 0 {
        diagnostics
            .warnings
            .push("finalizer cadences must be at least 1; using 1".to_string());
        finalizer.latest_every = finalizer.latest_every.max(1);
        finalizer.status_every = finalizer.status_every.max(1);
    }
    Ok(diagnostics)
}
