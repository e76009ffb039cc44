//! Build metadata stamped in by `build.rs`.

/// Semver package version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short commit hash, or `unknown` outside a git checkout.
pub const GIT_COMMIT: &str = env!("TURNSYNC_BUILD_GIT_HASH");

/// UTC build time, RFC 3339.
pub const BUILD_TIMESTAMP: &str = env!("TURNSYNC_BUILD_TIMESTAMP");

/// Text printed by `turnsync --version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("TURNSYNC_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("TURNSYNC_BUILD_TIMESTAMP")
);

/// One-line form for logs.
pub fn summary() -> String {
    format!("turnsync {VERSION} ({GIT_COMMIT}, built {BUILD_TIMESTAMP})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_contains_all_fields() {
        let text = summary();
        assert!(text.starts_with("turnsync "));
        assert!(text.contains(VERSION));
        assert!(text.contains(GIT_COMMIT));
        assert!(text.contains(BUILD_TIMESTAMP));
    }

    #[test]
    fn long_version_lists_commit_and_build_time() {
        assert!(LONG_VERSION.starts_with(VERSION));
        assert!(LONG_VERSION.contains("\ncommit: "));
        assert!(LONG_VERSION.contains("\nbuilt: "));
    }
}
