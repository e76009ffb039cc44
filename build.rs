//! Stamps the commit hash and build time into the binary.
//!
//! Both can be pinned through the environment for reproducible builds;
//! otherwise git is asked for the hash and the clock for the time.

use std::env;
use std::fs;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

const ENV_GIT_HASH: &str = "TURNSYNC_BUILD_GIT_HASH";
const ENV_TIMESTAMP: &str = "TURNSYNC_BUILD_TIMESTAMP";

fn main() {
    watch_git_head();
    println!("cargo:rerun-if-env-changed={ENV_GIT_HASH}");
    println!("cargo:rerun-if-env-changed={ENV_TIMESTAMP}");

    let git_hash = pinned(ENV_GIT_HASH)
        .or_else(git_short_hash)
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = pinned(ENV_TIMESTAMP).unwrap_or_else(utc_now_rfc3339);

    println!("cargo:rustc-env={ENV_GIT_HASH}={git_hash}");
    println!("cargo:rustc-env={ENV_TIMESTAMP}={timestamp}");
}

fn pinned(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn watch_git_head() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    let reference = fs::read_to_string(".git/HEAD")
        .ok()
        .and_then(|head| head.trim().strip_prefix("ref: ").map(str::to_string));
    if let Some(reference) = reference {
        println!("cargo:rerun-if-changed=.git/{reference}");
    }
}

fn git_short_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=12"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}

fn utc_now_rfc3339() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        rem / 3_600,
        (rem % 3_600) / 60,
        rem % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
