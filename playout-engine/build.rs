//! Build script for playout-engine
//!
//! Exposes build identification to the binary for the `/health` endpoint:
//! - `PLAYOUT_GIT_HASH`: short commit hash, or "unknown" outside a git checkout
//! - `PLAYOUT_BUILD_TIMESTAMP`: RFC 3339 build time
//! - `PLAYOUT_BUILD_PROFILE`: cargo profile (debug/release)

use std::process::Command;

fn git_short_hash() -> String {
    Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    let build_timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=PLAYOUT_GIT_HASH={}", git_short_hash());
    println!("cargo:rustc-env=PLAYOUT_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=PLAYOUT_BUILD_PROFILE={}", profile);
}
