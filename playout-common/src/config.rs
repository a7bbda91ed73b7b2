//! Configuration file resolution and TOML loading
//!
//! Config file lookup follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config file (`~/.config/playout/config.toml` on Linux)
//! 4. System config file (`/etc/playout/config.toml`, Linux only)
//!
//! When no file is found, callers fall back to compiled defaults. A missing
//! config file never stops startup.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name used under the platform config dir
pub const APP_DIR_NAME: &str = "playout";

/// File name of the TOML config file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolve which config file to read, if any
///
/// Explicit paths (CLI or environment) are returned even when they do not
/// exist, so that the caller can report the typo instead of silently using
/// defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3/4: platform locations
    default_config_locations().into_iter().find(|p| p.exists())
}

/// Platform config file candidates, most specific first
pub fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    if cfg!(target_os = "linux") {
        locations.push(PathBuf::from("/etc").join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    locations
}

/// Get OS-dependent default data folder (database lives here)
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./playout_data"))
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let parsed = toml::from_str::<T>(&content)?;
    Ok(parsed)
}

/// Load `T` from the resolved config file, or defaults when there is none
///
/// An explicitly named file that cannot be read or parsed is an error. No
/// file at all is a warning.
pub fn load_or_default<T: DeserializeOwned + Default>(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Result<(T, Option<PathBuf>)> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            let config = load_toml_file::<T>(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok((config, Some(path)))
        }
        None => {
            warn!("No configuration file found; using compiled defaults");
            Ok((T::default(), None))
        }
    }
}
