//! playout-engine configuration
//!
//! Loaded from TOML (see `playout_common::config` for file resolution).
//! Every field has a compiled default, so an empty or missing file is valid.

use crate::error::{Error, Result};
use playout_common::FallbackEntry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "PLAYOUT_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
    pub emergency: EmergencyConfig,
}

/// Timing and threshold tunables for the playout state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of a natural crossfade
    pub crossfade_ms: u64,
    /// Crossfade (or solo fade-out) starts this long before the end of a track
    pub crossfade_lead_seconds: f64,
    /// Length of the crossfade used by manual skips
    pub quick_crossfade_ms: u64,
    /// Solo fade-in length
    pub fade_in_ms: u64,
    /// Solo fade-out length
    pub fade_out_ms: u64,
    /// Consecutive transport errors before entering Emergency
    pub max_consecutive_errors: u32,
    /// Pause before loading the next track after an error
    pub error_retry_delay_ms: u64,
    /// Consecutive fallback errors before giving up on Emergency
    pub max_fallback_errors: u32,
    /// Period of the normal-queue availability probe while in Emergency
    pub recovery_probe_interval_secs: u64,
    /// Minimum spacing of user-facing emergency notices
    pub notice_interval_secs: u64,
    /// Engine tick period (envelope sampling, crossfade checks)
    pub tick_interval_ms: u64,
    /// User volume on startup (0-100)
    pub initial_volume: u8,
    /// Number of finished tracks kept for skip-previous
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: 1000,
            crossfade_lead_seconds: 4.0,
            quick_crossfade_ms: 500,
            fade_in_ms: 2000,
            fade_out_ms: 3000,
            max_consecutive_errors: 5,
            error_retry_delay_ms: 1000,
            max_fallback_errors: 3,
            recovery_probe_interval_secs: 300,
            notice_interval_secs: 10,
            tick_interval_ms: 50,
            initial_volume: 75,
            history_limit: 50,
        }
    }
}

impl EngineConfig {
    pub fn crossfade(&self) -> Duration {
        Duration::from_millis(self.crossfade_ms)
    }

    pub fn quick_crossfade(&self) -> Duration {
        Duration::from_millis(self.quick_crossfade_ms)
    }

    pub fn fade_in(&self) -> Duration {
        Duration::from_millis(self.fade_in_ms)
    }

    pub fn fade_out(&self) -> Duration {
        Duration::from_millis(self.fade_out_ms)
    }

    pub fn error_retry_delay(&self) -> Duration {
        Duration::from_millis(self.error_retry_delay_ms)
    }

    pub fn recovery_probe_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_probe_interval_secs)
    }

    pub fn notice_interval(&self) -> Duration {
        Duration::from_secs(self.notice_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Whether a track of this duration is long enough to crossfade out of
    ///
    /// Unknown durations and tracks no longer than the lead plus one second
    /// always play to their natural end.
    pub fn allows_crossfade(&self, duration_seconds: Option<f64>) -> bool {
        match duration_seconds {
            Some(d) if d.is_finite() => d > self.crossfade_lead_seconds + 1.0,
            _ => false,
        }
    }

    /// Reject values that would stall or spin the engine
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("crossfade_ms", self.crossfade_ms),
            ("quick_crossfade_ms", self.quick_crossfade_ms),
            ("fade_in_ms", self.fade_in_ms),
            ("fade_out_ms", self.fade_out_ms),
            ("recovery_probe_interval_secs", self.recovery_probe_interval_secs),
            ("tick_interval_ms", self.tick_interval_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(Error::Config(format!("engine.{} must be greater than 0", name)));
            }
        }

        if !(self.crossfade_lead_seconds.is_finite() && self.crossfade_lead_seconds > 0.0) {
            return Err(Error::Config(
                "engine.crossfade_lead_seconds must be a positive number".to_string(),
            ));
        }
        if self.max_consecutive_errors == 0 {
            return Err(Error::Config("engine.max_consecutive_errors must be at least 1".to_string()));
        }
        if self.max_fallback_errors == 0 {
            return Err(Error::Config("engine.max_fallback_errors must be at least 1".to_string()));
        }
        if self.initial_volume > 100 {
            return Err(Error::Config(format!(
                "engine.initial_volume must be 0-100, got {}",
                self.initial_volume
            )));
        }
        Ok(())
    }
}

/// HTTP control server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5740,
        }
    }
}

/// Headless clock output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Length given to streams whose duration nobody knows, so they still end
    pub assumed_duration_seconds: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            assumed_duration_seconds: 180.0,
        }
    }
}

/// SQLite library database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `<data dir>/playout/playout.db`
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| playout_common::config::default_data_folder().join("playout.db"))
    }
}

/// Log filter used when `RUST_LOG` is not set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "playout_engine=info,playout_common=info,tower_http=info".to_string(),
        }
    }
}

/// Emergency backup playlist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    pub playlist: Vec<FallbackEntry>,
}

impl PlayoutConfig {
    /// Load from the resolved config file, falling back to defaults
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let (config, path) =
            playout_common::config::load_or_default::<PlayoutConfig>(cli_path, CONFIG_ENV_VAR)?;
        config.validate()?;
        Ok((config, path))
    }

    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlayoutConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        let assumed = self.output.assumed_duration_seconds;
        if !assumed.is_finite() || assumed <= 0.0 {
            return Err(Error::Config(format!(
                "output.assumed_duration_seconds must be > 0, got {}",
                assumed
            )));
        }
        for entry in &self.emergency.playlist {
            if entry.uri.trim().is_empty() {
                return Err(Error::Config(format!(
                    "emergency playlist entry '{}' has an empty uri",
                    entry.name
                )));
            }
            if entry
                .duration_seconds
                .is_some_and(|d| !d.is_finite() || d <= 0.0)
            {
                return Err(Error::Config(format!(
                    "emergency playlist entry '{}' has a non-positive duration",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
