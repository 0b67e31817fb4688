//! Configuration loading and management
//!
//! Daemon paths come from the environment. The user's choices (device pair,
//! hotkeys, capture timing) live in a JSON document inside the data dir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::CaptureSettings;
use crate::toggle::{DevicePair, HotkeyAction, SameDevice};

/// Overrides the data directory
pub const DATA_DIR_ENV: &str = "AUDIO_SWITCHER_DATA_DIR";

/// Errors loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HOME is not set and AUDIO_SWITCHER_DATA_DIR was not given")]
    NoHome,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    SameDevice(#[from] SameDevice),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Persisted switcher settings
    pub store_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("audio-switcher")
            }
        };

        Ok(Self::from_data_dir(data_dir))
    }

    pub fn from_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            socket_path: data_dir.join("daemon.sock"),
            store_path: data_dir.join("switcher.json"),
            data_dir,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(&self.store_path)
    }
}

/// Capture timing as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub quiet_ms: u64,
    pub timeout_ms: u64,
    pub tick_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            quiet_ms: 500,
            timeout_ms: 5000,
            tick_ms: 100,
        }
    }
}

impl From<CaptureConfig> for CaptureSettings {
    fn from(c: CaptureConfig) -> Self {
        Self {
            quiet_interval: Duration::from_millis(c.quiet_ms),
            timeout: Duration::from_millis(c.timeout_ms),
            // A zero period would make the ticker panic
            tick: Duration::from_millis(c.tick_ms.max(1)),
        }
    }
}

/// A hotkey binding as stored on disk.
///
/// Both fields stay loosely typed so one malformed entry cannot fail the
/// whole file; they are decoded when the binding is restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedBinding {
    #[serde(default)]
    pub hotkey: String,
    #[serde(default)]
    pub action: serde_json::Value,
}

impl PersistedBinding {
    pub fn new(hotkey: impl Into<String>, action: &HotkeyAction) -> Result<Self, ConfigError> {
        Ok(Self {
            hotkey: hotkey.into(),
            action: serde_json::to_value(action)?,
        })
    }

    /// Decode the stored action
    pub fn action(&self) -> Result<HotkeyAction, serde_json::Error> {
        HotkeyAction::deserialize(&self.action)
    }
}

/// The user's persisted switcher settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitcherConfig {
    #[serde(default)]
    pub device_pair: Option<DevicePair>,

    #[serde(default)]
    pub hotkeys: Vec<PersistedBinding>,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Reads and writes the switcher settings file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings. `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<SwitcherConfig>, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let config = serde_json::from_str(&content)?;
        debug!(path = ?self.path, "switcher settings loaded");
        Ok(Some(config))
    }

    /// Save settings, replacing the file atomically
    pub fn save(&self, config: &SwitcherConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, "switcher settings saved");
        Ok(())
    }

    /// Move an unreadable settings file out of the way so the next save
    /// cannot overwrite it. Returns where it was moved.
    pub fn quarantine(&self) -> Result<PathBuf, ConfigError> {
        let aside = self.path.with_extension("json.bad");
        fs::rename(&self.path, &aside)?;
        warn!(from = ?self.path, to = ?aside, "unreadable settings moved aside");
        Ok(aside)
    }
}
