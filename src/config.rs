// SPDX-License-Identifier: GPL-3.0-only

//! Persistent user configuration

use crate::backends::camera::Size;
use crate::constants::{app_info, recording, still, timing};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How session configurations are handed to the hardware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStrategyKind {
    /// Use output configurations when the hardware supports them
    #[default]
    Auto,
    /// Always build explicit output configurations
    OutputConfigurations,
    /// Always pass the raw target list
    TargetList,
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Still size requested when the caller does not pick one
    pub default_resolution: Size,
    /// Frame rate for normal recording
    pub record_frame_rate: u32,
    /// Encoder bitrate in bits per second
    pub record_bitrate: u32,
    /// Orientation hint written into recordings, in degrees
    pub orientation_hint: u32,
    /// Images the still sink may hold at once
    pub still_image_buffers: usize,
    pub session_strategy: SessionStrategyKind,
    /// Upper bound for joining the controller context on teardown
    pub context_join_timeout_ms: u64,
    /// Override for the photos directory
    pub photos_dir: Option<PathBuf>,
    /// Override for the videos directory
    pub videos_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_resolution: still::DEFAULT_RESOLUTION,
            record_frame_rate: recording::FRAME_RATE,
            record_bitrate: recording::BITRATE,
            orientation_hint: recording::ORIENTATION_HINT,
            still_image_buffers: still::MAX_IMAGES,
            session_strategy: SessionStrategyKind::Auto,
            context_join_timeout_ms: timing::CONTEXT_JOIN_TIMEOUT.as_millis() as u64,
            photos_dir: None,
            videos_dir: None,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/camera-control/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_info::APP_DIR).join(app_info::CONFIG_FILE))
    }

    /// Load from the default location
    ///
    /// Never fails: a missing file yields defaults, a malformed one is logged
    /// and yields defaults.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            debug!("No config directory available, using defaults");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable config");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn context_join_timeout(&self) -> Duration {
        Duration::from_millis(self.context_join_timeout_ms)
    }
}
