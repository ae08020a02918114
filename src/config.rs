// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{DEFAULT_LOG_FILTER, RECORDINGS_DIR_NAME};
use crate::errors::{DeviceError, DeviceResult};
use crate::types::DeviceType;

/// Which device to open and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Backend kind (kinect or recording)
    pub kind: DeviceType,
    /// Index of the Kinect to open
    pub kinect_device: usize,
    /// Recording directory or metadata file to replay
    pub recording_path: Option<PathBuf>,
    /// Last frame to replay; `None` replays the whole recording
    pub max_frame: Option<usize>,
    /// Restart the recording when it ends
    pub loop_playback: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceType::Recording,
            kinect_device: 0,
            recording_path: None,
            max_frame: None,
            loop_playback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    /// Where recordings are written and listed; platform default when unset
    pub recordings_dir: Option<PathBuf>,
    /// `tracing` filter directive used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            recordings_dir: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Read a JSON config file
    pub fn load(path: &Path) -> DeviceResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DeviceError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| DeviceError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Read a JSON config file, falling back to defaults when it is missing
    /// or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    /// Recordings directory, resolving the platform default
    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir.clone().unwrap_or_else(default_recordings_dir)
    }
}

/// `<videos>/depthcap`, falling back to the home directory and then the
/// working directory
pub fn default_recordings_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(RECORDINGS_DIR_NAME)
}

/// Default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(RECORDINGS_DIR_NAME).join("config.json"))
}
