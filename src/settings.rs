//! Persisted tool settings.
//!
//! A small JSON file next to the user's config directory keeps the bus
//! setup and the preferred scan range between invocations. Missing file
//! means defaults; unknown fields are ignored so older files keep loading.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::can::transport::TransceiverType;
use crate::constants::{is_valid_bitrate, DEFAULT_BITRATE_KBPS};
use crate::error::CanOpenError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Bus speed in kbit/s.
    pub bitrate_kbps: u32,
    /// Transceiver backend to use.
    pub transceiver: TransceiverType,
    /// SocketCAN interface name; ignored by the other backends.
    pub interface: String,
    /// First node address of the default scan range.
    pub scan_start: u8,
    /// Last node address of the default scan range.
    pub scan_end: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            transceiver: TransceiverType::default(),
            interface: "can0".to_string(),
            scan_start: 1,
            scan_end: 127,
        }
    }
}

impl Settings {
    /// Default settings file location: `$HOME/.config/canopen-rs/settings.json`,
    /// falling back to the working directory when no home is set.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("canopen-rs")
                    .join("settings.json")
            })
            .unwrap_or_else(|| PathBuf::from("canopen-rs-settings.json"))
    }

    /// Loads settings from `path`. A missing file yields defaults; a
    /// malformed file is an error rather than a silent reset.
    pub fn load(path: &Path) -> Result<Self, CanOpenError> {
        if !path.exists() {
            debug!("no settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| CanOpenError::SettingsError(format!("{}: {e}", path.display())))?;
        let settings: Settings = serde_json::from_str(&text)
            .map_err(|e| CanOpenError::SettingsError(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes the settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), CanOpenError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CanOpenError::SettingsError(format!("{}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CanOpenError::SettingsError(e.to_string()))?;
        fs::write(path, text)
            .map_err(|e| CanOpenError::SettingsError(format!("{}: {e}", path.display())))?;
        debug!("settings saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CanOpenError> {
        if !is_valid_bitrate(self.bitrate_kbps) {
            return Err(CanOpenError::UnsupportedBitrate(self.bitrate_kbps));
        }
        for node in [self.scan_start, self.scan_end] {
            if node == 0 || node > 127 {
                return Err(CanOpenError::InvalidNodeAddress(node));
            }
        }
        if self.scan_start > self.scan_end {
            warn!(
                "scan range {}..={} is reversed",
                self.scan_start, self.scan_end
            );
        }
        Ok(())
    }
}
