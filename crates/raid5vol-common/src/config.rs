//! Configuration types for raid5vol
//!
//! This module defines the configuration file structure read by the
//! binaries. Every field has a default so partial files are accepted.

use crate::error::{Error, Result};
use crate::types::{FOOTER_SECTORS, MAX_DEVICES, MIN_DEVICES, SECTOR_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for raid5vol
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Volume layout configuration
    #[serde(default)]
    pub volume: VolumeConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            Error::configuration(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load configuration from a TOML file if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::configuration(e.to_string()))
    }
}

/// Volume layout configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Backing device paths, in device index order
    #[serde(default)]
    pub devices: Vec<PathBuf>,
    /// Sectors per device, including the metadata footer sector
    #[serde(default = "default_sectors_per_device")]
    pub sectors_per_device: u64,
    /// Sector size in bytes
    #[serde(default = "default_sector_size")]
    pub sector_size: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            sectors_per_device: default_sectors_per_device(),
            sector_size: default_sector_size(),
        }
    }
}

impl VolumeConfig {
    /// Check that the layout can form a volume
    pub fn validate(&self) -> Result<()> {
        let count = self.devices.len();
        if !(MIN_DEVICES..=MAX_DEVICES).contains(&count) {
            return Err(Error::InvalidDeviceCount {
                count,
                min: MIN_DEVICES,
                max: MAX_DEVICES,
            });
        }
        if self.sectors_per_device <= FOOTER_SECTORS {
            return Err(Error::DeviceTooSmall {
                sectors: self.sectors_per_device,
                required: FOOTER_SECTORS + 1,
            });
        }
        if self.sector_size == 0 || !self.sector_size.is_power_of_two() {
            return Err(Error::configuration(format!(
                "sector size {} is not a power of two",
                self.sector_size
            )));
        }
        Ok(())
    }

    /// Size of one backing device in bytes
    #[must_use]
    pub const fn device_bytes(&self) -> u64 {
        self.sectors_per_device * self.sector_size as u64
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_sectors_per_device() -> u64 {
    8192
}

fn default_sector_size() -> usize {
    SECTOR_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}
