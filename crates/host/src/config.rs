//! Host configuration management

use anyhow::{Context, Result};
use protocol::{PRODUCT_ID, VENDOR_ID};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Default log level when RUST_LOG is unset.
    #[serde(default = "HostSettings::default_log_level")]
    pub log_level: String,
}

impl HostSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        HostSettings { log_level: Self::default_log_level() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// USB vendor id to match.
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    /// USB product id to match.
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        VENDOR_ID
    }

    fn default_product_id() -> u16 {
        PRODUCT_ID
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// How often the monitor rescans the bus, in milliseconds.
    #[serde(default = "MonitorSettings::default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl MonitorSettings {
    fn default_scan_interval_ms() -> u64 {
        500
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings { scan_interval_ms: Self::default_scan_interval_ms() }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            host: HostSettings::default(),
            device: DeviceSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl HostConfig {
    /// Default configuration path: `<config dir>/perch/perchd.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perch")
            .join("perchd.toml")
    }

    /// Load from an explicit path, failing loudly on a broken file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load from the default path, falling back to built-in defaults when
    /// no file exists.
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable config {}: {:#}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Write the configuration out, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}
