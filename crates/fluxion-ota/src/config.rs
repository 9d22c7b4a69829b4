// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Configuration module for the OTA updater

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/data/ota_config.json";

fn default_manifest_url() -> String {
    "https://updates.example.com/firmware/manifest.json".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_30() -> u64 {
    30
}

fn default_1400() -> usize {
    1400
}

fn default_4096() -> usize {
    4096
}

fn default_300() -> u64 {
    300
}

fn default_800() -> u64 {
    800
}

fn default_3600() -> u64 {
    3600
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_slot_capacity() -> u64 {
    4 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// HTTPS location of the update manifest
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Per-request transport timeout (seconds)
    #[serde(default = "default_30")]
    pub http_timeout_secs: u64,

    /// Upper bound on the manifest body
    #[serde(default = "default_1400")]
    pub max_manifest_bytes: usize,

    /// Firmware stream chunk size
    #[serde(default = "default_4096")]
    pub chunk_size: usize,

    /// State machine tick (milliseconds)
    #[serde(default = "default_300")]
    pub tick_interval_ms: u64,

    /// Pause between a successful commit and the restart (milliseconds)
    #[serde(default = "default_800")]
    pub reboot_delay_ms: u64,

    /// Directory holding the diagnostics ledger and the boot slots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Size of each boot slot
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity_bytes: u64,

    /// Version of the running image; defaults to the crate version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_version: Option<String>,

    /// Start an update session right after boot
    #[serde(default = "default_true")]
    pub check_on_start: bool,

    /// Start update sessions periodically
    #[serde(default)]
    pub auto_update: bool,

    /// Period of automatic sessions (seconds)
    #[serde(default = "default_3600")]
    pub check_interval_secs: u64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            http_timeout_secs: 30,
            max_manifest_bytes: 1400,
            chunk_size: 4096,
            tick_interval_ms: 300,
            reboot_delay_ms: 800,
            data_dir: default_data_dir(),
            slot_capacity_bytes: default_slot_capacity(),
            running_version: None,
            check_on_start: true,
            auto_update: false,
            check_interval_secs: 3600,
        }
    }
}

impl UpdaterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manifest_url.trim().is_empty() {
            return Err(ConfigError::Invalid("manifest_url is empty".to_owned()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".to_owned()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be positive".to_owned(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http_timeout_secs must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reboot_delay(&self) -> Duration {
        Duration::from_millis(self.reboot_delay_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn running_version(&self) -> String {
        self.running_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ota_diag.json")
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.data_dir.join("slots")
    }
}

pub fn load_config(path: &Path) -> Result<UpdaterConfig, ConfigError> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        // Create with defaults
        let config = UpdaterConfig::default();
        save_config(path, &config)?;
        config
    };

    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &UpdaterConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = UpdaterConfig::default();
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.max_manifest_bytes, 1400);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.tick_interval_ms, 300);
        assert!(config.check_on_start);
        assert!(!config.auto_update);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: UpdaterConfig =
            serde_json::from_str(r#"{"manifest_url": "https://fw.local/m.json"}"#).unwrap();
        assert_eq!(config.manifest_url, "https://fw.local/m.json");
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.data_dir, PathBuf::from("/data"));
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ota_config.json");

        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_config.json");
        let config = UpdaterConfig {
            manifest_url: "https://fw.local/manifest.json".to_owned(),
            chunk_size: 1024,
            running_version: Some("1.2.3".to_owned()),
            auto_update: true,
            ..Default::default()
        };

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.manifest_url, config.manifest_url);
        assert_eq!(loaded.chunk_size, 1024);
        assert_eq!(loaded.running_version(), "1.2.3");
        assert!(loaded.auto_update);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_config.json");
        std::fs::write(&path, r#"{"chunk_size": 0}"#).unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_derived_paths() {
        let config = UpdaterConfig {
            data_dir: PathBuf::from("/var/lib/ota"),
            ..Default::default()
        };
        assert_eq!(config.ledger_path(), PathBuf::from("/var/lib/ota/ota_diag.json"));
        assert_eq!(config.slots_dir(), PathBuf::from("/var/lib/ota/slots"));
    }
}
