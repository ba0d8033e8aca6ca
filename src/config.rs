use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::DEFAULT_RSSI_THRESHOLD_DBM;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "./vitals.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothConfig {
    /// Advertisements weaker than this are ignored while pairing.
    #[serde(default = "default_rssi_threshold_dbm")]
    pub rssi_threshold_dbm: i16,
}

fn default_rssi_threshold_dbm() -> i16 {
    DEFAULT_RSSI_THRESHOLD_DBM
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: default_database_path(),
            },
            bluetooth: BluetoothConfig {
                rssi_threshold_dbm: default_rssi_threshold_dbm(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config: Config = toml::from_str("[database]\n[bluetooth]\n").unwrap();
        assert_eq!(config.database.path, "./vitals.db");
        assert_eq!(config.bluetooth.rssi_threshold_dbm, -60);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::from_file_or_default("/nonexistent/config.toml");
        assert_eq!(config.bluetooth.rssi_threshold_dbm, -60);
    }
}
