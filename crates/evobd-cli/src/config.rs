//! Configuration file handling for evobd-cli

use anyhow::{Context, Result};
use evobd_driver::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default connection to the adapter
    pub connection: Option<ConnectionConfig>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("evobd");
        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_table_parses() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            type = "serial"
            port = "/dev/rfcomm0"
            baud_rate = 115200
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.connection,
            Some(ConnectionConfig::Serial(_))
        ));
    }
}
