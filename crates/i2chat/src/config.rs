use anyhow::{Context, Result};
use i2chat_sam::{SamConfig, DEFAULT_IDENTITY_PATH};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "i2chat.yaml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sam: SamConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub identity_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            identity_path: PathBuf::from(DEFAULT_IDENTITY_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `config_path`, or from `i2chat.yaml` in the
    /// working directory if it exists, or fall back to defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file not found: {}\nRun with --init to create a new configuration",
                        path.display()
                    );
                }
                path.to_path_buf()
            }
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Config::default());
                }
                fallback
            }
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// Write the default configuration to `config_path`.
    pub fn create_default(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let config = Config::default();
        let yaml = serde_yaml::to_string(&config)?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write configuration file {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/i2chat.yaml");

        let created = Config::create_default(Some(&path)).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.sam.bridge_addr, "127.0.0.1:7656");
        assert_eq!(
            loaded.storage.identity_path,
            PathBuf::from("storage/users/identity.json")
        );
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("i2chat.yaml");
        fs::write(
            &path,
            "sam:\n  bridge_addr: 192.168.1.5:7656\n  signature_type: RedDSA_SHA512_Ed25519\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.sam.bridge_addr, "192.168.1.5:7656");
        assert_eq!(config.sam.signature_type.code(), 11);
        assert_eq!(config.sam.dial_timeout_secs, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(err.to_string().contains("--init"));
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("i2chat.yaml");
        fs::write(&path, "sam: [not, a, map").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
