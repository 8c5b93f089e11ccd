//! Configuration loader.
//!
//! Loads [`AppConfig`] from a YAML file. Resolution order: explicit path,
//! `WARDEN_CONFIG` environment variable, `/etc/warden/warden.yaml`, then
//! built-in defaults when no file exists.

use std::env;
use std::path::{Path, PathBuf};

use tracing::info;
use warden_domain::error::{Error, Result};

use super::AppConfig;

const ENV_VAR: &str = "WARDEN_CONFIG";
const SYSTEM_PATH: &str = "/etc/warden/warden.yaml";

/// Configuration loader service.
#[derive(Clone, Default)]
pub struct ConfigLoader {
    /// Optional explicit config file path (overrides environment resolution)
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit configuration file path.
    #[must_use]
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load and validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicitly named file is missing, when
    /// parsing fails, or when validation detects an invalid value.
    pub fn load(&self) -> Result<AppConfig> {
        let config = match self.resolve_path() {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::config(format!("failed to read {}: {e}", path.display()))
                })?;
                let config: AppConfig = serde_yaml::from_str(&content).map_err(|e| {
                    Error::config(format!("failed to parse {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), "configuration loaded");
                config
            }
            None => {
                info!("no configuration file found; using defaults");
                AppConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }
        if let Ok(path) = env::var(ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        let system = PathBuf::from(SYSTEM_PATH);
        system.exists().then_some(system)
    }
}
