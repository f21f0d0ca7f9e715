// src/settings.rs
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::drivers::AcquisitionError;
use crate::types::SessionConfig;

/// Supplies a validated configuration for the next session.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<SessionConfig, AcquisitionError>;
}

/// A fixed configuration, validated on every load.
impl ConfigProvider for SessionConfig {
    fn load(&self) -> Result<SessionConfig, AcquisitionError> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Measurement settings kept as a JSON document on disk.
///
/// A missing file means defaults; fields absent from the document fall back to their defaults too.
#[derive(Clone, Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validates and writes `config`; invalid settings are never stored.
    pub fn save(&self, config: &SessionConfig) -> Result<(), AcquisitionError> {
        config.validate()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| AcquisitionError::Config(e.to_string()))?;
        fs::write(&self.path, json)?;
        info!("settings saved to {}", self.path.display());
        Ok(())
    }
}

impl ConfigProvider for JsonSettingsStore {
    fn load(&self) -> Result<SessionConfig, AcquisitionError> {
        let config = match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str::<SessionConfig>(&text).map_err(|e| {
                AcquisitionError::Config(format!("{}: {e}", self.path.display()))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no settings at {}, using defaults", self.path.display());
                SessionConfig::default()
            }
            Err(err) => return Err(err.into()),
        };
        config.validate()?;
        Ok(config)
    }
}
