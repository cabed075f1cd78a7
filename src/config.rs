//! Session configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mapping::MappingMode;
use crate::{ResourcerError, W65816State};

/// Tunables for a [`Session`](crate::Session). Every field has a default, so
/// a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Memory banking scheme
    pub mapping: MappingMode,
    /// Size of the work RAM address space in bytes
    pub ram_size: u64,
    /// Bytes per listing line for Data ranges
    pub data_unit_size: u64,
    /// Bytes per listing line for String ranges
    pub string_unit_size: u64,
    /// Conflicts kept individually; the total is always counted
    pub max_recorded_conflicts: usize,
    /// State assumed at flood-fill seeds
    pub initial_state: W65816State,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mapping: MappingMode::LoRom,
            ram_size: 0x20000,
            data_unit_size: 1,
            string_unit_size: 16,
            max_recorded_conflicts: 1024,
            initial_state: W65816State::new(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ResourcerError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ResourcerError> {
        let text = fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded config from {}", path.as_ref().display());
        Self::from_json(&text)
    }

    fn check(&self) -> Result<(), ResourcerError> {
        if self.ram_size == 0 {
            return Err(ResourcerError::InvalidRange("ram_size must be non-zero".into()));
        }
        if self.data_unit_size == 0 || self.string_unit_size == 0 {
            return Err(ResourcerError::InvalidRange("unit sizes must be non-zero".into()));
        }
        Ok(())
    }
}
