use crate::error::{OvlError, Result};
use serde::{Deserialize, Serialize};

/// Which optional sections a saved state file carries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistenceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_mappings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_mappings: Option<bool>,
    /// Version 3 files have no feature word, so this decides whether their
    /// mapping sections are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v3_mapping_tables: Option<bool>,
}

impl PersistenceConfig {
    pub fn get_base_mappings(&self) -> bool {
        self.base_mappings
            .unwrap_or_else(super::default_mappings_enabled)
    }

    pub fn get_storage_mappings(&self) -> bool {
        self.storage_mappings
            .unwrap_or_else(super::default_mappings_enabled)
    }

    pub fn get_v3_mapping_tables(&self) -> bool {
        self.v3_mapping_tables
            .unwrap_or_else(super::default_mappings_enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_memory_guard: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_free_percent: Option<u8>,
}

impl MemoryConfig {
    pub fn get_low_memory_guard(&self) -> bool {
        self.low_memory_guard
            .unwrap_or_else(super::default_low_memory_guard)
    }

    pub fn get_min_free_percent(&self) -> u8 {
        self.min_free_percent
            .unwrap_or_else(super::default_min_free_percent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<u32>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl StoreConfig {
    pub fn get_magic_number(&self) -> u32 {
        self.magic_number
            .unwrap_or_else(super::default_magic_number)
    }

    pub fn get_format_version(&self) -> u32 {
        self.format_version
            .unwrap_or_else(super::default_format_version)
    }
}

pub fn validate_config(config: &StoreConfig) -> Result<()> {
    let version = config.get_format_version();
    if version != 3 && version != 4 {
        return Err(OvlError::Config(format!(
            "format_version must be 3 or 4, got {}",
            version
        )));
    }

    let percent = config.memory.get_min_free_percent();
    if percent > 100 {
        return Err(OvlError::Config(format!(
            "min_free_percent ({}) must be between 0 and 100",
            percent
        )));
    }

    if !config.memory.get_low_memory_guard() && config.memory.min_free_percent.is_some() {
        tracing::warn!("min_free_percent is set but low_memory_guard is disabled; it has no effect");
    }

    Ok(())
}
