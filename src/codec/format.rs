use crate::config::StoreConfig;
use crate::error::{OvlError, Result};

pub const VERSION_3: [u8; 4] = *b"Ovl3";
pub const VERSION_4: [u8; 4] = *b"Ovl4";

pub const FEATURE_BASE_MAPPINGS: u32 = 0x0000_0001;
pub const FEATURE_STORAGE_MAPPINGS: u32 = 0x0000_0002;
const KNOWN_FEATURES: u32 = FEATURE_BASE_MAPPINGS | FEATURE_STORAGE_MAPPINGS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V3,
    V4,
}

impl FormatVersion {
    pub fn from_number(number: u32) -> Result<Self> {
        match number {
            3 => Ok(FormatVersion::V3),
            4 => Ok(FormatVersion::V4),
            other => Err(OvlError::InvalidArgument(format!(
                "unsupported state file version {}",
                other
            ))),
        }
    }

    pub fn from_word(word: [u8; 4]) -> Result<Self> {
        match word {
            VERSION_3 => Ok(FormatVersion::V3),
            VERSION_4 => Ok(FormatVersion::V4),
            other => Err(OvlError::Corrupt(format!(
                "unrecognized version word {:?}",
                String::from_utf8_lossy(&other)
            ))),
        }
    }

    pub fn word(self) -> [u8; 4] {
        match self {
            FormatVersion::V3 => VERSION_3,
            FormatVersion::V4 => VERSION_4,
        }
    }
}

/// Which optional sections a state file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub base_mappings: bool,
    pub storage_mappings: bool,
}

impl Features {
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !KNOWN_FEATURES != 0 {
            return Err(OvlError::Corrupt(format!(
                "unknown feature bits {:#x}",
                bits & !KNOWN_FEATURES
            )));
        }
        Ok(Features {
            base_mappings: bits & FEATURE_BASE_MAPPINGS != 0,
            storage_mappings: bits & FEATURE_STORAGE_MAPPINGS != 0,
        })
    }

    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.base_mappings {
            bits |= FEATURE_BASE_MAPPINGS;
        }
        if self.storage_mappings {
            bits |= FEATURE_STORAGE_MAPPINGS;
        }
        bits
    }

    /// Version 3 has no feature word; the mapping sections are either both
    /// present or both absent, as configured.
    pub fn for_v3(config: &StoreConfig) -> Self {
        let present = config.persistence.get_v3_mapping_tables();
        Features {
            base_mappings: present,
            storage_mappings: present,
        }
    }

    /// Sections a save with `config` will write.
    pub fn for_save(version: FormatVersion, config: &StoreConfig) -> Self {
        match version {
            FormatVersion::V3 => Self::for_v3(config),
            FormatVersion::V4 => Features {
                base_mappings: config.persistence.get_base_mappings(),
                storage_mappings: config.persistence.get_storage_mappings(),
            },
        }
    }
}
