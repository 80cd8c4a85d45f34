pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

/// "OVLF" read as a little-endian word.
pub const DEFAULT_MAGIC_NUMBER: u32 = 0x4F56_4C46;

fn default_magic_number() -> u32 {
    DEFAULT_MAGIC_NUMBER
}

fn default_format_version() -> u32 {
    4
}

fn default_mappings_enabled() -> bool {
    true
}

fn default_low_memory_guard() -> bool {
    true
}

fn default_min_free_percent() -> u8 {
    10
}
