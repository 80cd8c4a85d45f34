//! Binary state file: the whole registry saved at unmount and restored at
//! mount.
//!
//! Layout, every field a 4-byte little-endian word:
//!
//! ```text
//! magic | version word | [feature flags, v4 only] | inode count
//! inode records, in inode-number order
//! [base mapping table] | [storage mapping table]
//! ```

mod format;
mod reader;
mod stream;
mod writer;

pub use format::{
    Features, FormatVersion, FEATURE_BASE_MAPPINGS, FEATURE_STORAGE_MAPPINGS, VERSION_3, VERSION_4,
};
pub use reader::read_registry;
pub use writer::write_registry;

use crate::config::StoreConfig;
use crate::error::{OvlError, Result};
use crate::overlay::InodeRegistry;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Save `registry` to `path`, replacing any previous contents.
///
/// The file is held under an exclusive lock for the duration of the write and
/// synced before the lock is released.
pub fn save_to_path(registry: &InodeRegistry, config: &StoreConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Truncate only once the lock is held.
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    FileExt::try_lock_exclusive(&file).map_err(|e| lock_error("write", path, e))?;

    let result = write_locked(registry, config, &file);

    if let Err(e) = FileExt::unlock(&file) {
        tracing::warn!("Failed to release write lock on {}: {}", path.display(), e);
    }

    result?;
    tracing::info!("Saved {} inodes to {}", registry.len(), path.display());
    Ok(())
}

/// Keeps the io error kind, so a contended lock still maps to `EAGAIN`.
fn lock_error(kind: &str, path: &Path, e: std::io::Error) -> OvlError {
    OvlError::Io(std::io::Error::new(
        e.kind(),
        format!("Failed to acquire {} lock on {}: {}", kind, path.display(), e),
    ))
}

fn write_locked(registry: &InodeRegistry, config: &StoreConfig, file: &File) -> Result<()> {
    file.set_len(0)?;
    let mut out = write_registry(registry, config, BufWriter::new(file))?;
    out.flush()?;
    drop(out);
    file.sync_all()?;
    Ok(())
}

/// Load a registry from `path`. A missing file yields an empty registry.
pub fn load_from_path(path: &Path, config: &StoreConfig) -> Result<InodeRegistry> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No state file at {}, starting fresh", path.display());
            return Ok(InodeRegistry::from_config(config));
        }
        Err(e) => return Err(OvlError::Io(e)),
    };
    FileExt::try_lock_shared(&file).map_err(|e| lock_error("read", path, e))?;

    let result = read_registry(BufReader::new(&file), config);

    if let Err(e) = FileExt::unlock(&file) {
        tracing::warn!("Failed to release read lock on {}: {}", path.display(), e);
    }

    result
}
