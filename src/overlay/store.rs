use parking_lot::RwLock;
use std::path::Path;

use crate::codec::{load_from_path, save_to_path};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::overlay::dirent::{AddOutcome, DirEntry};
use crate::overlay::registry::InodeRegistry;
use crate::overlay::types::{InodeAttributes, Ino, MapKind, NativeRef, SpecialInfo, UnionPayload};

/// One mounted overlay instance.
///
/// All registry and directory operations run under a single reader/writer
/// lock. Lookups hand back clones so no borrow outlives the lock.
pub struct OverlayStore {
    registry: RwLock<InodeRegistry>,
    config: StoreConfig,
}

impl OverlayStore {
    /// Start with an empty registry holding only the root directory.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let mut registry = InodeRegistry::from_config(&config);
        registry.ensure_root()?;
        Ok(OverlayStore {
            registry: RwLock::new(registry),
            config,
        })
    }

    /// Mount from the state file at `path`, or start fresh if it is missing
    /// or empty.
    pub fn open(config: StoreConfig, path: &Path) -> Result<Self> {
        let mut registry = load_from_path(path, &config)?;
        registry.ensure_root()?;
        tracing::info!(
            "Mounted overlay store from {} with {} inodes",
            path.display(),
            registry.len()
        );
        Ok(OverlayStore {
            registry: RwLock::new(registry),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run `f` with shared access to the registry.
    pub fn read<R>(&self, f: impl FnOnce(&InodeRegistry) -> R) -> R {
        f(&self.registry.read())
    }

    /// Run `f` with exclusive access to the registry.
    pub fn write<R>(&self, f: impl FnOnce(&mut InodeRegistry) -> R) -> R {
        f(&mut self.registry.write())
    }

    pub fn inode_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn add_inode(&self, reference_name: Option<&[u8]>) -> Result<Ino> {
        self.registry.write().add_inode(reference_name)
    }

    pub fn contains(&self, ino: Ino) -> bool {
        self.registry.read().contains(ino)
    }

    pub fn get_attributes(&self, ino: Ino) -> Option<InodeAttributes> {
        self.registry.read().get_inode(ino).map(|i| *i.attributes())
    }

    pub fn get_special(&self, ino: Ino) -> Option<SpecialInfo> {
        self.registry.read().get_inode(ino).map(|i| i.special.clone())
    }

    pub fn get_payload(&self, ino: Ino) -> Option<UnionPayload> {
        self.registry.read().get_inode(ino).map(|i| i.payload().clone())
    }

    pub fn set_attributes(&self, ino: Ino, attributes: InodeAttributes) -> Result<()> {
        self.registry.write().set_attributes(ino, attributes)
    }

    pub fn set_payload(&self, ino: Ino, payload: UnionPayload) -> Result<()> {
        self.registry.write().set_payload(ino, payload)
    }

    pub fn set_parent(&self, ino: Ino, parent: Ino) -> Result<()> {
        self.registry.write().set_parent(ino, parent)
    }

    pub fn set_reference_name(&self, ino: Ino, name: Option<&[u8]>) -> Result<()> {
        self.registry.write().set_reference_name(ino, name)
    }

    pub fn set_special_flags(&self, ino: Ino, flags: u32) -> Result<()> {
        self.registry.write().set_special_flags(ino, flags)
    }

    pub fn clear_special_flags(&self, ino: Ino, flags: u32) -> Result<()> {
        self.registry.write().clear_special_flags(ino, flags)
    }

    pub fn set_base_mapping(&self, ino: Ino, device: u32, native_inode: u32) -> Result<()> {
        self.registry
            .write()
            .set_base_mapping(ino, device, native_inode)
    }

    pub fn set_storage_mapping(&self, ino: Ino, device: u32, native_inode: u32) -> Result<()> {
        self.registry
            .write()
            .set_storage_mapping(ino, device, native_inode)
    }

    pub fn clear_mapping(&self, ino: Ino, kind: MapKind) -> Result<()> {
        self.registry.write().clear_mapping(ino, kind)
    }

    pub fn lookup_by_native(&self, kind: MapKind, device: u32, native_inode: u32) -> Option<Ino> {
        self.registry
            .read()
            .lookup_by_native(kind, NativeRef::new(device, native_inode))
    }

    pub fn get_reverse_mapping(&self, ino: Ino, kind: MapKind) -> Result<Option<NativeRef>> {
        self.registry.read().get_reverse_mapping(ino, kind)
    }

    pub fn populate_directory(&self, dir: Ino) -> Result<()> {
        self.registry.write().populate_directory(dir)
    }

    pub fn add_entry(&self, dir: Ino, name: &[u8], target: Ino, flags: u32) -> Result<AddOutcome> {
        self.registry.write().add_entry(dir, name, target, flags)
    }

    pub fn find_entry(&self, dir: Ino, name: &[u8]) -> Option<DirEntry> {
        self.registry.read().find_entry(dir, name).cloned()
    }

    pub fn unlink_entry(&self, dir: Ino, name: &[u8]) -> Result<()> {
        self.registry.write().unlink_entry(dir, name)
    }

    pub fn remove_entry_permanently(&self, dir: Ino, name: &[u8]) -> Result<DirEntry> {
        self.registry.write().remove_entry_permanently(dir, name)
    }

    pub fn rename_entry(&self, dir: Ino, old: &[u8], new: &[u8]) -> Result<()> {
        self.registry.write().rename_entry(dir, old, new)
    }

    pub fn count_entries(&self, dir: Ino, include_tombstoned: bool) -> Result<usize> {
        self.registry.read().count_entries(dir, include_tombstoned)
    }

    pub fn deleted_entry_count(&self, dir: Ino) -> Result<usize> {
        self.registry.read().deleted_entry_count(dir)
    }

    // Position scans may rebuild the lazy position index, so they need the
    // write lock even though they do not change any entry.

    pub fn find_by_position_or_next(&self, dir: Ino, position: u32) -> Result<Option<DirEntry>> {
        let mut registry = self.registry.write();
        Ok(registry.find_by_position_or_next(dir, position)?.cloned())
    }

    pub fn next_live_entry(&self, dir: Ino, position: u32) -> Result<Option<DirEntry>> {
        let mut registry = self.registry.write();
        Ok(registry.next_live_entry(dir, position)?.cloned())
    }

    /// Save the current state to `path` without unmounting.
    pub fn sync(&self, path: &Path) -> Result<()> {
        let registry = self.registry.read();
        save_to_path(&registry, &self.config, path)
    }

    /// Save to `path` and tear the store down.
    ///
    /// The registry is released whether or not the save succeeds; a failed
    /// save is reported through the returned error.
    pub fn unmount(self, path: &Path) -> Result<()> {
        let registry = self.registry.into_inner();
        let result = save_to_path(&registry, &self.config, path);
        let count = registry.len();
        drop(registry);

        match &result {
            Ok(()) => tracing::info!("Unmounted overlay store, {} inodes saved", count),
            Err(e) => tracing::warn!("Unmounted overlay store but failed to save state: {}", e),
        }
        result
    }
}
