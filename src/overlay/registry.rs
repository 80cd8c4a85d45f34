//! Authoritative table of overlay inodes for one mounted instance.
//!
//! Inodes are numbered densely from [`ROOT_INODE`] and stored in creation
//! order, so a lookup by number is a direct positional read. Records are
//! never removed individually; the whole registry is dropped at unmount.

use std::cmp::Ordering;

use crate::config::StoreConfig;
use crate::error::{OvlError, Result};
use crate::list::IndexedList;
use crate::overlay::dirent::{AddOutcome, DirEntries, DirEntry};
use crate::overlay::inode::OverlayInode;
use crate::overlay::mapping::MappingTable;
use crate::overlay::memory::MemoryGuard;
use crate::overlay::types::{
    try_copy_bytes, InodeAttributes, Ino, MapKind, NativeRef, UnionPayload, NO_DEVICE,
    ROOT_INODE, SPECIAL_NO_BASE_REF,
};

fn inode_order(a: &OverlayInode, b: &OverlayInode) -> Ordering {
    a.inode_number().cmp(&b.inode_number())
}

fn inode_key(key: &Ino, inode: &OverlayInode) -> Ordering {
    key.cmp(&inode.inode_number())
}

#[derive(Debug)]
pub struct InodeRegistry {
    inodes: IndexedList<OverlayInode, Ino>,
    base_map: MappingTable,
    storage_map: MappingTable,
    guard: MemoryGuard,
}

impl InodeRegistry {
    pub fn new(guard: MemoryGuard) -> Self {
        InodeRegistry {
            inodes: IndexedList::new(inode_order, inode_key),
            base_map: MappingTable::new(),
            storage_map: MappingTable::new(),
            guard,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(MemoryGuard::from_config(&config.memory))
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// Number the next `add_inode` call will hand out.
    pub fn next_inode_number(&self) -> Result<Ino> {
        u32::try_from(self.inodes.len())
            .ok()
            .and_then(|count| count.checked_add(ROOT_INODE))
            .ok_or_else(|| OvlError::OutOfMemory("inode number space exhausted".to_string()))
    }

    /// Create a new inode with unpopulated attributes.
    ///
    /// Failing to copy the reference name is not fatal: the inode is created
    /// without one.
    pub fn add_inode(&mut self, reference_name: Option<&[u8]>) -> Result<Ino> {
        self.guard.check()?;
        let ino = self.next_inode_number()?;

        let reference_name = match reference_name.map(try_copy_bytes) {
            Some(Ok(name)) => Some(name),
            Some(Err(e)) => {
                tracing::warn!("Inode {} created without its reference name: {}", ino, e);
                None
            }
            None => None,
        };

        self.inodes
            .insert_at_end(OverlayInode::new(ino, reference_name))?;
        tracing::debug!("Allocated overlay inode {}", ino);
        Ok(ino)
    }

    /// Create the root directory if the registry is empty.
    pub fn ensure_root(&mut self) -> Result<Ino> {
        if self.is_empty() {
            let ino = self.add_inode(None)?;
            self.inode_mut(ino)?
                .set_attributes(InodeAttributes::directory(0o755))?;
            tracing::info!("Created root inode {}", ino);
        }
        Ok(ROOT_INODE)
    }

    pub fn get_inode(&self, ino: Ino) -> Option<&OverlayInode> {
        Self::slot(ino).and_then(|slot| self.inodes.get(slot))
    }

    pub fn get_inode_mut(&mut self, ino: Ino) -> Option<&mut OverlayInode> {
        Self::slot(ino).and_then(|slot| self.inodes.get_mut(slot))
    }

    pub fn contains(&self, ino: Ino) -> bool {
        self.get_inode(ino).is_some()
    }

    /// Inodes in number order.
    pub fn iter(&self) -> impl Iterator<Item = &OverlayInode> {
        self.inodes.iter()
    }

    pub fn set_attributes(&mut self, ino: Ino, attributes: InodeAttributes) -> Result<()> {
        self.inode_mut(ino)?.set_attributes(attributes)
    }

    pub fn set_payload(&mut self, ino: Ino, payload: UnionPayload) -> Result<()> {
        self.inode_mut(ino)?.set_payload(payload)
    }

    /// Record `parent` as the most recent parent directory of `ino`.
    pub fn set_parent(&mut self, ino: Ino, parent: Ino) -> Result<()> {
        if parent != 0 && !self.contains(parent) {
            return Err(inode_not_found(parent));
        }
        self.inode_mut(ino)?.special.parent = parent;
        Ok(())
    }

    pub fn set_reference_name(&mut self, ino: Ino, name: Option<&[u8]>) -> Result<()> {
        let name = name.map(try_copy_bytes).transpose()?;
        self.inode_mut(ino)?.special.reference_name = name;
        Ok(())
    }

    pub fn set_special_flags(&mut self, ino: Ino, flags: u32) -> Result<()> {
        self.inode_mut(ino)?.special.flags |= flags;
        Ok(())
    }

    pub fn clear_special_flags(&mut self, ino: Ino, flags: u32) -> Result<()> {
        self.inode_mut(ino)?.special.flags &= !flags;
        Ok(())
    }

    /// Map `native` to `ino` in the `kind` table and on the inode itself.
    ///
    /// An existing mapping for `native` is overwritten, whichever inode it
    /// pointed at. A previous mapping of `ino` to a different native pair is
    /// dropped from the table. Device 0 marks an absent mapping on disk and is
    /// refused.
    pub fn set_mapping(&mut self, ino: Ino, kind: MapKind, native: NativeRef) -> Result<()> {
        if native.device == NO_DEVICE {
            return Err(OvlError::InvalidArgument(format!(
                "{} mapping for inode {} has no device",
                kind, ino
            )));
        }
        let previous = self.inode(ino)?.special.mapping(kind);

        let table = self.table_mut(kind);
        if let Some(displaced) = table.set(native, ino)?.filter(|&other| other != ino) {
            tracing::debug!(
                "Remapped {} ({}, {}) from inode {} to {}",
                kind,
                native.device,
                native.inode,
                displaced,
                ino
            );
        }
        if let Some(old) = previous.filter(|&old| old != native) {
            if table.lookup(old) == Some(ino) {
                table.remove(old);
            }
        }

        *self.inode_mut(ino)?.special.mapping_mut(kind) = Some(native);
        Ok(())
    }

    pub fn set_base_mapping(&mut self, ino: Ino, device: u32, native_inode: u32) -> Result<()> {
        self.set_mapping(ino, MapKind::Base, NativeRef::new(device, native_inode))
    }

    pub fn set_storage_mapping(&mut self, ino: Ino, device: u32, native_inode: u32) -> Result<()> {
        self.set_mapping(ino, MapKind::Storage, NativeRef::new(device, native_inode))
    }

    /// Remove the `kind` mapping of `ino`, if it has one.
    pub fn clear_mapping(&mut self, ino: Ino, kind: MapKind) -> Result<()> {
        let previous = self.inode_mut(ino)?.special.mapping_mut(kind).take();
        if let Some(old) = previous {
            let table = self.table_mut(kind);
            if table.lookup(old) == Some(ino) {
                table.remove(old);
            }
        }
        Ok(())
    }

    pub fn lookup_by_native(&self, kind: MapKind, native: NativeRef) -> Option<Ino> {
        self.table(kind).lookup(native)
    }

    /// The native pair `ino` maps to, `None` when it has no such mapping yet.
    pub fn get_reverse_mapping(&self, ino: Ino, kind: MapKind) -> Result<Option<NativeRef>> {
        Ok(self.inode(ino)?.special.mapping(kind))
    }

    pub fn mapping_table(&self, kind: MapKind) -> &MappingTable {
        self.table(kind)
    }

    /// Mark a directory as read so its (possibly empty) entry set is authoritative.
    pub fn populate_directory(&mut self, dir: Ino) -> Result<()> {
        self.inode_mut(dir)?.populate().map(|_| ())
    }

    /// Bind `name` in `dir` to `target`, which becomes the target's most
    /// recent parent. Re-using a tombstoned name sets `SPECIAL_NO_BASE_REF`
    /// on the target, since base-fs identity no longer holds for that name.
    pub fn add_entry(&mut self, dir: Ino, name: &[u8], target: Ino, flags: u32) -> Result<AddOutcome> {
        if !self.contains(target) {
            return Err(inode_not_found(target));
        }
        let outcome = self
            .inode_mut(dir)?
            .with_entries(|entries| entries.add(name, target, flags))?;

        let target_inode = self.inode_mut(target)?;
        target_inode.special.parent = dir;
        if outcome.relinked {
            target_inode.special.flags |= SPECIAL_NO_BASE_REF;
            tracing::debug!(
                "Relinked '{}' in {}; inode {} loses its base reference",
                String::from_utf8_lossy(name),
                dir,
                target
            );
        }
        Ok(outcome)
    }

    pub fn find_entry(&self, dir: Ino, name: &[u8]) -> Option<&DirEntry> {
        self.get_inode(dir)?.entries()?.find(name)
    }

    pub fn unlink_entry(&mut self, dir: Ino, name: &[u8]) -> Result<()> {
        self.entries_mut(dir, name)?.unlink(name)
    }

    pub fn remove_entry_permanently(&mut self, dir: Ino, name: &[u8]) -> Result<DirEntry> {
        self.entries_mut(dir, name)?.remove_permanently(name)
    }

    pub fn rename_entry(&mut self, dir: Ino, old: &[u8], new: &[u8]) -> Result<()> {
        self.entries_mut(dir, old)?.rename(old, new)?;
        tracing::debug!(
            "Renamed '{}' to '{}' in {}",
            String::from_utf8_lossy(old),
            String::from_utf8_lossy(new),
            dir
        );
        Ok(())
    }

    pub fn count_entries(&self, dir: Ino, include_tombstoned: bool) -> Result<usize> {
        Ok(self
            .inode(dir)?
            .entries()
            .map_or(0, |entries| entries.count(include_tombstoned)))
    }

    pub fn deleted_entry_count(&self, dir: Ino) -> Result<usize> {
        Ok(self.inode(dir)?.deleted_entry_count())
    }

    /// Entry of `dir` created at `position`, or the next one created after it.
    pub fn find_by_position_or_next(&mut self, dir: Ino, position: u32) -> Result<Option<&DirEntry>> {
        match self.inode_mut(dir)?.entries_mut() {
            Some(entries) => entries.find_by_position_or_next(position),
            None => Ok(None),
        }
    }

    /// Like [`find_by_position_or_next`](Self::find_by_position_or_next) but
    /// skipping tombstones. Resume a scan with `entry.position + 1`.
    pub fn next_live_entry(&mut self, dir: Ino, position: u32) -> Result<Option<&DirEntry>> {
        match self.inode_mut(dir)?.entries_mut() {
            Some(entries) => entries.next_live(position),
            None => Ok(None),
        }
    }

    /// Append an inode read back from the state file.
    pub(crate) fn push_loaded(&mut self, inode: OverlayInode) -> Result<()> {
        let expected = self.next_inode_number()?;
        if inode.inode_number() != expected {
            return Err(OvlError::Corrupt(format!(
                "inode record {} out of sequence (expected {})",
                inode.inode_number(),
                expected
            )));
        }
        self.inodes.insert_at_end(inode)?;
        Ok(())
    }

    pub(crate) fn table_mut(&mut self, kind: MapKind) -> &mut MappingTable {
        match kind {
            MapKind::Base => &mut self.base_map,
            MapKind::Storage => &mut self.storage_map,
        }
    }

    fn table(&self, kind: MapKind) -> &MappingTable {
        match kind {
            MapKind::Base => &self.base_map,
            MapKind::Storage => &self.storage_map,
        }
    }

    fn inode(&self, ino: Ino) -> Result<&OverlayInode> {
        self.get_inode(ino).ok_or_else(|| inode_not_found(ino))
    }

    fn inode_mut(&mut self, ino: Ino) -> Result<&mut OverlayInode> {
        self.get_inode_mut(ino).ok_or_else(|| inode_not_found(ino))
    }

    /// Entries of `dir`; an unpopulated directory has no entry called `name`.
    fn entries_mut(&mut self, dir: Ino, name: &[u8]) -> Result<&mut DirEntries> {
        self.inode_mut(dir)?.entries_mut().ok_or_else(|| {
            OvlError::NotFound(format!(
                "directory entry '{}' in unpopulated inode {}",
                String::from_utf8_lossy(name),
                dir
            ))
        })
    }

    fn slot(ino: Ino) -> Option<usize> {
        ino.checked_sub(ROOT_INODE).map(|slot| slot as usize)
    }
}

fn inode_not_found(ino: Ino) -> OvlError {
    OvlError::NotFound(format!("inode {}", ino))
}
