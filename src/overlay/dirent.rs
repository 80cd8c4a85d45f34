//! Per-directory entry store.
//!
//! Entries are kept in an [`IndexedList`] ordered by name, with a lazily
//! maintained auxiliary index ordered by insertion position. The name order
//! serves lookups; the position order serves resumable enumeration.
//!
//! Removing a name normally leaves a tombstone (`DIRENT_UNLINKED`) rather
//! than deleting the record, so a name lookup always finds the tombstone and
//! callers have to resurrect or permanently remove it before the name can be
//! reused.

use std::cmp::Ordering;

use crate::error::{OvlError, Result};
use crate::list::{IndexId, IndexPosition, IndexedList};
use crate::overlay::types::{
    compare_names, try_copy_bytes, Ino, DIRENT_NORMAL, DIRENT_RELINKED, DIRENT_UNLINKED,
};

/// A name bound to an inode within one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub inode: Ino,
    pub flags: u32,
    /// Monotonic per-directory counter value assigned at creation.
    pub position: u32,
}

impl DirEntry {
    pub fn is_unlinked(&self) -> bool {
        self.flags & DIRENT_UNLINKED != 0
    }

    pub fn is_relinked(&self) -> bool {
        self.flags & DIRENT_RELINKED != 0
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Result of a successful [`DirEntries::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub position: u32,
    /// The name replaced a tombstone.
    pub relinked: bool,
}

fn entry_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    compare_names(&a.name, &b.name)
}

fn entry_key(name: &[u8], entry: &DirEntry) -> Ordering {
    compare_names(name, &entry.name)
}

fn position_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.position.cmp(&b.position)
}

#[derive(Debug)]
pub struct DirEntries {
    entries: IndexedList<DirEntry, [u8]>,
    by_position: IndexId,
    next_position: u32,
    deleted: usize,
}

impl DirEntries {
    pub fn new() -> Result<Self> {
        let mut entries = IndexedList::new(entry_order, entry_key);
        let by_position = entries.add_index(position_order, true)?;
        Ok(DirEntries {
            entries,
            by_position,
            next_position: 0,
            deleted: 0,
        })
    }

    /// Bind `name` to `inode`.
    ///
    /// A live entry with the same name is an error. A tombstoned one is
    /// replaced by the new entry, which carries `DIRENT_RELINKED`; the caller
    /// learns about it through [`AddOutcome::relinked`].
    pub fn add(&mut self, name: &[u8], inode: Ino, flags: u32) -> Result<AddOutcome> {
        check_name(name)?;
        let position = self.next_position;
        let next_position = self.bump_position()?;

        let existing = self.entries.lookup(name);
        if let Some(slot) = existing {
            if !self.entries.as_slice()[slot].is_unlinked() {
                return Err(OvlError::AlreadyExists(format!(
                    "directory entry '{}'",
                    String::from_utf8_lossy(name)
                )));
            }
        }

        let mut entry = DirEntry {
            name: try_copy_bytes(name)?,
            inode,
            flags: flags & !DIRENT_UNLINKED,
            position,
        };

        let relinked = match existing {
            Some(slot) => {
                entry.flags |= DIRENT_RELINKED;
                self.entries.replace_at(slot, entry)?;
                self.deleted -= 1;
                true
            }
            None => {
                self.entries.insert_sorted(entry)?;
                false
            }
        };

        self.next_position = next_position;
        tracing::debug!(
            "Added entry '{}' -> {} at position {} (relinked: {})",
            String::from_utf8_lossy(name),
            inode,
            position,
            relinked
        );
        Ok(AddOutcome { position, relinked })
    }

    /// Find an entry by name, tombstoned or not.
    pub fn find(&self, name: &[u8]) -> Option<&DirEntry> {
        self.entries
            .lookup(name)
            .and_then(|slot| self.entries.get(slot))
    }

    /// Tombstone a live entry.
    pub fn unlink(&mut self, name: &[u8]) -> Result<()> {
        let slot = self.live_slot(name)?;
        self.tombstone(slot);
        Ok(())
    }

    /// Delete an entry record outright, tombstoned or not.
    pub fn remove_permanently(&mut self, name: &[u8]) -> Result<DirEntry> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| not_found(name))?;
        if entry.is_unlinked() {
            self.deleted -= 1;
        }
        Ok(entry)
    }

    /// Rename `old` to `new` within this directory.
    ///
    /// The old entry is always left behind as a tombstone. If `new` exists it
    /// takes over the old entry's target (resurrecting it first if it was a
    /// tombstone); otherwise a fresh entry is inserted, and a failed insert
    /// restores the old entry.
    pub fn rename(&mut self, old: &[u8], new: &[u8]) -> Result<()> {
        check_name(new)?;
        let old_slot = self.live_slot(old)?;
        if compare_names(old, new) == Ordering::Equal {
            return Ok(());
        }
        let target = self.entries.as_slice()[old_slot].inode;

        if let Some(new_slot) = self.entries.lookup(new) {
            let was_unlinked = match self.entries.get_mut(new_slot) {
                Some(entry) => {
                    let was_unlinked = entry.is_unlinked();
                    if was_unlinked {
                        entry.flags = (entry.flags & !DIRENT_UNLINKED) | DIRENT_RELINKED;
                    }
                    entry.inode = target;
                    was_unlinked
                }
                None => return Err(not_found(new)),
            };
            if was_unlinked {
                self.deleted -= 1;
            }
            self.tombstone(old_slot);
            return Ok(());
        }

        let position = self.next_position;
        let next_position = self.bump_position()?;
        let entry = DirEntry {
            name: try_copy_bytes(new)?,
            inode: target,
            flags: DIRENT_NORMAL,
            position,
        };

        self.tombstone(old_slot);
        if let Err(e) = self.entries.insert_sorted(entry) {
            // The failed insert did not touch the list, so the old slot is still valid.
            self.restore(old_slot);
            return Err(e);
        }
        self.next_position = next_position;
        Ok(())
    }

    /// Number of entries, optionally counting tombstones.
    pub fn count(&self, include_tombstoned: bool) -> usize {
        if include_tombstoned {
            self.entries.len()
        } else {
            self.entries.len() - self.deleted
        }
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    /// Entry created at `position`, or else the one created soonest after it.
    pub fn find_by_position_or_next(&mut self, position: u32) -> Result<Option<&DirEntry>> {
        let found = self
            .entries
            .search_index_by(self.by_position, |entry| entry.position.cmp(&position))?;
        let index_position = match found {
            IndexPosition::Exact(pos) | IndexPosition::Insert(pos) => pos,
        };
        if index_position >= self.entries.len() {
            return Ok(None);
        }
        self.entries
            .read_index(self.by_position, index_position)
            .map(Some)
    }

    /// Like [`find_by_position_or_next`](Self::find_by_position_or_next), but
    /// skipping tombstones.
    pub fn next_live(&mut self, mut position: u32) -> Result<Option<&DirEntry>> {
        loop {
            let next = match self.find_by_position_or_next(position)? {
                None => return Ok(None),
                Some(entry) if !entry.is_unlinked() => entry.position,
                Some(entry) => match entry.position.checked_add(1) {
                    Some(after) => {
                        position = after;
                        continue;
                    }
                    None => return Ok(None),
                },
            };
            return self.find_by_position_or_next(next);
        }
    }

    /// All entries, in name order.
    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter()
    }

    /// All entries, in creation order.
    pub fn in_position_order(&self) -> Vec<&DirEntry> {
        let mut entries: Vec<&DirEntry> = self.entries.iter().collect();
        entries.sort_by_key(|entry| entry.position);
        entries
    }

    /// Append an entry read back from the state file. Positions are handed
    /// out in file order.
    pub(crate) fn insert_loaded(&mut self, name: Vec<u8>, inode: Ino, flags: u32) -> Result<()> {
        check_name(&name)
            .map_err(|_| OvlError::Corrupt("directory entry with an empty name".to_string()))?;
        if self.entries.lookup(&name).is_some() {
            return Err(OvlError::Corrupt(format!(
                "duplicate directory entry '{}'",
                String::from_utf8_lossy(&name)
            )));
        }
        let position = self.next_position;
        let next_position = self.bump_position()?;
        let unlinked = flags & DIRENT_UNLINKED != 0;
        self.entries.insert_sorted(DirEntry {
            name,
            inode,
            flags,
            position,
        })?;
        if unlinked {
            self.deleted += 1;
        }
        self.next_position = next_position;
        Ok(())
    }

    fn live_slot(&self, name: &[u8]) -> Result<usize> {
        match self.entries.lookup(name) {
            Some(slot) if !self.entries.as_slice()[slot].is_unlinked() => Ok(slot),
            _ => Err(not_found(name)),
        }
    }

    fn tombstone(&mut self, slot: usize) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.flags |= DIRENT_UNLINKED;
            self.deleted += 1;
        }
    }

    fn restore(&mut self, slot: usize) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.flags &= !DIRENT_UNLINKED;
            self.deleted -= 1;
        }
    }

    fn bump_position(&self) -> Result<u32> {
        self.next_position.checked_add(1).ok_or_else(|| {
            OvlError::OutOfMemory("directory position counter exhausted".to_string())
        })
    }
}

fn check_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(OvlError::InvalidArgument(
            "directory entry name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn not_found(name: &[u8]) -> OvlError {
    OvlError::NotFound(format!(
        "directory entry '{}'",
        String::from_utf8_lossy(name)
    ))
}
