use std::cmp::Ordering;

use crate::error::Result;
use crate::list::IndexedList;
use crate::overlay::types::{Ino, NativeRef};

/// Forward mapping from a native (device, inode) pair to an overlay inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRecord {
    pub native: NativeRef,
    pub inode: Ino,
}

fn record_order(a: &MappingRecord, b: &MappingRecord) -> Ordering {
    a.native.cmp(&b.native)
}

fn record_key(key: &NativeRef, record: &MappingRecord) -> Ordering {
    key.cmp(&record.native)
}

/// Sorted table of native-to-overlay mappings for one native filesystem.
/// Each native pair appears at most once.
#[derive(Debug)]
pub struct MappingTable {
    records: IndexedList<MappingRecord, NativeRef>,
}

impl MappingTable {
    pub fn new() -> Self {
        MappingTable {
            records: IndexedList::new(record_order, record_key),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lookup(&self, native: NativeRef) -> Option<Ino> {
        self.records
            .lookup(&native)
            .and_then(|slot| self.records.get(slot))
            .map(|record| record.inode)
    }

    /// Point `native` at `inode`, updating in place if the pair is already
    /// mapped. Returns the inode it pointed at before.
    pub fn set(&mut self, native: NativeRef, inode: Ino) -> Result<Option<Ino>> {
        if let Some(slot) = self.records.lookup(&native) {
            if let Some(record) = self.records.get_mut(slot) {
                let previous = record.inode;
                record.inode = inode;
                return Ok(Some(previous));
            }
        }
        self.records.insert_sorted(MappingRecord { native, inode })?;
        Ok(None)
    }

    pub fn remove(&mut self, native: NativeRef) -> Option<Ino> {
        self.records.remove(&native).map(|record| record.inode)
    }

    /// Records in (device, inode) order.
    pub fn iter(&self) -> impl Iterator<Item = &MappingRecord> {
        self.records.iter()
    }

    /// Append a record read back from the state file. A repeated pair keeps
    /// the last value, as a later write would have.
    pub(crate) fn insert_loaded(&mut self, native: NativeRef, inode: Ino) -> Result<()> {
        self.set(native, inode).map(|_| ())
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new()
    }
}
