use crate::error::{OvlError, Result};
use crate::overlay::dirent::DirEntries;
use crate::overlay::types::{FileKind, InodeAttributes, Ino, SpecialInfo, UnionPayload};

/// One file or directory known to the overlay.
#[derive(Debug)]
pub struct OverlayInode {
    inode_number: Ino,
    attributes: InodeAttributes,
    pub special: SpecialInfo,
    /// `None` for non-directories and for directories not read yet.
    entries: Option<DirEntries>,
    payload: UnionPayload,
}

impl OverlayInode {
    pub(crate) fn new(inode_number: Ino, reference_name: Option<Vec<u8>>) -> Self {
        OverlayInode {
            inode_number,
            attributes: InodeAttributes::default(),
            special: SpecialInfo {
                reference_name,
                ..Default::default()
            },
            entries: None,
            payload: UnionPayload::None,
        }
    }

    pub fn inode_number(&self) -> Ino {
        self.inode_number
    }

    pub fn attributes(&self) -> &InodeAttributes {
        &self.attributes
    }

    pub fn attributes_valid(&self) -> bool {
        self.attributes.valid
    }

    pub fn kind(&self) -> Option<FileKind> {
        self.attributes.kind()
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir()
    }

    /// Install fully populated attributes.
    ///
    /// A zero mode is rejected because the persisted format reserves it for
    /// "not populated". An inode that already holds directory entries cannot
    /// stop being a directory. A payload that no longer fits the file type is
    /// dropped.
    pub fn set_attributes(&mut self, mut attributes: InodeAttributes) -> Result<()> {
        if attributes.mode == 0 {
            return Err(OvlError::InvalidArgument(format!(
                "inode {}: mode 0 is reserved for unpopulated attributes",
                self.inode_number
            )));
        }
        attributes.valid = true;
        let kind = FileKind::from_mode(attributes.mode);
        if self.entries.is_some() && kind != Some(FileKind::Directory) {
            return Err(OvlError::InvalidArgument(format!(
                "inode {} has directory entries and cannot change type",
                self.inode_number
            )));
        }
        if !self.payload.fits(kind) {
            tracing::debug!(
                "Dropping payload of inode {} after type change",
                self.inode_number
            );
            self.payload = UnionPayload::None;
        }
        self.attributes = attributes;
        Ok(())
    }

    pub fn payload(&self) -> &UnionPayload {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: UnionPayload) -> Result<()> {
        if !payload.fits(self.kind()) {
            return Err(OvlError::InvalidArgument(format!(
                "payload {:?} does not fit inode {} of kind {:?}",
                payload,
                self.inode_number,
                self.kind()
            )));
        }
        self.payload = payload;
        Ok(())
    }

    pub fn entries(&self) -> Option<&DirEntries> {
        self.entries.as_ref()
    }

    pub fn entries_mut(&mut self) -> Option<&mut DirEntries> {
        self.entries.as_mut()
    }

    /// Whether the directory's contents have been read into the overlay.
    pub fn is_populated(&self) -> bool {
        self.entries.is_some()
    }

    /// Mark a directory as read, creating its (empty) entry collection.
    pub(crate) fn populate(&mut self) -> Result<&mut DirEntries> {
        self.check_dir()?;
        let entries = match self.entries.take() {
            Some(entries) => entries,
            None => DirEntries::new()?,
        };
        Ok(self.entries.insert(entries))
    }

    /// Run `f` against this directory's entries. On an unpopulated directory
    /// the collection is only installed if `f` succeeds.
    pub(crate) fn with_entries<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut DirEntries) -> Result<R>,
    {
        self.check_dir()?;
        match self.entries.as_mut() {
            Some(entries) => f(entries),
            None => {
                let mut entries = DirEntries::new()?;
                let result = f(&mut entries)?;
                self.entries = Some(entries);
                Ok(result)
            }
        }
    }

    fn check_dir(&self) -> Result<()> {
        if self.is_dir() {
            Ok(())
        } else {
            Err(OvlError::InvalidArgument(format!(
                "inode {} is not a directory",
                self.inode_number
            )))
        }
    }

    /// Tombstoned entries in this directory, 0 for anything else.
    pub fn deleted_entry_count(&self) -> usize {
        self.entries
            .as_ref()
            .map_or(0, DirEntries::deleted_count)
    }

    /// Restore a record from the state file without the checks applied to
    /// live updates.
    pub(crate) fn from_parts(
        inode_number: Ino,
        attributes: InodeAttributes,
        special: SpecialInfo,
        entries: Option<DirEntries>,
        payload: UnionPayload,
    ) -> Self {
        OverlayInode {
            inode_number,
            attributes,
            special,
            entries,
            payload,
        }
    }
}
