use std::cmp::Ordering;
use std::fmt;

use crate::error::{OvlError, Result};

/// Overlay inode number. Assigned densely from [`ROOT_INODE`] and never reused.
pub type Ino = u32;

/// Number handed to the first inode a registry creates.
pub const ROOT_INODE: Ino = 1;

/// Device number meaning "no mapping" in the persisted format.
pub const NO_DEVICE: u32 = 0;

/// The entry that referenced a base-fs file was removed and re-created, so
/// the inode's identity no longer follows the base filesystem.
pub const SPECIAL_NO_BASE_REF: u32 = 0x0000_0001;

pub const DIRENT_NORMAL: u32 = 0;
/// Tombstone: the name is deleted in the overlay but kept for bookkeeping.
pub const DIRENT_UNLINKED: u32 = 0x0000_0001;
/// The name was re-created after having been tombstoned.
pub const DIRENT_RELINKED: u32 = 0x0000_0002;

/// Which native filesystem a mapping refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    Base,
    Storage,
}

impl TryFrom<u32> for MapKind {
    type Error = OvlError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MapKind::Base),
            1 => Ok(MapKind::Storage),
            other => Err(OvlError::InvalidArgument(format!(
                "unknown mapping table discriminator {}",
                other
            ))),
        }
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKind::Base => write!(f, "base"),
            MapKind::Storage => write!(f, "storage"),
        }
    }
}

/// An inode as numbered by the base or storage filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeRef {
    pub device: u32,
    pub inode: u32,
}

impl NativeRef {
    pub fn new(device: u32, inode: u32) -> Self {
        NativeRef { device, inode }
    }

    /// Decode the persisted pair, where device `NO_DEVICE` means "none".
    pub(crate) fn from_wire(device: u32, inode: u32) -> Option<Self> {
        if device == NO_DEVICE {
            None
        } else {
            Some(NativeRef { device, inode })
        }
    }

    pub(crate) fn to_wire(this: Option<Self>) -> (u32, u32) {
        this.map_or((NO_DEVICE, 0), |r| (r.device, r.inode))
    }
}

/// File type, decoded from the type bits of `mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileKind {
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & (libc::S_IFMT as u32) {
            x if x == libc::S_IFREG as u32 => Some(FileKind::Regular),
            x if x == libc::S_IFDIR as u32 => Some(FileKind::Directory),
            x if x == libc::S_IFLNK as u32 => Some(FileKind::Symlink),
            x if x == libc::S_IFBLK as u32 => Some(FileKind::BlockDevice),
            x if x == libc::S_IFCHR as u32 => Some(FileKind::CharDevice),
            x if x == libc::S_IFIFO as u32 => Some(FileKind::Fifo),
            x if x == libc::S_IFSOCK as u32 => Some(FileKind::Socket),
            _ => None,
        }
    }

    pub fn is_device(self) -> bool {
        matches!(self, FileKind::BlockDevice | FileKind::CharDevice)
    }
}

/// Inode attributes as cached by the overlay.
///
/// `valid` is false for inodes created as directory-entry placeholders whose
/// attributes have not been read yet. The persisted format encodes this as
/// `mode == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InodeAttributes {
    pub flags: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
    pub nlink: u32,
    pub blksize: u32,
    pub blocks: u32,
    pub generation: u32,
    pub nrpages: u32,
    pub valid: bool,
}

impl InodeAttributes {
    /// Attributes for a freshly created directory with the given permissions.
    pub fn directory(perm: u32) -> Self {
        InodeAttributes {
            mode: libc::S_IFDIR as u32 | (perm & 0o7777),
            nlink: 2,
            valid: true,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> Option<FileKind> {
        if self.valid {
            FileKind::from_mode(self.mode)
        } else {
            None
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }
}

/// Type-specific payload of an inode, selected by its file type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UnionPayload {
    #[default]
    None,
    Device(u32),
    SymlinkTarget(Vec<u8>),
}

impl UnionPayload {
    /// Whether this payload may be attached to an inode of type `kind`.
    pub fn fits(&self, kind: Option<FileKind>) -> bool {
        match self {
            UnionPayload::None => true,
            UnionPayload::Device(_) => kind.is_some_and(FileKind::is_device),
            UnionPayload::SymlinkTarget(_) => kind == Some(FileKind::Symlink),
        }
    }
}

/// Overlay bookkeeping kept alongside the attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecialInfo {
    /// Most recent parent directory, 0 when unknown.
    pub parent: Ino,
    pub base: Option<NativeRef>,
    pub storage: Option<NativeRef>,
    pub flags: u32,
    /// Name used when the inode must be materialized in storage. Not
    /// null-terminated; may contain null bytes.
    pub reference_name: Option<Vec<u8>>,
}

impl SpecialInfo {
    pub fn mapping(&self, kind: MapKind) -> Option<NativeRef> {
        match kind {
            MapKind::Base => self.base,
            MapKind::Storage => self.storage,
        }
    }

    pub(crate) fn mapping_mut(&mut self, kind: MapKind) -> &mut Option<NativeRef> {
        match kind {
            MapKind::Base => &mut self.base,
            MapKind::Storage => &mut self.storage,
        }
    }
}

/// Names order by length first, then bytes.
pub(crate) fn compare_names(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Copy a byte string, reporting allocation failure instead of aborting.
pub(crate) fn try_copy_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut copy = Vec::new();
    copy.try_reserve_exact(bytes.len())?;
    copy.extend_from_slice(bytes);
    Ok(copy)
}
