//! Overlay metadata: the inode registry, per-directory entry sets and the
//! native-to-overlay mapping tables.

mod convert;
mod dirent;
mod inode;
mod mapping;
mod memory;
mod registry;
mod store;
pub mod types;

pub use convert::device_number;
pub use dirent::{AddOutcome, DirEntries, DirEntry};
pub use inode::OverlayInode;
pub use mapping::{MappingRecord, MappingTable};
pub use memory::{MemoryGuard, MemorySource, MemorySnapshot, SysinfoSource};
pub use registry::InodeRegistry;
pub use store::OverlayStore;
pub use types::{
    FileKind, InodeAttributes, Ino, MapKind, NativeRef, SpecialInfo, UnionPayload,
    DIRENT_NORMAL, DIRENT_RELINKED, DIRENT_UNLINKED, NO_DEVICE, ROOT_INODE, SPECIAL_NO_BASE_REF,
};
