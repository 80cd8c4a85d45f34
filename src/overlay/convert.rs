use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use crate::overlay::types::{InodeAttributes, NativeRef};

// The persisted format stores 4-byte fields; wider native values are truncated.

impl InodeAttributes {
    /// Attributes of a base or storage file, as returned by `stat`.
    pub fn from_metadata(meta: &Metadata) -> Self {
        InodeAttributes {
            flags: 0,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size() as u32,
            atime: meta.atime() as i32,
            mtime: meta.mtime() as i32,
            ctime: meta.ctime() as i32,
            nlink: meta.nlink() as u32,
            blksize: meta.blksize() as u32,
            blocks: meta.blocks() as u32,
            generation: 0,
            nrpages: 0,
            valid: true,
        }
    }
}

impl NativeRef {
    /// The (device, inode) pair identifying a file on its native filesystem.
    pub fn from_metadata(meta: &Metadata) -> Self {
        NativeRef {
            device: meta.dev() as u32,
            inode: meta.ino() as u32,
        }
    }
}

/// Device number of a block or character special file.
pub fn device_number(meta: &Metadata) -> u32 {
    meta.rdev() as u32
}
