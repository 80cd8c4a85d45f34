use std::io::Read;

use crate::codec::format::{Features, FormatVersion};
use crate::codec::stream::FieldReader;
use crate::config::StoreConfig;
use crate::error::{OvlError, Result};
use crate::overlay::{
    DirEntries, FileKind, InodeAttributes, InodeRegistry, Ino, MapKind, MappingTable, NativeRef,
    OverlayInode, SpecialInfo, UnionPayload, NO_DEVICE, ROOT_INODE,
};

/// Rebuild a registry from `input`.
///
/// An empty stream means "no prior state" and yields an empty registry. Any
/// inconsistency aborts the whole load; nothing partially read escapes.
pub fn read_registry<R: Read>(input: R, config: &StoreConfig) -> Result<InodeRegistry> {
    let mut registry = InodeRegistry::from_config(config);
    let mut reader = FieldReader::new(input);

    let Some(magic) = reader.read_u32_or_eof("magic number")? else {
        tracing::info!("State file is empty, starting without prior state");
        return Ok(registry);
    };
    if magic != config.get_magic_number() {
        return Err(OvlError::Corrupt(format!(
            "magic number {:#010x} does not match {:#010x}",
            magic,
            config.get_magic_number()
        )));
    }

    let version = FormatVersion::from_word(reader.read_word("version word")?)?;
    let features = match version {
        FormatVersion::V3 => Features::for_v3(config),
        FormatVersion::V4 => Features::from_bits(reader.read_u32("feature flags")?)?,
    };

    let count = reader.read_u32("inode count")?;
    for index in 0..count {
        let ino = index
            .checked_add(ROOT_INODE)
            .ok_or_else(|| OvlError::Corrupt(format!("inode count {} overflows", count)))?;
        let inode = read_inode(&mut reader, ino, features)?;
        registry.push_loaded(inode)?;
    }

    if features.base_mappings {
        read_table(&mut reader, registry.table_mut(MapKind::Base))?;
    }
    if features.storage_mappings {
        read_table(&mut reader, registry.table_mut(MapKind::Storage))?;
    }

    validate_references(&registry)?;
    tracing::info!(
        "Loaded {} inodes from version {:?} state file",
        registry.len(),
        version
    );
    Ok(registry)
}

fn read_inode<R: Read>(
    reader: &mut FieldReader<R>,
    ino: Ino,
    features: Features,
) -> Result<OverlayInode> {
    let start = reader.consumed();
    let record_size = reader.read_u32("record size")?;

    let flags = reader.read_u32("inode flags")?;
    let uid = reader.read_u32("uid")?;
    let gid = reader.read_u32("gid")?;
    let mode = reader.read_u32("mode")?;
    let attributes = InodeAttributes {
        flags,
        mode,
        uid,
        gid,
        size: reader.read_u32("size")?,
        atime: reader.read_i32("atime")?,
        mtime: reader.read_i32("mtime")?,
        ctime: reader.read_i32("ctime")?,
        nlink: reader.read_u32("nlink")?,
        blksize: reader.read_u32("blksize")?,
        blocks: reader.read_u32("blocks")?,
        generation: reader.read_u32("version counter")?,
        nrpages: reader.read_u32("nrpages")?,
        valid: mode != 0,
    };

    let parent = reader.read_u32("parent inode")?;
    let base = if features.base_mappings {
        let device = reader.read_u32("base device")?;
        NativeRef::from_wire(device, reader.read_u32("base inode")?)
    } else {
        None
    };
    let storage = if features.storage_mappings {
        let device = reader.read_u32("storage device")?;
        NativeRef::from_wire(device, reader.read_u32("storage inode")?)
    } else {
        None
    };
    let special_flags = reader.read_u32("special flags")?;
    let name = reader.read_bytes("reference name")?;
    let special = SpecialInfo {
        parent,
        base,
        storage,
        flags: special_flags,
        reference_name: if name.is_empty() { None } else { Some(name) },
    };

    let mut payload = UnionPayload::None;
    let mut entries = None;
    match attributes.kind() {
        Some(kind) if kind.is_device() => {
            payload = UnionPayload::Device(reader.read_u32("device number")?);
        }
        Some(FileKind::Directory) => {
            let entry_count = reader.read_u32("entry count")?;
            // An empty directory comes back unpopulated so it gets re-read.
            if entry_count > 0 {
                let mut dir = DirEntries::new()?;
                for _ in 0..entry_count {
                    let name = reader.read_bytes("entry name")?;
                    let target = reader.read_u32("entry inode")?;
                    let flags = reader.read_u32("entry flags")?;
                    dir.insert_loaded(name, target, flags)?;
                }
                entries = Some(dir);
            }
        }
        _ => {}
    }

    let actual = reader.consumed() - start;
    if actual != u64::from(record_size) {
        return Err(OvlError::Corrupt(format!(
            "record for inode {} declares {} bytes but holds {}",
            ino, record_size, actual
        )));
    }

    Ok(OverlayInode::from_parts(
        ino, attributes, special, entries, payload,
    ))
}

fn read_table<R: Read>(reader: &mut FieldReader<R>, table: &mut MappingTable) -> Result<()> {
    let count = reader.read_u32("mapping count")?;
    for _ in 0..count {
        let device = reader.read_u32("mapping device")?;
        let native = reader.read_u32("mapping native inode")?;
        let inode = reader.read_u32("mapping overlay inode")?;
        if device == NO_DEVICE {
            return Err(OvlError::Corrupt(format!(
                "mapping of native inode {} to inode {} has no device",
                native, inode
            )));
        }
        table.insert_loaded(NativeRef::new(device, native), inode)?;
    }
    Ok(())
}

/// Every inode number stored in the file must name a loaded inode.
fn validate_references(registry: &InodeRegistry) -> Result<()> {
    let check = |ino: Ino, what: &str| -> Result<()> {
        if registry.contains(ino) {
            Ok(())
        } else {
            Err(OvlError::Corrupt(format!(
                "{} refers to missing inode {}",
                what, ino
            )))
        }
    };

    for inode in registry.iter() {
        if inode.special.parent != 0 {
            check(inode.special.parent, "parent link")?;
        }
        if let Some(entries) = inode.entries() {
            for entry in entries.iter() {
                check(entry.inode, "directory entry")?;
            }
        }
    }
    for kind in [MapKind::Base, MapKind::Storage] {
        for record in registry.mapping_table(kind).iter() {
            check(record.inode, "mapping table")?;
        }
    }
    Ok(())
}
