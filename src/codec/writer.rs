use std::io::{Seek, Write};

use crate::codec::format::{Features, FormatVersion};
use crate::codec::stream::FieldWriter;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::overlay::{
    FileKind, InodeRegistry, MapKind, MappingTable, NativeRef, OverlayInode, UnionPayload,
};

/// Serialize `registry` to `out` in the format selected by `config`.
pub fn write_registry<W: Write + Seek>(
    registry: &InodeRegistry,
    config: &StoreConfig,
    out: W,
) -> Result<W> {
    let version = FormatVersion::from_number(config.get_format_version())?;
    let features = Features::for_save(version, config);

    let mut writer = FieldWriter::new(out);
    writer.write_u32(config.get_magic_number())?;
    writer.write_raw(&version.word())?;
    if version == FormatVersion::V4 {
        writer.write_u32(features.bits())?;
    }

    writer.write_len(registry.len(), "inode")?;
    for inode in registry.iter() {
        write_inode(&mut writer, inode, features)?;
    }

    if features.base_mappings {
        write_table(&mut writer, registry.mapping_table(MapKind::Base))?;
    }
    if features.storage_mappings {
        write_table(&mut writer, registry.mapping_table(MapKind::Storage))?;
    }

    Ok(writer.into_inner())
}

fn write_inode<W: Write + Seek>(
    writer: &mut FieldWriter<W>,
    inode: &OverlayInode,
    features: Features,
) -> Result<()> {
    let start = writer.begin_record()?;

    let attrs = inode.attributes();
    writer.write_u32(attrs.flags)?;
    writer.write_u32(attrs.uid)?;
    writer.write_u32(attrs.gid)?;
    writer.write_u32(if attrs.valid { attrs.mode } else { 0 })?;
    writer.write_u32(attrs.size)?;
    writer.write_i32(attrs.atime)?;
    writer.write_i32(attrs.mtime)?;
    writer.write_i32(attrs.ctime)?;
    writer.write_u32(attrs.nlink)?;
    writer.write_u32(attrs.blksize)?;
    writer.write_u32(attrs.blocks)?;
    writer.write_u32(attrs.generation)?;
    writer.write_u32(attrs.nrpages)?;

    let special = &inode.special;
    writer.write_u32(special.parent)?;
    if features.base_mappings {
        let (device, native) = NativeRef::to_wire(special.base);
        writer.write_u32(device)?;
        writer.write_u32(native)?;
    }
    if features.storage_mappings {
        let (device, native) = NativeRef::to_wire(special.storage);
        writer.write_u32(device)?;
        writer.write_u32(native)?;
    }
    writer.write_u32(special.flags)?;
    writer.write_bytes(special.reference_name.as_deref().unwrap_or_default())?;

    match inode.kind() {
        Some(kind) if kind.is_device() => {
            let device = match inode.payload() {
                UnionPayload::Device(device) => *device,
                _ => 0,
            };
            writer.write_u32(device)?;
        }
        Some(FileKind::Directory) => match inode.entries() {
            Some(entries) => {
                let ordered = entries.in_position_order();
                writer.write_len(ordered.len(), "directory entry")?;
                for entry in ordered {
                    writer.write_bytes(&entry.name)?;
                    writer.write_u32(entry.inode)?;
                    writer.write_u32(entry.flags)?;
                }
            }
            None => writer.write_u32(0)?,
        },
        _ => {}
    }

    writer.end_record(start)
}

fn write_table<W: Write + Seek>(writer: &mut FieldWriter<W>, table: &MappingTable) -> Result<()> {
    writer.write_len(table.len(), "mapping")?;
    for record in table.iter() {
        writer.write_u32(record.native.device)?;
        writer.write_u32(record.native.inode)?;
        writer.write_u32(record.inode)?;
    }
    Ok(())
}
