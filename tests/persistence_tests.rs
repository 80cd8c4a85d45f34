mod common;

use std::fs;
use std::fs::File;
use std::io::Cursor;

use common::{rooted_registry, test_config, StateDir};
use fs2::FileExt;
use ovlstore::overlay::{
    InodeAttributes, MapKind, NativeRef, UnionPayload, DIRENT_NORMAL, ROOT_INODE,
    SPECIAL_NO_BASE_REF,
};
use ovlstore::{
    load_from_path, read_registry, save_to_path, write_registry, InodeRegistry, OverlayStore,
    OvlError, StoreConfig,
};

// magic + version word + feature flags + inode count
const V4_HEADER_LEN: usize = 16;

fn regular_file(size: u32) -> InodeAttributes {
    InodeAttributes {
        mode: libc::S_IFREG as u32 | 0o644,
        uid: 1000,
        gid: 100,
        size,
        atime: 1_700_000_000,
        mtime: 1_700_000_100,
        ctime: -5,
        nlink: 1,
        blksize: 4096,
        blocks: 8,
        generation: 3,
        nrpages: 2,
        valid: true,
        ..Default::default()
    }
}

/// Root with a populated subdirectory, a file, a device node, a tombstone,
/// a relinked name and mappings in both tables.
fn sample_registry() -> InodeRegistry {
    let mut registry = rooted_registry();

    let dir = registry.add_inode(Some(b"sub")).unwrap();
    registry
        .set_attributes(dir, InodeAttributes::directory(0o700))
        .unwrap();
    let file = registry.add_inode(Some(b"notes\0.txt")).unwrap();
    registry.set_attributes(file, regular_file(42)).unwrap();
    let dev = registry.add_inode(None).unwrap();
    registry
        .set_attributes(
            dev,
            InodeAttributes {
                mode: libc::S_IFCHR as u32 | 0o600,
                valid: true,
                ..Default::default()
            },
        )
        .unwrap();
    registry.set_payload(dev, UnionPayload::Device(0x0103)).unwrap();
    let placeholder = registry.add_inode(None).unwrap();

    registry.add_entry(ROOT_INODE, b"sub", dir, DIRENT_NORMAL).unwrap();
    registry.add_entry(ROOT_INODE, b"null", dev, DIRENT_NORMAL).unwrap();
    registry.add_entry(dir, b"notes", file, DIRENT_NORMAL).unwrap();
    registry.add_entry(dir, b"gone", placeholder, DIRENT_NORMAL).unwrap();
    registry.add_entry(dir, b"later", placeholder, DIRENT_NORMAL).unwrap();
    registry.unlink_entry(dir, b"gone").unwrap();
    registry.unlink_entry(dir, b"later").unwrap();
    registry.add_entry(dir, b"later", file, DIRENT_NORMAL).unwrap();

    registry.set_base_mapping(ROOT_INODE, 8, 2).unwrap();
    registry.set_base_mapping(file, 8, 100).unwrap();
    registry.set_storage_mapping(file, 9, 7).unwrap();
    registry
}

fn encode(registry: &InodeRegistry, config: &StoreConfig) -> Vec<u8> {
    write_registry(registry, config, Cursor::new(Vec::new()))
        .unwrap()
        .into_inner()
}

fn decode(bytes: &[u8], config: &StoreConfig) -> ovlstore::Result<InodeRegistry> {
    read_registry(Cursor::new(bytes), config)
}

fn assert_same_state(original: &InodeRegistry, loaded: &InodeRegistry) {
    assert_eq!(original.len(), loaded.len());
    for inode in original.iter() {
        let ino = inode.inode_number();
        let other = loaded.get_inode(ino).unwrap();
        assert_eq!(inode.attributes(), other.attributes(), "attributes of {}", ino);
        assert_eq!(inode.special, other.special, "special info of {}", ino);
        assert_eq!(inode.payload(), other.payload(), "payload of {}", ino);
        assert_eq!(
            inode.deleted_entry_count(),
            other.deleted_entry_count(),
            "tombstones of {}",
            ino
        );

        let Some(entries) = inode.entries() else {
            continue;
        };
        let names: Vec<_> = entries
            .in_position_order()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        let loaded_names: Vec<_> = other
            .entries()
            .unwrap()
            .in_position_order()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(names, loaded_names, "enumeration order of {}", ino);
        for entry in entries.iter() {
            let found = other.entries().unwrap().find(&entry.name).unwrap();
            assert_eq!(found.inode, entry.inode);
            assert_eq!(found.flags, entry.flags);
        }
    }
    for kind in [MapKind::Base, MapKind::Storage] {
        let pairs: Vec<_> = original.mapping_table(kind).iter().collect();
        let loaded_pairs: Vec<_> = loaded.mapping_table(kind).iter().collect();
        assert_eq!(pairs, loaded_pairs, "{} table", kind);
    }
}

/// Test that a version 4 save and load reproduces every inode, entry and mapping.
#[test]
fn test_v4_round_trip() {
    let config = test_config();
    let registry = sample_registry();

    let loaded = decode(&encode(&registry, &config), &config).unwrap();
    assert_same_state(&registry, &loaded);

    let sub = loaded.find_entry(ROOT_INODE, b"sub").unwrap().inode;
    assert!(loaded.find_entry(sub, b"gone").unwrap().is_unlinked());
    assert!(loaded.find_entry(sub, b"later").unwrap().is_relinked());
    assert_eq!(loaded.deleted_entry_count(sub).unwrap(), 1);
    let file = loaded.find_entry(sub, b"notes").unwrap().inode;
    assert_ne!(
        loaded.get_inode(file).unwrap().special.flags & SPECIAL_NO_BASE_REF,
        0
    );
    assert_eq!(
        loaded.get_inode(file).unwrap().special.reference_name.as_deref(),
        Some(&b"notes\0.txt"[..])
    );
}

/// Test that the header carries the configured magic, version word and features.
#[test]
fn test_v4_header_layout() {
    let config = test_config();
    let bytes = encode(&rooted_registry(), &config);

    assert_eq!(&bytes[0..4], &0x4F56_4C46u32.to_le_bytes());
    assert_eq!(&bytes[4..8], b"Ovl4");
    assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
    assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
}

/// Root holding one entry "f" for a file mapped in both tables.
fn single_file_registry() -> InodeRegistry {
    let mut registry = rooted_registry();
    let file = registry.add_inode(Some(b"f")).unwrap();
    registry
        .set_attributes(
            file,
            InodeAttributes {
                flags: 0x20,
                ..regular_file(42)
            },
        )
        .unwrap();
    registry.add_entry(ROOT_INODE, b"f", file, DIRENT_NORMAL).unwrap();
    registry.set_base_mapping(file, 8, 100).unwrap();
    registry.set_storage_mapping(file, 9, 7).unwrap();
    registry
}

fn push_words(bytes: &mut Vec<u8>, words: &[u32]) {
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
}

/// The exact v4 encoding of `single_file_registry`.
fn single_file_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    push_words(&mut bytes, &[0x4F56_4C46]);
    bytes.extend_from_slice(b"Ovl4");
    push_words(&mut bytes, &[3, 2]);

    // Root: size, attributes, parent, base pair, storage pair, flags, empty name.
    push_words(&mut bytes, &[101, 0, 0, 0, 0o40755, 0, 0, 0, 0, 2, 0, 0, 0, 0]);
    push_words(&mut bytes, &[0, 0, 0, 0, 0, 0, 0]);
    // One entry: name "f", target 2, flags 0.
    push_words(&mut bytes, &[1, 1]);
    bytes.push(b'f');
    push_words(&mut bytes, &[2, 0]);

    // File: attributes, then parent 1, both mappings and its reference name.
    push_words(
        &mut bytes,
        &[
            85,
            0x20,
            1000,
            100,
            0o100644,
            42,
            1_700_000_000,
            1_700_000_100,
            -5i32 as u32,
            1,
            4096,
            8,
            3,
            2,
        ],
    );
    push_words(&mut bytes, &[1, 8, 100, 9, 7, 0, 1]);
    bytes.push(b'f');

    // Base table, then storage table.
    push_words(&mut bytes, &[1, 8, 100, 2]);
    push_words(&mut bytes, &[1, 9, 7, 2]);
    bytes
}

/// Test that the writer emits the documented v4 layout byte for byte.
#[test]
fn test_v4_exact_encoding() {
    let bytes = encode(&single_file_registry(), &test_config());
    assert_eq!(bytes, single_file_bytes());
}

/// Test that hand-built v4 bytes load into the expected inodes, entry and mappings.
#[test]
fn test_v4_exact_decoding() {
    let loaded = decode(&single_file_bytes(), &test_config()).unwrap();
    assert_eq!(loaded.len(), 2);

    let root = loaded.get_inode(ROOT_INODE).unwrap();
    assert_eq!(root.attributes(), &InodeAttributes::directory(0o755));
    assert_eq!(root.special.parent, 0);

    let entry = loaded.find_entry(ROOT_INODE, b"f").unwrap();
    assert_eq!((entry.inode, entry.flags, entry.position), (2, DIRENT_NORMAL, 0));

    let file = loaded.get_inode(2).unwrap();
    assert_eq!(
        file.attributes(),
        &InodeAttributes {
            flags: 0x20,
            ..regular_file(42)
        }
    );
    assert_eq!(file.special.parent, ROOT_INODE);
    assert_eq!(file.special.flags, 0);
    assert_eq!(file.special.reference_name.as_deref(), Some(&b"f"[..]));
    assert_eq!(file.special.base, Some(NativeRef::new(8, 100)));
    assert_eq!(file.special.storage, Some(NativeRef::new(9, 7)));

    assert_eq!(
        loaded.lookup_by_native(MapKind::Base, NativeRef::new(8, 100)),
        Some(2)
    );
    assert_eq!(
        loaded.lookup_by_native(MapKind::Storage, NativeRef::new(9, 7)),
        Some(2)
    );
    assert_same_state(&single_file_registry(), &loaded);
}

/// Test that version 3 files round trip and carry no feature word.
#[test]
fn test_v3_round_trip() {
    let mut config = test_config();
    config.format_version = Some(3);
    let registry = sample_registry();

    let bytes = encode(&registry, &config);
    assert_eq!(&bytes[4..8], b"Ovl3");
    assert_eq!(&bytes[8..12], &(registry.len() as u32).to_le_bytes());

    // Version is taken from the file, not the config.
    let loaded = decode(&bytes, &test_config()).unwrap();
    assert_same_state(&registry, &loaded);
}

/// Test that a v3 file is rejected when read with the opposite mapping-table setting.
#[test]
fn test_v3_mapping_setting_mismatch_is_corrupt() {
    let mut config = test_config();
    config.format_version = Some(3);
    let bytes = encode(&sample_registry(), &config);

    config.persistence.v3_mapping_tables = Some(false);
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that disabling a mapping section drops it and the matching reverse fields.
#[test]
fn test_v4_without_storage_mappings() {
    let mut config = test_config();
    config.persistence.storage_mappings = Some(false);
    let registry = sample_registry();

    let loaded = decode(&encode(&registry, &config), &config).unwrap();
    assert!(loaded.mapping_table(MapKind::Storage).is_empty());
    assert_eq!(
        loaded.lookup_by_native(MapKind::Base, NativeRef::new(8, 100)),
        registry.lookup_by_native(MapKind::Base, NativeRef::new(8, 100))
    );
    for inode in loaded.iter() {
        assert!(inode.special.storage.is_none());
    }
}

/// Test that a zero-length stream loads as an empty registry.
#[test]
fn test_empty_stream_is_fresh_start() {
    let loaded = decode(&[], &test_config()).unwrap();
    assert!(loaded.is_empty());
}

/// Test that mismatched magic numbers and unknown version words are rejected.
#[rstest::rstest]
#[case::magic(0)]
#[case::version(4)]
fn test_bad_header_is_corrupt(#[case] offset: usize) {
    let config = test_config();
    let mut bytes = encode(&rooted_registry(), &config);
    bytes[offset] ^= 0xFF;
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that a config with a different magic number refuses the file.
#[test]
fn test_foreign_magic_number_is_corrupt() {
    let bytes = encode(&rooted_registry(), &test_config());
    let mut config = test_config();
    config.magic_number = Some(0x1234_5678);
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that unknown feature bits abort the load.
#[test]
fn test_unknown_feature_bits_are_corrupt() {
    let config = test_config();
    let mut bytes = encode(&rooted_registry(), &config);
    bytes[8..12].copy_from_slice(&0x8000_0003u32.to_le_bytes());
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that every truncation point is reported as corruption.
#[test]
fn test_truncated_file_is_corrupt() {
    let config = test_config();
    let bytes = encode(&sample_registry(), &config);
    for len in [3, 6, 10, V4_HEADER_LEN, V4_HEADER_LEN + 9, bytes.len() - 1] {
        let result = decode(&bytes[..len], &config);
        assert!(
            matches!(result, Err(OvlError::Corrupt(_))),
            "truncated to {} bytes",
            len
        );
    }
}

/// Test that a record whose size field disagrees with its content is rejected.
#[test]
fn test_record_size_mismatch_is_corrupt() {
    let config = test_config();
    let mut bytes = encode(&sample_registry(), &config);
    let size = u32::from_le_bytes(bytes[V4_HEADER_LEN..V4_HEADER_LEN + 4].try_into().unwrap());
    bytes[V4_HEADER_LEN..V4_HEADER_LEN + 4].copy_from_slice(&(size + 4).to_le_bytes());
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that entries pointing past the last inode abort the load.
#[test]
fn test_dangling_mapping_is_corrupt() {
    let config = test_config();
    let mut bytes = encode(&rooted_registry(), &config);
    // Rewrite the empty storage table as one record pointing at inode 9.
    bytes.truncate(bytes.len() - 4);
    for word in [1u32, 8, 100, 9] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that a mapping row without a device aborts the load.
#[test]
fn test_mapping_without_device_is_corrupt() {
    let config = test_config();
    let mut bytes = encode(&rooted_registry(), &config);
    // Rewrite the empty storage table as one record for the root on device 0.
    bytes.truncate(bytes.len() - 4);
    push_words(&mut bytes, &[1, 0, 100, ROOT_INODE]);
    assert!(matches!(decode(&bytes, &config), Err(OvlError::Corrupt(_))));
}

/// Test that a state file locked elsewhere is refused with the lock named.
#[test]
fn test_locked_state_file_is_refused() {
    let state = StateDir::new();
    let config = test_config();
    let path = state.path("overlay.state");
    save_to_path(&rooted_registry(), &config, &path).unwrap();

    let holder = File::open(&path).unwrap();
    FileExt::try_lock_exclusive(&holder).unwrap();

    let err = save_to_path(&sample_registry(), &config, &path).unwrap_err();
    assert!(err.to_string().contains("Failed to acquire write lock"), "{}", err);
    assert!(err.to_string().contains(&path.display().to_string()));
    assert_eq!(err.errno(), libc::EAGAIN);

    let err = load_from_path(&path, &config).unwrap_err();
    assert!(err.to_string().contains("Failed to acquire read lock"), "{}", err);

    FileExt::unlock(&holder).unwrap();
    assert_eq!(load_from_path(&path, &config).unwrap().len(), 1);
}

/// Test that a directory read with no entries comes back unpopulated.
#[test]
fn test_empty_directory_reloads_unpopulated() {
    let config = test_config();
    let mut registry = rooted_registry();
    registry.populate_directory(ROOT_INODE).unwrap();
    assert!(registry.get_inode(ROOT_INODE).unwrap().is_populated());

    let loaded = decode(&encode(&registry, &config), &config).unwrap();
    let root = loaded.get_inode(ROOT_INODE).unwrap();
    assert!(root.is_dir());
    assert!(!root.is_populated());
    assert_eq!(loaded.count_entries(ROOT_INODE, true).unwrap(), 0);
}

/// Test path-based save and load, including a missing file.
#[test]
fn test_save_and_load_paths() {
    let state = StateDir::new();
    let config = test_config();
    let path = state.path("nested/dir/overlay.state");

    let missing = load_from_path(&path, &config).unwrap();
    assert!(missing.is_empty());

    let registry = sample_registry();
    save_to_path(&registry, &config, &path).unwrap();
    assert_same_state(&registry, &load_from_path(&path, &config).unwrap());

    // A smaller save fully replaces the larger one.
    save_to_path(&rooted_registry(), &config, &path).unwrap();
    assert_eq!(load_from_path(&path, &config).unwrap().len(), 1);
}

/// Test that a store mounted from an empty file creates the root.
#[test]
fn test_store_open_empty_file() {
    let state = StateDir::new();
    let path = state.path("overlay.state");
    fs::write(&path, b"").unwrap();

    let store = OverlayStore::open(test_config(), &path).unwrap();
    assert_eq!(store.inode_count(), 1);
    assert!(store.get_attributes(ROOT_INODE).unwrap().is_dir());
}

/// Test that a corrupt state file fails the mount.
#[test]
fn test_store_open_corrupt_file_fails() {
    let state = StateDir::new();
    let path = state.path("overlay.state");
    fs::write(&path, b"not an overlay state file").unwrap();

    assert!(matches!(
        OverlayStore::open(test_config(), &path),
        Err(OvlError::Corrupt(_))
    ));
}

/// Test that sync writes a file the next mount can read.
#[test]
fn test_store_sync_then_unmount() {
    let state = StateDir::new();
    let path = state.path("overlay.state");

    let store = OverlayStore::open(test_config(), &path).unwrap();
    let ino = store.add_inode(Some(b"a")).unwrap();
    store.add_entry(ROOT_INODE, b"a", ino, DIRENT_NORMAL).unwrap();
    store.sync(&path).unwrap();
    assert_eq!(load_from_path(&path, &test_config()).unwrap().len(), 2);

    store.set_storage_mapping(ino, 3, 33).unwrap();
    store.unmount(&path).unwrap();

    let reopened = OverlayStore::open(test_config(), &path).unwrap();
    assert_eq!(reopened.lookup_by_native(MapKind::Storage, 3, 33), Some(ino));
}
