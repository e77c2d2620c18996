//! End-to-end tests over the reader/editor pair: everything written
//! through a [`regrs::editor::Tx`] must read back identically through
//! [`regrs::reader::Reader`].

mod common;

use common::{build_hive, seed};
use regrs::cell::ValueType;
use regrs::editor::Tx;
use regrs::hive::{Hive, OpenOptions};
use regrs::limits::Limits;
use regrs::reader::Reader;
use regrs::value::ValueData;

#[test]
fn nested_keys_and_values_round_trip() {
    let hive = build_hive(
        &["Software\\Vendor\\App", "Software\\Vendor\\App\\Settings"],
        &[
            seed("Software\\Vendor\\App", "DisplayName", ValueType::String, {
                let mut bytes: Vec<u8> = "Widget".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
                bytes.extend_from_slice(&0u16.to_le_bytes());
                bytes
            }),
            seed("Software\\Vendor\\App", "Version", ValueType::Dword, 7u32.to_le_bytes().to_vec()),
        ],
    );

    let reader = Reader::new(&hive);
    let root = reader.root().unwrap();
    let app = reader.resolve_path(root, "Software\\Vendor\\App").unwrap();

    let name_value = reader.get_value(app, "DisplayName").unwrap();
    match reader.value_data(name_value).unwrap() {
        ValueData::String(s) => assert_eq!(s, "Widget"),
        other => panic!("unexpected value data: {:?}", other),
    }

    let version_value = reader.get_value(app, "Version").unwrap();
    match reader.value_data(version_value).unwrap() {
        ValueData::Dword(v) => assert_eq!(v, 7),
        other => panic!("unexpected value data: {:?}", other),
    }

    let settings = reader.resolve_path(root, "Software\\Vendor\\App\\Settings").unwrap();
    assert!(reader.values(settings).unwrap().is_empty());
}

#[test]
fn hkey_root_alias_resolves_against_hive_relative_path() {
    let hive = build_hive(&["Software\\Vendor"], &[]);
    let reader = Reader::new(&hive);
    let root = reader.root().unwrap();
    let stripped = regrs::reader::strip_hive_root_alias("HKEY_LOCAL_MACHINE\\Software\\Vendor");
    assert!(reader.resolve_path(root, stripped).is_ok());
}

#[test]
fn deleting_a_key_removes_it_and_its_values() {
    let hive = build_hive(
        &["A\\B"],
        &[seed("A\\B", "X", ValueType::Dword, 1u32.to_le_bytes().to_vec())],
    );
    let mut tx = Tx::from_hive(&hive).unwrap();
    tx.delete_key("A", true).unwrap();
    let bytes = tx.commit(Limits::default()).unwrap();
    let rebuilt = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
    let reader = Reader::new(&rebuilt);
    let root = reader.root().unwrap();
    assert!(reader.lookup(root, "A").is_err());
}

#[test]
fn values_of_every_primitive_type_round_trip_through_commit() {
    let cases: Vec<(&str, ValueType, Vec<u8>)> = vec![
        ("Dword", ValueType::Dword, 0xAABBCCDDu32.to_le_bytes().to_vec()),
        ("DwordBE", ValueType::DwordBigEndian, 0x11223344u32.to_be_bytes().to_vec()),
        ("Qword", ValueType::Qword, 0x1122334455667788u64.to_le_bytes().to_vec()),
        ("Binary", ValueType::Binary, vec![1, 2, 3, 4, 5]),
        ("Empty", ValueType::Binary, vec![]),
    ];

    let mut tx = Tx::new("SYNTHETIC");
    tx.create_key("Types").unwrap();
    for (name, value_type, data) in &cases {
        tx.set_value("Types", name, *value_type, data.clone()).unwrap();
    }
    let bytes = tx.commit(Limits::default()).unwrap();
    let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
    let reader = Reader::new(&hive);
    let root = reader.root().unwrap();
    let types = reader.lookup(root, "Types").unwrap();

    for (name, _, data) in &cases {
        let value = reader.get_value(types, name).unwrap();
        assert_eq!(&reader.value_raw_data(value).unwrap(), data, "mismatch for {}", name);
    }
}

#[test]
fn big_data_value_spanning_multiple_segments_round_trips() {
    let big = vec![0x5Au8; 50_000];
    let mut tx = Tx::new("SYNTHETIC");
    tx.create_key("Blobs").unwrap();
    tx.set_value("Blobs", "Huge", ValueType::Binary, big.clone()).unwrap();
    let bytes = tx.commit(Limits::relaxed()).unwrap();
    let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
    let reader = Reader::new(&hive);
    let root = reader.root().unwrap();
    let blobs = reader.lookup(root, "Blobs").unwrap();
    let value = reader.get_value(blobs, "Huge").unwrap();
    assert_eq!(reader.value_raw_data(value).unwrap(), big);
}
