//! Synthetic hive builder shared by the integration tests.
//!
//! Registry hive fixtures are not available offline, so every test here
//! builds its own minimal hive image through [`regrs::editor::Tx`],
//! which stages keys/values in memory and commits them into a fresh
//! image.

#![allow(dead_code)]

use regrs::cell::ValueType;
use regrs::editor::Tx;
use regrs::hive::{Hive, OpenOptions};
use regrs::limits::Limits;

/// A `(path, name, type, data)` value to seed into a hive.
pub struct SeedValue {
    pub path: &'static str,
    pub name: &'static str,
    pub value_type: ValueType,
    pub data: Vec<u8>,
}

pub fn seed(path: &'static str, name: &'static str, value_type: ValueType, data: Vec<u8>) -> SeedValue {
    SeedValue { path, name, value_type, data }
}

/// Builds a hive with the given keys created and values set, in order.
pub fn build_hive(keys: &[&str], values: &[SeedValue]) -> Hive {
    let mut tx = Tx::new("SYNTHETIC");
    for key in keys {
        tx.create_key(key).expect("create_key");
    }
    for v in values {
        tx.create_key(v.path).expect("create_key for value parent");
        tx.set_value(v.path, v.name, v.value_type, v.data.clone())
            .expect("set_value");
    }
    let bytes = tx.commit(Limits::default()).expect("commit");
    Hive::from_vec(bytes, OpenOptions::default()).expect("from_vec")
}

/// Builds an empty (root-only) hive.
pub fn empty_hive() -> Hive {
    build_hive(&[], &[])
}
