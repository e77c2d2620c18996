//! Read-only tree and value navigation over an opened [`Hive`].
//!
//! [`Reader`] borrows a [`Hive`] and exposes the key/value tree as opaque
//! [`NodeId`]/`ValueId` handles plus name-based lookup, kept separate from
//! hive ownership so the editor can build a new image from the same
//! parsing logic without going through a live `Hive`.

use crate::bigdata::{parse_segment_offsets, BigDataBlock, MAX_DIRECT_DATA_SIZE};
use crate::cancel::CancelToken;
use crate::cell::ValueType;
use crate::cellref::is_null_ref;
use crate::error::{RegistryError, Result};
use crate::hive::Hive;
use crate::key::KeyNode;
use crate::lists::SubkeyList;
use crate::utils::upper_case;
use crate::value::{ValueData, ValueKey};
use crate::value_list::parse_value_list;
use std::ops::Deref;
use tracing::instrument;

/// Opaque handle to a key node: its cell offset, relative to the first
/// hbin. Stable for the lifetime of a given hive image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Opaque handle to a value key, scoped to the key it was enumerated
/// under (value cells carry no parent pointer of their own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId {
    /// Offset of the owning key.
    pub key: NodeId,
    /// Index of this value within the owning key's value list.
    pub index: u32,
}

/// Hive-root aliases and their canonical long forms, used to strip a
/// leading `HKLM\`/`HKEY_LOCAL_MACHINE\` segment before resolving a path
/// against a hive whose root key has no such prefix on disk.
pub const HIVE_ROOT_ALIASES: &[(&str, &str)] = &[
    ("HKLM", "HKEY_LOCAL_MACHINE"),
    ("HKEY_LOCAL_MACHINE", "HKEY_LOCAL_MACHINE"),
    ("HKCU", "HKEY_CURRENT_USER"),
    ("HKEY_CURRENT_USER", "HKEY_CURRENT_USER"),
    ("HKCR", "HKEY_CLASSES_ROOT"),
    ("HKEY_CLASSES_ROOT", "HKEY_CLASSES_ROOT"),
    ("HKU", "HKEY_USERS"),
    ("HKEY_USERS", "HKEY_USERS"),
    ("HKCC", "HKEY_CURRENT_CONFIG"),
    ("HKEY_CURRENT_CONFIG", "HKEY_CURRENT_CONFIG"),
];

/// Strips a recognized hive-root alias (and the separator after it) from
/// the front of `path`, if present.
pub fn strip_hive_root_alias(path: &str) -> &str {
    let trimmed = path.trim_start_matches(['\\', '/']);
    for (alias, _) in HIVE_ROOT_ALIASES {
        if let Some(rest) = trimmed.strip_prefix(alias) {
            if rest.is_empty() {
                return "";
            }
            if let Some(rest) = rest.strip_prefix(['\\', '/']) {
                return rest;
            }
        }
    }
    trimmed
}

/// Controls whether [`Reader::value_bytes`] may return a borrow into the
/// hive's buffer or must always allocate an owned copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// When `true`, always returns an owned copy. When `false` (the
    /// default), returns a borrow for contiguous, non-big-data values
    /// where one is available.
    pub copy_data: bool,
}

/// Value bytes returned by [`Reader::value_bytes`]: either a zero-copy
/// borrow into the hive's buffer, or an owned copy when the caller asked
/// for one or the data isn't stored as a single contiguous cell (inline
/// storage, or a `db` big-data chain).
#[derive(Debug)]
pub enum ValueBytes<'h> {
    /// A borrow into the hive's underlying buffer.
    Borrowed(&'h [u8]),
    /// An owned copy, allocated either by request or by necessity.
    Owned(Vec<u8>),
}

impl<'h> Deref for ValueBytes<'h> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ValueBytes::Borrowed(b) => b,
            ValueBytes::Owned(v) => v,
        }
    }
}

impl<'h> AsRef<[u8]> for ValueBytes<'h> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Read-only navigator over a hive's key/value tree.
pub struct Reader<'h> {
    hive: &'h Hive,
}

impl<'h> Reader<'h> {
    /// Creates a reader over an opened hive.
    pub fn new(hive: &'h Hive) -> Self {
        Reader { hive }
    }

    /// Returns the root node of the tree.
    pub fn root(&self) -> Result<NodeId> {
        Ok(NodeId(self.hive.root_offset()))
    }

    /// Parses and returns the key node at `id`.
    pub fn key_node(&self, id: NodeId) -> Result<KeyNode> {
        let data = self.hive.read_cell(id.0)?;
        KeyNode::parse(data, id.0)
    }

    /// Returns the key's name.
    pub fn name(&self, id: NodeId) -> Result<String> {
        Ok(self.key_node(id)?.name)
    }

    /// Returns direct subkey node IDs, expanding any `ri` fan-out.
    #[instrument(skip(self))]
    pub fn subkeys(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let key_node = self.key_node(id)?;
        if !key_node.has_subkeys() || is_null_ref(key_node.subkey_list_offset) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        self.collect_subkeys(key_node.subkey_list_offset, &mut out)?;
        Ok(out)
    }

    fn collect_subkeys(&self, list_offset: u32, out: &mut Vec<NodeId>) -> Result<()> {
        if is_null_ref(list_offset) {
            return Ok(());
        }
        let data = self.hive.read_cell(list_offset)?;
        let list = SubkeyList::parse(data, list_offset)?;
        if list.is_index_root() {
            for sublist_offset in list.key_offsets_iter() {
                self.collect_subkeys(sublist_offset, out)?;
            }
        } else {
            out.extend(list.key_offsets_iter().map(NodeId));
        }
        Ok(())
    }

    /// Looks up a direct subkey by name (case-insensitive). Uses `lh`
    /// hash hints to prune candidates before resolving `nk` cells.
    pub fn lookup(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let key_node = self.key_node(parent)?;
        if !key_node.has_subkeys() || is_null_ref(key_node.subkey_list_offset) {
            return Err(RegistryError::not_found("key", name));
        }
        self.lookup_in_list(key_node.subkey_list_offset, name)
    }

    fn lookup_in_list(&self, list_offset: u32, name: &str) -> Result<NodeId> {
        if is_null_ref(list_offset) {
            return Err(RegistryError::not_found("key", name));
        }
        let data = self.hive.read_cell(list_offset)?;
        let list = SubkeyList::parse(data, list_offset)?;

        if list.is_index_root() {
            for sublist_offset in list.key_offsets_iter() {
                if let Ok(found) = self.lookup_in_list(sublist_offset, name) {
                    return Ok(found);
                }
            }
            return Err(RegistryError::not_found("key", name));
        }

        let candidates: Vec<u32> = list
            .candidates_by_hash(name)
            .unwrap_or_else(|| list.key_offsets_iter().collect());

        let target = upper_case(name);
        for offset in candidates {
            let node = self.key_node(NodeId(offset))?;
            if upper_case(&node.name) == target {
                return Ok(NodeId(offset));
            }
        }
        Err(RegistryError::not_found("key", name))
    }

    /// Resolves a backslash-separated path from `root` (the empty string
    /// resolves to `root` itself).
    pub fn resolve_path(&self, root: NodeId, path: &str) -> Result<NodeId> {
        let path = crate::utils::normalize_separators(path);
        let mut current = root;
        for segment in path.split('\\').filter(|s| !s.is_empty()) {
            current = self.lookup(current, segment)?;
        }
        Ok(current)
    }

    /// Depth-first pre-order walk starting at `id`: the visitor runs on
    /// `id` itself before any of its descendants. Returning an error from
    /// the visitor halts the walk immediately and propagates that error
    /// to the caller.
    pub fn walk<F>(&self, id: NodeId, visitor: &mut F) -> Result<()>
    where
        F: FnMut(NodeId) -> Result<()>,
    {
        self.walk_cancelable(id, visitor, None)
    }

    /// Like [`walk`](Self::walk), but checked against a [`CancelToken`]
    /// before visiting each node. Fails with [`RegistryError::Cancelled`]
    /// as soon as the token is observed cancelled.
    pub fn walk_cancelable<F>(
        &self,
        id: NodeId,
        visitor: &mut F,
        cancel: Option<&CancelToken>,
    ) -> Result<()>
    where
        F: FnMut(NodeId) -> Result<()>,
    {
        if let Some(token) = cancel {
            token.check()?;
        }
        visitor(id)?;
        for child in self.subkeys(id)? {
            self.walk_cancelable(child, visitor, cancel)?;
        }
        Ok(())
    }

    /// Returns this key's values.
    pub fn values(&self, id: NodeId) -> Result<Vec<ValueId>> {
        let key_node = self.key_node(id)?;
        if !key_node.has_values() || is_null_ref(key_node.value_list_offset) {
            return Ok(Vec::new());
        }
        let list_data = self.hive.read_cell(key_node.value_list_offset)?;
        let offsets = parse_value_list(list_data, key_node.value_count, key_node.value_list_offset)?;
        Ok((0..offsets.len() as u32).map(|index| ValueId { key: id, index }).collect())
    }

    pub(crate) fn value_offsets(&self, key: NodeId) -> Result<Vec<u32>> {
        let key_node = self.key_node(key)?;
        if !key_node.has_values() || is_null_ref(key_node.value_list_offset) {
            return Ok(Vec::new());
        }
        let list_data = self.hive.read_cell(key_node.value_list_offset)?;
        parse_value_list(list_data, key_node.value_count, key_node.value_list_offset)
    }

    /// Parses the `vk` cell a [`ValueId`] refers to.
    pub fn value_key(&self, id: ValueId) -> Result<ValueKey> {
        let offsets = self.value_offsets(id.key)?;
        let offset = *offsets
            .get(id.index as usize)
            .ok_or_else(|| RegistryError::not_found("value index", &id.index.to_string()))?;
        let data = self.hive.read_cell(offset)?;
        ValueKey::parse(data, offset)
    }

    /// Gets a value by name under `key` (case-insensitive; `"(default)"`
    /// refers to the key's unnamed value).
    pub fn get_value(&self, key: NodeId, name: &str) -> Result<ValueId> {
        let offsets = self.value_offsets(key)?;
        let target = upper_case(name);
        for (index, offset) in offsets.iter().enumerate() {
            let data = self.hive.read_cell(*offset)?;
            let vk = ValueKey::parse(data, *offset)?;
            if upper_case(&vk.name) == target {
                return Ok(ValueId {
                    key,
                    index: index as u32,
                });
            }
        }
        Err(RegistryError::not_found("value", name))
    }

    /// Returns the raw bytes of a value's data, transparently following
    /// inline storage, direct cell storage, or a `db` big-data chain.
    pub fn value_raw_data(&self, id: ValueId) -> Result<Vec<u8>> {
        let vk = self.value_key(id)?;
        self.read_value_bytes(&vk)
    }

    /// Returns a value's data, parsed according to its declared type.
    pub fn value_data(&self, id: ValueId) -> Result<ValueData> {
        let vk = self.value_key(id)?;
        let raw = self.read_value_bytes(&vk)?;
        ValueData::parse(&raw, vk.data_type, vk.data_offset)
    }

    /// Returns a value's declared type without materializing its data.
    pub fn value_type(&self, id: ValueId) -> Result<ValueType> {
        Ok(self.value_key(id)?.data_type)
    }

    /// Returns a value's raw bytes per `opts`: a zero-copy borrow for
    /// contiguous, non-big-data storage when `opts.copy_data` is `false`,
    /// an owned copy otherwise (always for inline or `db` big-data
    /// storage, since neither is a single contiguous slice of the
    /// original value).
    pub fn value_bytes(&self, id: ValueId, opts: ReadOptions) -> Result<ValueBytes<'h>> {
        let vk = self.value_key(id)?;
        if vk.is_inline_data() {
            return Ok(ValueBytes::Owned(vk.inline_data()));
        }
        if vk.data_length == 0 || is_null_ref(vk.data_offset) {
            return Ok(ValueBytes::Owned(Vec::new()));
        }
        if vk.data_length > MAX_DIRECT_DATA_SIZE {
            return Ok(ValueBytes::Owned(self.read_big_data(vk.data_offset, vk.data_length)?));
        }
        let cell = self.hive.read_cell(vk.data_offset)?;
        let len = (vk.data_length as usize).min(cell.len());
        if opts.copy_data {
            Ok(ValueBytes::Owned(cell[..len].to_vec()))
        } else {
            Ok(ValueBytes::Borrowed(&cell[..len]))
        }
    }

    /// Reads a value as a little-endian 32-bit integer. Fails with
    /// [`RegistryError::TypeMismatch`] if the value isn't [`ValueType::Dword`],
    /// or [`RegistryError::Corrupt`] if its payload is shorter than 4 bytes.
    pub fn value_dword(&self, id: ValueId) -> Result<u32> {
        let vk = self.value_key(id)?;
        if vk.data_type != ValueType::Dword {
            return Err(RegistryError::type_mismatch("Dword", &format!("{:?}", vk.data_type)));
        }
        let raw = self.read_value_bytes(&vk)?;
        if raw.len() < 4 {
            return Err(RegistryError::Corrupt(format!(
                "DWORD value is only {} bytes",
                raw.len()
            )));
        }
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Reads a value as a little-endian 64-bit integer. Fails with
    /// [`RegistryError::TypeMismatch`] if the value isn't [`ValueType::Qword`],
    /// or [`RegistryError::Corrupt`] if its payload is shorter than 8 bytes.
    pub fn value_qword(&self, id: ValueId) -> Result<u64> {
        let vk = self.value_key(id)?;
        if vk.data_type != ValueType::Qword {
            return Err(RegistryError::type_mismatch("Qword", &format!("{:?}", vk.data_type)));
        }
        let raw = self.read_value_bytes(&vk)?;
        if raw.len() < 8 {
            return Err(RegistryError::Corrupt(format!(
                "QWORD value is only {} bytes",
                raw.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&raw[..8]);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_value_bytes(&self, vk: &ValueKey) -> Result<Vec<u8>> {
        if vk.is_inline_data() {
            return Ok(vk.inline_data());
        }
        if vk.data_length == 0 || is_null_ref(vk.data_offset) {
            return Ok(Vec::new());
        }
        if vk.data_length > MAX_DIRECT_DATA_SIZE {
            return self.read_big_data(vk.data_offset, vk.data_length);
        }
        let cell = self.hive.read_cell(vk.data_offset)?;
        let len = (vk.data_length as usize).min(cell.len());
        Ok(cell[..len].to_vec())
    }

    fn read_big_data(&self, offset: u32, expected_length: u32) -> Result<Vec<u8>> {
        let header_cell = self.hive.read_cell(offset)?;
        let db_header = BigDataBlock::parse(header_cell, offset)?;

        let segment_list_cell = self.hive.read_cell(db_header.segment_list_offset)?;
        let segment_offsets = parse_segment_offsets(
            segment_list_cell,
            db_header.segment_count,
            db_header.segment_list_offset,
        )?;

        let mut data = Vec::with_capacity(expected_length as usize);
        for segment_offset in &segment_offsets {
            let segment_data = self.hive.read_cell(*segment_offset)?;
            data.extend_from_slice(segment_data);
            if data.len() >= expected_length as usize {
                break;
            }
        }
        data.truncate(expected_length as usize);
        Ok(data)
    }
}
