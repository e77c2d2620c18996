//! Staged editing and transactional commit of a new hive image.
//!
//! [`Tx`] loads a hive's entire key/value tree into an owned, mutable
//! [`TreeNode`] model, lets the caller stage creates/deletes/value edits
//! directly against that model, then [`Tx::commit`] serializes the
//! resulting tree into a brand-new byte image — the read path
//! (`KeyNode`/`ValueKey`/`SubkeyList` parsing) run in reverse.

use crate::cancel::CancelToken;
use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::hive::Hive;
use crate::limits::Limits;
use crate::reader::{NodeId, Reader};
use crate::utils::{lh_name_hash, upper_case};
use crate::value_list::serialize_value_list;
use std::io::Write;

/// A mutable, in-memory key in the staged tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// This key's name (empty for the root).
    pub name: String,
    /// This key's values, in declaration order.
    pub values: Vec<StagedValue>,
    /// Direct subkeys.
    pub children: Vec<TreeNode>,
}

/// A value staged for commit.
#[derive(Debug, Clone)]
pub struct StagedValue {
    /// Value name (`"(default)"` for the key's unnamed value).
    pub name: String,
    /// Declared value type.
    pub value_type: ValueType,
    /// Raw value bytes, already in on-disk encoding for the type.
    pub data: Vec<u8>,
}

impl TreeNode {
    fn find_child_mut(&mut self, name: &str) -> Option<&mut TreeNode> {
        let target = upper_case(name);
        self.children.iter_mut().find(|c| upper_case(&c.name) == target)
    }

    fn find_child_index(&self, name: &str) -> Option<usize> {
        let target = upper_case(name);
        self.children.iter().position(|c| upper_case(&c.name) == target)
    }
}

/// Accepts a finished hive image's bytes. `Vec<u8>` and `std::fs::File`
/// both implement this via the blanket impl over `std::io::Write`.
pub trait HiveWriter {
    /// Writes the full image in one call.
    fn write_image(&mut self, data: &[u8]) -> Result<()>;
}

impl<W: Write> HiveWriter for W {
    fn write_image(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        Ok(())
    }
}

/// Controls how [`Tx::commit`] lays out the output image.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// When `true`, re-emits every reachable cell so the result is dense,
    /// discarding any byte-identical layout the original image had. When
    /// `false` (the default), the current serializer always rebuilds from
    /// the logical tree, which is a valid `repack=false` implementation
    /// since the spec only requires that mode to *allow*, not require,
    /// reusing unchanged bins verbatim.
    pub repack: bool,
}

/// A staged, in-progress edit against a hive's tree.
pub struct Tx {
    root: TreeNode,
    base: BaseBlock,
}

impl Tx {
    /// Builds a transaction directly from an already-assembled tree, for
    /// callers (the repair engine) that construct the tree themselves
    /// rather than loading it verbatim from a hive.
    pub(crate) fn from_parts(root: TreeNode, base: BaseBlock) -> Self {
        Tx { root, base }
    }

    /// Starts a transaction for a brand-new hive with an empty root, for
    /// building an image from scratch rather than editing an existing one.
    pub fn new(file_name: impl Into<String>) -> Self {
        Tx {
            root: TreeNode {
                name: String::new(),
                values: Vec::new(),
                children: Vec::new(),
            },
            base: BaseBlock::fresh(file_name),
        }
    }

    /// Loads the entire tree from `hive` into an owned, editable copy.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Readonly`] if `hive` was opened with
    /// [`crate::hive::OpenOptions::readonly`] set.
    pub fn from_hive(hive: &Hive) -> Result<Self> {
        if hive.options().readonly {
            return Err(RegistryError::Readonly(
                "hive was opened with OpenOptions::readonly; open it without that flag to stage edits".to_string(),
            ));
        }
        let reader = Reader::new(hive);
        let root_id = reader.root()?;
        let root = Self::load_node(&reader, root_id)?;
        Ok(Tx {
            root,
            base: hive.base_block().clone(),
        })
    }

    fn load_node(reader: &Reader<'_>, id: NodeId) -> Result<TreeNode> {
        let key_node = reader.key_node(id)?;
        let mut values = Vec::new();
        for value_id in reader.values(id)? {
            let vk = reader.value_key(value_id)?;
            let data = reader.value_raw_data(value_id)?;
            values.push(StagedValue {
                name: vk.name,
                value_type: vk.data_type,
                data,
            });
        }

        let mut children = Vec::new();
        for child_id in reader.subkeys(id)? {
            children.push(Self::load_node(reader, child_id)?);
        }

        Ok(TreeNode {
            name: key_node.name,
            values,
            children,
        })
    }

    fn navigate_mut(&mut self, path: &str) -> Result<&mut TreeNode> {
        let path = crate::utils::normalize_separators(path);
        let mut node = &mut self.root;
        for segment in path.split('\\').filter(|s| !s.is_empty()) {
            node = node
                .find_child_mut(segment)
                .ok_or_else(|| RegistryError::not_found("key", segment))?;
        }
        Ok(node)
    }

    /// Creates `path` (and any missing intermediate keys), matching
    /// `mkdir -p` semantics. A no-op if the key already exists.
    pub fn create_key(&mut self, path: &str) -> Result<()> {
        let path = crate::utils::normalize_separators(path);
        let mut node = &mut self.root;
        for segment in path.split('\\').filter(|s| !s.is_empty()) {
            if node.find_child_index(segment).is_none() {
                node.children.push(TreeNode {
                    name: segment.to_string(),
                    values: Vec::new(),
                    children: Vec::new(),
                });
            }
            node = node.find_child_mut(segment).expect("just inserted");
        }
        Ok(())
    }

    /// Deletes the key at `path`. Requires `recursive` if the key has
    /// children.
    pub fn delete_key(&mut self, path: &str, recursive: bool) -> Result<()> {
        let path = crate::utils::normalize_separators(path);
        let (parent_path, name) = split_parent(&path)
            .ok_or_else(|| RegistryError::State("cannot delete the root key".to_string()))?;
        let parent = self.navigate_mut(parent_path)?;
        let index = parent
            .find_child_index(name)
            .ok_or_else(|| RegistryError::not_found("key", name))?;
        if !recursive && !parent.children[index].children.is_empty() {
            return Err(RegistryError::State(format!(
                "key '{}' has subkeys; pass recursive=true to delete them",
                name
            )));
        }
        parent.children.remove(index);
        Ok(())
    }

    /// Sets (creating or replacing) a value under `path`.
    pub fn set_value(&mut self, path: &str, name: &str, value_type: ValueType, data: Vec<u8>) -> Result<()> {
        let node = self.navigate_mut(path)?;
        let target = upper_case(name);
        if let Some(existing) = node.values.iter_mut().find(|v| upper_case(&v.name) == target) {
            existing.value_type = value_type;
            existing.data = data;
        } else {
            node.values.push(StagedValue {
                name: name.to_string(),
                value_type,
                data,
            });
        }
        Ok(())
    }

    /// Deletes a value under `path` by name.
    pub fn delete_value(&mut self, path: &str, name: &str) -> Result<()> {
        let node = self.navigate_mut(path)?;
        let target = upper_case(name);
        let index = node
            .values
            .iter()
            .position(|v| upper_case(&v.name) == target)
            .ok_or_else(|| RegistryError::not_found("value", name))?;
        node.values.remove(index);
        Ok(())
    }

    /// Validates the staged tree against `limits`, returning the first
    /// violation found.
    pub fn check_limits(&self, limits: &Limits) -> Result<()> {
        Self::check_node_limits(&self.root, limits, 0)
    }

    fn check_node_limits(node: &TreeNode, limits: &Limits, depth: u32) -> Result<()> {
        if depth > limits.max_tree_depth {
            return Err(RegistryError::limit_exceeded(
                "max_tree_depth",
                depth as u64,
                limits.max_tree_depth as u64,
            ));
        }
        if node.children.len() as u64 > limits.max_subkeys as u64 {
            return Err(RegistryError::limit_exceeded(
                "max_subkeys",
                node.children.len() as u64,
                limits.max_subkeys as u64,
            ));
        }
        if node.values.len() as u64 > limits.max_values as u64 {
            return Err(RegistryError::limit_exceeded(
                "max_values",
                node.values.len() as u64,
                limits.max_values as u64,
            ));
        }
        if node.name.chars().count() as u64 > limits.max_key_name_chars as u64 {
            return Err(RegistryError::limit_exceeded(
                "max_key_name_chars",
                node.name.chars().count() as u64,
                limits.max_key_name_chars as u64,
            ));
        }
        for value in &node.values {
            if value.name.chars().count() as u64 > limits.max_value_name_chars as u64 {
                return Err(RegistryError::limit_exceeded(
                    "max_value_name_chars",
                    value.name.chars().count() as u64,
                    limits.max_value_name_chars as u64,
                ));
            }
            if value.data.len() as u64 > limits.max_value_data_size as u64 {
                return Err(RegistryError::limit_exceeded(
                    "max_value_data_size",
                    value.data.len() as u64,
                    limits.max_value_data_size as u64,
                ));
            }
        }
        for child in &node.children {
            Self::check_node_limits(child, limits, depth + 1)?;
        }
        Ok(())
    }

    /// Serializes the staged tree into a brand-new hive image, enforcing
    /// `limits` first. Equivalent to `commit_with_options` with
    /// `repack=false`.
    pub fn commit(&self, limits: Limits) -> Result<Vec<u8>> {
        self.commit_with_options(limits, WriteOptions::default())
    }

    /// Serializes the staged tree into a brand-new hive image, enforcing
    /// `limits` first. The serializer always re-emits every reachable
    /// cell regardless of `options.repack`, which is a valid `repack=false`
    /// implementation (the spec only requires `repack=true` to be dense,
    /// it does not forbid a `repack=false` serializer from also being
    /// dense).
    pub fn commit_with_options(&self, limits: Limits, options: WriteOptions) -> Result<Vec<u8>> {
        self.commit_impl(limits, options, None)
    }

    /// Like [`commit_with_options`](Self::commit_with_options), but
    /// checked against a [`CancelToken`] at every node serialized. Fails
    /// with [`RegistryError::Cancelled`] as soon as the token is observed
    /// cancelled.
    pub fn commit_cancelable(&self, limits: Limits, options: WriteOptions, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.commit_impl(limits, options, Some(cancel))
    }

    fn commit_impl(&self, limits: Limits, _options: WriteOptions, cancel: Option<&CancelToken>) -> Result<Vec<u8>> {
        self.check_limits(&limits)?;
        if limits.max_total_hive_bytes == 0 {
            return Err(RegistryError::limit_exceeded("max_total_hive_bytes", 0, 0));
        }

        let mut builder = CellStream::new();
        let root_offset = builder.write_node(&self.root, true, cancel)?;

        let cells_len = builder.buf.len();
        let hbin_size = align_up(cells_len + crate::hbin::HBIN_HEADER_SIZE, 4096) as u32;

        let mut image = Vec::with_capacity(BASE_BLOCK_SIZE + hbin_size as usize);
        image.resize(BASE_BLOCK_SIZE, 0);

        let mut hbin_header = vec![0u8; crate::hbin::HBIN_HEADER_SIZE];
        hbin_header[0..4].copy_from_slice(crate::hbin::HBIN_SIGNATURE);
        hbin_header[0x04..0x08].copy_from_slice(&0u32.to_le_bytes());
        hbin_header[0x08..0x0C].copy_from_slice(&hbin_size.to_le_bytes());
        image.extend_from_slice(&hbin_header);
        image.extend_from_slice(&builder.buf);
        image.resize(BASE_BLOCK_SIZE + hbin_size as usize, 0);

        if image.len() as u64 > limits.max_total_hive_bytes {
            return Err(RegistryError::limit_exceeded(
                "max_total_hive_bytes",
                image.len() as u64,
                limits.max_total_hive_bytes,
            ));
        }

        let header = BaseBlock {
            root_cell_offset: root_offset,
            hive_length: hbin_size,
            checksum: 0,
            ..self.base.with_bumped_sequence()
        };
        let header_bytes = header.serialize();
        image[0..BASE_BLOCK_SIZE].copy_from_slice(&header_bytes);

        Ok(image)
    }

    /// Writes the committed image to `writer`. Equivalent to
    /// `commit_to_with_options` with `repack=false`.
    pub fn commit_to(&self, writer: &mut impl HiveWriter, limits: Limits) -> Result<()> {
        self.commit_to_with_options(writer, limits, WriteOptions::default())
    }

    /// Writes the committed image to `writer`, per `options`.
    pub fn commit_to_with_options(
        &self,
        writer: &mut impl HiveWriter,
        limits: Limits,
        options: WriteOptions,
    ) -> Result<()> {
        let image = self.commit_with_options(limits, options)?;
        writer.write_image(&image)
    }

    /// Like [`commit_to_with_options`](Self::commit_to_with_options), but
    /// checked against a [`CancelToken`] as [`commit_cancelable`](Self::commit_cancelable) is.
    pub fn commit_to_cancelable(
        &self,
        writer: &mut impl HiveWriter,
        limits: Limits,
        options: WriteOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        let image = self.commit_cancelable(limits, options, cancel)?;
        writer.write_image(&image)
    }
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_matches('\\');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('\\') {
        Some(pos) => Some((&trimmed[..pos], &trimmed[pos + 1..])),
        None => Some(("", trimmed)),
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn align8(value: usize) -> usize {
    align_up(value, 8)
}

/// A bump allocator for cell bytes, used only during [`Tx::commit`].
struct CellStream {
    buf: Vec<u8>,
}

impl CellStream {
    fn new() -> Self {
        CellStream { buf: Vec::new() }
    }

    /// Allocates a new allocated (negative-size) cell holding `payload`,
    /// returning its relative offset. Cell offsets are relative to the
    /// start of the hbin *header*, not its data area, so every offset
    /// handed out is shifted by the 32-byte header that precedes
    /// `self.buf` in the final image.
    fn alloc(&mut self, payload: &[u8]) -> u32 {
        let rel_offset = self.buf.len() as u32 + crate::hbin::HBIN_HEADER_SIZE as u32;
        let raw_size = 4 + payload.len();
        let padded_size = align8(raw_size);
        let size_field = -(padded_size as i32);
        self.buf.extend_from_slice(&size_field.to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(self.buf.len() + (padded_size - raw_size), 0);
        rel_offset
    }

    fn write_value(&mut self, value: &StagedValue) -> Result<u32> {
        let (data_length, data_offset) = if value.data.len() <= 4 && !value.data.is_empty() {
            let mut inline = [0u8; 4];
            inline[..value.data.len()].copy_from_slice(&value.data);
            (value.data.len() as u32 | 0x8000_0000, u32::from_le_bytes(inline))
        } else if value.data.is_empty() {
            (0, 0xFFFF_FFFF)
        } else if value.data.len() as u32 > crate::bigdata::MAX_DIRECT_DATA_SIZE {
            let offset = self.write_big_data(&value.data)?;
            (value.data.len() as u32, offset)
        } else {
            let offset = self.alloc(&value.data);
            (value.data.len() as u32, offset)
        };

        let compressed = value.name.is_ascii();
        let name_bytes = if compressed {
            value.name.as_bytes().to_vec()
        } else {
            value.name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
        };

        let mut payload = Vec::with_capacity(20 + name_bytes.len());
        payload.extend_from_slice(b"vk");
        payload.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        payload.extend_from_slice(&data_length.to_le_bytes());
        payload.extend_from_slice(&data_offset.to_le_bytes());
        payload.extend_from_slice(&value.value_type.to_u32().to_le_bytes());
        payload.extend_from_slice(&(if compressed { 1u16 } else { 0u16 }).to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&name_bytes);

        Ok(self.alloc(&payload))
    }

    fn write_big_data(&mut self, data: &[u8]) -> Result<u32> {
        let chunk_size = crate::bigdata::MAX_DIRECT_DATA_SIZE as usize;
        let mut segment_offsets = Vec::new();
        for chunk in data.chunks(chunk_size) {
            segment_offsets.push(self.alloc(chunk));
        }

        let mut list_payload = Vec::with_capacity(segment_offsets.len() * 4);
        for offset in &segment_offsets {
            list_payload.extend_from_slice(&(offset | 0x8000_0000).to_le_bytes());
        }
        let segment_list_offset = self.alloc(&list_payload);

        let mut header_payload = Vec::with_capacity(8);
        header_payload.extend_from_slice(b"db");
        header_payload.extend_from_slice(&(segment_offsets.len() as u16).to_le_bytes());
        header_payload.extend_from_slice(&segment_list_offset.to_le_bytes());
        Ok(self.alloc(&header_payload))
    }

    fn write_node(&mut self, node: &TreeNode, is_root: bool, cancel: Option<&CancelToken>) -> Result<u32> {
        if let Some(token) = cancel {
            token.check()?;
        }

        let mut value_offsets = Vec::with_capacity(node.values.len());
        for value in &node.values {
            value_offsets.push(self.write_value(value)?);
        }
        let value_list_offset = if value_offsets.is_empty() {
            0xFFFF_FFFF
        } else {
            self.alloc(&serialize_value_list(&value_offsets))
        };

        let mut child_offsets = Vec::with_capacity(node.children.len());
        for child in &node.children {
            child_offsets.push(self.write_node(child, false, cancel)?);
        }
        let subkey_list_offset = if child_offsets.is_empty() {
            0xFFFF_FFFF
        } else {
            self.alloc(&serialize_lh_list(node, &child_offsets))
        };

        let compressed = node.name.is_ascii();
        let name_bytes = if compressed {
            node.name.as_bytes().to_vec()
        } else {
            node.name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
        };

        let mut flags: u16 = 0;
        if compressed {
            flags |= 0x0020;
        }
        if is_root {
            flags |= 0x0004;
        }

        let mut payload = Vec::with_capacity(76 + name_bytes.len());
        payload.extend_from_slice(b"nk");
        payload.extend_from_slice(&flags.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes()); // last_written
        payload.extend_from_slice(&0u32.to_le_bytes()); // access_bits
        payload.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // parent_offset (unused by this crate's readers)
        payload.extend_from_slice(&(node.children.len() as u32).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes()); // volatile subkey count
        payload.extend_from_slice(&subkey_list_offset.to_le_bytes());
        payload.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // volatile subkey list
        payload.extend_from_slice(&(node.values.len() as u32).to_le_bytes());
        payload.extend_from_slice(&value_list_offset.to_le_bytes());
        payload.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // security_offset
        payload.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // class_name_offset
        payload.extend_from_slice(&0u32.to_le_bytes()); // max_subkey_name_len
        payload.extend_from_slice(&0u32.to_le_bytes()); // max_subkey_class_len
        payload.extend_from_slice(&0u32.to_le_bytes()); // max_value_name_len
        payload.extend_from_slice(&0u32.to_le_bytes()); // max_value_data_len
        payload.extend_from_slice(&0u32.to_le_bytes()); // work_var
        payload.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes()); // class_name_length
        payload.extend_from_slice(&name_bytes);

        Ok(self.alloc(&payload))
    }
}

fn serialize_lh_list(node: &TreeNode, child_offsets: &[u32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + child_offsets.len() * 8);
    payload.extend_from_slice(b"lh");
    payload.extend_from_slice(&(child_offsets.len() as u16).to_le_bytes());
    for (child, offset) in node.children.iter().zip(child_offsets) {
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(&lh_name_hash(&child.name).to_le_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::OpenOptions;

    fn empty_hive() -> Hive {
        let tx = Tx::new("");
        let bytes = tx.commit(Limits::default()).unwrap();
        Hive::from_vec(bytes, OpenOptions::default()).unwrap()
    }

    #[test]
    fn commit_preserves_original_header_fields() {
        let hive = empty_hive();
        let original_minor = hive.base_block().minor_version;
        let mut tx = Tx::from_hive(&hive).unwrap();
        tx.create_key("Software").unwrap();
        let bytes = tx.commit(Limits::default()).unwrap();
        let committed = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
        assert_eq!(committed.base_block().minor_version, original_minor);
        assert_eq!(committed.base_block().primary_sequence, hive.base_block().primary_sequence + 1);
        assert!(committed.base_block().is_consistent());
    }

    #[test]
    fn from_hive_rejects_readonly_hive() {
        let tx = Tx::new("");
        let bytes = tx.commit(Limits::default()).unwrap();
        let hive = Hive::from_vec(bytes, OpenOptions::read_only()).unwrap();
        let err = Tx::from_hive(&hive).unwrap_err();
        assert!(matches!(err, RegistryError::Readonly(_)));
    }

    #[test]
    fn commit_cancelable_stops_when_token_is_cancelled() {
        let mut tx = Tx::new("");
        tx.create_key("Software\\Vendor").unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = tx
            .commit_cancelable(Limits::default(), WriteOptions::default(), &token)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Cancelled));
    }

    #[test]
    fn commits_empty_root() {
        let hive = empty_hive();
        let tx = Tx::from_hive(&hive).unwrap();
        assert!(tx.root.children.is_empty());
    }

    #[test]
    fn create_and_commit_nested_key() {
        let hive = empty_hive();
        let mut tx = Tx::from_hive(&hive).unwrap();
        tx.create_key("Software\\Vendor").unwrap();
        tx.set_value("Software\\Vendor", "Version", ValueType::Dword, vec![1, 0, 0, 0])
            .unwrap();

        let bytes = tx.commit(Limits::default()).unwrap();
        let committed = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
        let reader = Reader::new(&committed);
        let root = reader.root().unwrap();
        let software = reader.lookup(root, "Software").unwrap();
        let vendor = reader.lookup(software, "Vendor").unwrap();
        let value = reader.get_value(vendor, "Version").unwrap();
        assert_eq!(reader.value_raw_data(value).unwrap(), vec![1, 0, 0, 0]);
    }

    #[test]
    fn delete_key_requires_recursive_flag_for_children() {
        let hive = empty_hive();
        let mut tx = Tx::from_hive(&hive).unwrap();
        tx.create_key("A\\B").unwrap();
        let err = tx.delete_key("A", false).unwrap_err();
        assert!(matches!(err, RegistryError::State(_)));
        tx.delete_key("A", true).unwrap();
    }

    #[test]
    fn big_data_value_round_trips_through_commit() {
        let hive = empty_hive();
        let mut tx = Tx::from_hive(&hive).unwrap();
        tx.create_key("Big").unwrap();
        let big = vec![0xABu8; 20_000];
        tx.set_value("Big", "Blob", ValueType::Binary, big.clone()).unwrap();
        let bytes = tx.commit(Limits::relaxed()).unwrap();
        let committed = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
        let reader = Reader::new(&committed);
        let root = reader.root().unwrap();
        let key = reader.lookup(root, "Big").unwrap();
        let value = reader.get_value(key, "Blob").unwrap();
        assert_eq!(reader.value_raw_data(value).unwrap(), big);
    }

    #[test]
    fn direct_value_with_padding_round_trips() {
        // 10 bytes pads to a 16-byte cell; the extra 6 bytes must not leak
        // into the value read back out.
        let hive = empty_hive();
        let mut tx = Tx::from_hive(&hive).unwrap();
        tx.create_key("Direct").unwrap();
        let data = vec![0x7Au8; 10];
        tx.set_value("Direct", "Payload", ValueType::Binary, data.clone()).unwrap();
        let bytes = tx.commit(Limits::default()).unwrap();
        let committed = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
        let reader = Reader::new(&committed);
        let root = reader.root().unwrap();
        let key = reader.lookup(root, "Direct").unwrap();
        let value = reader.get_value(key, "Payload").unwrap();
        assert_eq!(reader.value_raw_data(value).unwrap(), data);
    }

    #[test]
    fn limits_reject_oversized_value() {
        let hive = empty_hive();
        let mut tx = Tx::from_hive(&hive).unwrap();
        tx.create_key("X").unwrap();
        tx.set_value("X", "V", ValueType::Binary, vec![0u8; 200]).unwrap();
        let err = tx.commit(Limits::strict()).unwrap_err();
        assert!(matches!(err, RegistryError::LimitExceeded { .. }));
    }
}
