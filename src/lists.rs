//! Subkey list parsing (`li`, `lf`, `lh`, `ri`) and name-hash lookup.
//!
//! Registry keys organize their subkeys in one of these list structures.
//! `lh` lists carry a precomputed name hash per entry so [`SubkeyList::find`]
//! can narrow a lookup without dereferencing every subkey's `nk` cell.

use crate::error::{RegistryError, Result};
use crate::utils::{lh_name_hash, read_u32_le};

/// Subkey list types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubkeyListType {
    /// Index leaf (`li`) — simple list of offsets.
    IndexLeaf,
    /// Fast leaf (`lf`) — list with 4-byte name hints (first chars).
    FastLeaf,
    /// Hash leaf (`lh`) — list with name-hash hints.
    HashLeaf,
    /// Index root (`ri`) — list of subkey list offsets.
    IndexRoot,
}

impl SubkeyListType {
    /// Parses a subkey list type from a 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        match sig {
            b"li" => Ok(SubkeyListType::IndexLeaf),
            b"lf" => Ok(SubkeyListType::FastLeaf),
            b"lh" => Ok(SubkeyListType::HashLeaf),
            b"ri" => Ok(SubkeyListType::IndexRoot),
            _ => Err(RegistryError::InvalidSubkeyList { list_type: *sig }),
        }
    }
}

/// Subkey list entry carrying a name hint (for `lf`/`lh` lists).
#[derive(Debug, Clone, Copy)]
pub struct SubkeyListEntry {
    /// Offset to the key node (`nk` cell).
    pub key_offset: u32,
    /// Name hint: first 4 bytes of the name for `lf`, LH hash for `lh`.
    pub name_hint: u32,
}

/// Parsed subkey list.
#[derive(Debug, Clone)]
pub enum SubkeyList {
    /// Index leaf — plain list of key offsets.
    IndexLeaf(Vec<u32>),
    /// Fast leaf or hash leaf — list with per-entry hints.
    LeafWithHints(SubkeyListType, Vec<SubkeyListEntry>),
    /// Index root — list of sublist offsets (fan-out for large key counts).
    IndexRoot(Vec<u32>),
}

impl SubkeyList {
    /// Parses a subkey list from cell data.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < 4 {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 4,
                actual: data.len(),
            });
        }

        let sig = [data[0], data[1]];
        let list_type = SubkeyListType::from_signature(&sig)?;
        let count = u16::from_le_bytes([data[2], data[3]]) as usize;

        match list_type {
            SubkeyListType::IndexLeaf | SubkeyListType::IndexRoot => {
                let expected_size = 4 + (count * 4);
                if data.len() < expected_size {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }
                let mut offsets = Vec::with_capacity(count);
                for i in 0..count {
                    offsets.push(read_u32_le(data, 4 + i * 4)?);
                }
                Ok(if list_type == SubkeyListType::IndexLeaf {
                    SubkeyList::IndexLeaf(offsets)
                } else {
                    SubkeyList::IndexRoot(offsets)
                })
            }

            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => {
                let expected_size = 4 + (count * 8);
                if data.len() < expected_size {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let entry_pos = 4 + i * 8;
                    entries.push(SubkeyListEntry {
                        key_offset: read_u32_le(data, entry_pos)?,
                        name_hint: read_u32_le(data, entry_pos + 4)?,
                    });
                }
                Ok(SubkeyList::LeafWithHints(list_type, entries))
            }
        }
    }

    /// Returns an iterator over key offsets (sublist offsets for
    /// [`SubkeyList::IndexRoot`]).
    pub fn key_offsets_iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            SubkeyList::IndexLeaf(offsets) => Box::new(offsets.iter().copied()),
            SubkeyList::LeafWithHints(_, entries) => Box::new(entries.iter().map(|e| e.key_offset)),
            SubkeyList::IndexRoot(offsets) => Box::new(offsets.iter().copied()),
        }
    }

    /// Number of entries in this list.
    pub fn len(&self) -> usize {
        match self {
            SubkeyList::IndexLeaf(o) | SubkeyList::IndexRoot(o) => o.len(),
            SubkeyList::LeafWithHints(_, e) => e.len(),
        }
    }

    /// Returns true if this list has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this is an index root (contains sublists, not keys).
    pub fn is_index_root(&self) -> bool {
        matches!(self, SubkeyList::IndexRoot(_))
    }

    /// If this is an `lh` (hash leaf) list, returns the subset of key
    /// offsets whose stored hash matches `name`'s LH hash. Used by
    /// [`crate::reader::Reader::lookup`] to prune a lookup before
    /// resolving candidate `nk` cells; returns `None` for list types that
    /// carry no hash (caller must fall back to scanning every entry).
    pub fn candidates_by_hash(&self, name: &str) -> Option<Vec<u32>> {
        match self {
            SubkeyList::LeafWithHints(SubkeyListType::HashLeaf, entries) => {
                let target = lh_name_hash(name);
                Some(
                    entries
                        .iter()
                        .filter(|e| e.name_hint == target)
                        .map(|e| e.key_offset)
                        .collect(),
                )
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lh_bytes(entries: &[(u32, u32)]) -> Vec<u8> {
        let mut data = vec![0u8; 4];
        data[0..2].copy_from_slice(b"lh");
        data[2..4].copy_from_slice(&(entries.len() as u16).to_le_bytes());
        for (offset, hash) in entries {
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&hash.to_le_bytes());
        }
        data
    }

    #[test]
    fn parses_index_leaf() {
        let mut data = vec![0u8; 4];
        data[0..2].copy_from_slice(b"li");
        data[2..4].copy_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&0x20u32.to_le_bytes());
        data.extend_from_slice(&0x40u32.to_le_bytes());

        let list = SubkeyList::parse(&data, 0).unwrap();
        assert_eq!(list.key_offsets_iter().collect::<Vec<_>>(), vec![0x20, 0x40]);
    }

    #[test]
    fn hash_leaf_prunes_by_lh_hash() {
        let hash = lh_name_hash("Test");
        let data = lh_bytes(&[(0x20, hash), (0x40, hash.wrapping_add(1))]);
        let list = SubkeyList::parse(&data, 0).unwrap();
        let candidates = list.candidates_by_hash("test").unwrap();
        assert_eq!(candidates, vec![0x20]);
    }

    #[test]
    fn rejects_unknown_signature() {
        let err = SubkeyListType::from_signature(b"XX").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSubkeyList { .. }));
    }

    #[test]
    fn index_root_reports_as_such() {
        let mut data = vec![0u8; 4];
        data[0..2].copy_from_slice(b"ri");
        data[2..4].copy_from_slice(&0u16.to_le_bytes());
        let list = SubkeyList::parse(&data, 0).unwrap();
        assert!(list.is_index_root());
        assert!(list.is_empty());
    }
}
