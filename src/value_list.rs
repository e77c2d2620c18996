//! Value list parsing — the flat array of `vk` offsets a key node points to.

use crate::cellref::is_null_ref;
use crate::error::{RegistryError, Result};
use crate::utils::read_u32_le;

/// Parses a value list cell's payload into `count` value offsets.
///
/// Value lists carry no signature of their own: they are a bare array of
/// `u32` cell offsets, sized by the owning key node's declared value
/// count rather than anything in the list cell itself.
///
/// # Errors
///
/// Returns [`RegistryError::TruncatedData`] if `data` is shorter than
/// `count * 4` bytes.
pub fn parse_value_list(data: &[u8], count: u32, offset: u32) -> Result<Vec<u32>> {
    let count = count as usize;
    let expected = count * 4;
    if data.len() < expected {
        return Err(RegistryError::TruncatedData {
            offset,
            expected,
            actual: data.len(),
        });
    }

    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let value_offset = read_u32_le(data, i * 4)?;
        if !is_null_ref(value_offset) {
            offsets.push(value_offset);
        }
    }
    Ok(offsets)
}

/// Serializes a list of value offsets back into value-list cell payload
/// bytes, for the editor's commit path.
pub fn serialize_value_list(offsets: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(offsets.len() * 4);
    for offset in offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x20u32.to_le_bytes());
        data.extend_from_slice(&0x40u32.to_le_bytes());
        let offsets = parse_value_list(&data, 2, 0).unwrap();
        assert_eq!(offsets, vec![0x20, 0x40]);
    }

    #[test]
    fn skips_null_refs() {
        let mut data = Vec::new();
        data.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        data.extend_from_slice(&0x40u32.to_le_bytes());
        let offsets = parse_value_list(&data, 2, 0).unwrap();
        assert_eq!(offsets, vec![0x40]);
    }

    #[test]
    fn rejects_truncated_list() {
        let data = vec![0u8; 4];
        let err = parse_value_list(&data, 2, 0).unwrap_err();
        assert!(matches!(err, RegistryError::TruncatedData { .. }));
    }

    #[test]
    fn round_trips_through_serialize() {
        let offsets = vec![0x10, 0x20, 0x30];
        let bytes = serialize_value_list(&offsets);
        let reparsed = parse_value_list(&bytes, 3, 0).unwrap();
        assert_eq!(reparsed, offsets);
    }
}
