//! Security descriptor (`sk`) cell parsing.
//!
//! Security descriptor contents (owner/group SIDs, DACL/SACL) are opaque to
//! this crate — semantics are explicitly out of scope. `sk` cells form a
//! doubly-linked, reference-counted ring shared across keys; this module
//! preserves the ring pointers and reference count and hands back the raw
//! descriptor bytes unparsed.

use crate::error::{RegistryError, Result};
use crate::utils::read_u32_le;

/// Minimum size of an `sk` cell: signature (2) + reserved (2) + prev/next
/// (4 each) + ref count (4) + descriptor length (4).
const SK_MIN_SIZE: usize = 20;

/// Security descriptor cell (`sk`).
#[derive(Debug, Clone)]
pub struct SecurityDescriptor {
    /// Offset of the previous `sk` cell in the ring.
    pub prev_offset: u32,
    /// Offset of the next `sk` cell in the ring.
    pub next_offset: u32,
    /// Number of keys referencing this descriptor.
    pub reference_count: u32,
    /// Raw security descriptor bytes (opaque self-relative `SECURITY_DESCRIPTOR`).
    pub descriptor: Vec<u8>,
}

impl SecurityDescriptor {
    /// Parses a security descriptor cell from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small, the signature is wrong,
    /// or the declared descriptor length does not fit in the cell.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < SK_MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: SK_MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"sk" {
            return Err(RegistryError::unknown_cell_type([data[0], data[1]], offset));
        }

        let prev_offset = read_u32_le(data, 0x04)?;
        let next_offset = read_u32_le(data, 0x08)?;
        let reference_count = read_u32_le(data, 0x0C)?;
        let descriptor_length = read_u32_le(data, 0x10)? as usize;

        let descriptor_end = SK_MIN_SIZE + descriptor_length;
        if descriptor_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: descriptor_end,
                actual: data.len(),
            });
        }

        Ok(SecurityDescriptor {
            prev_offset,
            next_offset,
            reference_count,
            descriptor: data[SK_MIN_SIZE..descriptor_end].to_vec(),
        })
    }

    /// Serializes this descriptor back into `sk`-cell payload bytes
    /// (everything after the cell's 4-byte size header).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SK_MIN_SIZE + self.descriptor.len());
        buf.extend_from_slice(b"sk");
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&self.prev_offset.to_le_bytes());
        buf.extend_from_slice(&self.next_offset.to_le_bytes());
        buf.extend_from_slice(&self.reference_count.to_le_bytes());
        buf.extend_from_slice(&(self.descriptor.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.descriptor);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sk(prev: u32, next: u32, refs: u32, descriptor: &[u8]) -> Vec<u8> {
        let sd = SecurityDescriptor {
            prev_offset: prev,
            next_offset: next,
            reference_count: refs,
            descriptor: descriptor.to_vec(),
        };
        sd.serialize()
    }

    #[test]
    fn parses_and_round_trips() {
        let bytes = make_sk(0x20, 0x40, 3, b"fake-descriptor-bytes");
        let sd = SecurityDescriptor::parse(&bytes, 0).unwrap();
        assert_eq!(sd.prev_offset, 0x20);
        assert_eq!(sd.next_offset, 0x40);
        assert_eq!(sd.reference_count, 3);
        assert_eq!(sd.descriptor, b"fake-descriptor-bytes");

        let reserialized = sd.serialize();
        assert_eq!(reserialized, bytes);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = make_sk(0, 0, 0, b"");
        bytes[0..2].copy_from_slice(b"XX");
        let err = SecurityDescriptor::parse(&bytes, 0).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownCellType { .. }));
    }

    #[test]
    fn rejects_truncated_descriptor() {
        let mut bytes = make_sk(0, 0, 0, b"");
        bytes[0x10..0x14].copy_from_slice(&100u32.to_le_bytes());
        let err = SecurityDescriptor::parse(&bytes, 0).unwrap_err();
        assert!(matches!(err, RegistryError::TruncatedData { .. }));
    }
}
