//! Big data block (`db`) parsing.
//!
//! Registry values larger than [`MAX_DIRECT_DATA_SIZE`] bytes are stored as
//! a `db` header cell followed by a segment-offset list; the value's
//! bytes are the concatenation of each referenced segment's cell data,
//! truncated to the value's declared length.

use crate::error::{RegistryError, Result};
use crate::utils::read_u16_le;

/// Largest value length stored directly in a cell before the `db`
/// indirection kicks in.
pub const MAX_DIRECT_DATA_SIZE: u32 = 16_344;

/// Minimum size of a big data block header: signature (2) + segment count
/// (2) + segment list offset (4).
const MIN_SIZE: usize = 8;

/// Big data block header (`db` cell).
#[derive(Debug, Clone)]
pub struct BigDataBlock {
    /// Number of data segments.
    pub segment_count: u16,
    /// Cell offset of the segment-offset list.
    pub segment_list_offset: u32,
}

impl BigDataBlock {
    /// Parses a big data block header from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small or the signature does
    /// not match `"db"`.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"db" {
            return Err(RegistryError::unknown_cell_type([data[0], data[1]], offset));
        }

        let segment_count = read_u16_le(data, 0x02)?;
        let segment_list_offset = u32::from_le_bytes([data[0x04], data[0x05], data[0x06], data[0x07]]);

        Ok(BigDataBlock {
            segment_count,
            segment_list_offset,
        })
    }

    /// Serializes this header back into `db`-cell payload bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_SIZE);
        buf.extend_from_slice(b"db");
        buf.extend_from_slice(&self.segment_count.to_le_bytes());
        buf.extend_from_slice(&self.segment_list_offset.to_le_bytes());
        buf
    }
}

/// Parses the segment-offset list cell that follows a `db` header,
/// clearing the high bit each on-disk entry sets (a historical artifact
/// of how segment offsets are stored).
pub fn parse_segment_offsets(data: &[u8], segment_count: u16, offset: u32) -> Result<Vec<u32>> {
    let expected = segment_count as usize * 4;
    if data.len() < expected {
        return Err(RegistryError::TruncatedData {
            offset,
            expected,
            actual: data.len(),
        });
    }

    let mut offsets = Vec::with_capacity(segment_count as usize);
    for i in 0..segment_count as usize {
        let pos = i * 4;
        let raw = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        offsets.push(raw & 0x7FFF_FFFF);
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_small() {
        let data = vec![0u8; 7];
        let err = BigDataBlock::parse(&data, 0).unwrap_err();
        assert!(matches!(err, RegistryError::TruncatedData { .. }));
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; 8];
        data[0..2].copy_from_slice(b"XX");
        let err = BigDataBlock::parse(&data, 0).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownCellType { .. }));
    }

    #[test]
    fn parses_and_round_trips() {
        let header = BigDataBlock {
            segment_count: 5,
            segment_list_offset: 0x20,
        };
        let bytes = header.serialize();
        let reparsed = BigDataBlock::parse(&bytes, 0).unwrap();
        assert_eq!(reparsed.segment_count, 5);
        assert_eq!(reparsed.segment_list_offset, 0x20);
    }

    #[test]
    fn clears_high_bit_on_segment_offsets() {
        let mut data = Vec::new();
        data.extend_from_slice(&(0x80000020u32).to_le_bytes());
        let offsets = parse_segment_offsets(&data, 1, 0).unwrap();
        assert_eq!(offsets, vec![0x20]);
    }
}
