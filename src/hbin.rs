//! Hive bin (`hbin`) block parsing.
//!
//! Hive bins are 4KB-aligned blocks that contain registry cells. Each hbin
//! has a 32-byte header followed by a sequence of cells.

use crate::error::{RegistryError, Result};
use crate::utils::read_u32_le;

/// Expected signature for hive bins ("hbin").
pub const HBIN_SIGNATURE: &[u8; 4] = b"hbin";

/// Size of an hbin header.
pub const HBIN_HEADER_SIZE: usize = 0x20;

/// Hive bin header structure.
#[derive(Debug, Clone)]
pub struct HbinHeader {
    /// Signature, should be "hbin" (0x6E696268).
    pub signature: [u8; 4],
    /// Offset of this hbin from the start of the hive bins (relative to 0x1000).
    pub offset: u32,
    /// Size of this hbin in bytes (including header), always 4KB-aligned.
    pub size: u32,
    /// Reserved fields.
    pub reserved: [u32; 2],
    /// Timestamp (Windows FILETIME), only meaningful for the first hbin.
    pub timestamp: u64,
    /// Spare field.
    pub spare: u32,
}

impl HbinHeader {
    /// Parses an hbin header from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small, the signature does not
    /// match, the declared size is not a positive multiple of 4096, or
    /// the `offset` field does not match `expected_offset`.
    pub fn parse(data: &[u8], expected_offset: u32) -> Result<Self> {
        if data.len() < HBIN_HEADER_SIZE {
            return Err(RegistryError::TruncatedData {
                offset: expected_offset,
                expected: HBIN_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&data[0..4]);

        if &signature != HBIN_SIGNATURE {
            return Err(RegistryError::invalid_signature(HBIN_SIGNATURE, &signature));
        }

        let offset = read_u32_le(data, 0x04)?;
        let size = read_u32_le(data, 0x08)?;

        if offset != expected_offset {
            return Err(RegistryError::InvalidFormat(format!(
                "hbin offset mismatch: expected {:#x}, found {:#x}",
                expected_offset, offset
            )));
        }

        if size == 0 || size % 4096 != 0 {
            return Err(RegistryError::InvalidFormat(format!(
                "hbin at {:#x} has non-4KB-aligned size {:#x}",
                expected_offset, size
            )));
        }

        let reserved = [read_u32_le(data, 0x0C)?, read_u32_le(data, 0x10)?];
        let timestamp = u64::from(read_u32_le(data, 0x14)?) | (u64::from(read_u32_le(data, 0x18)?) << 32);
        let spare = read_u32_le(data, 0x1C)?;

        Ok(HbinHeader {
            signature,
            offset,
            size,
            reserved,
            timestamp,
            spare,
        })
    }

    /// Returns the size of the data area (excluding the header).
    pub fn data_size(&self) -> u32 {
        self.size.saturating_sub(HBIN_HEADER_SIZE as u32)
    }
}

/// An hbin's header plus its contiguous cell-data region, as yielded by
/// [`iter_hbins`].
#[derive(Debug)]
pub struct HbinBlock<'a> {
    /// The parsed header.
    pub header: HbinHeader,
    /// Cell-data bytes following the header (`header.data_size()` long).
    pub data: &'a [u8],
}

/// Iterates over the hbin chain starting at the first byte after the base
/// block, validating that each hbin's declared `offset` matches its actual
/// position (contiguity) and that its size keeps the chain within `data`.
///
/// In strict mode the iterator yields an `Err` and stops on the first
/// fault. In tolerant mode it stops cleanly (mirroring how real hives pad
/// their last bin with zeroes) rather than erroring on trailing zero bytes,
/// but still surfaces a genuine `hbin` corruption as an `Err` item so the
/// diagnostic engine can report it before the chain is abandoned.
pub fn iter_hbins(data: &[u8]) -> HbinIterator<'_> {
    HbinIterator { data, offset: 0 }
}

/// Iterator over hbins in the bin-data region of a hive (everything after
/// the 4096-byte base block).
pub struct HbinIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for HbinIterator<'a> {
    type Item = Result<HbinBlock<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        // A run of zero bytes marks the unused tail of the last bin's
        // over-allocation; treat it as end-of-chain rather than an error.
        if self.data[self.offset..].iter().take(HBIN_HEADER_SIZE).all(|&b| b == 0) {
            return None;
        }

        let hbin_data = &self.data[self.offset..];
        match HbinHeader::parse(hbin_data, self.offset as u32) {
            Ok(header) => {
                let data_len = header.data_size() as usize;
                let data_start = self.offset + HBIN_HEADER_SIZE;
                let data_end = data_start + data_len;
                if data_end > self.data.len() {
                    self.offset = self.data.len();
                    return Some(Err(RegistryError::TruncatedData {
                        offset: header.offset,
                        expected: header.size as usize,
                        actual: self.data.len() - self.offset,
                    }));
                }
                self.offset = data_end;
                Some(Ok(HbinBlock {
                    header,
                    data: &self.data[data_start..data_end],
                }))
            }
            Err(e) => {
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hbin(offset: u32, size: u32) -> Vec<u8> {
        let mut data = vec![0u8; size as usize];
        data[0..4].copy_from_slice(HBIN_SIGNATURE);
        data[0x04..0x08].copy_from_slice(&offset.to_le_bytes());
        data[0x08..0x0C].copy_from_slice(&size.to_le_bytes());
        data
    }

    #[test]
    fn hbin_header_size_is_32() {
        assert_eq!(HBIN_HEADER_SIZE, 32);
    }

    #[test]
    fn rejects_invalid_signature() {
        let mut data = vec![0u8; HBIN_HEADER_SIZE];
        data[0..4].copy_from_slice(b"XXXX");
        assert!(HbinHeader::parse(&data, 0).is_err());
    }

    #[test]
    fn rejects_non_aligned_size() {
        let mut data = make_hbin(0, 4096);
        data[0x08..0x0C].copy_from_slice(&100u32.to_le_bytes());
        assert!(HbinHeader::parse(&data, 0).is_err());
    }

    #[test]
    fn iterates_two_contiguous_bins() {
        let mut data = make_hbin(0, 4096);
        data.extend(make_hbin(4096, 4096));
        let blocks: Vec<_> = iter_hbins(&data).collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].header.offset, 4096);
    }

    #[test]
    fn stops_at_zero_padding() {
        let mut data = make_hbin(0, 4096);
        data.extend(vec![0u8; 4096]);
        let blocks: Vec<_> = iter_hbins(&data).collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 1);
    }
}
