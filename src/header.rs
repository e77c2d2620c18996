//! Registry hive base block (header) parsing.
//!
//! The base block is the first 4096 bytes (0x1000) of a registry hive
//! file. It contains metadata about the hive including version,
//! timestamps, and the root key cell offset. Header-level faults are
//! always fatal — tolerant mode only applies below the header, to the
//! bin chain and the key/value tree.

use crate::error::{RegistryError, Result};
use crate::utils::{calculate_checksum, read_fixed_ascii, read_u32_le};
use std::fmt;

/// Size of the base block in bytes.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Expected signature for a valid registry hive ("regf").
pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

/// Offset of the checksum field in the base block.
pub const CHECKSUM_OFFSET: usize = 0x1FC;

/// Registry hive base block header.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    /// Signature, should be "regf" (0x66676572).
    pub signature: [u8; 4],

    /// Primary sequence number.
    pub primary_sequence: u32,

    /// Secondary sequence number.
    pub secondary_sequence: u32,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Major version of the hive format.
    pub major_version: u32,

    /// Minor version of the hive format.
    pub minor_version: u32,

    /// File type (0 = normal, 1 = transaction log).
    pub file_type: u32,

    /// File format (1 = direct memory load).
    pub file_format: u32,

    /// Offset to root key cell (relative to first hbin).
    pub root_cell_offset: u32,

    /// Length of hive bin data in bytes (sum of all hbin sizes).
    pub hive_length: u32,

    /// Clustering factor (always 1).
    pub clustering_factor: u32,

    /// Embedded file name (64 UTF-16LE characters, trimmed of padding).
    pub file_name: String,

    /// Checksum (XOR of the first 508 bytes).
    pub checksum: u32,
}

impl BaseBlock {
    /// Parses a base block from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::HiveTooSmall`] if the buffer is smaller
    /// than [`BASE_BLOCK_SIZE`], [`RegistryError::NotHive`] if the
    /// signature does not match, [`RegistryError::ChecksumMismatch`] if
    /// the stored checksum does not match the computed one, or
    /// [`RegistryError::UnsupportedVersion`] if the major/minor version
    /// falls outside the range this crate understands.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&data[0..4]);

        if &signature != REGF_SIGNATURE {
            return Err(RegistryError::NotHive(format!(
                "expected signature {:?}, found {:?}",
                REGF_SIGNATURE, signature
            )));
        }

        let primary_sequence = read_u32_le(data, 0x04)?;
        let secondary_sequence = read_u32_le(data, 0x08)?;

        let last_written =
            u64::from(read_u32_le(data, 0x0C)?) | (u64::from(read_u32_le(data, 0x10)?) << 32);

        let major_version = read_u32_le(data, 0x14)?;
        let minor_version = read_u32_le(data, 0x18)?;
        let file_type = read_u32_le(data, 0x1C)?;
        let file_format = read_u32_le(data, 0x20)?;
        let root_cell_offset = read_u32_le(data, 0x24)?;
        let hive_length = read_u32_le(data, 0x28)?;
        let clustering_factor = read_u32_le(data, 0x2C)?;

        let file_name_bytes = &data[0x30..0xB0];
        let file_name = read_fixed_ascii(file_name_bytes, 64);

        let checksum = read_u32_le(data, CHECKSUM_OFFSET)?;
        let calculated = calculate_checksum(data);
        if checksum != calculated {
            return Err(RegistryError::ChecksumMismatch {
                expected: checksum,
                calculated,
            });
        }

        if major_version != 1 || !(3..=6).contains(&minor_version) {
            return Err(RegistryError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        Ok(BaseBlock {
            signature,
            primary_sequence,
            secondary_sequence,
            last_written,
            major_version,
            minor_version,
            file_type,
            file_format,
            root_cell_offset,
            hive_length,
            clustering_factor,
            file_name,
            checksum,
        })
    }

    /// Returns true if the primary and secondary sequence numbers match,
    /// indicating the hive was closed cleanly. A mismatch is a `Warning`
    /// in tolerant-mode diagnostics and does not block opening the hive.
    pub fn is_consistent(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }

    /// Converts the last-written timestamp to a UTC date-time, if
    /// representable.
    pub fn last_written_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        crate::utils::filetime_to_datetime(self.last_written)
    }

    /// Serializes this header back into a 4096-byte base block,
    /// recomputing the checksum. Used by [`crate::editor::Tx::commit`]
    /// when writing a new image.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; BASE_BLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.signature);
        buf[0x04..0x08].copy_from_slice(&self.primary_sequence.to_le_bytes());
        buf[0x08..0x0C].copy_from_slice(&self.secondary_sequence.to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&(self.last_written as u32).to_le_bytes());
        buf[0x10..0x14].copy_from_slice(&((self.last_written >> 32) as u32).to_le_bytes());
        buf[0x14..0x18].copy_from_slice(&self.major_version.to_le_bytes());
        buf[0x18..0x1C].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[0x1C..0x20].copy_from_slice(&self.file_type.to_le_bytes());
        buf[0x20..0x24].copy_from_slice(&self.file_format.to_le_bytes());
        buf[0x24..0x28].copy_from_slice(&self.root_cell_offset.to_le_bytes());
        buf[0x28..0x2C].copy_from_slice(&self.hive_length.to_le_bytes());
        buf[0x2C..0x30].copy_from_slice(&self.clustering_factor.to_le_bytes());

        let name_utf16: Vec<u16> = self.file_name.encode_utf16().collect();
        for (i, unit) in name_utf16.iter().take(64).enumerate() {
            buf[0x30 + i * 2..0x30 + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }

        let checksum = calculate_checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Builds the header for a brand-new hive with an empty tree, giving
    /// every field a value consistent with a cleanly closed 1.5 hive.
    /// [`crate::editor::Tx::commit`] overwrites `root_cell_offset`,
    /// `hive_length` and `checksum` once the image is laid out.
    pub fn fresh(file_name: impl Into<String>) -> Self {
        BaseBlock {
            signature: *REGF_SIGNATURE,
            primary_sequence: 1,
            secondary_sequence: 1,
            last_written: 0,
            major_version: 1,
            minor_version: 5,
            file_type: 0,
            file_format: 1,
            root_cell_offset: 0,
            hive_length: 0,
            clustering_factor: 1,
            file_name: file_name.into(),
            checksum: 0,
        }
    }

    /// Returns a copy of this header with both sequence numbers bumped by
    /// one and set equal, as a clean commit leaves them.
    pub fn with_bumped_sequence(&self) -> Self {
        let next = self.primary_sequence.wrapping_add(1);
        BaseBlock {
            primary_sequence: next,
            secondary_sequence: next,
            ..self.clone()
        }
    }
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry Hive Header:\n\
             - Version: {}.{}\n\
             - Root Cell Offset: {:#x}\n\
             - Hive Length: {} bytes\n\
             - Consistent: {}\n\
             - File Name: {}",
            self.major_version,
            self.minor_version,
            self.root_cell_offset,
            self.hive_length,
            self.is_consistent(),
            self.file_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header_bytes(root_offset: u32, hive_length: u32) -> Vec<u8> {
        let mut data = vec![0u8; BASE_BLOCK_SIZE];
        data[0..4].copy_from_slice(REGF_SIGNATURE);
        data[0x04..0x08].copy_from_slice(&1u32.to_le_bytes());
        data[0x08..0x0C].copy_from_slice(&1u32.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
        data[0x24..0x28].copy_from_slice(&root_offset.to_le_bytes());
        data[0x28..0x2C].copy_from_slice(&hive_length.to_le_bytes());
        let checksum = calculate_checksum(&data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        data
    }

    #[test]
    fn base_block_size_is_4096() {
        assert_eq!(BASE_BLOCK_SIZE, 4096);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = vec![0u8; BASE_BLOCK_SIZE];
        data[0..4].copy_from_slice(b"XXXX");
        let err = BaseBlock::parse(&data).unwrap_err();
        assert!(matches!(err, RegistryError::NotHive(_)));
    }

    #[test]
    fn rejects_too_small_buffer() {
        let data = vec![0u8; 100];
        let err = BaseBlock::parse(&data).unwrap_err();
        assert!(matches!(err, RegistryError::HiveTooSmall { .. }));
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let mut data = minimal_header_bytes(0x20, 0x1000);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        let err = BaseBlock::parse(&data).unwrap_err();
        assert!(matches!(err, RegistryError::ChecksumMismatch { .. }));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut data = minimal_header_bytes(0x20, 0x1000);
        data[0x18..0x1C].copy_from_slice(&9u32.to_le_bytes());
        let checksum = calculate_checksum(&data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        let err = BaseBlock::parse(&data).unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedVersion { .. }));
    }

    #[test]
    fn parses_minimal_valid_header() {
        let data = minimal_header_bytes(0x20, 0x1000);
        let hdr = BaseBlock::parse(&data).unwrap();
        assert_eq!(hdr.root_cell_offset, 0x20);
        assert!(hdr.is_consistent());
    }

    #[test]
    fn detects_sequence_mismatch() {
        let mut data = minimal_header_bytes(0x20, 0x1000);
        data[0x08..0x0C].copy_from_slice(&2u32.to_le_bytes());
        let checksum = calculate_checksum(&data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        let hdr = BaseBlock::parse(&data).unwrap();
        assert!(!hdr.is_consistent());
    }

    #[test]
    fn serialize_round_trips_through_parse() {
        let data = minimal_header_bytes(0x20, 0x1000);
        let hdr = BaseBlock::parse(&data).unwrap();
        let serialized = hdr.serialize();
        let reparsed = BaseBlock::parse(&serialized).unwrap();
        assert_eq!(reparsed.root_cell_offset, hdr.root_cell_offset);
        assert_eq!(reparsed.hive_length, hdr.hive_length);
    }

    #[test]
    fn bumped_sequence_is_consistent() {
        let data = minimal_header_bytes(0x20, 0x1000);
        let hdr = BaseBlock::parse(&data).unwrap();
        let bumped = hdr.with_bumped_sequence();
        assert!(bumped.is_consistent());
        assert_eq!(bumped.primary_sequence, hdr.primary_sequence + 1);
    }
}
