//! Utility functions for binary parsing, string conversion and case-folding.

use crate::error::{RegistryError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use std::io::Cursor;

/// Offset where hive bins start (after base block)
pub const HBIN_START_OFFSET: u32 = 0x1000;

/// Windows FILETIME ticks (100ns) between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_DIFF_SECS: i64 = 11_644_473_600;

/// Reads an ASCII string from a byte slice, trimming null terminators.
///
/// Registry strings are often null-terminated, so we trim trailing nulls.
/// Uses lossy conversion to handle any invalid UTF-8 bytes gracefully.
pub fn read_ascii_string(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .trim_end_matches('\0')
        .to_string()
}

/// Reads a UTF-16LE string from a byte slice, trimming null terminators.
///
/// Registry strings are typically null-terminated. This function decodes
/// UTF-16LE data and removes trailing null characters.
///
/// # Errors
///
/// Returns an error if the data length is not even (UTF-16 requires 2-byte units)
/// or if the UTF-16 decoding fails.
pub fn read_utf16_string(data: &[u8], offset: u32) -> Result<String> {
    if data.is_empty() {
        return Ok(String::new());
    }

    // UTF-16 requires even number of bytes
    if data.len() % 2 != 0 {
        return Err(RegistryError::InvalidUtf16 { offset });
    }

    let (decoded, _encoding, had_errors) = UTF_16LE.decode(data);

    if had_errors {
        return Err(RegistryError::InvalidUtf16 { offset });
    }

    // Trim null terminators (common in registry strings)
    Ok(decoded.trim_end_matches('\0').to_string())
}

/// Decodes a record name field that may be stored as Latin-1/ASCII
/// ("compressed") or UTF-16LE, per the record's compressed-name flag.
/// Embedded NULs and non-BMP characters are preserved; only the
/// terminating run of NULs is trimmed.
pub fn read_record_name(data: &[u8], compressed: bool, offset: u32) -> Result<String> {
    if compressed {
        Ok(read_ascii_string(data))
    } else {
        read_utf16_string(data, offset)
    }
}

/// Reads a fixed-length ASCII string (not null-terminated).
pub fn read_fixed_ascii(data: &[u8], len: usize) -> String {
    data.iter()
        .take(len)
        .map(|&b| if b == 0 { ' ' } else { b as char })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Reads a u32 from a byte slice at the given offset.
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    if offset + 4 > data.len() {
        return Err(RegistryError::TruncatedData {
            offset: offset as u32,
            expected: 4,
            actual: data.len().saturating_sub(offset),
        });
    }

    let mut cursor = Cursor::new(&data[offset..offset + 4]);
    Ok(cursor.read_u32::<LittleEndian>()?)
}

/// Reads a u16 from a byte slice at the given offset.
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    if offset + 2 > data.len() {
        return Err(RegistryError::TruncatedData {
            offset: offset as u32,
            expected: 2,
            actual: data.len().saturating_sub(offset),
        });
    }

    let mut cursor = Cursor::new(&data[offset..offset + 2]);
    Ok(cursor.read_u16::<LittleEndian>()?)
}

/// Reads an i32 from a byte slice at the given offset.
pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    if offset + 4 > data.len() {
        return Err(RegistryError::TruncatedData {
            offset: offset as u32,
            expected: 4,
            actual: data.len().saturating_sub(offset),
        });
    }

    let mut cursor = Cursor::new(&data[offset..offset + 4]);
    Ok(cursor.read_i32::<LittleEndian>()?)
}

/// Calculates XOR checksum for the first 508 bytes of the base block.
pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;

    // XOR all DWORDs except the checksum field itself (at offset 0x1FC)
    for i in (0..0x1FC).step_by(4) {
        if i + 4 <= data.len() {
            if let Ok(dword) = read_u32_le(data, i) {
                checksum ^= dword;
            }
        }
    }

    checksum
}

/// Converts a relative cell offset to an absolute hive offset.
///
/// Cell offsets in the registry are relative to the first hbin (at 0x1000).
/// This function adds 0x1000 to convert to an absolute offset.
///
/// # Errors
///
/// Returns `RegistryError::InvalidOffset` if the offset would overflow.
#[inline]
pub fn cell_offset_to_absolute(cell_offset: u32) -> Result<u32> {
    cell_offset
        .checked_add(HBIN_START_OFFSET)
        .ok_or_else(|| RegistryError::InvalidOffset {
            offset: cell_offset,
            hive_size: 0,  // Not known at this point
        })
}

/// Converts an absolute hive offset to a relative cell offset.
///
/// # Errors
///
/// Returns `RegistryError::InvalidFormat` if the offset is before hbin start.
#[inline]
pub fn absolute_to_cell_offset(absolute_offset: u32) -> Result<u32> {
    if absolute_offset < HBIN_START_OFFSET {
        return Err(RegistryError::InvalidFormat(
            format!("Absolute offset {:#x} is before hbin start", absolute_offset)
        ));
    }
    Ok(absolute_offset - HBIN_START_OFFSET)
}

/// Converts a Windows FILETIME (100ns ticks since 1601-01-01 UTC) to a
/// `chrono` UTC timestamp. Returns `None` for values chrono cannot represent.
pub fn filetime_to_datetime(filetime: u64) -> Option<chrono::DateTime<chrono::Utc>> {
    let seconds = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DIFF_SECS;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    chrono::DateTime::from_timestamp(seconds, nanos)
}

/// Converts a `chrono` UTC timestamp to a Windows FILETIME.
pub fn datetime_to_filetime(dt: chrono::DateTime<chrono::Utc>) -> u64 {
    let unix_secs = dt.timestamp();
    let nanos = dt.timestamp_subsec_nanos();
    let total_secs = unix_secs + FILETIME_UNIX_DIFF_SECS;
    (total_secs as u64) * 10_000_000 + (nanos / 100) as u64
}

/// Upper-cases a string using an approximation of the Windows registry's
/// case-insensitive comparison rules: ASCII letters are folded directly,
/// everything else falls back to Unicode simple case folding via
/// [`char::to_uppercase`]. Every case-insensitive comparison in the crate
/// (`Lookup`, `GetValue`, canonical edit paths) routes through this.
pub fn upper_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii() {
            out.push(c.to_ascii_uppercase());
        } else {
            out.extend(c.to_uppercase());
        }
    }
    out
}

/// Computes the LH subkey-list name hash: `h = 0; for c in
/// uppercase(name): h = h*37 + c`, over UTF-16 code units as the on-disk
/// format does.
pub fn lh_name_hash(name: &str) -> u32 {
    let upper = upper_case(name);
    let mut hash: u32 = 0;
    for unit in upper.encode_utf16() {
        hash = hash.wrapping_mul(37).wrapping_add(unit as u32);
    }
    hash
}

/// Normalizes path separators to `\`.
pub fn normalize_separators(path: &str) -> String {
    path.replace('/', "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ascii_string() {
        let data = b"Hello";
        assert_eq!(read_ascii_string(data), "Hello");

        // Should trim trailing nulls
        let data_with_null = b"Hello\0\0";
        assert_eq!(read_ascii_string(data_with_null), "Hello");
    }

    #[test]
    fn test_read_ascii_string_with_embedded_null() {
        // Embedded nulls are preserved, only trailing ones are trimmed
        let data = b"Hello\0World\0\0";
        assert_eq!(read_ascii_string(data), "Hello\0World");
    }

    #[test]
    fn test_read_fixed_ascii() {
        let data = b"Test    ";
        assert_eq!(read_fixed_ascii(data, 8), "Test");
    }

    #[test]
    fn test_offset_conversion() {
        assert_eq!(cell_offset_to_absolute(0).unwrap(), 0x1000);
        assert_eq!(cell_offset_to_absolute(0x20).unwrap(), 0x1020);
        assert_eq!(cell_offset_to_absolute(0x1000).unwrap(), 0x2000);

        assert_eq!(absolute_to_cell_offset(0x1000).unwrap(), 0);
        assert_eq!(absolute_to_cell_offset(0x1020).unwrap(), 0x20);
        assert_eq!(absolute_to_cell_offset(0x2000).unwrap(), 0x1000);
    }

    #[test]
    fn test_offset_overflow() {
        // Test overflow protection
        let result = cell_offset_to_absolute(u32::MAX);
        assert!(result.is_err());

        let result = cell_offset_to_absolute(u32::MAX - HBIN_START_OFFSET + 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_offset_underflow() {
        // Test underflow protection
        let result = absolute_to_cell_offset(0);
        assert!(result.is_err());

        let result = absolute_to_cell_offset(0xFFF);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_u32_le() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_u32_le(&data, 0).unwrap(), 0x04030201);
    }

    #[test]
    fn upper_case_folds_ascii() {
        assert_eq!(upper_case("Software\\Test"), "SOFTWARE\\TEST");
    }

    #[test]
    fn name_hash_matches_definition() {
        let mut expected: u32 = 0;
        for c in "test".to_ascii_uppercase().encode_utf16() {
            expected = expected.wrapping_mul(37).wrapping_add(c as u32);
        }
        assert_eq!(lh_name_hash("test"), expected);
        assert_eq!(lh_name_hash("test"), lh_name_hash("TEST"));
    }

    #[test]
    fn filetime_roundtrip() {
        let dt = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ft = datetime_to_filetime(dt);
        let back = filetime_to_datetime(ft).unwrap();
        assert_eq!(back.timestamp(), dt.timestamp());
    }
}
