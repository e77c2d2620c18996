//! Bounds-checked cell resolution — the hottest path in the crate.
//!
//! Every record fetch (`nk`, `vk`, `sk`, list, `db`) routes through
//! [`resolve_cell`]. It is intentionally allocation-free: the returned
//! slice borrows directly from the hive's backing buffer.

use crate::error::{RegistryError, Result};
use crate::utils::HBIN_START_OFFSET;

/// A resolved cell: its absolute offset, declared size, allocation state
/// and payload (the bytes after the 4-byte size header).
#[derive(Debug)]
pub struct ResolvedCell<'a> {
    /// Absolute offset of the size header within `buf`.
    pub absolute_offset: usize,
    /// `|size|`, including the 4-byte size header.
    pub size: u32,
    /// `true` for an allocated cell (negative on-disk size), `false` for free.
    pub is_allocated: bool,
    /// Payload bytes, excluding the size header.
    pub payload: &'a [u8],
}

/// Resolves a relative cell offset against a hive buffer.
///
/// `relative` is measured from the first byte after the base header (as
/// hive cell offsets are on disk). Returns the payload slice between the
/// size header and the cell's declared end.
///
/// # Errors
///
/// - [`RegistryError::CellOffsetZero`] if `relative` is the sentinel 0
///   when the caller requires a real cell (callers that accept "absent"
///   should check for `0`/`0xFFFFFFFF` themselves before calling this).
/// - [`RegistryError::InvalidOffset`] if the computed absolute position
///   falls outside `buf`.
/// - [`RegistryError::TruncatedData`] if the 4-byte size header or the
///   declared payload does not fit in `buf`.
/// - [`RegistryError::InvalidCellSize`] if `|size| < 8`.
pub fn resolve_cell(buf: &[u8], relative: u32) -> Result<ResolvedCell<'_>> {
    let absolute = relative
        .checked_add(HBIN_START_OFFSET)
        .ok_or(RegistryError::InvalidOffset {
            offset: relative,
            hive_size: buf.len(),
        })? as usize;

    if absolute >= buf.len() {
        return Err(RegistryError::InvalidOffset {
            offset: relative,
            hive_size: buf.len(),
        });
    }

    if absolute + 4 > buf.len() {
        return Err(RegistryError::TruncatedData {
            offset: relative,
            expected: 4,
            actual: buf.len() - absolute,
        });
    }

    let size_bytes = &buf[absolute..absolute + 4];
    let raw_size = i32::from_le_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]);
    let abs_size = raw_size.unsigned_abs();

    if abs_size < 8 {
        return Err(RegistryError::invalid_cell_size(raw_size, relative));
    }

    let abs_size = abs_size as usize;
    let data_start = absolute + 4;
    let data_end = absolute + abs_size;

    if data_end > buf.len() {
        return Err(RegistryError::TruncatedData {
            offset: relative,
            expected: abs_size,
            actual: buf.len() - absolute,
        });
    }

    Ok(ResolvedCell {
        absolute_offset: absolute,
        size: abs_size as u32,
        is_allocated: raw_size < 0,
        payload: &buf[data_start..data_end],
    })
}

/// Convenience wrapper returning just the resolved payload.
#[inline]
pub fn resolve_cell_payload(buf: &[u8], relative: u32) -> Result<&[u8]> {
    resolve_cell(buf, relative).map(|c| c.payload)
}

/// Returns true for the two sentinel values hives use to mean "no cell"
/// (`0` and `0xFFFFFFFF`).
#[inline]
pub fn is_null_ref(offset: u32) -> bool {
    offset == 0 || offset == 0xFFFF_FFFF
}
