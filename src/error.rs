//! Error types for registry hive parsing, editing and repair.
//!
//! This module provides the full error taxonomy the crate surfaces at its
//! boundary: structural parse failures, lookup misses, type mismatches,
//! limit violations and cancellation are all distinct variants so callers
//! can match on the enum rather than parsing message text.

use std::io;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry hive parsing, editing and repair.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// I/O error occurred while reading or writing a hive file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The buffer is not a registry hive at all (bad base-block signature).
    #[error("not a registry hive: {0}")]
    NotHive(String),

    /// Invalid magic signature in header or structure.
    #[error("Invalid signature: expected {expected:?}, found {found:?}")]
    InvalidSignature { expected: Vec<u8>, found: Vec<u8> },

    /// Invalid hive format or corrupted data that is fatal even in tolerant mode
    /// (a broken bin chain, a root that is unreachable).
    #[error("corrupt hive: {0}")]
    Corrupt(String),

    /// Invalid hive format, used for non-fatal structural complaints.
    #[error("Invalid hive format: {0}")]
    InvalidFormat(String),

    /// Cell offset is out of bounds.
    #[error("Invalid cell offset: {offset:#x} (hive size: {hive_size:#x})")]
    InvalidOffset { offset: u32, hive_size: usize },

    /// Cell offset is exactly zero where a valid cell reference was required.
    #[error("cell offset is zero")]
    CellOffsetZero,

    /// Cell size is invalid or corrupted.
    #[error("Invalid cell size: {size} at offset {offset:#x}")]
    InvalidCellSize { size: i32, offset: u32 },

    /// Unknown or unsupported cell type.
    #[error("Unknown cell type: {cell_type:?} at offset {offset:#x}")]
    UnknownCellType { cell_type: [u8; 2], offset: u32 },

    /// Key, value or path was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid UTF-16 string data.
    #[error("Invalid UTF-16 string at offset {offset:#x}")]
    InvalidUtf16 { offset: u32 },

    /// Invalid registry value type.
    #[error("Invalid value type: {0}")]
    InvalidValueType(u32),

    /// A typed accessor was used against a value of the wrong type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Hive is too small to be valid.
    #[error("Hive too small: {size} bytes (minimum: {minimum} bytes)")]
    HiveTooSmall { size: usize, minimum: usize },

    /// Checksum mismatch in hive header.
    #[error("Checksum mismatch: expected {expected:#x}, calculated {calculated:#x}")]
    ChecksumMismatch { expected: u32, calculated: u32 },

    /// Unsupported hive version.
    #[error("Unsupported hive version: {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// Data truncated or incomplete.
    #[error("Truncated data at offset {offset:#x}: expected {expected} bytes, got {actual} bytes")]
    TruncatedData {
        offset: u32,
        expected: usize,
        actual: usize,
    },

    /// Invalid subkey list type.
    #[error("Invalid subkey list type: {list_type:?}")]
    InvalidSubkeyList { list_type: [u8; 2] },

    /// An operation unsupported by this crate was requested.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The hive or transaction is not in a state that allows the requested
    /// operation (e.g. deleting a key with children when `recursive` was
    /// not requested).
    #[error("invalid state: {0}")]
    State(String),

    /// Attempted to mutate something that is read-only.
    #[error("read-only: {0}")]
    Readonly(String),

    /// A configured `Limits` value was exceeded.
    #[error("limit exceeded: {limit} (value {value}, max {max})")]
    LimitExceeded {
        limit: &'static str,
        value: u64,
        max: u64,
    },

    /// The operation was cancelled via a caller-supplied cancellation flag.
    #[error("cancelled")]
    Cancelled,

    /// A `.reg` text file failed to parse, with file/line context.
    #[error("{path}:{line}: {message}")]
    RegParse {
        path: String,
        line: usize,
        message: String,
    },
}

impl RegistryError {
    /// Creates an invalid signature error with context.
    pub fn invalid_signature(expected: &[u8], found: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Creates an invalid offset error with context.
    pub fn invalid_offset(offset: u32, hive_size: usize) -> Self {
        Self::InvalidOffset { offset, hive_size }
    }

    /// Creates an invalid cell size error with context.
    pub fn invalid_cell_size(size: i32, offset: u32) -> Self {
        Self::InvalidCellSize { size, offset }
    }

    /// Creates a format error with detailed context.
    pub fn format_error(message: String) -> Self {
        Self::InvalidFormat(message)
    }

    /// Creates a not-found error with context about what was being searched.
    pub fn not_found(item_type: &str, name: &str) -> Self {
        Self::NotFound(format!("{} '{}'", item_type, name))
    }

    /// Creates an unknown cell type error.
    pub fn unknown_cell_type(cell_type: [u8; 2], offset: u32) -> Self {
        Self::UnknownCellType { cell_type, offset }
    }

    /// Creates a type-mismatch error.
    pub fn type_mismatch(expected: &str, found: &str) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Creates a limit-exceeded error.
    pub fn limit_exceeded(limit: &'static str, value: u64, max: u64) -> Self {
        Self::LimitExceeded { limit, value, max }
    }

    /// Returns true if this error represents a locally recoverable structural
    /// fault — the kind tolerant mode skips (emitting a diagnostic) rather
    /// than raising.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownCellType { .. }
                | Self::InvalidSubkeyList { .. }
                | Self::InvalidUtf16 { .. }
                | Self::InvalidValueType(_)
                | Self::TruncatedData { .. }
                | Self::InvalidCellSize { .. }
                | Self::InvalidOffset { .. }
                | Self::CellOffsetZero
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(RegistryError::CellOffsetZero.is_recoverable());
        assert!(!RegistryError::Cancelled.is_recoverable());
        assert!(!RegistryError::Corrupt("broken bin chain".into()).is_recoverable());
    }

    #[test]
    fn limit_exceeded_carries_name_and_values() {
        let err = RegistryError::limit_exceeded("MaxValueSize", 20_000, 16_384);
        match err {
            RegistryError::LimitExceeded { limit, value, max } => {
                assert_eq!(limit, "MaxValueSize");
                assert_eq!(value, 20_000);
                assert_eq!(max, 16_384);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn invalid_signature_helper() {
        let err = RegistryError::invalid_signature(b"regf", b"XXXX");
        assert!(matches!(err, RegistryError::InvalidSignature { .. }));
    }
}
