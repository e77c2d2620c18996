//! Hive image ownership: the memory-mapped or owned byte buffer, the
//! parsed base-block header, and bounds-checked cell access.
//!
//! [`Hive`] is pure data access — no tree semantics. Key/value navigation
//! lives in [`crate::reader`]; this module's job is opening a file (or
//! buffer) and handing back byte slices other modules can parse.

use crate::cellref::{resolve_cell, ResolvedCell};
use crate::error::{RegistryError, Result};
use crate::hbin::{iter_hbins, HbinBlock};
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::key::KeyNode;
use crate::utils::calculate_checksum;
use memmap2::Mmap;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Options controlling how a hive is opened and how strictly it is
/// validated.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Memory-map the file instead of reading it fully into owned memory.
    /// Ignored by [`Hive::from_vec`]/[`Hive::from_mmap`], which already
    /// commit to a storage mode.
    pub zero_copy: bool,
    /// When `true`, structural faults below the header (bad cells, broken
    /// subkey lists, unreadable values) are recorded as diagnostics and
    /// skipped rather than aborting the traversal that hits them, once
    /// `Open` has returned. Header-level faults, a broken bin chain, and
    /// an unreachable root cell are always fatal in strict mode; in
    /// tolerant mode the sequence-number check is downgraded to a warning,
    /// but the bin chain must still be walkable (there is no tree to walk
    /// tolerantly otherwise), so `Open` still fails with
    /// [`RegistryError::Corrupt`] on a broken bin chain regardless of this
    /// flag.
    pub tolerant: bool,
    /// When `true`, [`crate::editor::Tx::from_hive`] refuses to stage edits
    /// against this hive, failing with [`RegistryError::Readonly`]. Set
    /// this when a hive is opened purely for inspection (diagnostics,
    /// export, diffing) and a stray commit call would be a programming
    /// error rather than something the caller intended.
    pub readonly: bool,
    /// When `true` and `tolerant` is also set, [`Hive::open`] additionally
    /// checks that the root cell resolves to a parsable `nk` and logs a
    /// warning (without failing `Open`) if it does not, so the caller
    /// learns about an unreachable root before the first `Reader` call
    /// fails on it. Ignored in strict mode, where root reachability is
    /// always checked and always fatal.
    pub collect_diagnostics: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            zero_copy: true,
            tolerant: true,
            readonly: false,
            collect_diagnostics: false,
        }
    }
}

impl OpenOptions {
    /// Strict preset: zero-copy, not tolerant, no eager diagnostics.
    pub fn strict() -> Self {
        OpenOptions {
            zero_copy: true,
            tolerant: false,
            readonly: false,
            collect_diagnostics: false,
        }
    }

    /// Strict preset with [`OpenOptions::readonly`] set, for callers that
    /// only inspect, diff, or export a hive and never intend to edit it.
    pub fn read_only() -> Self {
        OpenOptions {
            readonly: true,
            ..Self::strict()
        }
    }
}

/// Backing storage for a hive's bytes.
enum HiveData {
    /// Memory-mapped file data (read-only).
    Mapped(Mmap),
    /// Owned data, used for in-memory buffers and post-edit images.
    Owned(Arc<Vec<u8>>),
}

impl HiveData {
    fn as_slice(&self) -> &[u8] {
        match self {
            HiveData::Mapped(mmap) => mmap,
            HiveData::Owned(data) => data,
        }
    }
}

/// An opened registry hive image: header plus bounds-checked cell access
/// over its backing buffer.
pub struct Hive {
    data: HiveData,
    base_block: BaseBlock,
    options: OpenOptions,
}

impl Hive {
    /// Opens a registry hive file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotHive`], [`RegistryError::HiveTooSmall`],
    /// [`RegistryError::ChecksumMismatch`], [`RegistryError::UnsupportedVersion`],
    /// or [`RegistryError::Unsupported`] if the base block names a
    /// non-primary `file_type` (transaction log or external file) if the
    /// header fails to validate. In strict mode also returns an error if
    /// the bin chain is broken.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        info!("opening registry hive");
        let file = File::open(&path)?;
        let metadata = file.metadata()?;
        let file_size = metadata.len() as usize;

        if file_size < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: file_size,
                minimum: BASE_BLOCK_SIZE,
            });
        }

        let data = if options.zero_copy {
            // SAFETY: file is opened read-only, size validated above, and
            // all subsequent access is bounds-checked via `resolve_cell`.
            let mmap = unsafe { Mmap::map(&file)? };
            HiveData::Mapped(mmap)
        } else {
            let mut buf = Vec::with_capacity(file_size);
            let mut file = file;
            std::io::Read::read_to_end(&mut file, &mut buf)?;
            HiveData::Owned(Arc::new(buf))
        };

        Self::from_data(data, options)
    }

    /// Builds a hive from an in-memory buffer (e.g. one produced by the
    /// editor, or loaded from a non-file source).
    pub fn from_vec(data: Vec<u8>, options: OpenOptions) -> Result<Self> {
        Self::from_data(HiveData::Owned(Arc::new(data)), options)
    }

    /// Builds a hive from an already-created memory map.
    pub fn from_mmap(mmap: Mmap, options: OpenOptions) -> Result<Self> {
        Self::from_data(HiveData::Mapped(mmap), options)
    }

    fn from_data(data: HiveData, options: OpenOptions) -> Result<Self> {
        let base_block = BaseBlock::parse(data.as_slice())?;
        if base_block.file_type != 0 {
            return Err(RegistryError::Unsupported(format!(
                "file_type {} is not a primary hive image; transaction log and external files use a different on-disk layout",
                base_block.file_type
            )));
        }
        if !base_block.is_consistent() {
            if options.tolerant {
                warn!(
                    primary = base_block.primary_sequence,
                    secondary = base_block.secondary_sequence,
                    "hive sequence numbers differ; last shutdown was not clean"
                );
            } else {
                return Err(RegistryError::Corrupt(format!(
                    "sequence numbers differ: primary={}, secondary={}",
                    base_block.primary_sequence, base_block.secondary_sequence
                )));
            }
        }

        let hive = Hive {
            data,
            base_block,
            options,
        };

        // The bin chain is structural: without it there is no way to find
        // any cell, let alone tolerate a fault in one. Fatal in both modes.
        hive.validate_bin_chain()?;

        if !options.tolerant {
            hive.validate_root_reachable()?;
        } else if options.collect_diagnostics {
            if let Err(e) = hive.validate_root_reachable() {
                warn!(error = %e, "tolerant open: root cell unreachable");
            }
        }

        Ok(hive)
    }

    /// Validates the bin chain strictly, returning the first error
    /// encountered (if any).
    fn validate_bin_chain(&self) -> Result<()> {
        for result in self.hbins() {
            result.map_err(|e| RegistryError::Corrupt(format!("broken bin chain: {}", e)))?;
        }
        Ok(())
    }

    /// Confirms the root cell offset resolves to a parsable `nk` cell.
    fn validate_root_reachable(&self) -> Result<()> {
        let payload = self.read_cell(self.root_offset())?;
        KeyNode::parse(payload, self.root_offset())
            .map(|_| ())
            .map_err(|e| RegistryError::Corrupt(format!("root cell unreachable: {}", e)))
    }

    /// Returns the parsed base-block header.
    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Returns the options this hive was opened with.
    pub fn options(&self) -> OpenOptions {
        self.options
    }

    /// Returns the full backing buffer, including the base block.
    pub fn buffer(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Resolves a cell by its relative offset, returning its payload
    /// bytes (excluding the 4-byte size header).
    pub fn read_cell(&self, offset: u32) -> Result<&[u8]> {
        resolve_cell(self.buffer(), offset).map(|c| c.payload)
    }

    /// Resolves a cell by its relative offset, returning full metadata
    /// (size, allocation state, payload).
    pub fn resolve(&self, offset: u32) -> Result<ResolvedCell<'_>> {
        resolve_cell(self.buffer(), offset)
    }

    /// Iterates over the hbin chain following the base block.
    pub fn hbins(&self) -> impl Iterator<Item = Result<HbinBlock<'_>>> {
        iter_hbins(&self.buffer()[BASE_BLOCK_SIZE..])
    }

    /// Cell offset of the root key node.
    pub fn root_offset(&self) -> u32 {
        self.base_block.root_cell_offset
    }

    /// Exports the hive image as an owned byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buffer().to_vec()
    }

    /// Writes the current image to `output_path`, recomputing the
    /// checksum first.
    pub fn save<P: AsRef<Path>>(&self, output_path: P) -> Result<()> {
        let mut bytes = self.to_bytes();
        Self::update_checksum(&mut bytes)?;
        let mut file = File::create(output_path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    /// Recomputes and writes the base-block checksum in place.
    pub(crate) fn update_checksum(data: &mut [u8]) -> Result<()> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }
        let checksum = calculate_checksum(data);
        data[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::REGF_SIGNATURE;

    fn minimal_hive_bytes() -> Vec<u8> {
        let mut data = vec![0u8; BASE_BLOCK_SIZE];
        data[0..4].copy_from_slice(REGF_SIGNATURE);
        data[0x04..0x08].copy_from_slice(&1u32.to_le_bytes());
        data[0x08..0x0C].copy_from_slice(&1u32.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
        data[0x24..0x28].copy_from_slice(&0u32.to_le_bytes());
        let checksum = calculate_checksum(&data);
        data[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
        data
    }

    #[test]
    fn opens_minimal_hive_from_vec() {
        let bytes = minimal_hive_bytes();
        let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
        assert_eq!(hive.root_offset(), 0);
    }

    #[test]
    fn strict_mode_rejects_broken_bin_chain() {
        let mut bytes = minimal_hive_bytes();
        bytes.extend_from_slice(b"XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX");
        let err = Hive::from_vec(bytes, OpenOptions::strict()).unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt(_)));
    }

    #[test]
    fn tolerant_mode_still_rejects_broken_bin_chain() {
        // The bin chain is structural: a corrupt HBIN signature leaves no
        // way to find any cell at all, so even tolerant mode fails Open.
        let mut bytes = minimal_hive_bytes();
        bytes.extend_from_slice(b"XXXXXXXXXXXXXXXXXXXXXXXXXXXXXXXX");
        let err = Hive::from_vec(bytes, OpenOptions::default()).unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt(_)));
    }

    #[test]
    fn strict_mode_rejects_sequence_mismatch() {
        let mut bytes = minimal_hive_bytes();
        bytes[0x08..0x0C].copy_from_slice(&2u32.to_le_bytes());
        let checksum = calculate_checksum(&bytes);
        bytes[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
        let err = Hive::from_vec(bytes, OpenOptions::strict()).unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt(_)));
    }

    #[test]
    fn tolerant_mode_accepts_sequence_mismatch() {
        let mut bytes = minimal_hive_bytes();
        bytes[0x08..0x0C].copy_from_slice(&2u32.to_le_bytes());
        let checksum = calculate_checksum(&bytes);
        bytes[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
        let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();
        assert!(!hive.base_block().is_consistent());
    }

    #[test]
    fn strict_mode_rejects_unreachable_root() {
        // Root offset points past the end of the (bin-less) buffer.
        let mut bytes = minimal_hive_bytes();
        bytes[0x24..0x28].copy_from_slice(&0x1000u32.to_le_bytes());
        let checksum = calculate_checksum(&bytes);
        bytes[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
        let err = Hive::from_vec(bytes, OpenOptions::strict()).unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt(_)));
    }

    #[test]
    fn rejects_non_primary_file_type() {
        let mut bytes = minimal_hive_bytes();
        bytes[0x1C..0x20].copy_from_slice(&1u32.to_le_bytes());
        let checksum = calculate_checksum(&bytes);
        bytes[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
        let err = Hive::from_vec(bytes, OpenOptions::default()).unwrap_err();
        assert!(matches!(err, RegistryError::Unsupported(_)));
    }

    #[test]
    fn read_only_hive_reports_readonly_option() {
        let bytes = minimal_hive_bytes();
        let hive = Hive::from_vec(bytes, OpenOptions::read_only()).unwrap();
        assert!(hive.options().readonly);
    }
}
