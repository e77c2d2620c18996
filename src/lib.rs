//! # Offline Windows Registry hive toolkit
//!
//! Inspection, validation, editing, repair, and `.reg` text transcoding of
//! Windows NT registry hive files, entirely offline: every operation works
//! on a byte buffer (mapped or owned) and never touches a live registry.
//!
//! ## Layers
//!
//! - [`cellref`] resolves raw cell offsets against a buffer (C1).
//! - [`header`], [`hbin`], [`hive`] open a hive image and validate its
//!   base block and bin chain (C2).
//! - [`key`], [`value`], [`sk`], [`lists`], [`value_list`], [`bigdata`]
//!   parse the individual record types a hive is built from (C3).
//! - [`reader`] exposes the key/value tree as opaque [`reader::NodeId`]/
//!   [`reader::ValueId`] handles with name-based lookup (C4).
//! - [`diagnostics`] scans a hive for structural faults without mutating
//!   it (C5).
//! - [`repair`] rebuilds a clean tree from everything that parses (C6).
//! - [`editor`] stages key/value edits and commits them into a freshly
//!   built image (C7).
//! - [`regfile`] parses and emits `.reg` text (C8).
//! - [`diff`] compares two hive trees and drives `.reg`-based merges (C9).
//!
//! [`limits::Limits`] and [`hive::OpenOptions`] are the two pieces of
//! configuration threaded through the above; neither module keeps global
//! state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bigdata;
pub mod cancel;
pub mod cell;
pub mod cellref;
pub mod diagnostics;
pub mod diff;
pub mod editor;
pub mod error;
pub mod hbin;
pub mod header;
pub mod hive;
pub mod key;
pub mod limits;
pub mod lists;
pub mod reader;
pub mod regfile;
pub mod repair;
pub mod sk;
pub mod utils;
pub mod value;
pub mod value_list;

pub use cancel::CancelToken;
pub use cell::{CellType, KeyNodeFlags, ValueType};
pub use diagnostics::{Category, Diagnostic, DiagnosticReport, Diagnostics, RenderFormat, RepairAction, RepairActionType, Severity};
pub use diff::{diff_hives, merge_reg_bytes, merge_reg_file, DiffStatus, HiveDiff, KeyDiff, MergeOptions, MergeStats, ValueDiff};
pub use editor::{HiveWriter, StagedValue, TreeNode, Tx, WriteOptions};
pub use error::{RegistryError, Result};
pub use hbin::HbinHeader;
pub use header::BaseBlock;
pub use hive::{Hive, OpenOptions};
pub use key::KeyNode;
pub use limits::Limits;
pub use lists::{SubkeyList, SubkeyListEntry, SubkeyListType};
pub use reader::{NodeId, Reader, ValueId};
pub use regfile::{export_reg, export_reg_cancelable, parse_reg_bytes, parse_reg_file, parse_reg_str, EditOp, ExportOptions, ParseOptions, RegEncoding};
pub use repair::{RepairEngine, RepairOutcome, RepairPolicy};
pub use sk::SecurityDescriptor;
pub use value::{ValueData, ValueKey};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
