//! Structural diagnostics: scanning a hive for faults and rendering a
//! report in several formats.
//!
//! The scan walks the bin chain and the key/value tree the same way
//! [`crate::reader::Reader`] does, but in tolerant mode throughout,
//! recording every recoverable fault as a [`Diagnostic`] instead of
//! stopping at the first one.

use crate::bigdata::{parse_segment_offsets, BigDataBlock, MAX_DIRECT_DATA_SIZE};
use crate::cancel::CancelToken;
use crate::cellref::is_null_ref;
use crate::error::{RegistryError, Result};
use crate::hbin::HBIN_HEADER_SIZE;
use crate::hive::Hive;
use crate::limits::Limits;
use crate::lists::SubkeyList;
use crate::reader::{NodeId, Reader};
use crate::utils::upper_case;
use crate::value::ValueKey;
use std::collections::HashSet;
use std::fmt::Write as _;

/// Above this many free cells in a hive, fragmentation is reported as a
/// performance finding (no existing limit governs this; chosen as a
/// round number well past what a freshly compacted hive accumulates from
/// ordinary editing).
const FRAGMENTATION_FREE_CELL_THRESHOLD: usize = 16;

/// Severity of a diagnostic finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; no action needed.
    Info,
    /// Worth noting but does not affect correctness (e.g. unclean shutdown).
    Warning,
    /// A structural fault that was worked around in tolerant mode.
    Error,
    /// A fault severe enough that the affected subtree could not be read.
    Critical,
}

/// Broad category a diagnostic falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Bin chain, cell framing, or record-shape faults.
    Structure,
    /// Value data that does not match its declared type or length.
    Data,
    /// Cross-reference faults: dangling offsets, broken rings, cycles.
    Integrity,
    /// Not incorrect, but unusually shaped (huge fan-out, deep nesting).
    Performance,
}

/// A suggested fix for a diagnostic, surfaced for the repair engine or a
/// human reviewer to act on.
#[derive(Debug, Clone)]
pub struct RepairAction {
    /// What kind of fix this is.
    pub action_type: RepairActionType,
    /// Human-readable description of what the fix would do.
    pub description: String,
    /// Confidence this fix is correct, from 0.0 (guess) to 1.0 (certain).
    pub confidence: f32,
    /// Risk of data loss from applying this fix, from 0.0 to 1.0.
    pub risk: f32,
    /// Whether [`crate::repair::RepairEngine`] will apply this
    /// automatically under its default policy.
    pub auto_apply: bool,
}

/// The kind of change a [`RepairAction`] makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairActionType {
    /// Truncate a list or value to a safe, in-bounds length.
    Truncate,
    /// Rebuild a derived structure (e.g. recompute an `lh` hash).
    Rebuild,
    /// Remove the offending record entirely.
    Remove,
    /// Replace the offending bytes with a benign placeholder.
    Replace,
    /// Reset a field to its type's default value.
    Default,
}

/// A single diagnostic finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// How serious this finding is.
    pub severity: Severity,
    /// What kind of fault this is.
    pub category: Category,
    /// Record type or structural element the fault was found in
    /// (`"hbin"`, `"nk"`, `"vk"`, `"lh"`, ...).
    pub structure_tag: String,
    /// Cell offset the fault was found at, when applicable.
    pub offset: Option<u32>,
    /// Human-readable message describing the fault.
    pub message: String,
    /// A suggested fix, if one is known.
    pub repair: Option<RepairAction>,
}

/// Output format for [`DiagnosticReport::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    /// One line per field, grouped per finding (default `Display`-style).
    Structured,
    /// A prose sentence per finding, suited to a terminal.
    HumanReadable,
    /// `severity:category:tag:offset:message`, one finding per line.
    Compact,
    /// RFC 4180 CSV with a header row.
    Csv,
}

/// The result of scanning a hive: every [`Diagnostic`] found, in the
/// order they were encountered during the walk.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    /// All findings from the scan.
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReport {
    /// Returns true if no findings at `Error` severity or above were
    /// recorded.
    pub fn is_healthy(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|d| d.severity >= Severity::Error)
    }

    /// Counts findings at or above `severity`.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity >= severity).count()
    }

    /// Returns the findings the repair engine's default policy would
    /// apply automatically.
    pub fn get_auto_repairable(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.repair.as_ref().map_or(false, |r| r.auto_apply))
            .collect()
    }

    /// Returns the findings carrying a suggested repair whose risk does
    /// not exceed `max`. Findings with no suggested repair are excluded.
    pub fn get_by_max_risk(&self, max: f32) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.repair.as_ref().map_or(false, |r| r.risk <= max))
            .collect()
    }

    /// Renders the report in the requested format.
    pub fn render(&self, format: RenderFormat) -> String {
        match format {
            RenderFormat::Structured => self.render_structured(),
            RenderFormat::HumanReadable => self.render_human(),
            RenderFormat::Compact => self.render_compact(),
            RenderFormat::Csv => self.render_csv(),
        }
    }

    fn render_structured(&self) -> String {
        let mut out = String::new();
        for (i, d) in self.diagnostics.iter().enumerate() {
            let _ = writeln!(out, "[{}]", i);
            let _ = writeln!(out, "  severity: {:?}", d.severity);
            let _ = writeln!(out, "  category: {:?}", d.category);
            let _ = writeln!(out, "  structure: {}", d.structure_tag);
            if let Some(offset) = d.offset {
                let _ = writeln!(out, "  offset: {:#x}", offset);
            }
            let _ = writeln!(out, "  message: {}", d.message);
            if let Some(repair) = &d.repair {
                let _ = writeln!(
                    out,
                    "  repair: {:?} ({}), confidence={:.2}, risk={:.2}, auto_apply={}",
                    repair.action_type, repair.description, repair.confidence, repair.risk, repair.auto_apply
                );
            }
        }
        out
    }

    fn render_human(&self) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            let location = match d.offset {
                Some(o) => format!(" at {:#x}", o),
                None => String::new(),
            };
            let _ = writeln!(
                out,
                "{:?}: {} ({}{}): {}",
                d.severity, d.structure_tag, format!("{:?}", d.category), location, d.message
            );
        }
        out
    }

    fn render_compact(&self) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            let offset = d.offset.map(|o| format!("{:#x}", o)).unwrap_or_default();
            let _ = writeln!(
                out,
                "{:?}:{:?}:{}:{}:{}",
                d.severity, d.category, d.structure_tag, offset, d.message
            );
        }
        out
    }

    fn render_csv(&self) -> String {
        let mut out = String::from("severity,category,structure_tag,offset,message\n");
        for d in &self.diagnostics {
            let offset = d.offset.map(|o| format!("{:#x}", o)).unwrap_or_default();
            let message = d.message.replace(',', ";");
            let _ = writeln!(
                out,
                "{:?},{:?},{},{},{}",
                d.severity, d.category, d.structure_tag, offset, message
            );
        }
        out
    }
}

/// Scans a hive for structural, data, integrity, and performance
/// diagnostics. Always runs in tolerant mode internally regardless of how
/// the hive itself was opened, so one unreachable subtree does not stop
/// the rest of the scan.
pub struct Diagnostics<'h> {
    hive: &'h Hive,
    reader: Reader<'h>,
    limits: Limits,
}

impl<'h> Diagnostics<'h> {
    /// Creates a scanner for `hive`, checking tree shape against `limits`.
    pub fn new(hive: &'h Hive, limits: Limits) -> Self {
        Diagnostics {
            hive,
            reader: Reader::new(hive),
            limits,
        }
    }

    /// Runs a full scan and returns the accumulated report.
    pub fn scan(&self) -> DiagnosticReport {
        match self.scan_impl(None) {
            Ok(report) => report,
            Err(_) => DiagnosticReport::default(),
        }
    }

    /// Like [`scan`](Self::scan), but checked against a [`CancelToken`]
    /// at every key visited. Fails with [`RegistryError::Cancelled`] as
    /// soon as the token is observed cancelled, discarding the partial
    /// report built so far.
    pub fn scan_cancelable(&self, cancel: &CancelToken) -> Result<DiagnosticReport> {
        self.scan_impl(Some(cancel))
    }

    fn scan_impl(&self, cancel: Option<&CancelToken>) -> Result<DiagnosticReport> {
        let mut report = DiagnosticReport::default();

        let base = self.hive.base_block();
        if !base.is_consistent() {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: Category::Integrity,
                structure_tag: "regf".to_string(),
                offset: Some(0),
                message: "primary and secondary sequence numbers differ; hive was not closed cleanly".to_string(),
                repair: Some(RepairAction {
                    action_type: RepairActionType::Rebuild,
                    description: "set both sequence numbers to max(primary, secondary) + 1".to_string(),
                    confidence: 0.9,
                    risk: 0.0,
                    auto_apply: true,
                }),
            });
        }

        for result in self.hive.hbins() {
            if let Err(e) = result {
                report.diagnostics.push(diagnostic_from_bin_error(&e));
            }
        }

        let mut reachable = HashSet::new();
        if let Ok(root) = self.reader.root() {
            let mut visited = HashSet::new();
            self.scan_subtree(root, 0, &mut visited, &mut reachable, &mut report, cancel)?;
        }

        self.scan_allocation(&reachable, &mut report);

        Ok(report)
    }

    /// Walks every hbin's cell stream (allocated and free alike) and
    /// reports allocated cells that [`scan_subtree`](Self::scan_subtree)
    /// never marked reachable, plus a fragmentation finding when free
    /// space is split across many small cells.
    fn scan_allocation(&self, reachable: &HashSet<u32>, report: &mut DiagnosticReport) {
        let mut free_cells = 0usize;
        let mut free_bytes = 0u64;

        for bin in self.hive.hbins() {
            let bin = match bin {
                Ok(b) => b,
                Err(_) => continue,
            };
            let bin_end = bin.header.offset + bin.header.size;
            let mut relative = bin.header.offset + HBIN_HEADER_SIZE as u32;

            while relative < bin_end {
                let cell = match self.hive.resolve(relative) {
                    Ok(c) => c,
                    Err(_) => break,
                };

                if cell.is_allocated {
                    if !reachable.contains(&relative) {
                        report.diagnostics.push(Diagnostic {
                            severity: Severity::Info,
                            category: Category::Integrity,
                            structure_tag: "cell".to_string(),
                            offset: Some(relative),
                            message: "allocated cell is not reachable from any key, value, or list".to_string(),
                            repair: Some(RepairAction {
                                action_type: RepairActionType::Remove,
                                description: "drop the orphaned cell the next time the hive is repacked".to_string(),
                                confidence: 0.6,
                                risk: 0.1,
                                auto_apply: false,
                            }),
                        });
                    }
                } else {
                    free_cells += 1;
                    free_bytes += cell.size as u64;
                }

                relative += cell.size;
            }
        }

        if free_cells > FRAGMENTATION_FREE_CELL_THRESHOLD {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Info,
                category: Category::Performance,
                structure_tag: "hbin".to_string(),
                offset: None,
                message: format!(
                    "free space is split across {} free cells totaling {} bytes; repacking would coalesce it",
                    free_cells, free_bytes
                ),
                repair: Some(RepairAction {
                    action_type: RepairActionType::Rebuild,
                    description: "repack with WriteOptions { repack: true } to coalesce free space".to_string(),
                    confidence: 0.9,
                    risk: 0.0,
                    auto_apply: false,
                }),
            });
        }
    }

    /// Marks `list_offset` (and, for an `ri` index root, every sublist it
    /// fans out to) reachable. A subkey list cell referenced by more than
    /// one parent would be double-marked harmlessly; the `insert` guard
    /// only exists to stop runaway recursion on a cyclic `ri` chain.
    fn mark_list_reachable(&self, list_offset: u32, reachable: &mut HashSet<u32>) {
        if is_null_ref(list_offset) || !reachable.insert(list_offset) {
            return;
        }
        let data = match self.hive.read_cell(list_offset) {
            Ok(d) => d,
            Err(_) => return,
        };
        let list = match SubkeyList::parse(data, list_offset) {
            Ok(l) => l,
            Err(_) => return,
        };
        if list.is_index_root() {
            for sublist_offset in list.key_offsets_iter() {
                self.mark_list_reachable(sublist_offset, reachable);
            }
        }
    }

    /// Marks a value's data cell(s) reachable: the single direct cell,
    /// or the `db` header, its segment-list cell, and every segment cell
    /// for big data. Inline data occupies no cell of its own.
    fn mark_value_data_reachable(&self, vk: &ValueKey, reachable: &mut HashSet<u32>) {
        if vk.is_inline_data() || vk.data_length == 0 || is_null_ref(vk.data_offset) {
            return;
        }
        reachable.insert(vk.data_offset);
        if vk.data_length <= MAX_DIRECT_DATA_SIZE {
            return;
        }
        let Ok(header_payload) = self.hive.read_cell(vk.data_offset) else {
            return;
        };
        let Ok(block) = BigDataBlock::parse(header_payload, vk.data_offset) else {
            return;
        };
        if is_null_ref(block.segment_list_offset) {
            return;
        }
        reachable.insert(block.segment_list_offset);
        let Ok(segment_list_payload) = self.hive.read_cell(block.segment_list_offset) else {
            return;
        };
        if let Ok(segments) =
            parse_segment_offsets(segment_list_payload, block.segment_count, block.segment_list_offset)
        {
            for segment_offset in segments {
                if !is_null_ref(segment_offset) {
                    reachable.insert(segment_offset);
                }
            }
        }
    }

    fn scan_subtree(
        &self,
        id: NodeId,
        depth: u32,
        visited: &mut HashSet<u32>,
        reachable: &mut HashSet<u32>,
        report: &mut DiagnosticReport,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        if let Some(token) = cancel {
            token.check()?;
        }
        reachable.insert(id.0);
        if !visited.insert(id.0) {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Critical,
                category: Category::Integrity,
                structure_tag: "nk".to_string(),
                offset: Some(id.0),
                message: "cycle detected in subkey tree".to_string(),
                repair: Some(RepairAction {
                    action_type: RepairActionType::Remove,
                    description: "drop the back-reference that closes the cycle".to_string(),
                    confidence: 0.6,
                    risk: 0.5,
                    auto_apply: false,
                }),
            });
            return Ok(());
        }

        if depth > self.limits.max_tree_depth {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: Category::Performance,
                structure_tag: "nk".to_string(),
                offset: Some(id.0),
                message: format!("tree depth {} exceeds configured limit {}", depth, self.limits.max_tree_depth),
                repair: None,
            });
            return Ok(());
        }

        let key_node = match self.reader.key_node(id) {
            Ok(k) => k,
            Err(e) => {
                report.diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: Category::Structure,
                    structure_tag: "nk".to_string(),
                    offset: Some(id.0),
                    message: format!("failed to parse key node: {}", e),
                    repair: Some(RepairAction {
                        action_type: RepairActionType::Remove,
                        description: "remove the unparsable key node from its parent's subkey list".to_string(),
                        confidence: 0.5,
                        risk: 0.8,
                        auto_apply: false,
                    }),
                });
                return Ok(());
            }
        };

        if !is_null_ref(key_node.security_offset) {
            // Ownership/ACL parsing is out of scope; the sk cell's
            // flink/blink ring is not followed, only marked reachable.
            reachable.insert(key_node.security_offset);
        }

        if key_node.subkey_count > self.limits.max_subkeys {
            report.diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: Category::Performance,
                structure_tag: "nk".to_string(),
                offset: Some(id.0),
                message: format!(
                    "key has {} subkeys, exceeding configured limit {}",
                    key_node.subkey_count, self.limits.max_subkeys
                ),
                repair: None,
            });
        }

        match self.reader.subkeys(id) {
            Ok(children) => {
                self.mark_list_reachable(key_node.subkey_list_offset, reachable);

                let mut seen_names = HashSet::new();
                for &child in &children {
                    if let Ok(name) = self.reader.name(child) {
                        if !seen_names.insert(upper_case(&name)) {
                            report.diagnostics.push(Diagnostic {
                                severity: Severity::Warning,
                                category: Category::Integrity,
                                structure_tag: "nk".to_string(),
                                offset: Some(child.0),
                                message: format!("duplicate subkey name \"{}\" under the same parent", name),
                                repair: Some(RepairAction {
                                    action_type: RepairActionType::Remove,
                                    description: "remove the duplicate subkey entry".to_string(),
                                    confidence: 0.4,
                                    risk: 0.7,
                                    auto_apply: false,
                                }),
                            });
                        }
                    }
                }

                for child in children {
                    self.scan_subtree(child, depth + 1, visited, reachable, report, cancel)?;
                }
            }
            Err(e) => report.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: Category::Structure,
                structure_tag: "lh".to_string(),
                offset: Some(key_node.subkey_list_offset),
                message: format!("failed to read subkey list: {}", e),
                repair: Some(RepairAction {
                    action_type: RepairActionType::Truncate,
                    description: "treat this key as having no subkeys".to_string(),
                    confidence: 0.5,
                    risk: 0.7,
                    auto_apply: false,
                }),
            }),
        }

        match self.reader.values(id) {
            Ok(values) => {
                if values.len() as u32 > self.limits.max_values {
                    report.diagnostics.push(Diagnostic {
                        severity: Severity::Warning,
                        category: Category::Performance,
                        structure_tag: "vk".to_string(),
                        offset: Some(id.0),
                        message: format!(
                            "key has {} values, exceeding configured limit {}",
                            values.len(),
                            self.limits.max_values
                        ),
                        repair: None,
                    });
                }
                if !is_null_ref(key_node.value_list_offset) {
                    reachable.insert(key_node.value_list_offset);
                }
                if let Ok(vk_offsets) = self.reader.value_offsets(id) {
                    reachable.extend(vk_offsets);
                }

                let mut seen_value_names = HashSet::new();
                for value in &values {
                    if let Ok(vk) = self.reader.value_key(*value) {
                        if !seen_value_names.insert(upper_case(&vk.name)) {
                            report.diagnostics.push(Diagnostic {
                                severity: Severity::Warning,
                                category: Category::Integrity,
                                structure_tag: "vk".to_string(),
                                offset: None,
                                message: format!("duplicate value name \"{}\" under the same key", vk.name),
                                repair: Some(RepairAction {
                                    action_type: RepairActionType::Remove,
                                    description: "remove the duplicate value entry".to_string(),
                                    confidence: 0.4,
                                    risk: 0.7,
                                    auto_apply: false,
                                }),
                            });
                        }
                    }
                }

                for value in values {
                    let vk = match self.reader.value_key(value) {
                        Ok(vk) => vk,
                        Err(e) => {
                            report.diagnostics.push(Diagnostic {
                                severity: Severity::Error,
                                category: Category::Structure,
                                structure_tag: "vk".to_string(),
                                offset: None,
                                message: format!("failed to parse value key: {}", e),
                                repair: Some(RepairAction {
                                    action_type: RepairActionType::Remove,
                                    description: "drop the unparsable value from its owning key".to_string(),
                                    confidence: 0.5,
                                    risk: 0.8,
                                    auto_apply: false,
                                }),
                            });
                            continue;
                        }
                    };
                    self.mark_value_data_reachable(&vk, reachable);
                    if let Err(e) = self.reader.value_data(value) {
                        report.diagnostics.push(Diagnostic {
                            severity: Severity::Warning,
                            category: Category::Data,
                            structure_tag: "vk".to_string(),
                            offset: None,
                            message: format!("value data does not match its declared type: {}", e),
                            repair: Some(RepairAction {
                                action_type: RepairActionType::Default,
                                description: "replace with the type's zero value".to_string(),
                                confidence: 0.4,
                                risk: 0.6,
                                auto_apply: false,
                            }),
                        });
                    }
                }
            }
            Err(e) => report.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: Category::Structure,
                structure_tag: "vk-list".to_string(),
                offset: Some(key_node.value_list_offset),
                message: format!("failed to read value list: {}", e),
                repair: Some(RepairAction {
                    action_type: RepairActionType::Truncate,
                    description: "treat this key as having no values".to_string(),
                    confidence: 0.5,
                    risk: 0.7,
                    auto_apply: false,
                }),
            }),
        }

        Ok(())
    }
}

fn diagnostic_from_bin_error(error: &RegistryError) -> Diagnostic {
    Diagnostic {
        severity: Severity::Critical,
        category: Category::Structure,
        structure_tag: "hbin".to_string(),
        offset: None,
        message: format!("bin chain fault: {}", error),
        repair: Some(RepairAction {
            action_type: RepairActionType::Truncate,
            description: "stop reading bins after the last known-good one".to_string(),
            confidence: 0.6,
            risk: 0.4,
            auto_apply: false,
        }),
    }
}
