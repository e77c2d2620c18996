//! Best-effort structural repair: rebuild a clean tree from everything in
//! a hive that parses, guided by the same fault categories
//! [`crate::diagnostics::Diagnostics`] reports.
//!
//! Every drop [`RepairEngine::repair`] makes is forced — there is no way
//! to keep a key node the crate cannot parse. [`RepairPolicy`] does not
//! choose *what* gets fixed, only whether the engine is allowed to go
//! through with it: a fix whose [`RepairAction`] falls outside the
//! policy's confidence/risk bounds aborts the whole repair with an error
//! naming the blocking diagnostic, rather than applying it anyway.

use crate::diagnostics::{Category, Diagnostic, Diagnostics, RepairAction, RepairActionType, Severity};
use crate::editor::{StagedValue, TreeNode, Tx};
use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::hive::Hive;
use crate::limits::Limits;
use crate::reader::{NodeId, Reader};
use std::collections::HashSet;

/// Governs which [`RepairAction`]s [`RepairEngine::repair`] is allowed to
/// apply. An action always passes if `auto_apply` is set; otherwise its
/// `confidence` and `risk` must clear the configured bounds, unless
/// `auto_only` narrows that to `auto_apply` fixes alone.
#[derive(Debug, Clone, Copy)]
pub struct RepairPolicy {
    /// Minimum confidence required for a non-automatic action to apply.
    pub min_confidence: f32,
    /// Maximum risk tolerated for a non-automatic action to apply.
    pub max_risk: f32,
    /// When `true`, [`RepairEngine::repair`] computes `applied`/`skipped`
    /// exactly as it would otherwise, but returns an empty image instead
    /// of committing one — a preview of what a real repair would do.
    pub dry_run: bool,
    /// When `true`, only actions marked `auto_apply` are allowed through,
    /// regardless of `min_confidence`/`max_risk`.
    pub auto_only: bool,
    /// Caller's declaration that no backup of the original image will be
    /// made before this repair runs. File-level backup plumbing is out of
    /// this crate's scope, so this flag is carried through for callers to
    /// read back but has no effect on the engine itself.
    pub no_backup: bool,
}

impl RepairPolicy {
    /// Only actions marked `auto_apply` (safe, non-destructive fixes) go
    /// through. Everything else blocks the repair.
    pub fn conservative() -> Self {
        RepairPolicy {
            min_confidence: f32::INFINITY,
            max_risk: f32::NEG_INFINITY,
            dry_run: false,
            auto_only: false,
            no_backup: false,
        }
    }

    /// Accepts the data-loss fixes this crate knows how to describe
    /// (dropping unparsable records, truncating broken lists).
    pub fn permissive() -> Self {
        RepairPolicy {
            min_confidence: 0.4,
            max_risk: 0.9,
            dry_run: false,
            auto_only: false,
            no_backup: false,
        }
    }

    /// Returns whether `action` clears this policy's bounds.
    pub fn allows(&self, action: &RepairAction) -> bool {
        if self.auto_only {
            return action.auto_apply;
        }
        action.auto_apply || (action.confidence >= self.min_confidence && action.risk <= self.max_risk)
    }
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self::conservative()
    }
}

/// Result of a successful [`RepairEngine::repair`] call.
#[derive(Debug)]
pub struct RepairOutcome {
    /// The rebuilt hive image.
    pub image: Vec<u8>,
    /// Fixes that were applied, with the diagnostic they addressed.
    pub applied: Vec<Diagnostic>,
    /// Non-blocking fixes that were available but declined by policy
    /// (value-data type mismatches only; structural faults either apply
    /// or abort the repair, they never silently no-op).
    pub skipped: Vec<Diagnostic>,
}

/// Rebuilds a hive's tree from everything that parses, dropping what
/// does not under caller-controlled policy.
pub struct RepairEngine<'h> {
    hive: &'h Hive,
    reader: Reader<'h>,
    limits: Limits,
}

impl<'h> RepairEngine<'h> {
    /// Creates a repair engine for `hive`, checking tree shape against
    /// `limits` during the rebuild walk.
    pub fn new(hive: &'h Hive, limits: Limits) -> Self {
        RepairEngine {
            hive,
            reader: Reader::new(hive),
            limits,
        }
    }

    /// Scans the hive and returns the findings a repair would act on,
    /// without changing anything. Review this before calling
    /// [`RepairEngine::repair`] with a permissive policy.
    pub fn plan(&self) -> crate::diagnostics::DiagnosticReport {
        Diagnostics::new(self.hive, self.limits).scan()
    }

    /// Rebuilds the hive's tree, applying fixes `policy` allows. Returns
    /// an error naming the blocking diagnostic if a forced fix (dropping
    /// an unparsable record, truncating a broken list) falls outside
    /// `policy`'s bounds.
    pub fn repair(&self, policy: &RepairPolicy) -> Result<RepairOutcome> {
        let mut applied = Vec::new();
        let mut skipped = Vec::new();
        let mut visited = HashSet::new();

        let root_id = self.reader.root()?;
        let root = self
            .rebuild_node(root_id, 0, &mut visited, policy, &mut applied, &mut skipped)?
            .unwrap_or_else(|| TreeNode {
                name: String::new(),
                values: Vec::new(),
                children: Vec::new(),
            });

        let base = self.hive.base_block();
        if !base.is_consistent() {
            let action = sequence_repair_action();
            let diagnostic = Diagnostic {
                severity: Severity::Warning,
                category: Category::Integrity,
                structure_tag: "regf".to_string(),
                offset: Some(0),
                message: "primary and secondary sequence numbers differ; hive was not closed cleanly".to_string(),
                repair: Some(action.clone()),
            };
            if policy.allows(&action) {
                applied.push(diagnostic);
            } else {
                skipped.push(diagnostic);
            }
        }

        if policy.dry_run {
            return Ok(RepairOutcome {
                image: Vec::new(),
                applied,
                skipped,
            });
        }

        let tx = Tx::from_parts(root, base.clone());
        let image = tx.commit(self.limits)?;

        Ok(RepairOutcome { image, applied, skipped })
    }

    fn rebuild_node(
        &self,
        id: NodeId,
        depth: u32,
        visited: &mut HashSet<u32>,
        policy: &RepairPolicy,
        applied: &mut Vec<Diagnostic>,
        skipped: &mut Vec<Diagnostic>,
    ) -> Result<Option<TreeNode>> {
        if !visited.insert(id.0) {
            let action = RepairAction {
                action_type: RepairActionType::Remove,
                description: "drop the back-reference that closes the cycle".to_string(),
                confidence: 0.6,
                risk: 0.5,
                auto_apply: false,
            };
            let diagnostic = Diagnostic {
                severity: Severity::Critical,
                category: Category::Integrity,
                structure_tag: "nk".to_string(),
                offset: Some(id.0),
                message: "cycle detected in subkey tree".to_string(),
                repair: Some(action.clone()),
            };
            return self.apply_or_abort(policy, action, diagnostic, applied).map(|()| None);
        }

        let key_node = match self.reader.key_node(id) {
            Ok(k) => k,
            Err(e) => {
                let action = RepairAction {
                    action_type: RepairActionType::Remove,
                    description: "remove the unparsable key node from its parent's subkey list".to_string(),
                    confidence: 0.5,
                    risk: 0.8,
                    auto_apply: false,
                };
                let diagnostic = Diagnostic {
                    severity: Severity::Error,
                    category: Category::Structure,
                    structure_tag: "nk".to_string(),
                    offset: Some(id.0),
                    message: format!("failed to parse key node: {}", e),
                    repair: Some(action.clone()),
                };
                return self.apply_or_abort(policy, action, diagnostic, applied).map(|()| None);
            }
        };

        if depth > self.limits.max_tree_depth {
            return Ok(Some(TreeNode {
                name: key_node.name,
                values: Vec::new(),
                children: Vec::new(),
            }));
        }

        let mut values = Vec::new();
        match self.reader.values(id) {
            Ok(value_ids) => {
                for value_id in value_ids {
                    let vk = match self.reader.value_key(value_id) {
                        Ok(vk) => vk,
                        Err(e) => {
                            let action = RepairAction {
                                action_type: RepairActionType::Remove,
                                description: "drop the unparsable value from its owning key".to_string(),
                                confidence: 0.5,
                                risk: 0.8,
                                auto_apply: false,
                            };
                            let diagnostic = Diagnostic {
                                severity: Severity::Error,
                                category: Category::Structure,
                                structure_tag: "vk".to_string(),
                                offset: None,
                                message: format!("failed to parse value key: {}", e),
                                repair: Some(action.clone()),
                            };
                            self.apply_or_abort(policy, action, diagnostic, applied)?;
                            continue;
                        }
                    };

                    let data = match self.reader.value_raw_data(value_id) {
                        Ok(data) => data,
                        Err(_) => Vec::new(),
                    };

                    let data = if self.reader.value_data(value_id).is_err() {
                        let action = RepairAction {
                            action_type: RepairActionType::Default,
                            description: "replace with the type's zero value".to_string(),
                            confidence: 0.4,
                            risk: 0.6,
                            auto_apply: false,
                        };
                        let diagnostic = Diagnostic {
                            severity: Severity::Warning,
                            category: Category::Data,
                            structure_tag: "vk".to_string(),
                            offset: None,
                            message: "value data does not match its declared type".to_string(),
                            repair: Some(action.clone()),
                        };
                        if policy.allows(&action) {
                            applied.push(diagnostic);
                            default_bytes_for(vk.data_type)
                        } else {
                            skipped.push(diagnostic);
                            data
                        }
                    } else {
                        data
                    };

                    values.push(StagedValue {
                        name: vk.name,
                        value_type: vk.data_type,
                        data,
                    });
                }
            }
            Err(e) => {
                let action = RepairAction {
                    action_type: RepairActionType::Truncate,
                    description: "treat this key as having no values".to_string(),
                    confidence: 0.5,
                    risk: 0.7,
                    auto_apply: false,
                };
                let diagnostic = Diagnostic {
                    severity: Severity::Error,
                    category: Category::Structure,
                    structure_tag: "vk-list".to_string(),
                    offset: Some(key_node.value_list_offset),
                    message: format!("failed to read value list: {}", e),
                    repair: Some(action.clone()),
                };
                self.apply_or_abort(policy, action, diagnostic, applied)?;
            }
        }

        let mut children = Vec::new();
        match self.reader.subkeys(id) {
            Ok(child_ids) => {
                for child_id in child_ids {
                    if let Some(child) = self.rebuild_node(child_id, depth + 1, visited, policy, applied, skipped)? {
                        children.push(child);
                    }
                }
            }
            Err(e) => {
                let action = RepairAction {
                    action_type: RepairActionType::Truncate,
                    description: "treat this key as having no subkeys".to_string(),
                    confidence: 0.5,
                    risk: 0.7,
                    auto_apply: false,
                };
                let diagnostic = Diagnostic {
                    severity: Severity::Error,
                    category: Category::Structure,
                    structure_tag: "lh".to_string(),
                    offset: Some(key_node.subkey_list_offset),
                    message: format!("failed to read subkey list: {}", e),
                    repair: Some(action.clone()),
                };
                self.apply_or_abort(policy, action, diagnostic, applied)?;
            }
        }

        Ok(Some(TreeNode {
            name: key_node.name,
            values,
            children,
        }))
    }

    /// Applies `action` if `policy` allows it, recording `diagnostic` in
    /// `applied`; otherwise returns an error naming the blocking
    /// diagnostic and leaves the repair unfinished.
    fn apply_or_abort(
        &self,
        policy: &RepairPolicy,
        action: RepairAction,
        diagnostic: Diagnostic,
        applied: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        if policy.allows(&action) {
            applied.push(diagnostic);
            Ok(())
        } else {
            Err(RegistryError::State(format!(
                "repair blocked by policy: {} (confidence {:.2}, risk {:.2})",
                diagnostic.message, action.confidence, action.risk
            )))
        }
    }
}

fn sequence_repair_action() -> RepairAction {
    RepairAction {
        action_type: RepairActionType::Rebuild,
        description: "set both sequence numbers to max(primary, secondary) + 1".to_string(),
        confidence: 0.9,
        risk: 0.0,
        auto_apply: true,
    }
}

fn default_bytes_for(value_type: ValueType) -> Vec<u8> {
    match value_type {
        ValueType::None | ValueType::Binary => Vec::new(),
        ValueType::String | ValueType::ExpandString | ValueType::Link | ValueType::MultiString => vec![0, 0],
        ValueType::Dword => 0u32.to_le_bytes().to_vec(),
        ValueType::DwordBigEndian => 0u32.to_be_bytes().to_vec(),
        ValueType::Qword => 0u64.to_le_bytes().to_vec(),
        ValueType::ResourceList
        | ValueType::FullResourceDescriptor
        | ValueType::ResourceRequirementsList
        | ValueType::Unknown(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::OpenOptions;

    fn hive_with_child(name: &str) -> Hive {
        let mut tx = Tx::from_parts(
            TreeNode {
                name: String::new(),
                values: Vec::new(),
                children: Vec::new(),
            },
            crate::header::BaseBlock::fresh(""),
        );
        tx.create_key(name).unwrap();
        let bytes = tx.commit(Limits::default()).unwrap();
        Hive::from_vec(bytes, OpenOptions::default()).unwrap()
    }

    /// Flips the signature of the first `nk` cell found in `bytes`, which
    /// (since children are serialized before their parent) is always the
    /// deepest-first child when there is exactly one of them.
    fn corrupt_first_nk_signature(bytes: &mut [u8]) {
        let pos = bytes
            .windows(2)
            .position(|w| w == b"nk")
            .expect("no nk cell found");
        bytes[pos] = b'X';
        bytes[pos + 1] = b'X';
    }

    #[test]
    fn plan_reports_clean_hive_as_healthy() {
        let hive = hive_with_child("Software");
        let engine = RepairEngine::new(&hive, Limits::default());
        let report = engine.plan();
        assert!(report.is_healthy());
    }

    #[test]
    fn conservative_aborts_on_unparsable_key_node() {
        let hive = hive_with_child("Software");
        let mut corrupted = hive.buffer().to_vec();
        corrupt_first_nk_signature(&mut corrupted);
        let corrupted = Hive::from_vec(corrupted, OpenOptions::default()).unwrap();

        let engine = RepairEngine::new(&corrupted, Limits::default());
        let err = engine.repair(&RepairPolicy::conservative()).unwrap_err();
        assert!(matches!(err, RegistryError::State(_)));
    }

    #[test]
    fn permissive_drops_unparsable_key_node_and_commits() {
        let hive = hive_with_child("Software");
        let mut corrupted = hive.buffer().to_vec();
        corrupt_first_nk_signature(&mut corrupted);
        let corrupted = Hive::from_vec(corrupted, OpenOptions::default()).unwrap();

        let engine = RepairEngine::new(&corrupted, Limits::default());
        let outcome = engine.repair(&RepairPolicy::permissive()).unwrap();
        assert!(!outcome.applied.is_empty());

        let rebuilt = Hive::from_vec(outcome.image, OpenOptions::default()).unwrap();
        let reader = Reader::new(&rebuilt);
        let root = reader.root().unwrap();
        assert!(reader.subkeys(root).unwrap().is_empty());
    }

    #[test]
    fn permissive_replaces_type_mismatched_value_with_default_bytes() {
        let mut tx = Tx::from_parts(
            TreeNode {
                name: String::new(),
                values: Vec::new(),
                children: Vec::new(),
            },
            crate::header::BaseBlock::fresh(""),
        );
        tx.create_key("X").unwrap();
        tx.set_value("X", "V", ValueType::Dword, vec![0x11, 0x22]).unwrap();
        let bytes = tx.commit(Limits::default()).unwrap();
        let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();

        let engine = RepairEngine::new(&hive, Limits::default());
        let outcome = engine.repair(&RepairPolicy::permissive()).unwrap();
        assert!(outcome.applied.iter().any(|d| d.category == Category::Data));

        let rebuilt = Hive::from_vec(outcome.image, OpenOptions::default()).unwrap();
        let reader = Reader::new(&rebuilt);
        let root = reader.root().unwrap();
        let key = reader.lookup(root, "X").unwrap();
        let value = reader.get_value(key, "V").unwrap();
        assert_eq!(reader.value_raw_data(value).unwrap(), 0u32.to_le_bytes().to_vec());
    }

    #[test]
    fn conservative_skips_type_mismatch_and_preserves_raw_bytes() {
        let mut tx = Tx::from_parts(
            TreeNode {
                name: String::new(),
                values: Vec::new(),
                children: Vec::new(),
            },
            crate::header::BaseBlock::fresh(""),
        );
        tx.create_key("X").unwrap();
        tx.set_value("X", "V", ValueType::Dword, vec![0x11, 0x22]).unwrap();
        let bytes = tx.commit(Limits::default()).unwrap();
        let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();

        let engine = RepairEngine::new(&hive, Limits::default());
        let outcome = engine.repair(&RepairPolicy::conservative()).unwrap();
        assert!(outcome.skipped.iter().any(|d| d.category == Category::Data));

        let rebuilt = Hive::from_vec(outcome.image, OpenOptions::default()).unwrap();
        let reader = Reader::new(&rebuilt);
        let root = reader.root().unwrap();
        let key = reader.lookup(root, "X").unwrap();
        let value = reader.get_value(key, "V").unwrap();
        assert_eq!(reader.value_raw_data(value).unwrap(), vec![0x11, 0x22]);
    }

    #[test]
    fn dry_run_computes_findings_but_returns_no_image() {
        let hive = hive_with_child("Software");
        let mut corrupted = hive.buffer().to_vec();
        corrupt_first_nk_signature(&mut corrupted);
        let corrupted = Hive::from_vec(corrupted, OpenOptions::default()).unwrap();

        let mut policy = RepairPolicy::permissive();
        policy.dry_run = true;
        let engine = RepairEngine::new(&corrupted, Limits::default());
        let outcome = engine.repair(&policy).unwrap();
        assert!(!outcome.applied.is_empty());
        assert!(outcome.image.is_empty());
    }

    #[test]
    fn auto_only_rejects_fixes_that_only_clear_confidence_and_risk_bounds() {
        let mut tx = Tx::from_parts(
            TreeNode {
                name: String::new(),
                values: Vec::new(),
                children: Vec::new(),
            },
            crate::header::BaseBlock::fresh(""),
        );
        tx.create_key("X").unwrap();
        tx.set_value("X", "V", ValueType::Dword, vec![0x11, 0x22]).unwrap();
        let bytes = tx.commit(Limits::default()).unwrap();
        let hive = Hive::from_vec(bytes, OpenOptions::default()).unwrap();

        let mut policy = RepairPolicy::permissive();
        policy.auto_only = true;
        let engine = RepairEngine::new(&hive, Limits::default());
        let outcome = engine.repair(&policy).unwrap();
        assert!(outcome.skipped.iter().any(|d| d.category == Category::Data));
    }
}
