//! Structural diff between two hive trees, and `.reg`-driven merge
//! orchestration built on [`crate::editor::Tx`] and [`crate::regfile`].

use crate::cell::ValueType;
use crate::editor::Tx;
use crate::error::{RegistryError, Result};
use crate::hive::Hive;
use crate::limits::Limits;
use crate::reader::{NodeId, Reader};
use crate::regfile::{parse_reg_bytes, EditOp, ParseOptions};
use std::collections::BTreeMap;
use std::path::Path;

/// Whether a key or value is present in one image, the other, both
/// unchanged, or both but different.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// One value's comparison result under a [`KeyDiff`].
#[derive(Debug, Clone)]
pub struct ValueDiff {
    pub name: String,
    pub status: DiffStatus,
    pub old: Option<(ValueType, Vec<u8>)>,
    pub new: Option<(ValueType, Vec<u8>)>,
}

/// One key path's comparison result.
#[derive(Debug, Clone)]
pub struct KeyDiff {
    pub path: String,
    pub status: DiffStatus,
    pub values: Vec<ValueDiff>,
}

/// The full result of [`diff_hives`]: every key path present in either
/// image, in sorted order.
#[derive(Debug, Clone, Default)]
pub struct HiveDiff {
    pub keys: Vec<KeyDiff>,
}

type ValueMap = BTreeMap<String, (ValueType, Vec<u8>)>;

/// Compares every key path reachable from each hive's root and reports
/// what changed. A key is `Modified` if any value differs (type, length,
/// or bytes) or its last-write time differs; values carry their own
/// status so callers can tell *which* value changed.
pub fn diff_hives(old: &Hive, new: &Hive) -> Result<HiveDiff> {
    let old_reader = Reader::new(old);
    let new_reader = Reader::new(new);

    let mut old_tree = BTreeMap::new();
    let mut new_tree = BTreeMap::new();
    collect_tree(&old_reader, old_reader.root()?, "", &mut old_tree)?;
    collect_tree(&new_reader, new_reader.root()?, "", &mut new_tree)?;

    let mut paths: Vec<String> = old_tree.keys().chain(new_tree.keys()).cloned().collect();
    paths.sort();
    paths.dedup();

    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let old_entry = old_tree.get(&path);
        let new_entry = new_tree.get(&path);
        let (status, values) = diff_key(old_entry, new_entry);
        keys.push(KeyDiff { path, status, values });
    }
    Ok(HiveDiff { keys })
}

fn diff_key(
    old_entry: Option<&(u64, ValueMap)>,
    new_entry: Option<&(u64, ValueMap)>,
) -> (DiffStatus, Vec<ValueDiff>) {
    match (old_entry, new_entry) {
        (None, Some((_, new_values))) => {
            let values = new_values
                .iter()
                .map(|(name, v)| ValueDiff {
                    name: name.clone(),
                    status: DiffStatus::Added,
                    old: None,
                    new: Some(v.clone()),
                })
                .collect();
            (DiffStatus::Added, values)
        }
        (Some((_, old_values)), None) => {
            let values = old_values
                .iter()
                .map(|(name, v)| ValueDiff {
                    name: name.clone(),
                    status: DiffStatus::Removed,
                    old: Some(v.clone()),
                    new: None,
                })
                .collect();
            (DiffStatus::Removed, values)
        }
        (Some((old_lw, old_values)), Some((new_lw, new_values))) => {
            let mut modified = old_lw != new_lw;
            let mut names: Vec<&String> = old_values.keys().chain(new_values.keys()).collect();
            names.sort();
            names.dedup();

            let values = names
                .into_iter()
                .map(|name| {
                    let old_v = old_values.get(name);
                    let new_v = new_values.get(name);
                    let status = match (old_v, new_v) {
                        (None, Some(_)) => DiffStatus::Added,
                        (Some(_), None) => DiffStatus::Removed,
                        (Some(a), Some(b)) if a == b => DiffStatus::Unchanged,
                        (Some(_), Some(_)) => DiffStatus::Modified,
                        (None, None) => unreachable!("name drawn from the union of both maps"),
                    };
                    if status != DiffStatus::Unchanged {
                        modified = true;
                    }
                    ValueDiff {
                        name: name.clone(),
                        status,
                        old: old_v.cloned(),
                        new: new_v.cloned(),
                    }
                })
                .collect();

            let status = if modified { DiffStatus::Modified } else { DiffStatus::Unchanged };
            (status, values)
        }
        (None, None) => unreachable!("path drawn from the union of both trees"),
    }
}

fn collect_tree(reader: &Reader, id: NodeId, path: &str, out: &mut BTreeMap<String, (u64, ValueMap)>) -> Result<()> {
    let key_node = reader.key_node(id)?;

    let mut values = BTreeMap::new();
    for value_id in reader.values(id)? {
        let vk = reader.value_key(value_id)?;
        let data = reader.value_raw_data(value_id)?;
        values.insert(vk.name, (vk.data_type, data));
    }
    out.insert(path.to_string(), (key_node.last_written, values));

    for child_id in reader.subkeys(id)? {
        let name = reader.name(child_id)?;
        let child_path = if path.is_empty() { name } else { format!("{}\\{}", path, name) };
        collect_tree(reader, child_id, &child_path, out)?;
    }
    Ok(())
}

/// Tallies of what a merge did, matching the counters a caller needs to
/// report a summary without re-walking the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    pub keys_created: u64,
    pub keys_deleted: u64,
    pub values_set: u64,
    pub values_deleted: u64,
    pub operations_total: u64,
    pub operations_failed: u64,
    pub bytes_written: u64,
}

/// Options for [`merge_reg_bytes`]/[`merge_reg_file`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Parse and apply ops, validate against `limits`, but never commit.
    pub dry_run: bool,
    /// Limits the resulting image must satisfy.
    pub limits: Limits,
}

/// Reads, parses, and applies a `.reg` file's operations to `hive` inside
/// one transaction. `on_progress(i, n)` fires after each op; `on_error`
/// decides whether a failed op aborts the whole merge (`false`) or is
/// skipped and counted as failed (`true`).
pub fn merge_reg_file<P: AsRef<Path>>(
    hive: &Hive,
    reg_path: P,
    parse_opts: &ParseOptions,
    merge_opts: &MergeOptions,
    on_progress: impl FnMut(usize, usize),
    on_error: impl FnMut(&EditOp, &RegistryError) -> bool,
) -> Result<(MergeStats, Option<Vec<u8>>)> {
    let reg_path = reg_path.as_ref();
    let bytes = std::fs::read(reg_path)?;
    merge_reg_bytes(hive, &bytes, &reg_path.display().to_string(), parse_opts, merge_opts, on_progress, on_error)
}

/// Parses and applies `.reg` text already in memory. See
/// [`merge_reg_file`] for the callback contract.
pub fn merge_reg_bytes(
    hive: &Hive,
    reg_bytes: &[u8],
    source_name: &str,
    parse_opts: &ParseOptions,
    merge_opts: &MergeOptions,
    mut on_progress: impl FnMut(usize, usize),
    mut on_error: impl FnMut(&EditOp, &RegistryError) -> bool,
) -> Result<(MergeStats, Option<Vec<u8>>)> {
    let ops = parse_reg_bytes(reg_bytes, source_name, parse_opts)?;
    let mut tx = Tx::from_hive(hive)?;
    let mut stats = MergeStats::default();
    let total = ops.len();

    for (i, op) in ops.iter().enumerate() {
        stats.operations_total += 1;
        match apply_op(&mut tx, op) {
            Ok(()) => tally_success(&mut stats, op),
            Err(e) => {
                stats.operations_failed += 1;
                if !on_error(op, &e) {
                    return Err(e);
                }
            }
        }
        on_progress(i + 1, total);
    }

    if merge_opts.dry_run {
        tx.check_limits(&merge_opts.limits)?;
        return Ok((stats, None));
    }

    let image = tx.commit(merge_opts.limits)?;
    stats.bytes_written = image.len() as u64;
    Ok((stats, Some(image)))
}

fn apply_op(tx: &mut Tx, op: &EditOp) -> Result<()> {
    match op {
        EditOp::CreateKey { path } => tx.create_key(path),
        EditOp::DeleteKey { path, recursive } => tx.delete_key(path, *recursive),
        EditOp::SetValue { path, name, value_type, data } => tx.set_value(path, name, *value_type, data.clone()),
        EditOp::DeleteValue { path, name } => tx.delete_value(path, name),
    }
}

fn tally_success(stats: &mut MergeStats, op: &EditOp) {
    match op {
        EditOp::CreateKey { .. } => stats.keys_created += 1,
        EditOp::DeleteKey { .. } => stats.keys_deleted += 1,
        EditOp::SetValue { .. } => stats.values_set += 1,
        EditOp::DeleteValue { .. } => stats.values_deleted += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::TreeNode;
    use crate::hive::OpenOptions;

    fn empty_hive() -> Hive {
        let tx = Tx::from_parts(
            TreeNode { name: String::new(), values: Vec::new(), children: Vec::new() },
            crate::header::BaseBlock::fresh(""),
        );
        let bytes = tx.commit(Limits::default()).unwrap();
        Hive::from_vec(bytes, OpenOptions::default()).unwrap()
    }

    #[test]
    fn diff_reports_added_key_and_value() {
        let old = empty_hive();

        let mut tx = Tx::from_hive(&old).unwrap();
        tx.create_key("Software\\X").unwrap();
        tx.set_value("Software\\X", "V", ValueType::Dword, vec![1, 0, 0, 0]).unwrap();
        let new_bytes = tx.commit(Limits::default()).unwrap();
        let new = Hive::from_vec(new_bytes, OpenOptions::default()).unwrap();

        let diff = diff_hives(&old, &new).unwrap();
        let added = diff.keys.iter().find(|k| k.path == "Software\\X").unwrap();
        assert_eq!(added.status, DiffStatus::Added);
        assert_eq!(added.values[0].status, DiffStatus::Added);
    }

    #[test]
    fn diff_is_symmetric_for_added_vs_removed() {
        let old = empty_hive();
        let mut tx = Tx::from_hive(&old).unwrap();
        tx.create_key("A").unwrap();
        let new_bytes = tx.commit(Limits::default()).unwrap();
        let new = Hive::from_vec(new_bytes, OpenOptions::default()).unwrap();

        let forward = diff_hives(&old, &new).unwrap();
        let backward = diff_hives(&new, &old).unwrap();

        let forward_added: Vec<_> = forward.keys.iter().filter(|k| k.status == DiffStatus::Added).map(|k| &k.path).collect();
        let backward_removed: Vec<_> = backward.keys.iter().filter(|k| k.status == DiffStatus::Removed).map(|k| &k.path).collect();
        assert_eq!(forward_added, backward_removed);

        let forward_unchanged: Vec<_> = forward.keys.iter().filter(|k| k.status == DiffStatus::Unchanged).map(|k| &k.path).collect();
        let backward_unchanged: Vec<_> = backward.keys.iter().filter(|k| k.status == DiffStatus::Unchanged).map(|k| &k.path).collect();
        assert_eq!(forward_unchanged, backward_unchanged);
    }

    #[test]
    fn merge_applies_reg_text_and_reports_stats() {
        let hive = empty_hive();
        let reg = "Windows Registry Editor Version 5.00\r\n\r\n[Software\\X]\r\n\"V\"=\"hi\"\r\n";
        let (stats, image) = merge_reg_bytes(
            &hive,
            reg.as_bytes(),
            "<test>",
            &ParseOptions::default(),
            &MergeOptions::default(),
            |_, _| {},
            |_, _| false,
        )
        .unwrap();

        assert_eq!(stats.keys_created, 1);
        assert_eq!(stats.values_set, 1);
        assert_eq!(stats.operations_total, 2);
        assert_eq!(stats.operations_failed, 0);
        let image = image.unwrap();
        assert!(!image.is_empty());

        let merged = Hive::from_vec(image, OpenOptions::default()).unwrap();
        let reader = Reader::new(&merged);
        let root = reader.root().unwrap();
        let x = reader.lookup(root, "Software").unwrap();
        let x = reader.lookup(x, "X").unwrap();
        let v = reader.get_value(x, "V").unwrap();
        assert_eq!(reader.value_raw_data(v).unwrap(), "hi".encode_utf16().flat_map(|u| u.to_le_bytes()).chain([0, 0]).collect::<Vec<u8>>());
    }

    #[test]
    fn merge_dry_run_does_not_produce_an_image() {
        let hive = empty_hive();
        let reg = "Windows Registry Editor Version 5.00\r\n\r\n[Software\\X]\r\n\"V\"=\"hi\"\r\n";
        let (_, image) = merge_reg_bytes(
            &hive,
            reg.as_bytes(),
            "<test>",
            &ParseOptions::default(),
            &MergeOptions { dry_run: true, limits: Limits::default() },
            |_, _| {},
            |_, _| false,
        )
        .unwrap();
        assert!(image.is_none());
    }

    #[test]
    fn merge_continues_past_errors_when_on_error_allows_it() {
        let hive = empty_hive();
        let reg = "Windows Registry Editor Version 5.00\r\n\r\n[Software\\X]\r\n\"V\"=-\r\n\"W\"=dword:00000001\r\n";
        // "V" does not exist yet, so its delete fails and is skipped; "W" still applies.
        let mut failures = Vec::new();
        let (stats, image) = merge_reg_bytes(
            &hive,
            reg.as_bytes(),
            "<test>",
            &ParseOptions::default(),
            &MergeOptions::default(),
            |_, _| {},
            |op, err| {
                failures.push(format!("{:?}: {}", op, err));
                true
            },
        )
        .unwrap();
        assert_eq!(stats.operations_failed, 1);
        assert_eq!(stats.values_set, 1);
        assert!(image.is_some());
        assert_eq!(failures.len(), 1);
    }
}
