//! Integration-level coverage of the diagnostics/repair pair across the
//! full open -> scan -> repair -> reopen cycle, complementing the
//! focused unit tests inside `src/repair.rs`.

mod common;

use common::build_hive;
use regrs::diagnostics::{Diagnostics, RenderFormat};
use regrs::hive::{Hive, OpenOptions};
use regrs::limits::Limits;
use regrs::reader::Reader;
use regrs::repair::{RepairEngine, RepairPolicy};

fn corrupt_first_nk_signature(bytes: &mut [u8]) {
    let pos = bytes.windows(2).position(|w| w == b"nk").expect("no nk cell found");
    bytes[pos] = b'Z';
    bytes[pos + 1] = b'Z';
}

#[test]
fn clean_hive_scans_healthy_and_renders_without_findings() {
    let hive = build_hive(&["Software\\Vendor"], &[]);
    let report = Diagnostics::new(&hive, Limits::default()).scan();
    assert!(report.is_healthy());
    assert_eq!(report.count_at_least(regrs::diagnostics::Severity::Error), 0);
    assert!(report.render(RenderFormat::Compact).is_empty());
}

#[test]
fn corrupted_key_node_is_flagged_and_permissive_repair_drops_it() {
    let hive = build_hive(&["Software\\Vendor"], &[]);
    let mut corrupted = hive.buffer().to_vec();
    corrupt_first_nk_signature(&mut corrupted);
    let corrupted = Hive::from_vec(corrupted, OpenOptions::default()).unwrap();

    let report = Diagnostics::new(&corrupted, Limits::default()).scan();
    assert!(!report.is_healthy());

    let engine = RepairEngine::new(&corrupted, Limits::default());
    let outcome = engine.repair(&RepairPolicy::permissive()).unwrap();
    assert!(!outcome.applied.is_empty());

    let rebuilt = Hive::from_vec(outcome.image, OpenOptions::default()).unwrap();
    let rebuilt_report = Diagnostics::new(&rebuilt, Limits::default()).scan();
    assert!(rebuilt_report.is_healthy());
}

#[test]
fn conservative_policy_refuses_to_drop_the_corrupted_node() {
    let hive = build_hive(&["Software\\Vendor"], &[]);
    let mut corrupted = hive.buffer().to_vec();
    corrupt_first_nk_signature(&mut corrupted);
    let corrupted = Hive::from_vec(corrupted, OpenOptions::default()).unwrap();

    let engine = RepairEngine::new(&corrupted, Limits::default());
    let plan = engine.plan();
    assert!(!plan.is_healthy());
    assert!(engine.repair(&RepairPolicy::conservative()).is_err());
}

#[test]
fn tree_depth_beyond_limits_is_reported_as_a_performance_warning() {
    let mut path = String::new();
    for i in 0..5 {
        if i > 0 {
            path.push('\\');
        }
        path.push_str(&format!("Level{}", i));
    }
    let hive = build_hive(&[&path], &[]);

    let tight_limits = Limits {
        max_tree_depth: 2,
        ..Limits::default()
    };
    let report = Diagnostics::new(&hive, tight_limits).scan();
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.category == regrs::diagnostics::Category::Performance));

    // The tree still reads back fine under default limits regardless of
    // the diagnostic above; diagnostics never mutate the hive.
    let reader = Reader::new(&hive);
    let root = reader.root().unwrap();
    assert!(reader.resolve_path(root, &path).is_ok());
}
