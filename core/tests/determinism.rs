//! Same rows + same rule table → byte-identical output.
//!
//! Two runs over the same batch must produce identical summary JSON,
//! identical diagnostics and identical drill-down pages. Any divergence
//! means a report can change between two clicks on the same button.

use compensi_core::{
    config::EngineConfig,
    drilldown::DrillDownQuery,
    engine::CommissionEngine,
    record::RawRow,
    rule_table::{RuleTable, SharedRuleTable},
    source::{RecordFilter, RecordSource, SyntheticSource},
};

const RULES: &str = include_str!("../../data/rules.json");

fn engine(shared: &SharedRuleTable) -> CommissionEngine {
    CommissionEngine::new(EngineConfig::default_test(), shared.current())
}

fn batch(seed: u64) -> Vec<RawRow> {
    SyntheticSource::new(600, seed)
        .fetch(&RecordFilter::all())
        .expect("synthetic rows")
}

#[test]
fn same_batch_produces_identical_summary_json() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;
    let shared = SharedRuleTable::new(RuleTable::from_json_str(RULES).unwrap());
    let rows = batch(SEED);

    let a = engine(&shared).run(&rows).unwrap().summary().to_json().unwrap();
    let b = engine(&shared).run(&rows).unwrap().summary().to_json().unwrap();

    assert_eq!(a.len(), b.len(), "summary lengths differ: {} vs {}", a.len(), b.len());
    for (i, (la, lb)) in a.lines().zip(b.lines()).enumerate() {
        assert_eq!(la, lb, "summary diverged at line {i}:\n  A: {la}\n  B: {lb}");
    }
}

#[test]
fn independently_loaded_tables_agree() {
    let rows = batch(17);
    let first = SharedRuleTable::new(RuleTable::from_json_str(RULES).unwrap());
    let second = SharedRuleTable::new(RuleTable::from_json_str(RULES).unwrap());

    let a = engine(&first).run(&rows).unwrap().summary();
    let b = engine(&second).run(&rows).unwrap().summary();
    assert_eq!(a, b);
}

#[test]
fn diagnostics_are_stable_across_runs() {
    let shared = SharedRuleTable::new(RuleTable::from_json_str(RULES).unwrap());
    let rows = batch(99);
    let a = engine(&shared).run(&rows).unwrap();
    let b = engine(&shared).run(&rows).unwrap();

    assert!(!a.diagnostics().is_complete(), "synthetic batch should contain defects");
    assert_eq!(a.diagnostics(), b.diagnostics());
}

#[test]
fn drill_down_pages_are_stable_across_runs() {
    let shared = SharedRuleTable::new(RuleTable::from_json_str(RULES).unwrap());
    let rows = batch(5);
    let a = engine(&shared).run(&rows).unwrap();
    let b = engine(&shared).run(&rows).unwrap();

    let query = DrillDownQuery::node("RESIDENTIAL".parse().unwrap()).with_page(3, 25);
    let page_a = serde_json::to_string(&a.drill_down(&query).unwrap()).unwrap();
    let page_b = serde_json::to_string(&b.drill_down(&query).unwrap()).unwrap();
    assert_eq!(page_a, page_b);
}

#[test]
fn different_seeds_give_different_batches() {
    let shared = SharedRuleTable::new(RuleTable::from_json_str(RULES).unwrap());
    let a = engine(&shared).run(&batch(1)).unwrap().summary();
    let b = engine(&shared).run(&batch(2)).unwrap().summary();
    assert_ne!(a.grand_total, b.grand_total, "seeds 1 and 2 should not price identically");
}
