//! Rollup tree shape and the reconciliation invariant.

use compensi_core::{
    aggregator::{AggregationNode, Aggregator, NodeLevel, NodePath},
    config::EngineConfig,
    engine::CommissionEngine,
    error::EngineError,
    rule_table::RuleTable,
    source::{RecordFilter, RecordSource, SyntheticSource},
    types::{Scope, Segment},
};
use rust_decimal::Decimal;
use std::sync::Arc;

const RULES: &str = include_str!("../../data/rules.json");

fn synthetic_engine_run(count: usize, seed: u64) -> compensi_core::engine::Computation {
    let rules = Arc::new(RuleTable::from_json_str(RULES).expect("sample rule table"));
    let rows = SyntheticSource::new(count, seed)
        .fetch(&RecordFilter::all())
        .expect("synthetic rows");
    CommissionEngine::new(EngineConfig::default_test(), rules)
        .run(&rows)
        .expect("pipeline run")
}

fn assert_reconciles(node: &AggregationNode) {
    if node.children.is_empty() {
        return;
    }
    let children_total: Decimal = node.children.iter().map(|c| c.total_amount).sum();
    let children_qty: u64 = node.children.iter().map(|c| c.total_quantity).sum();
    let children_lines: usize = node.children.iter().map(|c| c.line_count).sum();
    assert_eq!(node.total_amount, children_total, "amount mismatch at {}", node.path);
    assert_eq!(node.total_quantity, children_qty, "quantity mismatch at {}", node.path);
    assert_eq!(node.line_count, children_lines, "line count mismatch at {}", node.path);
    assert_eq!(node.member_line_refs.len(), node.line_count, "refs mismatch at {}", node.path);
    for child in &node.children {
        assert_reconciles(child);
    }
}

// ── Tree shape ────────────────────────────────────────────────────

#[test]
fn levels_run_root_segment_category_bucket_scope() {
    let computation = synthetic_engine_run(300, 11);
    let root = computation.tree();
    assert_eq!(root.level, NodeLevel::Root);

    let mut depth_levels = Vec::new();
    let mut node = root;
    while let Some(child) = node.children.first() {
        depth_levels.push(child.level);
        node = child;
    }
    assert_eq!(
        depth_levels,
        vec![NodeLevel::Segment, NodeLevel::Category, NodeLevel::Bucket, NodeLevel::Scope]
    );
}

#[test]
fn children_are_ordered_by_key() {
    let computation = synthetic_engine_run(300, 12);
    let mut unordered = Vec::new();
    computation.tree().walk(&mut |node| {
        let keys: Vec<&str> = node.children.iter().map(|c| c.key.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        if keys != sorted {
            unordered.push(node.path.to_string());
        }
    });
    assert!(unordered.is_empty(), "unordered children under {unordered:?}");
}

#[test]
fn segments_and_scope_leaves_sort_by_key_not_declaration() {
    let rules = Arc::new(
        RuleTable::from_json_str(
            r#"{ "version": "order", "rules": [
                { "ruleId": "R-T", "segment": "RESIDENTIAL", "category": "X", "productBucket": "Y",
                  "scope": "TLC", "unitAmount": 1 },
                { "ruleId": "R-A", "segment": "RESIDENTIAL", "category": "X", "productBucket": "Y",
                  "scope": "ADVANCE", "unitAmount": 1 },
                { "ruleId": "B-T", "segment": "BUSINESS", "category": "X", "productBucket": "Y",
                  "scope": "TLC", "unitAmount": 1 }
            ] }"#,
        )
        .expect("ordering rules"),
    );
    let row = |key: &str, segment: &str, scope: &str| {
        serde_json::json!({
            "activationKey": key, "segment": segment, "category": "X",
            "productBucket": "Y", "scope": scope
        })
        .as_object()
        .cloned()
        .expect("row object")
    };
    let computation = CommissionEngine::new(EngineConfig::default(), rules)
        .run(&[
            row("1", "RESIDENTIAL", "TLC"),
            row("2", "RESIDENTIAL", "ADVANCE"),
            row("3", "BUSINESS", "TLC"),
        ])
        .expect("pipeline run");

    let segments: Vec<&str> = computation.tree().children.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(segments, vec!["BUSINESS", "RESIDENTIAL"]);

    let bucket = computation
        .tree()
        .find(&NodePath::bucket(Segment::Residential, "X", "Y"))
        .expect("residential X/Y bucket");
    let leaves: Vec<&str> = bucket.children.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(leaves, vec!["ADVANCE", "TLC"]);
}

#[test]
fn one_bucket_can_carry_two_scope_leaves() {
    let computation = synthetic_engine_run(400, 5);
    let bucket = computation
        .tree()
        .find(&NodePath::bucket(Segment::Residential, "MOBILE", "MOBILE_RA"))
        .expect("residential MOBILE_RA bucket");
    let scopes: Vec<&str> = bucket.children.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(scopes, vec!["ADVANCE", "TLC"]);
}

// ── Reconciliation ────────────────────────────────────────────────

#[test]
fn every_node_equals_the_sum_of_its_children() {
    for seed in [1, 2, 3, 99, 2024] {
        let computation = synthetic_engine_run(250, seed);
        assert_reconciles(computation.tree());
    }
}

#[test]
fn scope_rollup_agrees_with_the_tree() {
    let computation = synthetic_engine_run(500, 77);
    let rollup_total: Decimal = computation.scope_rollup().values().map(|t| t.total_amount).sum();
    assert_eq!(rollup_total, computation.grand_total());

    let mut leaf_totals = std::collections::BTreeMap::<Scope, Decimal>::new();
    computation.tree().walk(&mut |node| {
        if let (true, Some(scope)) = (node.is_leaf(), node.path.scope) {
            *leaf_totals.entry(scope).or_default() += node.total_amount;
        }
    });
    for (scope, total) in computation.scope_rollup() {
        assert_eq!(
            leaf_totals.get(scope).copied().unwrap_or_default(),
            total.total_amount,
            "scope {scope:?} disagrees with the tree"
        );
    }
}

#[test]
fn leaves_match_their_member_lines() {
    let computation = synthetic_engine_run(300, 8);
    let by_key: std::collections::HashMap<&str, Decimal> = computation
        .priced()
        .iter()
        .map(|p| (p.line.activation_key(), p.line.total_amount()))
        .collect();
    computation.tree().walk(&mut |node| {
        if node.is_leaf() {
            let sum: Decimal = node.member_line_refs.iter().map(|k| by_key[k.as_str()]).sum();
            assert_eq!(sum, node.total_amount, "leaf {} does not match its lines", node.path);
        }
    });
}

#[test]
fn verify_catches_a_tampered_tree() {
    let computation = synthetic_engine_run(100, 4);
    let mut aggregation = Aggregator::aggregate(computation.priced());
    aggregation.verify(computation.priced(), Decimal::new(5, 3)).unwrap();

    aggregation.tree.children[0].total_amount += Decimal::ONE;
    match aggregation.verify(computation.priced(), Decimal::new(5, 3)) {
        Err(EngineError::AggregationInvariant { path, .. }) => assert_eq!(path, "/"),
        other => panic!("expected an invariant violation, got {other:?}"),
    }
}
