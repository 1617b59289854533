use compensi_core::{
    classifier::{Classifier, MatchLevel},
    error::ClassificationReason,
    record::{ActivationRecord, RecordFlags},
    rule_table::RuleTable,
    types::{Flag, Scope, Segment},
};

fn record(key: &str, category: &str, bucket: &str, quantity: u64) -> ActivationRecord {
    ActivationRecord {
        activation_key:  key.into(),
        segment:         Segment::Residential,
        category:        category.into(),
        product_bucket:  bucket.into(),
        original_bucket: None,
        scope:           Scope::Tlc,
        quantity,
        flags:           RecordFlags::default(),
        mnp_operator:    None,
        occurred_at:     None,
        external_ref:    None,
        dealer:          None,
        agent:           None,
    }
}

fn table(rules: &str) -> RuleTable {
    RuleTable::from_json_str(&format!(r#"{{ "version": "t", "rules": [{rules}] }}"#))
        .expect("test rule table")
}

fn rule(id: &str, category: &str, bucket: &str, extra: &str) -> String {
    format!(
        r#"{{ "ruleId": "{id}", "segment": "RESIDENTIAL", "category": "{category}",
             "productBucket": "{bucket}", "scope": "TLC", "unitAmount": 1 {extra} }}"#
    )
}

// ── Precedence ladder ─────────────────────────────────────────────

#[test]
fn exact_key_beats_every_wildcard() {
    let rules = table(&[
        rule("EXACT", "MOBILE", "MOBILE_RA", ""),
        rule("ANY-CAT", "*", "MOBILE_RA", ""),
        rule("ANY-BUCKET", "MOBILE", "*", ""),
        rule("ANY", "*", "*", ""),
    ]
    .join(","));
    let records = vec![record("K", "MOBILE", "MOBILE_RA", 1)];
    let classifier = Classifier::new(&rules, &records);

    let hit = classifier.classify(&records[0]).unwrap();
    assert_eq!(hit.rule.rule_id, "EXACT");
    assert_eq!(hit.level, MatchLevel::Exact);
}

#[test]
fn wildcard_category_is_tried_before_wildcard_bucket() {
    let rules = table(&[
        rule("ANY-CAT", "*", "MOBILE_RA", ""),
        rule("ANY-BUCKET", "MOBILE", "*", ""),
    ]
    .join(","));
    let records = vec![record("K", "MOBILE", "MOBILE_RA", 1)];
    let hit = Classifier::new(&rules, &records).classify(&records[0]).unwrap();
    assert_eq!(hit.rule.rule_id, "ANY-CAT");
    assert_eq!(hit.level, MatchLevel::WildcardCategory);
}

#[test]
fn full_wildcard_is_the_last_resort() {
    let rules = table(&[rule("ANY-BUCKET", "FISSO", "*", ""), rule("ANY", "*", "*", "")].join(","));
    let records = vec![record("K", "MOBILE", "MOBILE_RA", 1)];
    let hit = Classifier::new(&rules, &records).classify(&records[0]).unwrap();
    assert_eq!(hit.rule.rule_id, "ANY");
    assert_eq!(hit.level, MatchLevel::WildcardBoth);
}

#[test]
fn no_key_at_any_level_is_no_matching_key() {
    let rules = table(&rule("FISSO", "FISSO", "FISSO", ""));
    let records = vec![record("K", "MOBILE", "MOBILE_RA", 1)];
    let err = Classifier::new(&rules, &records).classify(&records[0]).unwrap_err();
    assert_eq!(err.activation_key, "K");
    assert_eq!(err.reason, ClassificationReason::NoMatchingKey);
}

// ── Exclusion ─────────────────────────────────────────────────────

#[test]
fn excluded_rule_never_matches_even_on_exact_key() {
    let rules = table(&[
        rule("NO-RA", "MOBILE", "MOBILE_RA", r#", "excludedWhen": "isAutoRecharge""#),
        rule("FALLBACK", "MOBILE", "*", ""),
    ]
    .join(","));
    let mut flagged = record("RA", "MOBILE", "MOBILE_RA", 1);
    flagged.flags.set(Flag::AutoRecharge, true);
    let plain = record("PLAIN", "MOBILE", "MOBILE_RA", 1);
    let records = vec![flagged, plain];
    let classifier = Classifier::new(&rules, &records);

    assert_eq!(classifier.classify(&records[0]).unwrap().rule.rule_id, "FALLBACK");
    assert_eq!(classifier.classify(&records[1]).unwrap().rule.rule_id, "NO-RA");
}

#[test]
fn exclusion_without_fallback_names_the_flag() {
    let rules = table(&rule("NO-RA", "MOBILE", "MOBILE_RA", r#", "excludedWhen": "isAutoRecharge""#));
    let mut flagged = record("RA", "MOBILE", "MOBILE_RA", 1);
    flagged.flags.set(Flag::AutoRecharge, true);
    let records = vec![flagged];

    let err = Classifier::new(&rules, &records).classify(&records[0]).unwrap_err();
    assert_eq!(err.reason, ClassificationReason::ExcludedByFlag { flag: Flag::AutoRecharge });
    assert_eq!(err.reason.code(), "excluded_by_flag");
}

// ── Tiers ─────────────────────────────────────────────────────────

#[test]
fn tier_is_chosen_by_bucket_quantity_not_record_quantity() {
    let rules = table(&[
        rule("T1", "SIM", "SIM_BASE", r#", "quantityMax": 49"#),
        rule("T2", "SIM", "SIM_BASE", r#", "quantityMin": 50"#),
    ]
    .join(","));
    // 30 + 25 = 55 units in the bucket: both records price on the second tier.
    let records = vec![
        record("A", "SIM", "SIM_BASE", 30),
        record("B", "SIM", "SIM_BASE", 25),
        record("OTHER", "SIM", "SIM_PLUS", 100),
    ];
    let classifier = Classifier::new(&rules, &records);

    for r in &records[..2] {
        let hit = classifier.classify(r).unwrap();
        assert_eq!(hit.rule.rule_id, "T2", "record {} should use the 50+ tier", r.activation_key);
        assert_eq!(hit.bucket_quantity, 55);
    }
}

#[test]
fn quantity_outside_every_tier_is_reported() {
    let rules = table(&rule("BIG", "SIM", "SIM_BASE", r#", "quantityMin": 10"#));
    let records = vec![record("A", "SIM", "SIM_BASE", 3)];
    let err = Classifier::new(&rules, &records).classify(&records[0]).unwrap_err();
    assert_eq!(err.reason, ClassificationReason::NoTierMatch { bucket_quantity: 3 });
}

#[test]
fn tier_miss_falls_through_to_a_wildcard_level() {
    let rules = table(&[
        rule("BIG", "SIM", "SIM_BASE", r#", "quantityMin": 10"#),
        rule("ANY-SIM", "SIM", "*", ""),
    ]
    .join(","));
    let records = vec![record("A", "SIM", "SIM_BASE", 3)];
    let hit = Classifier::new(&rules, &records).classify(&records[0]).unwrap();
    assert_eq!(hit.rule.rule_id, "ANY-SIM");
    assert_eq!(hit.level, MatchLevel::WildcardBucket);
}

#[test]
fn pre_pass_groups_by_full_bucket_key() {
    let rules = table(&rule("ANY", "*", "*", ""));
    let mut other_scope = record("C", "SIM", "SIM_BASE", 7);
    other_scope.scope = Scope::SimAssignment;
    let records = vec![
        record("A", "SIM", "SIM_BASE", 2),
        record("B", "SIM", "SIM_BASE", 3),
        other_scope,
    ];
    let classifier = Classifier::new(&rules, &records);
    assert_eq!(classifier.bucket_quantities().len(), 2);
    assert_eq!(classifier.bucket_quantities().get(&records[0].bucket_key()), 5);
    assert_eq!(classifier.bucket_quantities().get(&records[2].bucket_key()), 7);
}
