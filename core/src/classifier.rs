//! Classifier — picks the single rule that prices a record.
//!
//! Lookup walks a fixed precedence ladder:
//!   1. exact category + exact bucket
//!   2. wildcard category + exact bucket
//!   3. exact category + wildcard bucket
//!   4. wildcard category + wildcard bucket
//!
//! At each level, rules excluded by a record flag are dropped, then the
//! tier is chosen by the *bucket-level* quantity: the sum of `quantity`
//! over every record in the batch sharing the record's
//! (segment, category, bucket, scope). A level that leaves no candidate
//! falls through to the next one; a level that leaves more than one is an
//! error, never a silent pick.

use crate::{
    error::{ClassificationError, ClassificationReason},
    record::{ActivationRecord, BucketKey},
    rule_table::{PricingRule, RuleTable},
    types::{Flag, WILDCARD},
};
use serde::Serialize;
use std::collections::HashMap;

/// How specific the key that matched a record was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    Exact,
    WildcardCategory,
    WildcardBucket,
    WildcardBoth,
}

impl MatchLevel {
    pub const LADDER: [MatchLevel; 4] = [
        MatchLevel::Exact,
        MatchLevel::WildcardCategory,
        MatchLevel::WildcardBucket,
        MatchLevel::WildcardBoth,
    ];

    fn key_for(&self, exact: &BucketKey) -> BucketKey {
        let wildcard = || WILDCARD.to_string();
        let (category, product_bucket) = match self {
            Self::Exact            => (exact.category.clone(), exact.product_bucket.clone()),
            Self::WildcardCategory => (wildcard(), exact.product_bucket.clone()),
            Self::WildcardBucket   => (exact.category.clone(), wildcard()),
            Self::WildcardBoth     => (wildcard(), wildcard()),
        };
        BucketKey {
            segment: exact.segment,
            category,
            product_bucket,
            scope: exact.scope,
        }
    }
}

/// Aggregated quantity per bucket key, computed in one pass over the batch.
#[derive(Debug, Clone, Default)]
pub struct BucketQuantities {
    totals: HashMap<BucketKey, u64>,
}

impl BucketQuantities {
    pub fn from_records(records: &[ActivationRecord]) -> Self {
        let mut totals: HashMap<BucketKey, u64> = HashMap::new();
        for record in records {
            let entry = totals.entry(record.bucket_key()).or_insert(0);
            *entry = entry.saturating_add(record.quantity);
        }
        Self { totals }
    }

    pub fn get(&self, key: &BucketKey) -> u64 {
        self.totals.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// A successful classification.
#[derive(Debug, Clone, Copy)]
pub struct Classification<'t> {
    pub rule:            &'t PricingRule,
    pub level:           MatchLevel,
    pub bucket_quantity: u64,
}

pub struct Classifier<'t> {
    rules:      &'t RuleTable,
    quantities: BucketQuantities,
}

impl<'t> Classifier<'t> {
    /// Runs the tier-quantity pre-pass over the whole batch.
    pub fn new(rules: &'t RuleTable, records: &[ActivationRecord]) -> Self {
        let quantities = BucketQuantities::from_records(records);
        log::debug!(
            "classify: pre-pass found {} buckets over {} records",
            quantities.len(),
            records.len()
        );
        Self { rules, quantities }
    }

    pub fn bucket_quantities(&self) -> &BucketQuantities {
        &self.quantities
    }

    pub fn classify(
        &self,
        record: &ActivationRecord,
    ) -> Result<Classification<'t>, ClassificationError> {
        let exact = record.bucket_key();
        let bucket_quantity = self.quantities.get(&exact);
        let mut first_miss: Option<ClassificationReason> = None;

        for level in MatchLevel::LADDER {
            let key = level.key_for(&exact);
            let candidates: Vec<&'t PricingRule> = self.rules.rules_for_key(&key).collect();
            if candidates.is_empty() {
                continue;
            }

            let mut excluded_by: Option<Flag> = None;
            let eligible: Vec<&'t PricingRule> = candidates
                .into_iter()
                .filter(|rule| match rule.excluded_when {
                    Some(flag) if record.flags.get(flag) => {
                        excluded_by.get_or_insert(flag);
                        false
                    }
                    _ => true,
                })
                .collect();

            if eligible.is_empty() {
                if let Some(flag) = excluded_by {
                    first_miss.get_or_insert(ClassificationReason::ExcludedByFlag { flag });
                }
                continue;
            }

            let in_tier: Vec<&'t PricingRule> = eligible
                .into_iter()
                .filter(|rule| rule.tier.contains(bucket_quantity))
                .collect();

            match in_tier.as_slice() {
                [] => {
                    first_miss.get_or_insert(ClassificationReason::NoTierMatch { bucket_quantity });
                }
                [rule] => {
                    log::debug!(
                        "classify: {} -> {} ({:?}, bucket qty {bucket_quantity})",
                        record.activation_key,
                        rule.rule_id,
                        level
                    );
                    return Ok(Classification {
                        rule: *rule,
                        level,
                        bucket_quantity,
                    });
                }
                many => {
                    return Err(ClassificationError {
                        activation_key: record.activation_key.clone(),
                        reason: ClassificationReason::Ambiguous {
                            rule_ids: many.iter().map(|r| r.rule_id.clone()).collect(),
                        },
                    });
                }
            }
        }

        Err(ClassificationError {
            activation_key: record.activation_key.clone(),
            reason: first_miss.unwrap_or(ClassificationReason::NoMatchingKey),
        })
    }
}
