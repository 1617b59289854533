//! Canonical activation records and the loosely-typed rows they come from.

use crate::types::{ActivationKey, Flag, Scope, Segment};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One raw row as handed over by a record source. Field names and value
/// types vary between source queries; the normalizer sorts that out.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Boolean attributes of a record that pricing modifiers react to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFlags {
    pub is_auto_recharge:        bool,
    pub is_convergence:          bool,
    pub mnp_operator_penalized:  bool,
    pub mnp_operator_discounted: bool,
}

impl RecordFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::AutoRecharge  => self.is_auto_recharge,
            Flag::Convergence   => self.is_convergence,
            Flag::MnpPenalized  => self.mnp_operator_penalized,
            Flag::MnpDiscounted => self.mnp_operator_discounted,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::AutoRecharge  => self.is_auto_recharge        = value,
            Flag::Convergence   => self.is_convergence          = value,
            Flag::MnpPenalized  => self.mnp_operator_penalized  = value,
            Flag::MnpDiscounted => self.mnp_operator_discounted = value,
        }
    }
}

/// One priceable event after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecord {
    pub activation_key:  ActivationKey,
    pub segment:         Segment,
    /// Upper-cased, trimmed, whitespace runs joined with `_`.
    pub category:        String,
    pub product_bucket:  String,
    /// The bucket as it appeared in the source row, kept for display.
    pub original_bucket: Option<String>,
    pub scope:           Scope,
    pub quantity:        u64,
    pub flags:           RecordFlags,
    pub mnp_operator:    Option<String>,
    pub occurred_at:     Option<NaiveDateTime>,
    /// Contract / practice reference from the source system.
    pub external_ref:    Option<String>,
    pub dealer:          Option<String>,
    pub agent:           Option<String>,
}

/// Grouping key shared by the tier pre-pass and the rule index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub segment:        Segment,
    pub category:       String,
    pub product_bucket: String,
    pub scope:          Scope,
}

impl ActivationRecord {
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey {
            segment:        self.segment,
            category:       self.category.clone(),
            product_bucket: self.product_bucket.clone(),
            scope:          self.scope,
        }
    }

    /// Case-insensitive substring match over the fields a drill-down
    /// filter searches.
    pub fn matches_text(&self, needle_lower: &str) -> bool {
        let hit = |value: &str| value.to_lowercase().contains(needle_lower);
        hit(&self.activation_key)
            || self.mnp_operator.as_deref().is_some_and(hit)
            || self.external_ref.as_deref().is_some_and(hit)
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.segment, self.category, self.product_bucket, self.scope
        )
    }
}
