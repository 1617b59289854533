use crate::types::{ActivationKey, Amount, Flag, RuleId};
use thiserror::Error;

/// Fatal, request-level failures. Row-level problems never end up here
/// unless strict classification is switched on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Classification failed in strict mode: {0}")]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(
        "Aggregation invariant violated at '{path}': node total {node_total} != children total {children_total}"
    )]
    AggregationInvariant {
        path:           String,
        node_total:     Amount,
        children_total: Amount,
    },

    #[error("Unknown aggregation node '{path}'")]
    UnknownNode { path: String },

    #[error("Invalid node path '{path}': {reason}")]
    InvalidNodePath { path: String, reason: String },

    #[error("Record source '{name}': {reason}")]
    Source { name: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Rule-table defects. Raised while a table is being built, never while
/// a request is being served.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Cannot read rule table {path}: {source}")]
    Io {
        path:   String,
        source: std::io::Error,
    },

    #[error("Rule table is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rule id '{rule_id}' is declared more than once")]
    DuplicateRuleId { rule_id: RuleId },

    #[error("Rule '{rule_id}' has no unitAmount (directly or through extends)")]
    MissingUnitAmount { rule_id: RuleId },

    #[error("Rule '{rule_id}' has quantityMin {min} greater than quantityMax {max}")]
    InvalidTier { rule_id: RuleId, min: u64, max: u64 },

    #[error("Rules '{first}' and '{second}' have overlapping tiers on key {key}")]
    OverlappingTiers {
        key:    String,
        first:  RuleId,
        second: RuleId,
    },

    #[error("Rule '{rule_id}' extends unknown rule '{parent}'")]
    UnknownParent { rule_id: RuleId, parent: RuleId },

    #[error("Rule inheritance cycle: {}", chain.join(" -> "))]
    InheritanceCycle { chain: Vec<RuleId> },

    #[error("Rule '{rule_id}' has an invalid key: {reason}")]
    InvalidKey { rule_id: RuleId, reason: String },
}

/// Why a single raw row could not become an `ActivationRecord`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' has unrecognised value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("activation key '{key}' already seen earlier in the batch")]
    DuplicateKey { key: String },

    #[error("quantity {quantity} exceeds the limit of {max}")]
    QuantityOutOfRange { quantity: u64, max: u64 },
}

impl NormalizationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField { .. }  => "missing_field",
            Self::InvalidValue { .. }  => "invalid_value",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::DuplicateKey { .. }  => "duplicate_key",
            Self::QuantityOutOfRange { .. } => "quantity_out_of_range",
        }
    }
}

/// A record that no rule (or more than one rule) prices.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record '{activation_key}': {reason}")]
pub struct ClassificationError {
    pub activation_key: ActivationKey,
    pub reason:         ClassificationReason,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationReason {
    #[error("no rule matches its segment/category/bucket/scope")]
    NoMatchingKey,

    #[error("no tier covers bucket quantity {bucket_quantity}")]
    NoTierMatch { bucket_quantity: u64 },

    #[error("every matching rule is excluded by flag {flag}")]
    ExcludedByFlag { flag: Flag },

    #[error("ambiguous match between rules {}", rule_ids.join(", "))]
    Ambiguous { rule_ids: Vec<RuleId> },

    #[error("amount priced by rule {rule_id} overflows")]
    AmountOverflow { rule_id: RuleId },
}

impl ClassificationReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatchingKey       => "no_matching_key",
            Self::NoTierMatch { .. }  => "no_tier_match",
            Self::ExcludedByFlag { .. } => "excluded_by_flag",
            Self::Ambiguous { .. }    => "ambiguous",
            Self::AmountOverflow { .. } => "amount_overflow",
        }
    }
}
