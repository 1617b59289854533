use crate::types::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How the normalizer treats a numeric field that is present but unparsable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericPolicy {
    /// Coerce to zero and keep the row (the dashboard's historical behaviour).
    #[default]
    Lenient,
    /// Drop the row with an `InvalidNumber` diagnostic.
    Strict,
}

/// Per-process engine settings. The rule table is loaded separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Abort the request on the first classification error instead of
    /// reporting it as a diagnostic.
    pub strict_classification: bool,
    pub numeric_policy:        NumericPolicy,
    /// Carriers whose port-ins set `mnpOperatorPenalized`.
    pub penalized_operators:   Vec<String>,
    /// Carriers whose port-ins set `mnpOperatorDiscounted`.
    pub discounted_operators:  Vec<String>,
    /// Largest tolerated gap between a node total and the sum of its children.
    pub reconcile_epsilon:     Amount,
    /// Decimal places priced amounts are rounded to.
    pub amount_scale:          u32,
    /// Largest quantity a single row may carry. Anything above is rejected
    /// by the normalizer.
    pub max_quantity:          u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_classification: false,
            numeric_policy:        NumericPolicy::Lenient,
            penalized_operators:   Vec::new(),
            discounted_operators:  Vec::new(),
            reconcile_epsilon:     Decimal::new(5, 3),
            amount_scale:          2,
            max_quantity:          1_000_000,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys fall back to `Default`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Config used by unit and integration tests: Vodafone port-ins are
    /// penalised, Iliad port-ins discounted.
    pub fn default_test() -> Self {
        Self {
            penalized_operators:  vec!["VODAFONE".into()],
            discounted_operators: vec!["ILIAD".into()],
            ..Self::default()
        }
    }

    pub fn with_strict_classification(mut self, strict: bool) -> Self {
        self.strict_classification = strict;
        self
    }

    pub fn with_numeric_policy(mut self, policy: NumericPolicy) -> Self {
        self.numeric_policy = policy;
        self
    }

    pub(crate) fn is_penalized_operator(&self, operator: &str) -> bool {
        contains_ignore_case(&self.penalized_operators, operator)
    }

    pub(crate) fn is_discounted_operator(&self, operator: &str) -> bool {
        contains_ignore_case(&self.discounted_operators, operator)
    }
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    let value = value.trim();
    list.iter().any(|entry| entry.trim().eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "strictClassification": true, "numericPolicy": "strict" }"#)
                .unwrap();
        assert!(config.strict_classification);
        assert_eq!(config.numeric_policy, NumericPolicy::Strict);
        assert_eq!(config.amount_scale, 2);
        assert_eq!(config.reconcile_epsilon, Decimal::new(5, 3));
        assert_eq!(config.max_quantity, 1_000_000);
    }

    #[test]
    fn operator_lists_match_case_insensitively() {
        let config = EngineConfig::default_test();
        assert!(config.is_penalized_operator(" vodafone "));
        assert!(config.is_discounted_operator("Iliad"));
        assert!(!config.is_penalized_operator("TIM"));
    }
}
