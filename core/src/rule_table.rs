//! Rule table — the immutable set of pricing rules a request is priced with.
//!
//! RULE: every defect in a rule table is found here, at load time.
//! A table that constructs successfully can be priced against without
//! any further configuration checks: no missing amounts, no overlapping
//! tiers, no inheritance cycles.
//!
//! Reloads never mutate a table in place. `SharedRuleTable` swaps in a
//! freshly validated `Arc<RuleTable>`; in-flight requests keep the one
//! they started with.

use crate::{
    error::ConfigurationError,
    record::BucketKey,
    types::{canonical_token, Amount, Flag, RuleId, Scope, Segment, WILDCARD},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

fn default_true() -> bool {
    true
}

/// One adjustment a rule applies when a record flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    #[serde(alias = "flagName")]
    pub flag:           Flag,
    #[serde(alias = "adjustmentAmount")]
    pub amount:         Amount,
    /// Multiply the running total by `1 + amount` instead of adding.
    #[serde(default, alias = "isMultiplicative")]
    pub multiplicative: bool,
    /// Additive modifiers scale with quantity unless this is false.
    #[serde(default = "default_true")]
    pub per_unit:       bool,
    #[serde(default)]
    pub label:          Option<String>,
}

/// A rule exactly as written in the rule-table document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub rule_id:        RuleId,
    pub segment:        Segment,
    pub category:       String,
    pub product_bucket: String,
    pub scope:          Scope,
    #[serde(default)]
    pub quantity_min:   Option<u64>,
    #[serde(default)]
    pub quantity_max:   Option<u64>,
    #[serde(default)]
    pub unit_amount:    Option<Amount>,
    #[serde(default)]
    pub modifiers:      Vec<Modifier>,
    #[serde(default)]
    pub excluded_when:  Option<Flag>,
    /// Inherit `unitAmount`, `modifiers` and `excludedWhen` from another rule.
    #[serde(default)]
    pub extends:        Option<RuleId>,
    #[serde(default)]
    pub label:          Option<String>,
}

/// Inclusive quantity bounds; `None` is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl TierRange {
    pub fn contains(&self, quantity: u64) -> bool {
        self.min.map_or(true, |min| quantity >= min) && self.max.map_or(true, |max| quantity <= max)
    }

    pub fn overlaps(&self, other: &TierRange) -> bool {
        let (a_min, a_max) = self.bounds();
        let (b_min, b_max) = other.bounds();
        a_min <= b_max && b_min <= a_max
    }

    fn bounds(&self) -> (u64, u64) {
        (self.min.unwrap_or(0), self.max.unwrap_or(u64::MAX))
    }
}

/// A validated, fully resolved pricing rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRule {
    pub rule_id:        RuleId,
    pub segment:        Segment,
    pub category:       String,
    pub product_bucket: String,
    pub scope:          Scope,
    pub tier:           TierRange,
    pub unit_amount:    Amount,
    pub modifiers:      Vec<Modifier>,
    pub excluded_when:  Option<Flag>,
    pub label:          Option<String>,
}

impl PricingRule {
    pub fn key(&self) -> BucketKey {
        BucketKey {
            segment:        self.segment,
            category:       self.category.clone(),
            product_bucket: self.product_bucket.clone(),
            scope:          self.scope,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RuleTableFile {
    #[serde(default)]
    version:  String,
    #[serde(default = "default_currency")]
    currency: String,
    rules:    Vec<RuleDefinition>,
}

fn default_currency() -> String {
    "EUR".into()
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    version:  String,
    currency: String,
    rules:    Vec<PricingRule>,
    by_id:    HashMap<RuleId, usize>,
    by_key:   HashMap<BucketKey, Vec<usize>>,
}

impl RuleTable {
    /// Load a versioned rule-table document from disk.
    pub fn load(path: &str) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigurationError> {
        let file: RuleTableFile = serde_json::from_str(content)?;
        let mut table = Self::from_rules(file.version, file.rules)?;
        table.currency = file.currency;
        Ok(table)
    }

    /// Validate and resolve a list of definitions into a table.
    pub fn from_rules(
        version: impl Into<String>,
        definitions: Vec<RuleDefinition>,
    ) -> Result<Self, ConfigurationError> {
        let version = version.into();

        let mut by_def_id: HashMap<&str, &RuleDefinition> = HashMap::with_capacity(definitions.len());
        for def in &definitions {
            if by_def_id.insert(def.rule_id.as_str(), def).is_some() {
                return Err(ConfigurationError::DuplicateRuleId {
                    rule_id: def.rule_id.clone(),
                });
            }
        }

        let mut resolved: HashMap<RuleId, Resolved> = HashMap::with_capacity(definitions.len());
        for def in &definitions {
            resolve(def, &by_def_id, &mut resolved, &mut Vec::new())?;
        }

        let mut rules = Vec::with_capacity(definitions.len());
        for def in &definitions {
            let inherited = &resolved[&def.rule_id];
            let unit_amount = inherited
                .unit_amount
                .ok_or_else(|| ConfigurationError::MissingUnitAmount {
                    rule_id: def.rule_id.clone(),
                })?;

            let tier = TierRange {
                min: def.quantity_min,
                max: def.quantity_max,
            };
            if let (Some(min), Some(max)) = (tier.min, tier.max) {
                if min > max {
                    return Err(ConfigurationError::InvalidTier {
                        rule_id: def.rule_id.clone(),
                        min,
                        max,
                    });
                }
            }

            rules.push(PricingRule {
                rule_id: def.rule_id.clone(),
                segment: def.segment,
                category: key_token(&def.rule_id, "category", &def.category)?,
                product_bucket: key_token(&def.rule_id, "productBucket", &def.product_bucket)?,
                scope: def.scope,
                tier,
                unit_amount,
                modifiers: inherited.modifiers.clone(),
                excluded_when: inherited.excluded_when,
                label: def.label.clone(),
            });
        }

        let mut by_id = HashMap::with_capacity(rules.len());
        let mut by_key: HashMap<BucketKey, Vec<usize>> = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            by_id.insert(rule.rule_id.clone(), idx);
            by_key.entry(rule.key()).or_default().push(idx);
        }

        check_overlaps(&rules, &by_key)?;

        log::info!(
            "rules: loaded {} rules over {} keys (version {})",
            rules.len(),
            by_key.len(),
            if version.is_empty() { "unversioned" } else { version.as_str() }
        );

        Ok(Self {
            version,
            currency: default_currency(),
            rules,
            by_id,
            by_key,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[PricingRule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &str) -> Option<&PricingRule> {
        self.by_id.get(rule_id).map(|&idx| &self.rules[idx])
    }

    /// Rules declared on exactly this key, in declaration order.
    pub fn rules_for_key<'t>(&'t self, key: &BucketKey) -> impl Iterator<Item = &'t PricingRule> + 't {
        self.by_key
            .get(key)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&idx| &self.rules[idx])
    }
}

/// Inherited portion of a rule after walking its `extends` chain.
#[derive(Debug, Clone)]
struct Resolved {
    unit_amount:   Option<Amount>,
    modifiers:     Vec<Modifier>,
    excluded_when: Option<Flag>,
}

fn resolve(
    def: &RuleDefinition,
    by_id: &HashMap<&str, &RuleDefinition>,
    resolved: &mut HashMap<RuleId, Resolved>,
    chain: &mut Vec<RuleId>,
) -> Result<Resolved, ConfigurationError> {
    if let Some(done) = resolved.get(&def.rule_id) {
        return Ok(done.clone());
    }
    if chain.contains(&def.rule_id) {
        let mut cycle = chain.clone();
        cycle.push(def.rule_id.clone());
        return Err(ConfigurationError::InheritanceCycle { chain: cycle });
    }

    let result = match &def.extends {
        None => Resolved {
            unit_amount:   def.unit_amount,
            modifiers:     def.modifiers.clone(),
            excluded_when: def.excluded_when,
        },
        Some(parent_id) => {
            let parent = by_id.get(parent_id.as_str()).ok_or_else(|| {
                ConfigurationError::UnknownParent {
                    rule_id: def.rule_id.clone(),
                    parent:  parent_id.clone(),
                }
            })?;
            chain.push(def.rule_id.clone());
            let base = resolve(parent, by_id, resolved, chain)?;
            chain.pop();

            let mut modifiers = base.modifiers;
            modifiers.extend(def.modifiers.iter().cloned());
            Resolved {
                unit_amount: def.unit_amount.or(base.unit_amount),
                modifiers,
                excluded_when: def.excluded_when.or(base.excluded_when),
            }
        }
    };

    resolved.insert(def.rule_id.clone(), result.clone());
    Ok(result)
}

fn key_token(rule_id: &str, field: &str, value: &str) -> Result<String, ConfigurationError> {
    if value.trim() == WILDCARD {
        return Ok(WILDCARD.to_string());
    }
    let token = canonical_token(value);
    if token.is_empty() {
        return Err(ConfigurationError::InvalidKey {
            rule_id: rule_id.to_string(),
            reason:  format!("{field} is empty"),
        });
    }
    if token.contains('*') {
        return Err(ConfigurationError::InvalidKey {
            rule_id: rule_id.to_string(),
            reason:  format!("{field} '{value}' mixes a wildcard with text"),
        });
    }
    Ok(token)
}

fn check_overlaps(
    rules: &[PricingRule],
    by_key: &HashMap<BucketKey, Vec<usize>>,
) -> Result<(), ConfigurationError> {
    // Sorted so the reported pair does not depend on HashMap iteration order.
    let mut keys: Vec<&BucketKey> = by_key.keys().collect();
    keys.sort();

    for key in keys {
        let ids = &by_key[key];
        let mut seen: HashSet<usize> = HashSet::new();
        for &a in ids {
            seen.insert(a);
            for &b in ids.iter().filter(|b| !seen.contains(b)) {
                if rules[a].tier.overlaps(&rules[b].tier) {
                    return Err(ConfigurationError::OverlappingTiers {
                        key:    key.to_string(),
                        first:  rules[a].rule_id.clone(),
                        second: rules[b].rule_id.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// The process-wide handle to the current rule table.
pub struct SharedRuleTable {
    current: RwLock<Arc<RuleTable>>,
}

impl SharedRuleTable {
    pub fn new(table: RuleTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// Snapshot for one request.
    pub fn current(&self) -> Arc<RuleTable> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, table: RuleTable) -> Arc<RuleTable> {
        let table = Arc::new(table);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&table),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&table),
        }
        log::info!("rules: swapped in rule table version {}", table.version());
        table
    }

    /// Build a new table from `path`; the current table keeps serving if
    /// the new one fails validation.
    pub fn reload(&self, path: &str) -> Result<Arc<RuleTable>, ConfigurationError> {
        match RuleTable::load(path) {
            Ok(table) => Ok(self.replace(table)),
            Err(e) => {
                log::warn!("rules: reload from {path} rejected: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn def(rule_id: &str, min: Option<u64>, max: Option<u64>) -> RuleDefinition {
        RuleDefinition {
            rule_id:        rule_id.into(),
            segment:        Segment::Residential,
            category:       "mobile".into(),
            product_bucket: "sim base".into(),
            scope:          Scope::Tlc,
            quantity_min:   min,
            quantity_max:   max,
            unit_amount:    Some(Decimal::new(10, 0)),
            modifiers:      vec![],
            excluded_when:  None,
            extends:        None,
            label:          None,
        }
    }

    #[test]
    fn tier_containment_is_inclusive() {
        let tier = TierRange { min: Some(10), max: Some(49) };
        assert!(!tier.contains(9));
        assert!(tier.contains(10));
        assert!(tier.contains(49));
        assert!(!tier.contains(50));
        assert!(TierRange::default().contains(0));
    }

    #[test]
    fn adjacent_tiers_do_not_overlap() {
        let table = RuleTable::from_rules(
            "t",
            vec![def("low", None, Some(9)), def("high", Some(10), None)],
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("low").unwrap().category, "MOBILE");
        assert_eq!(table.get("low").unwrap().product_bucket, "SIM_BASE");
    }

    #[test]
    fn overlapping_tiers_fail_at_load() {
        let err = RuleTable::from_rules(
            "t",
            vec![def("a", None, Some(10)), def("b", Some(10), None)],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::OverlappingTiers { .. }), "got {err}");
    }

    #[test]
    fn inverted_tier_fails_at_load() {
        let err = RuleTable::from_rules("t", vec![def("a", Some(5), Some(1))]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidTier { min: 5, max: 1, .. }));
    }

    #[test]
    fn inheritance_cycle_detected() {
        let mut a = def("a", None, Some(1));
        a.extends = Some("b".into());
        let mut b = def("b", Some(2), Some(3));
        b.extends = Some("a".into());
        let err = RuleTable::from_rules("t", vec![a, b]).unwrap_err();
        match err {
            ConfigurationError::InheritanceCycle { chain } => {
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn self_extension_is_a_cycle() {
        let mut a = def("a", None, None);
        a.extends = Some("a".into());
        let err = RuleTable::from_rules("t", vec![a]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InheritanceCycle { .. }));
    }

    #[test]
    fn missing_unit_amount_fails_at_load() {
        let mut a = def("a", None, None);
        a.unit_amount = None;
        let err = RuleTable::from_rules("t", vec![a]).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingUnitAmount { .. }));
    }
}
