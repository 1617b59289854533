//! Pricer — turns a classified record into a `PricedLine`.
//!
//! Pricing order:
//!   1. base = unitAmount × quantity
//!   2. each modifier whose flag is set on the record, in rule order:
//!        additive, per unit  → + amount × quantity
//!        additive, flat      → + amount
//!        multiplicative      → + running × amount
//!   3. total = base + Σ applied deltas
//!
//! Every step is rounded to the configured scale before it is added, so
//! the breakdown always sums exactly to the total. Negative totals are
//! legitimate (advance clawbacks) and are never clamped. A step that
//! overflows `Decimal` fails the line with `AmountOverflow`.

use crate::{
    classifier::{Classification, MatchLevel},
    error::{ClassificationError, ClassificationReason},
    record::ActivationRecord,
    rule_table::Modifier,
    types::{ActivationKey, Amount, Flag, RuleId},
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    PerUnit,
    Flat,
    Multiplicative,
}

/// One adjustment that fired on a line, with the euros it contributed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedModifier {
    pub flag:       Flag,
    pub label:      String,
    pub kind:       ModifierKind,
    /// The adjustment as configured on the rule.
    pub adjustment: Amount,
    /// What it actually added to the line (negative for penalties).
    pub amount:     Amount,
}

/// The priced outcome for one record. Built once by `Pricer::price`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    activation_key:     ActivationKey,
    rule_id:            RuleId,
    match_level:        MatchLevel,
    bucket_quantity:    u64,
    unit_amount:        Amount,
    quantity:           u64,
    base_amount:        Amount,
    modifier_breakdown: Vec<AppliedModifier>,
    total_amount:       Amount,
}

impl PricedLine {
    pub fn activation_key(&self) -> &str {
        &self.activation_key
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn match_level(&self) -> MatchLevel {
        self.match_level
    }

    /// Bucket-level quantity the tier was chosen with.
    pub fn bucket_quantity(&self) -> u64 {
        self.bucket_quantity
    }

    pub fn unit_amount(&self) -> Amount {
        self.unit_amount
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn base_amount(&self) -> Amount {
        self.base_amount
    }

    pub fn modifier_breakdown(&self) -> &[AppliedModifier] {
        &self.modifier_breakdown
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    /// One-line explanation, e.g. `2 × 10.00 = 20.00; +10.00 auto-recharge bonus`.
    pub fn explain(&self) -> String {
        let mut text = format!(
            "{} × {} = {}",
            self.quantity, self.unit_amount, self.base_amount
        );
        for applied in &self.modifier_breakdown {
            let sign = if applied.amount.is_sign_negative() { "" } else { "+" };
            text.push_str(&format!("; {sign}{} {}", applied.amount, applied.label));
        }
        text
    }
}

/// A record together with the line it was priced into. This is the unit
/// the aggregator consumes and the drill-down hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedRecord {
    pub line:   PricedLine,
    pub record: ActivationRecord,
}

pub struct Pricer {
    scale: u32,
}

impl Pricer {
    pub fn new(scale: u32) -> Self {
        Self { scale }
    }

    pub fn price(
        &self,
        record: &ActivationRecord,
        classification: &Classification<'_>,
    ) -> Result<PricedLine, ClassificationError> {
        let rule = classification.rule;
        let overflow = || ClassificationError {
            activation_key: record.activation_key.clone(),
            reason:         ClassificationReason::AmountOverflow { rule_id: rule.rule_id.clone() },
        };
        let quantity = Decimal::from(record.quantity);

        let base_amount = self.round(rule.unit_amount.checked_mul(quantity).ok_or_else(overflow)?);
        let mut running = base_amount;
        let mut breakdown = Vec::new();

        for modifier in &rule.modifiers {
            if !record.flags.get(modifier.flag) {
                continue;
            }
            let (kind, delta) = if modifier.multiplicative {
                (ModifierKind::Multiplicative, running.checked_mul(modifier.amount))
            } else if modifier.per_unit {
                (ModifierKind::PerUnit, modifier.amount.checked_mul(quantity))
            } else {
                (ModifierKind::Flat, Some(modifier.amount))
            };
            let delta = self.round(delta.ok_or_else(overflow)?);
            running = running.checked_add(delta).ok_or_else(overflow)?;
            breakdown.push(AppliedModifier {
                flag: modifier.flag,
                label: modifier_label(modifier, record),
                kind,
                adjustment: modifier.amount,
                amount: delta,
            });
        }

        log::debug!(
            "price: {} rule={} qty={} base={} total={}",
            record.activation_key,
            rule.rule_id,
            record.quantity,
            base_amount,
            running
        );

        Ok(PricedLine {
            activation_key:     record.activation_key.clone(),
            rule_id:            rule.rule_id.clone(),
            match_level:        classification.level,
            bucket_quantity:    classification.bucket_quantity,
            unit_amount:        rule.unit_amount,
            quantity:           record.quantity,
            base_amount,
            modifier_breakdown: breakdown,
            total_amount:       running,
        })
    }

    fn round(&self, amount: Amount) -> Amount {
        amount.round_dp_with_strategy(self.scale, RoundingStrategy::MidpointAwayFromZero)
    }
}

fn modifier_label(modifier: &Modifier, record: &ActivationRecord) -> String {
    let label = modifier
        .label
        .clone()
        .unwrap_or_else(|| modifier.flag.default_label().to_string());
    match (&record.mnp_operator, modifier.flag.is_mnp()) {
        (Some(op), true) => format!("{label} ({op})"),
        _ => label,
    }
}
