//! The commission engine — one synchronous pipeline per request.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Normalize   raw rows → ActivationRecord   (row errors → diagnostics)
//!   2. Classify    tier pre-pass, then one rule per record
//!   3. Price       rule × record → PricedLine
//!   4. Aggregate   tree + scope rollup, drill-down index alongside
//!   5. Verify      reconciliation self-check
//!
//! RULES:
//!   - The engine holds no mutable state; `run` may be called concurrently.
//!   - The rule table is a snapshot (`Arc`) taken when the engine is built.
//!   - Row-level errors never escape `run` unless strict classification is on.
//!   - Same rows + same rule table → byte-identical summary.

use crate::{
    aggregator::{Aggregation, AggregationNode, Aggregator, ScopeTotal},
    classifier::Classifier,
    config::EngineConfig,
    diagnostic::{Diagnostic, Diagnostics},
    drilldown::{DrillDownIndex, DrillDownPage, DrillDownQuery},
    error::{EngineError, EngineResult},
    normalizer::Normalizer,
    pricer::{PricedRecord, Pricer},
    record::RawRow,
    rule_table::RuleTable,
    types::{Amount, Scope},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct CommissionEngine {
    config: EngineConfig,
    rules:  Arc<RuleTable>,
}

impl CommissionEngine {
    pub fn new(config: EngineConfig, rules: Arc<RuleTable>) -> Self {
        Self { config, rules }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn run(&self, rows: &[RawRow]) -> EngineResult<Computation> {
        let mut diagnostics = Diagnostics::default();

        // ── 1. Normalize ───────────────────────────────────────────
        let batch = Normalizer::new(&self.config).normalize_batch(rows);
        for rejection in &batch.rejected {
            diagnostics.push(Diagnostic::from_rejection(rejection));
        }

        // ── 2 + 3. Classify and price ──────────────────────────────
        let classifier = Classifier::new(&self.rules, &batch.records);
        let pricer = Pricer::new(self.config.amount_scale);
        let mut priced = Vec::with_capacity(batch.records.len());

        for (record, row_index) in batch.records.into_iter().zip(batch.row_indices) {
            let outcome = classifier
                .classify(&record)
                .and_then(|classification| pricer.price(&record, &classification));
            match outcome {
                Ok(line) => priced.push(PricedRecord { line, record }),
                Err(error) if self.config.strict_classification => {
                    log::error!("classify: strict mode abort on {error}");
                    return Err(EngineError::Classification(error));
                }
                Err(error) => {
                    log::warn!("classify: skipped {error}");
                    diagnostics.push(Diagnostic::from_classification(&error, row_index));
                }
            }
        }
        log::info!(
            "classify: {} lines priced, {} classification errors",
            priced.len(),
            diagnostics.classification_errors
        );

        // ── 4. Aggregate ───────────────────────────────────────────
        let aggregation = Aggregator::aggregate(&priced);
        let index = DrillDownIndex::build(&priced);

        // ── 5. Verify ──────────────────────────────────────────────
        aggregation.verify(&priced, self.config.reconcile_epsilon)?;

        if !diagnostics.is_complete() {
            log::warn!(
                "engine: report incomplete, {} of {} rows skipped",
                diagnostics.skipped_rows,
                rows.len()
            );
        }

        Ok(Computation {
            rule_table_version: self.rules.version().to_string(),
            currency: self.rules.currency().to_string(),
            priced,
            aggregation,
            index,
            diagnostics,
        })
    }
}

/// Everything one request produced. Read-only once built.
pub struct Computation {
    rule_table_version: String,
    currency:           String,
    priced:             Vec<PricedRecord>,
    aggregation:        Aggregation,
    index:              DrillDownIndex,
    diagnostics:        Diagnostics,
}

impl Computation {
    pub fn priced(&self) -> &[PricedRecord] {
        &self.priced
    }

    pub fn tree(&self) -> &AggregationNode {
        &self.aggregation.tree
    }

    pub fn scope_rollup(&self) -> &BTreeMap<Scope, ScopeTotal> {
        &self.aggregation.scope_rollup
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn grand_total(&self) -> Amount {
        self.aggregation.grand_total()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            rule_table_version: self.rule_table_version.clone(),
            currency:           self.currency.clone(),
            grand_total:        self.aggregation.tree.total_amount,
            line_count:         self.aggregation.tree.line_count,
            total_quantity:     self.aggregation.tree.total_quantity,
            tree:               self.aggregation.tree.clone(),
            scope_rollup:       self.aggregation.scope_rollup.clone(),
            diagnostics:        self.diagnostics.clone(),
        }
    }

    pub fn drill_down(&self, query: &DrillDownQuery) -> EngineResult<DrillDownPage> {
        self.index.page(&self.aggregation.tree, &self.priced, query)
    }
}

/// The summary output. Every map is ordered so the JSON is stable run to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub rule_table_version: String,
    pub currency:           String,
    pub grand_total:        Amount,
    pub line_count:         usize,
    pub total_quantity:     u64,
    pub tree:               AggregationNode,
    pub scope_rollup:       BTreeMap<Scope, ScopeTotal>,
    pub diagnostics:        Diagnostics,
}

impl Summary {
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn segment_total(&self, segment: &str) -> Option<Amount> {
        self.tree.child(segment).map(|n| n.total_amount)
    }

    pub fn scope_total(&self, scope: Scope) -> Amount {
        self.scope_rollup
            .get(&scope)
            .map(|t| t.total_amount)
            .unwrap_or_default()
    }
}
