//! Drill-down index: from any aggregation node back to its lines.
//!
//! The index is a key → position map over the priced lines, built once per
//! computation. A page request resolves the node, then touches only the
//! node's `member_line_refs`; it never rescans the batch.

use crate::{
    aggregator::{AggregationNode, NodePath},
    error::{EngineError, EngineResult},
    pricer::{PricedLine, PricedRecord},
    record::ActivationRecord,
    types::Amount,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrillDownQuery {
    pub path:   NodePath,
    /// Case-insensitive substring over activation key, MNP operator and
    /// external reference.
    pub filter: Option<String>,
    pub offset: usize,
    /// `None` returns every matching row from `offset` on.
    pub limit:  Option<usize>,
}

impl DrillDownQuery {
    pub fn node(path: NodePath) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrillDownRow {
    pub line:   PricedLine,
    pub record: ActivationRecord,
}

/// One page of a node's lines plus the node's own totals, so a caller can
/// show "47 of 312 rows, 1204.50 total" without fetching every row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownPage {
    pub path:                NodePath,
    pub node_line_count:     usize,
    pub node_total_amount:   Amount,
    pub node_total_quantity: u64,
    /// Rows left after the text filter, before pagination.
    pub matched_count:       usize,
    pub offset:              usize,
    pub limit:               Option<usize>,
    pub rows:                Vec<DrillDownRow>,
}

#[derive(Debug, Clone, Default)]
pub struct DrillDownIndex {
    positions: HashMap<String, usize>,
}

impl DrillDownIndex {
    pub fn build(priced: &[PricedRecord]) -> Self {
        let positions = priced
            .iter()
            .enumerate()
            .map(|(i, p)| (p.record.activation_key.clone(), i))
            .collect();
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Every line under `node`, in drill-down order, unfiltered.
    pub fn members<'p>(&self, node: &AggregationNode, priced: &'p [PricedRecord]) -> Vec<&'p PricedRecord> {
        let mut members: Vec<&PricedRecord> = node
            .member_line_refs
            .iter()
            .filter_map(|key| self.positions.get(key).and_then(|&i| priced.get(i)))
            .collect();
        members.sort_by(|a, b| drill_order(a, b));
        members
    }

    pub fn page(
        &self,
        root: &AggregationNode,
        priced: &[PricedRecord],
        query: &DrillDownQuery,
    ) -> EngineResult<DrillDownPage> {
        let node = root.find(&query.path).ok_or_else(|| EngineError::UnknownNode {
            path: query.path.to_string(),
        })?;

        let needle = query
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_lowercase);

        let matched: Vec<&PricedRecord> = self
            .members(node, priced)
            .into_iter()
            .filter(|p| needle.as_deref().map_or(true, |n| p.record.matches_text(n)))
            .collect();

        let rows = matched
            .iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|p| DrillDownRow {
                line:   p.line.clone(),
                record: p.record.clone(),
            })
            .collect();

        log::debug!(
            "drilldown: {} -> {} members, {} matched",
            query.path,
            node.line_count,
            matched.len()
        );

        Ok(DrillDownPage {
            path:                query.path.clone(),
            node_line_count:     node.line_count,
            node_total_amount:   node.total_amount,
            node_total_quantity: node.total_quantity,
            matched_count:       matched.len(),
            offset:              query.offset,
            limit:               query.limit,
            rows,
        })
    }
}

/// Newest first; undated lines last; ties by activation key.
fn drill_order(a: &PricedRecord, b: &PricedRecord) -> Ordering {
    let by_time = match (a.record.occurred_at, b.record.occurred_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None)    => Ordering::Less,
        (None, Some(_))    => Ordering::Greater,
        (None, None)       => Ordering::Equal,
    };
    by_time.then_with(|| a.record.activation_key.cmp(&b.record.activation_key))
}
