//! Aggregator — rolls priced lines up into
//! root → segment → category → bucket → scope.
//!
//! Design:
//!   - One streaming pass fills nested `BTreeMap`s keyed by
//!     segment → category → bucket → scope. Only leaves accumulate lines.
//!   - Ancestors are built bottom-up by summing their children, never by
//!     re-reading lines, so parent == Σ children holds by construction.
//!   - The scope rollup is a second, independent reduction over the same
//!     lines. It is not derived from the tree.
//!   - `verify` re-checks both views against each other and against the
//!     lines; a failure is an `AggregationInvariant` error.

use crate::{
    error::{EngineError, EngineResult},
    pricer::PricedRecord,
    types::{canonical_token, ActivationKey, Amount, Scope, Segment},
};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLevel {
    Root,
    Segment,
    Category,
    Bucket,
    Scope,
}

/// Address of a node in the rollup tree. Components are a prefix: a path
/// with a bucket always has a segment and a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath {
    pub segment:  Option<Segment>,
    pub category: Option<String>,
    pub bucket:   Option<String>,
    pub scope:    Option<Scope>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segment(segment: Segment) -> Self {
        Self {
            segment: Some(segment),
            ..Self::default()
        }
    }

    pub fn category(segment: Segment, category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::segment(segment)
        }
    }

    pub fn bucket(segment: Segment, category: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            ..Self::category(segment, category)
        }
    }

    pub fn leaf(
        segment: Segment,
        category: impl Into<String>,
        bucket: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            scope: Some(scope),
            ..Self::bucket(segment, category, bucket)
        }
    }

    pub fn level(&self) -> NodeLevel {
        match (&self.segment, &self.category, &self.bucket, &self.scope) {
            (None, ..)                => NodeLevel::Root,
            (Some(_), None, ..)       => NodeLevel::Segment,
            (Some(_), Some(_), None, _) => NodeLevel::Category,
            (Some(_), Some(_), Some(_), None) => NodeLevel::Bucket,
            (Some(_), Some(_), Some(_), Some(_)) => NodeLevel::Scope,
        }
    }

    fn components(&self) -> Vec<String> {
        let mut parts = Vec::with_capacity(4);
        if let Some(segment) = self.segment {
            parts.push(segment.as_str().to_string());
        }
        if let Some(category) = &self.category {
            parts.push(category.clone());
        }
        if let Some(bucket) = &self.bucket {
            parts.push(bucket.clone());
        }
        if let Some(scope) = self.scope {
            parts.push(scope.as_str().to_string());
        }
        parts
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.components();
        if parts.is_empty() {
            f.write_str("/")
        } else {
            f.write_str(&parts.join("/"))
        }
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses `SEGMENT[/CATEGORY[/BUCKET[/SCOPE]]]`; an empty string or `/` is the root.
impl FromStr for NodePath {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| EngineError::InvalidNodePath {
            path:   s.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = s.trim().trim_matches('/').split('/').map(str::trim).collect();
        if parts.len() == 1 && parts[0].is_empty() {
            return Ok(Self::root());
        }
        if parts.len() > 4 {
            return Err(invalid("more than four components"));
        }

        let mut path = Self::root();
        path.segment = Some(Segment::parse(parts[0]).ok_or_else(|| invalid("unknown segment"))?);
        if let Some(category) = parts.get(1) {
            path.category = Some(canonical_token(category));
        }
        if let Some(bucket) = parts.get(2) {
            path.bucket = Some(canonical_token(bucket));
        }
        if let Some(scope) = parts.get(3) {
            path.scope = Some(Scope::parse(scope).ok_or_else(|| invalid("unknown scope"))?);
        }
        Ok(path)
    }
}

/// One node of the rollup tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationNode {
    pub level:            NodeLevel,
    pub key:              String,
    pub path:             NodePath,
    pub total_amount:     Amount,
    pub total_quantity:   u64,
    pub line_count:       usize,
    /// Every activation under this node, leaves first in key order.
    pub member_line_refs: Vec<ActivationKey>,
    pub children:         Vec<AggregationNode>,
}

impl AggregationNode {
    /// Children are ordered by key ascending at every level.
    fn from_children(level: NodeLevel, key: String, path: NodePath, mut children: Vec<AggregationNode>) -> Self {
        children.sort_by(|a, b| a.key.cmp(&b.key));
        let mut node = Self {
            level,
            key,
            path,
            total_amount: Decimal::ZERO,
            total_quantity: 0,
            line_count: 0,
            member_line_refs: Vec::new(),
            children: Vec::new(),
        };
        for child in &children {
            node.total_amount += child.total_amount;
            node.total_quantity = node.total_quantity.saturating_add(child.total_quantity);
            node.line_count += child.line_count;
            node.member_line_refs.extend(child.member_line_refs.iter().cloned());
        }
        node.children = children;
        node
    }

    pub fn is_leaf(&self) -> bool {
        self.level == NodeLevel::Scope
    }

    pub fn child(&self, key: &str) -> Option<&AggregationNode> {
        self.children.iter().find(|c| c.key == key)
    }

    /// Walk down from this node (expected to be the root) to `path`.
    pub fn find(&self, path: &NodePath) -> Option<&AggregationNode> {
        path.components()
            .iter()
            .try_fold(self, |node, key| node.child(key))
    }

    /// Pre-order walk over this node and all of its descendants.
    pub fn walk<'n>(&'n self, visit: &mut dyn FnMut(&'n AggregationNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Totals for one scope across every segment/category/bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeTotal {
    pub total_amount:   Amount,
    pub total_quantity: u64,
    pub line_count:     usize,
}

/// The two summary views of one computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub tree:         AggregationNode,
    pub scope_rollup: BTreeMap<Scope, ScopeTotal>,
}

#[derive(Default)]
struct LeafAcc {
    amount:   Amount,
    quantity: u64,
    refs:     Vec<ActivationKey>,
}

type ScopeMap  = BTreeMap<Scope, LeafAcc>;
type BucketMap = BTreeMap<String, ScopeMap>;
type CategoryMap = BTreeMap<String, BucketMap>;

pub struct Aggregator;

impl Aggregator {
    pub fn aggregate(priced: &[PricedRecord]) -> Aggregation {
        let tree = Self::build_tree(priced);
        let scope_rollup = Self::scope_rollup(priced);
        log::info!(
            "aggregate: {} lines into {} segments, grand total {}",
            tree.line_count,
            tree.children.len(),
            tree.total_amount
        );
        Aggregation { tree, scope_rollup }
    }

    fn build_tree(priced: &[PricedRecord]) -> AggregationNode {
        // ── Single streaming pass: leaves only ─────────────────────
        let mut grouped: BTreeMap<Segment, CategoryMap> = BTreeMap::new();
        for item in priced {
            let record = &item.record;
            let leaf = grouped
                .entry(record.segment)
                .or_default()
                .entry(record.category.clone())
                .or_default()
                .entry(record.product_bucket.clone())
                .or_default()
                .entry(record.scope)
                .or_default();
            leaf.amount += item.line.total_amount();
            leaf.quantity = leaf.quantity.saturating_add(item.line.quantity());
            leaf.refs.push(item.record.activation_key.clone());
        }

        // ── Bottom-up: every ancestor is the sum of its children ──
        let segments = grouped
            .into_iter()
            .map(|(segment, categories)| {
                let category_nodes = categories
                    .into_iter()
                    .map(|(category, buckets)| {
                        let bucket_nodes = buckets
                            .into_iter()
                            .map(|(bucket, scopes)| {
                                let leaves = scopes
                                    .into_iter()
                                    .map(|(scope, acc)| AggregationNode {
                                        level:            NodeLevel::Scope,
                                        key:              scope.as_str().to_string(),
                                        path:             NodePath::leaf(segment, category.clone(), bucket.clone(), scope),
                                        total_amount:     acc.amount,
                                        total_quantity:   acc.quantity,
                                        line_count:       acc.refs.len(),
                                        member_line_refs: acc.refs,
                                        children:         Vec::new(),
                                    })
                                    .collect();
                                AggregationNode::from_children(
                                    NodeLevel::Bucket,
                                    bucket.clone(),
                                    NodePath::bucket(segment, category.clone(), bucket),
                                    leaves,
                                )
                            })
                            .collect();
                        AggregationNode::from_children(
                            NodeLevel::Category,
                            category.clone(),
                            NodePath::category(segment, category),
                            bucket_nodes,
                        )
                    })
                    .collect();
                AggregationNode::from_children(
                    NodeLevel::Segment,
                    segment.as_str().to_string(),
                    NodePath::segment(segment),
                    category_nodes,
                )
            })
            .collect();

        AggregationNode::from_children(NodeLevel::Root, String::new(), NodePath::root(), segments)
    }

    fn scope_rollup(priced: &[PricedRecord]) -> BTreeMap<Scope, ScopeTotal> {
        let mut rollup: BTreeMap<Scope, ScopeTotal> =
            Scope::ALL.iter().map(|s| (*s, ScopeTotal::default())).collect();
        for item in priced {
            let total = rollup.entry(item.record.scope).or_default();
            total.total_amount += item.line.total_amount();
            total.total_quantity = total.total_quantity.saturating_add(item.line.quantity());
            total.line_count += 1;
        }
        rollup
    }
}

impl Aggregation {
    pub fn grand_total(&self) -> Amount {
        self.tree.total_amount
    }

    /// Self-check: every node equals the sum of its children (leaves: of
    /// their member lines) and the scope rollup agrees with the tree.
    pub fn verify(&self, priced: &[PricedRecord], epsilon: Amount) -> EngineResult<()> {
        let line_totals: HashMap<&str, Amount> = priced
            .iter()
            .map(|p| (p.line.activation_key(), p.line.total_amount()))
            .collect();

        let mut failure: Option<EngineError> = None;
        self.tree.walk(&mut |node| {
            if failure.is_some() {
                return;
            }
            let children_total: Amount = if node.is_leaf() {
                node.member_line_refs
                    .iter()
                    .map(|key| line_totals.get(key.as_str()).copied().unwrap_or(Decimal::ZERO))
                    .sum()
            } else {
                node.children.iter().map(|c| c.total_amount).sum()
            };
            if (node.total_amount - children_total).abs() > epsilon {
                failure = Some(EngineError::AggregationInvariant {
                    path: node.path.to_string(),
                    node_total: node.total_amount,
                    children_total,
                });
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let rollup_total: Amount = self.scope_rollup.values().map(|t| t.total_amount).sum();
        if (self.tree.total_amount - rollup_total).abs() > epsilon {
            return Err(EngineError::AggregationInvariant {
                path: "scope-rollup".into(),
                node_total: self.tree.total_amount,
                children_total: rollup_total,
            });
        }
        Ok(())
    }
}
