//! Record normalizer — turns heterogeneous raw rows into `ActivationRecord`s.
//!
//! Source queries disagree on field names and casing (`RagioneSociale` vs
//! `ragioneSociale`, `qty` vs `quantita`). Every accepted synonym lives in
//! `FIELD_ALIASES`; lookup is case-insensitive and the first alias present
//! with a non-blank value wins.
//!
//! A bad row never fails the batch: it is dropped and reported as a
//! `RowRejection`.

use crate::{
    config::{EngineConfig, NumericPolicy},
    error::NormalizationError,
    record::{ActivationRecord, RawRow, RecordFlags},
    types::{canonical_token, Flag, Scope, Segment},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Canonical fields of an `ActivationRecord` that are read from raw rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    ActivationKey,
    Segment,
    Category,
    ProductBucket,
    Scope,
    Quantity,
    AutoRecharge,
    Convergence,
    MnpPenalized,
    MnpDiscounted,
    MnpOperator,
    OccurredAt,
    ExternalRef,
    Dealer,
    Agent,
}

impl CanonicalField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActivationKey => "activationKey",
            Self::Segment       => "segment",
            Self::Category      => "category",
            Self::ProductBucket => "productBucket",
            Self::Scope         => "scope",
            Self::Quantity      => "quantity",
            Self::AutoRecharge  => "isAutoRecharge",
            Self::Convergence   => "isConvergence",
            Self::MnpPenalized  => "mnpOperatorPenalized",
            Self::MnpDiscounted => "mnpOperatorDiscounted",
            Self::MnpOperator   => "mnpOperator",
            Self::OccurredAt    => "occurredAt",
            Self::ExternalRef   => "externalRef",
            Self::Dealer        => "dealer",
            Self::Agent         => "agent",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        FIELD_ALIASES
            .iter()
            .find(|(field, _)| field == self)
            .map(|(_, aliases)| *aliases)
            .unwrap_or(&[])
    }
}

/// Accepted source-field names per canonical field, in priority order.
pub const FIELD_ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::ActivationKey,
        &["activationKey", "activation_key", "idAttivazione", "codiceAttivazione", "id"],
    ),
    (
        CanonicalField::Segment,
        &["segment", "segmento", "tipoCliente", "customerType"],
    ),
    (
        CanonicalField::Category,
        &["category", "categoria", "famiglia", "productFamily"],
    ),
    (
        CanonicalField::ProductBucket,
        &["productBucket", "product_bucket", "bucket", "prodotto", "tipologia"],
    ),
    (CanonicalField::Scope, &["scope", "ambito", "pool"]),
    (
        CanonicalField::Quantity,
        &["quantity", "qty", "quantita", "quantità", "numeroSim", "pezzi"],
    ),
    (
        CanonicalField::AutoRecharge,
        &["isAutoRecharge", "autoRecharge", "ricaricaAutomatica", "ra"],
    ),
    (
        CanonicalField::Convergence,
        &["isConvergence", "convergence", "convergenza"],
    ),
    (
        CanonicalField::MnpPenalized,
        &["mnpOperatorPenalized", "mnpPenalizzato"],
    ),
    (
        CanonicalField::MnpDiscounted,
        &["mnpOperatorDiscounted", "mnpScontato"],
    ),
    (
        CanonicalField::MnpOperator,
        &["mnpOperator", "operatoreMnp", "operatoreProvenienza", "donatingOperator"],
    ),
    (
        CanonicalField::OccurredAt,
        &["occurredAt", "dataAttivazione", "activationDate", "data"],
    ),
    (
        CanonicalField::ExternalRef,
        &["externalRef", "codiceContratto", "contractCode", "pratica"],
    ),
    (
        CanonicalField::Dealer,
        &["dealer", "idDealer", "dealerId", "ragioneSociale"],
    ),
    (CanonicalField::Agent, &["agent", "agente", "nomeAgente"]),
];

/// A row that did not make it into the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    pub row_index:      usize,
    pub activation_key: Option<String>,
    pub error:          NormalizationError,
}

/// Output of normalizing one batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records:     Vec<ActivationRecord>,
    /// Raw input position of each entry in `records`, same order.
    pub row_indices: Vec<usize>,
    pub rejected:    Vec<RowRejection>,
}

pub struct Normalizer<'a> {
    config: &'a EngineConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn normalize_batch(&self, rows: &[RawRow]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());

        for (row_index, row) in rows.iter().enumerate() {
            let result = self.normalize_row(row).and_then(|record| {
                if seen.insert(record.activation_key.clone()) {
                    Ok(record)
                } else {
                    Err(NormalizationError::DuplicateKey {
                        key: record.activation_key,
                    })
                }
            });

            match result {
                Ok(record) => {
                    batch.records.push(record);
                    batch.row_indices.push(row_index);
                }
                Err(error) => {
                    let activation_key = RowView::new(row).text(CanonicalField::ActivationKey);
                    log::warn!(
                        "normalize: dropped row {row_index} ({}): {error}",
                        activation_key.as_deref().unwrap_or("no key")
                    );
                    batch.rejected.push(RowRejection {
                        row_index,
                        activation_key,
                        error,
                    });
                }
            }
        }

        log::info!(
            "normalize: {} rows in, {} records out, {} rejected",
            rows.len(),
            batch.records.len(),
            batch.rejected.len()
        );
        batch
    }

    pub fn normalize_row(&self, row: &RawRow) -> Result<ActivationRecord, NormalizationError> {
        let view = RowView::new(row);

        let activation_key = view
            .text(CanonicalField::ActivationKey)
            .ok_or(NormalizationError::MissingField { field: "activationKey" })?;

        let segment_raw = view
            .text(CanonicalField::Segment)
            .ok_or(NormalizationError::MissingField { field: "segment" })?;
        let segment = Segment::parse(&segment_raw).ok_or(NormalizationError::InvalidValue {
            field: "segment",
            value: segment_raw,
        })?;

        let scope_raw = view
            .text(CanonicalField::Scope)
            .ok_or(NormalizationError::MissingField { field: "scope" })?;
        let scope = Scope::parse(&scope_raw).ok_or(NormalizationError::InvalidValue {
            field: "scope",
            value: scope_raw,
        })?;

        let category = view
            .text(CanonicalField::Category)
            .map(|c| canonical_token(&c))
            .unwrap_or_default();
        let original_bucket = view.text(CanonicalField::ProductBucket);
        let product_bucket = original_bucket
            .as_deref()
            .map(canonical_token)
            .unwrap_or_default();

        let quantity = self.quantity(&view, &activation_key)?;
        if quantity > self.config.max_quantity {
            return Err(NormalizationError::QuantityOutOfRange {
                quantity,
                max: self.config.max_quantity,
            });
        }

        let mnp_operator = view
            .text(CanonicalField::MnpOperator)
            .map(|op| op.to_uppercase());

        let mut flags = RecordFlags {
            is_auto_recharge:        view.flag(CanonicalField::AutoRecharge),
            is_convergence:          view.flag(CanonicalField::Convergence),
            mnp_operator_penalized:  view.flag(CanonicalField::MnpPenalized),
            mnp_operator_discounted: view.flag(CanonicalField::MnpDiscounted),
        };
        if let Some(op) = mnp_operator.as_deref() {
            if self.config.is_penalized_operator(op) {
                flags.set(Flag::MnpPenalized, true);
            }
            if self.config.is_discounted_operator(op) {
                flags.set(Flag::MnpDiscounted, true);
            }
        }

        let occurred_at = view.value(CanonicalField::OccurredAt).and_then(|v| {
            let parsed = parse_timestamp(v);
            if parsed.is_none() {
                log::debug!("normalize: {activation_key} has unparsable timestamp {v}");
            }
            parsed
        });

        Ok(ActivationRecord {
            activation_key,
            segment,
            category,
            product_bucket,
            original_bucket,
            scope,
            quantity,
            flags,
            mnp_operator,
            occurred_at,
            external_ref: view.text(CanonicalField::ExternalRef),
            dealer:       view.text(CanonicalField::Dealer),
            agent:        view.text(CanonicalField::Agent),
        })
    }

    fn quantity(&self, view: &RowView<'_>, activation_key: &str) -> Result<u64, NormalizationError> {
        let Some(value) = view.value(CanonicalField::Quantity) else {
            return Ok(1);
        };
        match parse_count(value) {
            Some(n) => Ok(n),
            None => match self.config.numeric_policy {
                NumericPolicy::Lenient => {
                    log::warn!(
                        "normalize: {activation_key} quantity {value} is not a count, using 0"
                    );
                    Ok(0)
                }
                NumericPolicy::Strict => Err(NormalizationError::InvalidNumber {
                    field: "quantity",
                    value: value_to_text(value),
                }),
            },
        }
    }
}

/// Text of a canonical field, resolved through the alias table. Record
/// sources use this to filter rows before the engine sees them.
pub(crate) fn field_text(row: &RawRow, field: CanonicalField) -> Option<String> {
    RowView::new(row).text(field)
}

pub(crate) fn field_timestamp(row: &RawRow, field: CanonicalField) -> Option<NaiveDateTime> {
    RowView::new(row).value(field).and_then(parse_timestamp)
}

/// Case-insensitive view over one raw row.
struct RowView<'r> {
    by_lower: HashMap<String, &'r Value>,
}

impl<'r> RowView<'r> {
    fn new(row: &'r RawRow) -> Self {
        let mut by_lower = HashMap::with_capacity(row.len());
        for (key, value) in row {
            by_lower.entry(key.to_lowercase()).or_insert(value);
        }
        Self { by_lower }
    }

    /// First alias carrying a non-null, non-blank value.
    fn value(&self, field: CanonicalField) -> Option<&'r Value> {
        field.aliases().iter().find_map(|alias| {
            let value = *self.by_lower.get(&alias.to_lowercase())?;
            match value {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                _ => Some(value),
            }
        })
    }

    /// Value rendered as trimmed text; numeric ids are accepted as text.
    fn text(&self, field: CanonicalField) -> Option<String> {
        match self.value(field)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn flag(&self, field: CanonicalField) -> bool {
        self.value(field).is_some_and(parse_flag)
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Non-negative whole number, from a JSON number or numeric string.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.replace(',', ".")
                    .parse::<f64>()
                    .ok()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                    .map(|f| f as u64)
            })
        }
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y" | "si" | "sì" | "s" | "x"
        ),
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    DATE_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}
