//! Seeded synthetic activations.
//!
//! Rows look like real dashboard exports: field names drift between
//! aliases and casing, segments use local synonyms, a share of mobile
//! lines are ported in, and roughly one row in thirty is malformed.
//! Same (seed, count, month) → same rows.

use super::{RecordFilter, RecordSource};
use crate::{
    error::EngineResult,
    record::RawRow,
    rng::{RngStream, SeededRng},
    types::canonical_token,
};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

/// (category, bucket, scope) as a source query would spell them.
const CATALOGUE: &[(&str, &str, &str)] = &[
    ("Fisso", "fisso", "TLC"),
    ("FISSO", "Fibra FTTH", "TLC"),
    ("Mobile", "mobile ra", "TLC"),
    ("MOBILE", "MOBILE_BASE", "tlc"),
    ("mobile", "Mobile RA", "anticipo"),
    ("SIM", "sim base", "SIM_ASSIGNMENT"),
    ("Energia", "luce", "TLC"),
];

const SEGMENTS: &[&str] = &["RESIDENTIAL", "residenziale", "Consumer", "BUSINESS", "business", "Soho"];
const OPERATORS: &[&str] = &["Vodafone", "TIM", "WindTre", "Iliad", "ho.", "Kena"];
const DEALERS: &[&str] = &["D-001", "D-002", "D-003"];
const AGENTS: &[&str] = &["Rossi", "Bianchi", "Esposito", "Colombo"];

const KEY_FIELDS: &[&str] = &["activationKey", "IdAttivazione", "codiceAttivazione"];
const QTY_FIELDS: &[&str] = &["quantity", "qty", "Quantita"];
const DATE_FIELDS: &[&str] = &["occurredAt", "dataAttivazione"];

pub struct SyntheticSource {
    count: usize,
    seed:  u64,
    year:  i32,
    month: u32,
}

impl SyntheticSource {
    pub fn new(count: usize, seed: u64) -> Self {
        Self {
            count,
            seed,
            year: 2024,
            month: 5,
        }
    }

    /// Month the generated timestamps fall in.
    pub fn in_month(mut self, year: i32, month: u32) -> Self {
        self.year = year;
        self.month = month;
        self
    }

    pub fn generate(&self) -> Vec<RawRow> {
        let mut rows_rng = SeededRng::new(self.seed, RngStream::Rows);
        let mut defect_rng = SeededRng::new(self.seed, RngStream::Defects);
        let mut time_rng = SeededRng::new(self.seed, RngStream::Timestamps);

        let month_start = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0));

        (0..self.count)
            .map(|i| {
                let mut row = RawRow::new();
                let pick = |rng: &mut SeededRng, items: &[&str]| -> String {
                    rng.pick(items).copied().unwrap_or_default().to_string()
                };

                let key_field = pick(&mut rows_rng, KEY_FIELDS);
                row.insert(key_field, json!(format!("SYN-{:08x}-{i:05}", self.seed as u32)));

                let segment = pick(&mut rows_rng, SEGMENTS);
                row.insert(
                    if rows_rng.chance(0.5) { "segment" } else { "Segmento" }.into(),
                    json!(segment),
                );

                let (category, bucket, scope) = *rows_rng
                    .pick(CATALOGUE)
                    .unwrap_or(&CATALOGUE[0]);
                row.insert("categoria".into(), json!(category));
                row.insert(
                    if rows_rng.chance(0.5) { "productBucket" } else { "bucket" }.into(),
                    json!(bucket),
                );
                row.insert(
                    if rows_rng.chance(0.5) { "scope" } else { "ambito" }.into(),
                    json!(scope),
                );

                let quantity = if bucket.eq_ignore_ascii_case("sim base") {
                    rows_rng.range(1, 10)
                } else if rows_rng.chance(0.85) {
                    1
                } else {
                    rows_rng.range(2, 5)
                };
                let qty_field = pick(&mut rows_rng, QTY_FIELDS);
                let qty_value = if rows_rng.chance(0.3) {
                    json!(quantity.to_string())
                } else {
                    json!(quantity)
                };
                row.insert(qty_field, qty_value);

                if canonical_token(bucket).ends_with("_RA") && rows_rng.chance(0.7) {
                    row.insert("ricaricaAutomatica".into(), json!(if rows_rng.chance(0.5) { "SI" } else { "1" }));
                }
                if category.eq_ignore_ascii_case("fisso") && rows_rng.chance(0.2) {
                    row.insert("isConvergence".into(), json!(true));
                }
                if category.eq_ignore_ascii_case("mobile") && rows_rng.chance(0.3) {
                    row.insert("operatoreProvenienza".into(), json!(pick(&mut rows_rng, OPERATORS)));
                }

                if let Some(start) = month_start {
                    let offset = Duration::seconds(time_rng.below(28 * 24 * 3600) as i64);
                    let field = pick(&mut time_rng, DATE_FIELDS);
                    row.insert(field, json!((start + offset).format("%Y-%m-%d %H:%M:%S").to_string()));
                }
                row.insert("idDealer".into(), json!(pick(&mut rows_rng, DEALERS)));
                row.insert("agente".into(), json!(pick(&mut rows_rng, AGENTS)));
                row.insert("codiceContratto".into(), json!(format!("CTR-{:06}", rows_rng.below(1_000_000))));

                if defect_rng.chance(1.0 / 30.0) {
                    inject_defect(&mut row, &mut defect_rng);
                }
                row
            })
            .collect()
    }
}

/// Break one thing about a row the way real exports break.
fn inject_defect(row: &mut RawRow, rng: &mut SeededRng) {
    match rng.below(3) {
        0 => {
            row.remove("segment");
            row.remove("Segmento");
        }
        1 => {
            for field in ["scope", "ambito"] {
                if row.contains_key(field) {
                    row.insert(field.into(), Value::String("BONUS".into()));
                }
            }
        }
        _ => {
            for field in QTY_FIELDS {
                if row.contains_key(*field) {
                    row.insert((*field).into(), Value::String("n/d".into()));
                }
            }
        }
    }
}

impl RecordSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, filter: &RecordFilter) -> EngineResult<Vec<RawRow>> {
        let rows: Vec<RawRow> = self
            .generate()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        log::info!(
            "source: generated {} rows (seed {}), {} kept for {}",
            self.count,
            self.seed,
            rows.len(),
            filter.describe()
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_rows() {
        assert_eq!(SyntheticSource::new(50, 9).generate(), SyntheticSource::new(50, 9).generate());
        assert_ne!(SyntheticSource::new(50, 9).generate(), SyntheticSource::new(50, 10).generate());
    }

    #[test]
    fn rows_fall_in_the_requested_month() {
        let source = SyntheticSource::new(40, 3).in_month(2023, 11);
        let filter = RecordFilter::for_period(crate::source::Period::Month { year: 2023, month: 11 });
        assert_eq!(source.fetch(&filter).unwrap().len(), 40);
    }
}
