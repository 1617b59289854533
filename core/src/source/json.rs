use super::{RecordFilter, RecordSource};
use crate::{
    error::{EngineError, EngineResult},
    record::RawRow,
};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Rows from a JSON file holding an array of objects (an export of a
/// dashboard query). Non-object entries are skipped with a warning.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Parse rows from an in-memory document.
    pub fn parse_rows(content: &str) -> EngineResult<Vec<RawRow>> {
        let document: Value = serde_json::from_str(content)?;
        let items = match document {
            Value::Array(items) => items,
            // `{ "rows": [...] }` is what the export endpoint wraps them in.
            Value::Object(mut map) => match map.remove("rows") {
                Some(Value::Array(items)) => items,
                _ => return Err(not_rows("object without a 'rows' array")),
            },
            _ => return Err(not_rows("expected a JSON array of rows")),
        };

        let mut rows = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(map) => rows.push(map),
                other => log::warn!("source: entry {i} is not an object ({other}), skipped"),
            }
        }
        Ok(rows)
    }
}

fn not_rows(reason: &str) -> EngineError {
    EngineError::Source {
        name:   "json".into(),
        reason: reason.into(),
    }
}

impl RecordSource for JsonFileSource {
    fn name(&self) -> &str {
        "json"
    }

    fn fetch(&self, filter: &RecordFilter) -> EngineResult<Vec<RawRow>> {
        let content = std::fs::read_to_string(&self.path)?;
        let rows = Self::parse_rows(&content)?;
        let total = rows.len();
        let kept: Vec<RawRow> = rows.into_iter().filter(|r| filter.matches(r)).collect();
        log::info!(
            "source: {} rows from {}, {} kept for {}",
            total,
            self.path.display(),
            kept.len(),
            filter.describe()
        );
        Ok(kept)
    }
}
