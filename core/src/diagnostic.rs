//! Row-level problems collected during a run.
//!
//! Nothing in here is fatal. A summary always carries its diagnostics so
//! a report with skipped rows says so.

use crate::{
    error::ClassificationError,
    normalizer::RowRejection,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStage {
    Normalize,
    Classify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub stage:          DiagnosticStage,
    /// Position of the row in the raw input.
    pub row_index:      Option<usize>,
    pub activation_key: Option<String>,
    pub code:           &'static str,
    pub message:        String,
}

impl Diagnostic {
    pub fn from_rejection(rejection: &RowRejection) -> Self {
        Self {
            stage:          DiagnosticStage::Normalize,
            row_index:      Some(rejection.row_index),
            activation_key: rejection.activation_key.clone(),
            code:           rejection.error.code(),
            message:        rejection.error.to_string(),
        }
    }

    pub fn from_classification(error: &ClassificationError, row_index: usize) -> Self {
        Self {
            stage:          DiagnosticStage::Classify,
            row_index:      Some(row_index),
            activation_key: Some(error.activation_key.clone()),
            code:           error.reason.code(),
            message:        error.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub skipped_rows:          usize,
    pub normalization_errors:  usize,
    pub classification_errors: usize,
    pub entries:               Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.stage {
            DiagnosticStage::Normalize => self.normalization_errors += 1,
            DiagnosticStage::Classify  => self.classification_errors += 1,
        }
        self.skipped_rows += 1;
        self.entries.push(diagnostic);
    }

    /// True when every input row made it into the totals.
    pub fn is_complete(&self) -> bool {
        self.skipped_rows == 0
    }

    pub fn by_code(&self, code: &str) -> impl Iterator<Item = &Diagnostic> {
        let code = code.to_string();
        self.entries.iter().filter(move |d| d.code == code)
    }
}
