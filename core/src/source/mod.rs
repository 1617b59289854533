//! Record sources — the collaborators that turn a request filter into
//! raw rows. The engine never filters; a source returns exactly the rows
//! that belong to the request.

mod json;
mod sqlite;
mod synthetic;

pub use json::JsonFileSource;
pub use sqlite::{SqliteColumns, SqliteSource};
pub use synthetic::SyntheticSource;

use crate::{
    error::EngineResult,
    normalizer::{field_text, field_timestamp, CanonicalField},
    record::RawRow,
};
use chrono::{NaiveDate, NaiveDateTime};

pub trait RecordSource {
    fn name(&self) -> &str;

    fn fetch(&self, filter: &RecordFilter) -> EngineResult<Vec<RawRow>>;
}

/// A reporting period. Both ends of a range are inclusive dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Month { year: i32, month: u32 },
    Range { from: NaiveDate, to: NaiveDate },
}

impl Period {
    /// `YYYY-MM`.
    pub fn parse_month(text: &str) -> Option<Self> {
        let (year, month) = text.trim().split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self::Month { year, month })
    }

    /// First and last day covered, inclusive.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match *self {
            Self::Range { from, to } => Some((from, to)),
            Self::Month { year, month } => {
                let first = NaiveDate::from_ymd_opt(year, month, 1)?;
                let next = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)?
                };
                Some((first, next.pred_opt()?))
            }
        }
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.bounds()
            .is_some_and(|(from, to)| (from..=to).contains(&at.date()))
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            Self::Range { from, to } => write!(f, "{from}..{to}"),
        }
    }
}

/// Which rows a request covers. Empty filter = every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub period: Option<Period>,
    pub dealer: Option<String>,
    pub agent:  Option<String>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_period(period: Period) -> Self {
        Self {
            period: Some(period),
            ..Self::default()
        }
    }

    pub fn with_dealer(mut self, dealer: impl Into<String>) -> Self {
        self.dealer = Some(dealer.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// In-memory filter used by sources that cannot push it down. A row
    /// without a readable timestamp never matches a period filter.
    pub fn matches(&self, row: &RawRow) -> bool {
        if let Some(period) = &self.period {
            match field_timestamp(row, CanonicalField::OccurredAt) {
                Some(at) if period.contains(at) => {}
                _ => return false,
            }
        }
        let same = |wanted: &Option<String>, field: CanonicalField| match wanted {
            None => true,
            Some(wanted) => field_text(row, field)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case(wanted.trim())),
        };
        same(&self.dealer, CanonicalField::Dealer) && same(&self.agent, CanonicalField::Agent)
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(period) = &self.period {
            parts.push(format!("period={period}"));
        }
        if let Some(dealer) = &self.dealer {
            parts.push(format!("dealer={dealer}"));
        }
        if let Some(agent) = &self.agent {
            parts.push(format!("agent={agent}"));
        }
        if parts.is_empty() {
            "all rows".into()
        } else {
            parts.join(" ")
        }
    }
}
