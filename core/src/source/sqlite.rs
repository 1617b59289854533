//! SQLite record source.
//!
//! RULE: this is the only place the engine crate talks SQL. The filter is
//! compiled into a parameterised WHERE clause; identifiers (table and
//! column names) cannot be bound, so they are validated instead.

use super::{RecordFilter, RecordSource};
use crate::{
    error::{EngineError, EngineResult},
    record::RawRow,
};
use rusqlite::{types::ValueRef, Connection, ToSql};
use serde_json::{Number, Value};

/// Columns the filter is pushed down to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteColumns {
    pub occurred_at: String,
    pub dealer:      String,
    pub agent:       String,
}

impl Default for SqliteColumns {
    fn default() -> Self {
        Self {
            occurred_at: "occurredAt".into(),
            dealer:      "dealer".into(),
            agent:       "agent".into(),
        }
    }
}

pub struct SqliteSource {
    conn:    Connection,
    table:   String,
    columns: SqliteColumns,
}

impl SqliteSource {
    pub fn open(path: &str, table: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, table)
    }

    /// Wrap an existing connection (tests use `Connection::open_in_memory`).
    pub fn from_connection(conn: Connection, table: &str) -> EngineResult<Self> {
        check_identifier(table)?;
        Ok(Self {
            conn,
            table: table.to_string(),
            columns: SqliteColumns::default(),
        })
    }

    pub fn with_columns(mut self, columns: SqliteColumns) -> EngineResult<Self> {
        check_identifier(&columns.occurred_at)?;
        check_identifier(&columns.dealer)?;
        check_identifier(&columns.agent)?;
        self.columns = columns;
        Ok(self)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query(&self, filter: &RecordFilter) -> EngineResult<(String, Vec<String>)> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(period) = &filter.period {
            let (from, to) = period.bounds().ok_or_else(|| EngineError::Source {
                name:   self.name().to_string(),
                reason: format!("invalid period {period}"),
            })?;
            clauses.push(format!(
                "date(\"{}\") BETWEEN ?{} AND ?{}",
                self.columns.occurred_at,
                params.len() + 1,
                params.len() + 2
            ));
            params.push(from.format("%Y-%m-%d").to_string());
            params.push(to.format("%Y-%m-%d").to_string());
        }
        if let Some(dealer) = &filter.dealer {
            clauses.push(format!(
                "lower(\"{}\") = lower(?{})",
                self.columns.dealer,
                params.len() + 1
            ));
            params.push(dealer.trim().to_string());
        }
        if let Some(agent) = &filter.agent {
            clauses.push(format!(
                "lower(\"{}\") = lower(?{})",
                self.columns.agent,
                params.len() + 1
            ));
            params.push(agent.trim().to_string());
        }

        let mut sql = format!("SELECT * FROM \"{}\"", self.table);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid ASC");
        Ok((sql, params))
    }
}

impl RecordSource for SqliteSource {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn fetch(&self, filter: &RecordFilter) -> EngineResult<Vec<RawRow>> {
        let (sql, params) = self.query(filter)?;
        log::debug!("source: {sql}");

        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let bound: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        let rows = stmt
            .query_map(bound.as_slice(), |row| {
                let mut raw = RawRow::new();
                for (i, name) in names.iter().enumerate() {
                    raw.insert(name.clone(), to_json(row.get_ref(i)?));
                }
                Ok(raw)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "source: {} rows from table {} for {}",
            rows.len(),
            self.table,
            filter.describe()
        );
        Ok(rows)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

fn check_identifier(name: &str) -> EngineResult<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(EngineError::Source {
            name:   "sqlite".into(),
            reason: format!("'{name}' is not a plain identifier"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Period;

    #[test]
    fn rejects_odd_identifiers() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(SqliteSource::from_connection(conn, "attivazioni; DROP").is_err());
    }

    #[test]
    fn where_clause_numbers_its_parameters() {
        let conn = Connection::open_in_memory().unwrap();
        let source = SqliteSource::from_connection(conn, "attivazioni").unwrap();
        let filter = RecordFilter::for_period(Period::Month { year: 2024, month: 5 })
            .with_agent("Rossi");
        let (sql, params) = source.query(&filter).unwrap();
        assert!(sql.contains("BETWEEN ?1 AND ?2"), "{sql}");
        assert!(sql.contains("lower(?3)"), "{sql}");
        assert_eq!(params, vec!["2024-05-01", "2024-05-31", "Rossi"]);
    }
}
