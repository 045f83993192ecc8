//! Tabular payloads
//!
//! Upstream data arrives as rows of named fields with mixed value types.
//! `Table` is the in-memory shape every cache backend stores and returns.

use crate::error::{AppError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    /// Nested object or array as handed over by the upstream source.
    /// Never persisted as-is; see [`Table::sanitize`].
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Replace cells that cannot round-trip through the persisted format
    fn sanitized(self) -> Value {
        match self {
            Value::Float(f) if !f.is_finite() => Value::Null,
            Value::Json(serde_json::Value::Null) => Value::Null,
            Value::Json(serde_json::Value::String(s)) => Value::Text(s),
            Value::Json(other) => Value::Text(other.to_string()),
            v => v,
        }
    }

    fn needs_sanitizing(&self) -> bool {
        matches!(self, Value::Json(_)) || matches!(self, Value::Float(f) if !f.is_finite())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Ordered collection of named-field records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from parts, rejecting ragged rows
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut table = Self {
            columns,
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(AppError::Validation(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Iterate one column top to bottom
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Whether any cell would be altered by [`Table::sanitize`]
    pub fn needs_sanitizing(&self) -> bool {
        self.rows.iter().flatten().any(Value::needs_sanitizing)
    }

    /// Normalize nested values to text and non-finite floats to null
    pub fn sanitize(self) -> Table {
        let rows = self
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::sanitized).collect())
            .collect();
        Table {
            columns: self.columns,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        let mut table = Table::new(["symbol", "close", "volume"]);
        table
            .push_row(vec!["600036".into(), 35.2.into(), 1000i64.into()])
            .unwrap();
        table
            .push_row(vec!["000001".into(), 11.8.into(), Value::Null])
            .unwrap();
        table
    }

    #[test]
    fn test_ragged_row_rejected() {
        let mut table = Table::new(["a", "b"]);
        assert!(table.push_row(vec![Value::Int(1)]).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_column_access() {
        let table = sample();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "symbol").and_then(Value::as_str), Some("000001"));
        let closes: Vec<f64> = table
            .column("close")
            .unwrap()
            .filter_map(Value::as_f64)
            .collect();
        assert_eq!(closes, vec![35.2, 11.8]);
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_sanitize_nested_and_non_finite() {
        let mut table = Table::new(["info", "ratio", "name"]);
        table
            .push_row(vec![
                Value::Json(json!({"province": "广东"})),
                Value::Float(f64::NAN),
                Value::Json(json!("平安银行")),
            ])
            .unwrap();
        assert!(table.needs_sanitizing());

        let clean = table.sanitize();
        assert!(!clean.needs_sanitizing());
        assert_eq!(
            clean.get(0, "info"),
            Some(&Value::Text(r#"{"province":"广东"}"#.to_string()))
        );
        assert_eq!(clean.get(0, "ratio"), Some(&Value::Null));
        assert_eq!(clean.get(0, "name").and_then(Value::as_str), Some("平安银行"));
    }
}
