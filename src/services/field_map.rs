//! Declarative column mappings
//!
//! Upstream tables use Chinese column headers. A [`FieldMap`] renames them
//! to the host platform's field names, coerces cell types and drops columns
//! the platform has no field for.

use crate::cache::table::{Table, Value};
use crate::error::{AppError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Float,
    Int,
    Date,
}

/// One renamed column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub source: &'static str,
    pub target: &'static str,
    pub kind: FieldKind,
}

const fn field(source: &'static str, target: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        source,
        target,
        kind,
    }
}

pub const DAILY_HISTORY_FIELDS: &[FieldSpec] = &[
    field("日期", "date", FieldKind::Date),
    field("股票代码", "symbol", FieldKind::Text),
    field("开盘", "open", FieldKind::Float),
    field("收盘", "close", FieldKind::Float),
    field("最高", "high", FieldKind::Float),
    field("最低", "low", FieldKind::Float),
    field("成交量", "volume", FieldKind::Int),
    field("成交额", "amount", FieldKind::Float),
    field("涨跌幅", "change_percent", FieldKind::Float),
    field("涨跌额", "change", FieldKind::Float),
];

pub const DAILY_HISTORY_DROPPED: &[&str] = &["振幅", "换手率"];

pub const QUOTE_SNAPSHOT_FIELDS: &[FieldSpec] = &[
    field("代码", "symbol", FieldKind::Text),
    field("名称", "name", FieldKind::Text),
    field("最新价", "last_price", FieldKind::Float),
    field("今开", "open", FieldKind::Float),
    field("最高", "high", FieldKind::Float),
    field("最低", "low", FieldKind::Float),
    field("涨跌幅", "change_percent", FieldKind::Float),
    field("涨跌额", "change", FieldKind::Float),
    field("成交量", "volume", FieldKind::Int),
    field("昨收", "prev_close", FieldKind::Float),
];

/// Validated rename/coerce/drop table
#[derive(Debug, Clone)]
pub struct FieldMap {
    fields: Vec<FieldSpec>,
    dropped: Vec<&'static str>,
}

impl FieldMap {
    /// Rejects duplicate sources or targets, empty names, and columns that
    /// are both mapped and dropped
    pub fn new(fields: &[FieldSpec], dropped: &[&'static str]) -> Result<Self> {
        let mut sources = HashSet::new();
        let mut targets = HashSet::new();

        for spec in fields {
            if spec.source.is_empty() || spec.target.is_empty() {
                return Err(AppError::Validation(format!("empty field name in {:?}", spec)));
            }
            if !sources.insert(spec.source) {
                return Err(AppError::Validation(format!("duplicate source column {}", spec.source)));
            }
            if !targets.insert(spec.target) {
                return Err(AppError::Validation(format!("duplicate target field {}", spec.target)));
            }
        }

        if let Some(col) = dropped.iter().find(|c| sources.contains(*c)) {
            return Err(AppError::Validation(format!("column {} is both mapped and dropped", col)));
        }

        Ok(Self {
            fields: fields.to_vec(),
            dropped: dropped.to_vec(),
        })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn spec_for(&self, source: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|s| s.source == source)
    }

    /// Rename, coerce and drop. Unmapped columns pass through unchanged;
    /// mapped columns absent from the input are simply absent from the output.
    pub fn apply(&self, table: &Table) -> Result<Table> {
        let plan: Vec<(usize, String, Option<FieldKind>)> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| !self.dropped.iter().any(|d| *d == name.as_str()))
            .map(|(idx, name)| match self.spec_for(name) {
                Some(spec) => (idx, spec.target.to_string(), Some(spec.kind)),
                None => (idx, name.clone(), None),
            })
            .collect();

        let mut seen = HashSet::new();
        for (_, name, _) in &plan {
            if !seen.insert(name.as_str()) {
                return Err(AppError::Validation(format!(
                    "renaming produces duplicate column {}",
                    name
                )));
            }
        }

        let mut out = Table::new(plan.iter().map(|(_, name, _)| name.clone()));
        for row in table.rows() {
            let mapped = plan
                .iter()
                .map(|(idx, _, kind)| match kind {
                    Some(kind) => coerce(&row[*idx], *kind),
                    None => row[*idx].clone(),
                })
                .collect();
            out.push_row(mapped)?;
        }
        Ok(out)
    }
}

pub fn daily_history_map() -> Result<FieldMap> {
    FieldMap::new(DAILY_HISTORY_FIELDS, DAILY_HISTORY_DROPPED)
}

pub fn quote_snapshot_map() -> Result<FieldMap> {
    FieldMap::new(QUOTE_SNAPSHOT_FIELDS, &[])
}

fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim().trim_end_matches('%').replace(',', "");
    if s.is_empty() || s == "-" {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Best-effort conversion; values that cannot be converted become null
pub fn coerce(value: &Value, kind: FieldKind) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,
        (FieldKind::Text, Value::Text(_)) => value.clone(),
        (FieldKind::Text, Value::Int(i)) => Value::Text(i.to_string()),
        (FieldKind::Text, Value::Float(f)) if f.is_finite() => Value::Text(f.to_string()),
        (FieldKind::Text, Value::Bool(b)) => Value::Text(b.to_string()),
        (FieldKind::Text, Value::Date(d)) => Value::Text(d.format("%Y-%m-%d").to_string()),
        (FieldKind::Text, Value::Json(serde_json::Value::String(s))) => Value::Text(s.clone()),
        (FieldKind::Text, Value::Json(j)) => Value::Text(j.to_string()),

        (FieldKind::Float, Value::Float(f)) if f.is_finite() => value.clone(),
        (FieldKind::Float, Value::Int(i)) => Value::Float(*i as f64),
        (FieldKind::Float, Value::Text(s)) => parse_float(s).map_or(Value::Null, Value::Float),

        (FieldKind::Int, Value::Int(_)) => value.clone(),
        (FieldKind::Int, Value::Float(f)) if f.is_finite() => Value::Int(f.round() as i64),
        (FieldKind::Int, Value::Text(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => parse_float(s).map_or(Value::Null, |f| Value::Int(f.round() as i64)),
        },

        (FieldKind::Date, Value::Date(_)) => value.clone(),
        (FieldKind::Date, Value::Text(s)) => parse_date(s).map_or(Value::Null, Value::Date),

        _ => Value::Null,
    }
}
