//! Dividend Service
//!
//! Turns free-text dividend disclosures ("10派1元(含税)", "每股0.38港元",
//! "不分配不转增", ...) into a post-tax cash amount per share, and builds
//! dividend records from disclosure tables.

use crate::cache::table::{Table, Value};
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// Disclosure table column holding the plan description
pub const DESCRIPTION_COLUMN: &str = "现金分红-现金分红比例描述";
/// Disclosure table column holding the ex-dividend date
pub const EX_DATE_COLUMN: &str = "除权除息日";

static NO_DISTRIBUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"不分红|不分配|不派息|无分配").unwrap());

static A_SHARE_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"A股(.*?)(?:[BH]股|$)").unwrap());

static BASE_AND_CASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)股?派(?:现金)?(?:人民币)?(\d+(?:\.\d+)?)元").unwrap()
});

static PER_SHARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"每股[^0-9]*?(\d+(?:\.\d+)?)\s*(?:港元|美元|人民币元|元)").unwrap()
});

static STOCK_THEN_CASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^每?(\d+(?:\.\d+)?)股?(?:[转送][\d.]+股)+派(?:现金)?(\d+(?:\.\d+)?)元").unwrap()
});

static GENERIC_CASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^每?(\d+(?:\.\d+)?).*?(?:派|现金股利)(?:现金)?(?:人民币)?(\d+(?:\.\d+)?)元").unwrap()
});

static STRICT_BASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^每?(\d+(?:\.\d+)?)").unwrap());

static POST_TAX_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"扣税后(?:人民币)?(\d+(?:\.\d+)?)元").unwrap());

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// The A-share part of a multi-class plan, or the whole text
fn a_share_scope(text: &str) -> &str {
    A_SHARE_SEGMENT
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

fn number(caps: &regex::Captures<'_>, idx: usize) -> Option<f64> {
    caps.get(idx)?.as_str().parse().ok()
}

fn cash_over_base(re: &Regex, text: &str) -> Option<f64> {
    let caps = re.captures(text)?;
    let base = number(&caps, 1)?;
    let cash = number(&caps, 2)?;
    if base > 0.0 {
        Some(round4(cash / base))
    } else {
        None
    }
}

/// Post-tax cash dividend per share, 0.0 when nothing is distributed or the
/// text is not understood. Rules are tried in order; the first match wins.
pub fn post_tax_dividend_per_share(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() || NO_DISTRIBUTION.is_match(text) {
        return 0.0;
    }

    let scoped = a_share_scope(text).trim();

    if let Some(v) = cash_over_base(&BASE_AND_CASH, scoped) {
        return v;
    }

    if let Some(v) = PER_SHARE
        .captures(scoped)
        .and_then(|c| number(&c, 1))
        .map(round4)
    {
        return v;
    }

    if let Some(v) = cash_over_base(&STOCK_THEN_CASH, scoped) {
        return v;
    }

    if let Some(v) = cash_over_base(&GENERIC_CASH, scoped) {
        return v;
    }

    debug!("No cash distribution recognized in {:?}", text);
    0.0
}

/// Post-tax dividend per share from the explicit "扣税后X元" total.
///
/// Unlike [`post_tax_dividend_per_share`], a text without a base share count
/// or without a post-tax total is an error.
pub fn strict_post_tax_dividend_per_share(text: &str) -> Result<f64> {
    let scoped = a_share_scope(text.trim()).trim();

    let base = STRICT_BASE
        .captures(scoped)
        .and_then(|c| number(&c, 1))
        .ok_or_else(|| AppError::Parse(format!("base share count missing in {:?}", text)))?;

    let total = POST_TAX_TOTAL
        .captures(scoped)
        .and_then(|c| number(&c, 1))
        .ok_or_else(|| AppError::Parse(format!("post-tax amount missing in {:?}", text)))?;

    if base == 0.0 {
        return Err(AppError::ZeroBase(text.to_string()));
    }

    Ok(round4(total / base))
}

/// One historical dividend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendRecord {
    pub ex_dividend_date: Option<NaiveDate>,
    pub description: Option<String>,
    /// Post-tax cash per share; `None` when the description is not text
    pub amount: Option<f64>,
}

impl DividendRecord {
    pub fn from_description(ex_dividend_date: Option<NaiveDate>, description: &Value) -> Self {
        let description = match description {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        };
        let amount = description.as_deref().map(post_tax_dividend_per_share);
        Self {
            ex_dividend_date,
            description,
            amount,
        }
    }
}

/// Dividend Service
pub struct DividendService;

impl DividendService {
    /// Map a disclosure table onto dividend records
    pub fn dividends_from_table(table: &Table) -> Result<Vec<DividendRecord>> {
        let description_idx = table.column_index(DESCRIPTION_COLUMN).ok_or_else(|| {
            AppError::Validation(format!("missing column {}", DESCRIPTION_COLUMN))
        })?;
        let date_idx = table.column_index(EX_DATE_COLUMN);

        let records = table
            .rows()
            .iter()
            .map(|row| {
                let ex_date = date_idx.and_then(|i| match &row[i] {
                    Value::Date(d) => Some(*d),
                    Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
                    _ => None,
                });
                DividendRecord::from_description(ex_date, &row[description_idx])
            })
            .collect();

        Ok(records)
    }
}
