//! Symbol Service
//!
//! Reduces tickers written in the usual regional conventions
//! (`600036.SS`, `SZ000001`, `00941`, `110011.OF`) to a canonical
//! `(base_code, formatted_code, market)` triple. Every cache key in the
//! crate is derived from the normalized form.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange / venue a code trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// Shanghai Stock Exchange
    SH,
    /// Shenzhen Stock Exchange
    SZ,
    /// Beijing Stock Exchange
    BJ,
    /// Hong Kong Stock Exchange
    HK,
    /// Open-end fund
    OF,
    Other,
}

impl Market {
    /// Tag used as the prefix of `formatted_code`; empty for `Other`
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::SH => "SH",
            Market::SZ => "SZ",
            Market::BJ => "BJ",
            Market::HK => "HK",
            Market::OF => "OF",
            Market::Other => "",
        }
    }

    /// Mainland A-share venues
    pub fn is_a_share(&self) -> bool {
        matches!(self, Market::SH | Market::SZ | Market::BJ)
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SS" | "SH" => Some(Market::SH),
            "SZ" => Some(Market::SZ),
            "BJ" => Some(Market::BJ),
            "HK" => Some(Market::HK),
            "OF" => Some(Market::OF),
            _ => None,
        }
    }

    /// Best-effort inference from the leading digit of a six digit code
    fn infer(code: &str) -> Self {
        match code.as_bytes().first() {
            Some(b'6') | Some(b'9') => Market::SH,
            Some(b'0') | Some(b'3') => Market::SZ,
            Some(b'8') | Some(b'4') => Market::BJ,
            _ => Market::Other,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Other => write!(f, "OTHER"),
            m => write!(f, "{}", m.as_str()),
        }
    }
}

/// Canonical form of a ticker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedSymbol {
    pub base_code: String,
    pub formatted_code: String,
    pub market: Market,
}

impl NormalizedSymbol {
    fn new(base_code: String, market: Market) -> Self {
        let formatted_code = format!("{}{}", market.as_str(), base_code);
        Self {
            base_code,
            formatted_code,
            market,
        }
    }
}

/// Symbol service for business logic
pub struct SymbolService;

impl SymbolService {
    /// Normalize a ticker into `(base_code, formatted_code, market)`
    pub fn normalize(symbol: &str) -> Result<NormalizedSymbol> {
        let cleaned = symbol.trim().to_ascii_uppercase();
        if cleaned.is_empty() {
            return Err(AppError::InvalidSymbol("empty symbol".to_string()));
        }

        let (code, market) = Self::split_market(&cleaned);

        if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::InvalidSymbol(symbol.to_string()));
        }

        let normalized = match market {
            Some(Market::HK) => {
                if code.len() > 5 {
                    return Err(AppError::InvalidSymbol(symbol.to_string()));
                }
                NormalizedSymbol::new(format!("{:0>5}", code), Market::HK)
            }
            Some(m) => {
                if code.len() > 6 {
                    return Err(AppError::InvalidSymbol(symbol.to_string()));
                }
                NormalizedSymbol::new(code.to_string(), m)
            }
            None => match code.len() {
                5 => NormalizedSymbol::new(code.to_string(), Market::HK),
                6 => NormalizedSymbol::new(code.to_string(), Market::infer(code)),
                _ => return Err(AppError::InvalidSymbol(symbol.to_string())),
            },
        };

        tracing::trace!(
            "Normalized {} -> {} ({})",
            symbol,
            normalized.formatted_code,
            normalized.market
        );
        Ok(normalized)
    }

    /// Split an explicit market marker (suffix or two-letter prefix) off the code
    fn split_market(cleaned: &str) -> (&str, Option<Market>) {
        if let Some((code, suffix)) = cleaned.rsplit_once('.') {
            if let Some(market) = Market::from_tag(suffix) {
                return (code, Some(market));
            }
        }

        if cleaned.len() > 2 && cleaned.is_char_boundary(2) {
            let (prefix, rest) = cleaned.split_at(2);
            if prefix != "SS" {
                if let Some(market) = Market::from_tag(prefix) {
                    return (rest.trim_start_matches('.'), Some(market));
                }
            }
        }

        (cleaned, None)
    }
}

/// Convenience wrapper around [`SymbolService::normalize`]
pub fn normalize_symbol(symbol: &str) -> Result<NormalizedSymbol> {
    SymbolService::normalize(symbol)
}
