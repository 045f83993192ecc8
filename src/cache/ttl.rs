//! TTL policies
//!
//! A policy turns "now" into the absolute instant at which a cache entry
//! stops being served. All instants are naive wall-clock times in the
//! Shanghai market timezone.

use crate::error::{AppError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Asia::Shanghai;
use serde::{Deserialize, Serialize};

/// Default lifetime of time-based entries (one hour)
pub const DEFAULT_TTL_SECS: i64 = 60 * 60;

/// How the expiry of an entry is derived from its write time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TtlPolicy {
    /// Fixed lifetime in seconds
    Constant { seconds: i64 },
    /// Until the first day of the next calendar quarter
    NextQuarterStart,
    /// Until January 1 of the next year
    NextYearStart,
    /// Served until explicitly invalidated or bypassed
    Never,
}

impl TtlPolicy {
    /// Constant policy, rejecting negative durations
    pub fn constant(seconds: i64) -> Result<Self> {
        if seconds < 0 {
            return Err(AppError::Validation(format!(
                "TTL duration must be non-negative, got {}",
                seconds
            )));
        }
        Ok(TtlPolicy::Constant { seconds })
    }

    pub fn expiry(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        match *self {
            TtlPolicy::Constant { seconds } => constant_ttl(seconds, now),
            TtlPolicy::NextQuarterStart => Ok(next_quarter_start(now)),
            TtlPolicy::NextYearStart => Ok(next_year_start(now)),
            TtlPolicy::Never => Ok(NaiveDateTime::MAX),
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy::Constant {
            seconds: DEFAULT_TTL_SECS,
        }
    }
}

/// Current wall-clock time at the exchange
pub fn market_now() -> NaiveDateTime {
    Utc::now().with_timezone(&Shanghai).naive_local()
}

/// `now + seconds`; saturates at the representable maximum
pub fn constant_ttl(seconds: i64, now: NaiveDateTime) -> Result<NaiveDateTime> {
    if seconds < 0 {
        return Err(AppError::Validation(format!(
            "TTL duration must be non-negative, got {}",
            seconds
        )));
    }
    Ok(TimeDelta::try_seconds(seconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(NaiveDateTime::MAX))
}

/// Midnight on the first day of the quarter following the one `now` is in
pub fn next_quarter_start(now: NaiveDateTime) -> NaiveDateTime {
    let quarter_start = ((now.month() - 1) / 3) * 3 + 1;
    let (year, month) = if quarter_start + 3 > 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), quarter_start + 3)
    };
    midnight(year, month)
}

/// Midnight on January 1 of the year after `now`
pub fn next_year_start(now: NaiveDateTime) -> NaiveDateTime {
    midnight(now.year() + 1, 1)
}

fn midnight(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Apply `policy` at `now`, defaulting to [`market_now`]
pub fn calculate_cache_ttl(policy: &TtlPolicy, now: Option<NaiveDateTime>) -> Result<NaiveDateTime> {
    let now = now.unwrap_or_else(market_now);
    policy.expiry(now)
}

/// Seconds since the epoch, treating the naive time as UTC. Only used for storage.
pub(crate) fn to_epoch(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp()
}

pub(crate) fn from_epoch(secs: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(secs, 0)
        .map(|d| d.naive_utc())
        .ok_or_else(|| AppError::Deserialization(format!("timestamp out of range: {}", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        dt(y, m, d, 0, 0, 0)
    }

    #[test]
    fn test_constant_ttl() {
        let now = dt(2024, 1, 1, 12, 0, 0);
        let policy = TtlPolicy::constant(3600).unwrap();
        assert_eq!(
            calculate_cache_ttl(&policy, Some(now)).unwrap(),
            dt(2024, 1, 1, 13, 0, 0)
        );
    }

    #[test]
    fn test_constant_ttl_crosses_year() {
        let now = dt(2024, 12, 31, 23, 59, 59);
        assert_eq!(constant_ttl(10, now).unwrap(), dt(2025, 1, 1, 0, 0, 9));
    }

    #[test]
    fn test_constant_ttl_is_monotonic() {
        let base = dt(2024, 3, 10, 9, 30, 0);
        let mut last = None;
        for offset in 0..50 {
            let now = base + TimeDelta::try_minutes(offset * 37).unwrap();
            let expiry = constant_ttl(1800, now).unwrap();
            assert_eq!(expiry, now + TimeDelta::try_seconds(1800).unwrap());
            if let Some(prev) = last {
                assert!(expiry > prev);
            }
            last = Some(expiry);
        }
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(matches!(TtlPolicy::constant(-1), Err(AppError::Validation(_))));
        assert!(constant_ttl(-60, day(2024, 1, 1)).is_err());
    }

    #[test]
    fn test_default_now_is_used() {
        let before = market_now();
        let expiry = calculate_cache_ttl(&TtlPolicy::default(), None).unwrap();
        let after = market_now();
        assert!(expiry >= before + TimeDelta::try_seconds(DEFAULT_TTL_SECS).unwrap());
        assert!(expiry <= after + TimeDelta::try_seconds(DEFAULT_TTL_SECS).unwrap());
    }

    #[test]
    fn test_next_quarter_start() {
        let cases = [
            (day(2024, 1, 15), day(2024, 4, 1)),
            (day(2024, 4, 15), day(2024, 7, 1)),
            (day(2024, 7, 15), day(2024, 10, 1)),
            (day(2024, 10, 15), day(2025, 1, 1)),
            (day(2024, 12, 31), day(2025, 1, 1)),
            (dt(2024, 12, 31, 23, 59, 59), day(2025, 1, 1)),
        ];
        for (now, expected) in cases {
            assert_eq!(
                calculate_cache_ttl(&TtlPolicy::NextQuarterStart, Some(now)).unwrap(),
                expected,
                "now = {}",
                now
            );
        }
    }

    #[test]
    fn test_next_quarter_start_every_month() {
        for month in 1..=12u32 {
            let result = next_quarter_start(day(2024, month, 15));
            let expected_month = ((month - 1) / 3 + 1) * 3 + 1;
            let expected = if expected_month > 12 {
                day(2025, 1, 1)
            } else {
                day(2024, expected_month, 1)
            };
            assert_eq!(result, expected, "month = {}", month);
        }
    }

    #[test]
    fn test_quarter_boundary_advances() {
        // Landing exactly on a boundary still moves to the following one
        assert_eq!(next_quarter_start(day(2024, 4, 1)), day(2024, 7, 1));
        assert_eq!(next_quarter_start(day(2025, 1, 1)), day(2025, 4, 1));
    }

    #[test]
    fn test_next_year_start() {
        let cases = [
            (day(2024, 1, 1), day(2025, 1, 1)),
            (day(2024, 6, 15), day(2025, 1, 1)),
            (day(2024, 12, 31), day(2025, 1, 1)),
            (day(2025, 1, 1), day(2026, 1, 1)),
            (dt(2024, 12, 31, 23, 59, 59), day(2025, 1, 1)),
        ];
        for (now, expected) in cases {
            let result = calculate_cache_ttl(&TtlPolicy::NextYearStart, Some(now)).unwrap();
            assert_eq!(result, expected);
            assert_eq!(result.year(), now.year() + 1);
            assert_eq!((result.month(), result.day()), (1, 1));
        }
    }

    #[test]
    fn test_never_policy_is_far_future() {
        let now = dt(2024, 6, 7, 15, 0, 0);
        let never = TtlPolicy::Never.expiry(now).unwrap();
        assert!(never > next_year_start(now));

        // Survives the round trip through storage
        let stored = from_epoch(to_epoch(never)).unwrap();
        assert!(stored > dt(9999, 12, 31, 0, 0, 0));
    }

    #[test]
    fn test_epoch_round_trip() {
        let t = dt(2024, 2, 29, 15, 0, 1);
        assert_eq!(from_epoch(to_epoch(t)).unwrap(), t);
    }
}
