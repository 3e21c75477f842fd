//! US equity market hours — local-time logic, no API calls.
//!
//! Classifies the current session as open, pre-market, after-hours, or
//! closed. Times are evaluated in US Eastern time; the offset is derived
//! from the US daylight-saving rule (second Sunday of March through the
//! first Sunday of November).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::Serialize;

/// Regular session open (Eastern).
fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).expect("valid time")
}

/// Regular session close (Eastern).
fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("valid time")
}

/// Pre-market start (Eastern).
fn pre_market_start() -> NaiveTime {
    NaiveTime::from_hms_opt(4, 0, 0).expect("valid time")
}

/// After-hours end (Eastern).
fn after_hours_end() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).expect("valid time")
}

/// Current market status report.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    /// "open" | "pre_market" | "after_hours" | "closed"
    pub status: String,
    pub is_open: bool,
    pub is_extended_hours: bool,
    pub current_time_et: String,
    pub weekday: String,
}

/// The nth given weekday of a month (1-based).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let offset = (7 + weekday.num_days_from_monday() as i64
        - first.weekday().num_days_from_monday() as i64)
        % 7;
    first + chrono::Duration::days(offset + (n as i64 - 1) * 7)
}

/// Eastern offset for a UTC instant: EDT (-4) between the second Sunday
/// of March and the first Sunday of November, EST (-5) otherwise.
/// The 2 a.m. switchover boundary is approximated at date granularity.
fn eastern_offset(utc: DateTime<Utc>) -> FixedOffset {
    let date = utc.date_naive();
    let dst_start = nth_weekday(date.year(), 3, Weekday::Sun, 2);
    let dst_end = nth_weekday(date.year(), 11, Weekday::Sun, 1);

    if date >= dst_start && date < dst_end {
        FixedOffset::west_opt(4 * 3600).expect("valid offset")
    } else {
        FixedOffset::west_opt(5 * 3600).expect("valid offset")
    }
}

/// Convert a UTC instant to Eastern time.
fn to_eastern(utc: DateTime<Utc>) -> DateTime<FixedOffset> {
    utc.with_timezone(&eastern_offset(utc))
}

/// Whether the regular session is open at the given instant.
pub fn is_market_open(utc: DateTime<Utc>) -> bool {
    let et = to_eastern(utc);
    if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let time = et.time();
    (market_open()..=market_close()).contains(&time)
}

/// Whether the instant falls in pre-market or after-hours trading.
pub fn is_extended_hours(utc: DateTime<Utc>) -> bool {
    let et = to_eastern(utc);
    if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let time = et.time();
    (time >= pre_market_start() && time < market_open())
        || (time > market_close() && time <= after_hours_end())
}

/// Build a full status report for the given instant.
pub fn market_status_at(utc: DateTime<Utc>) -> MarketStatus {
    let et = to_eastern(utc);
    let is_open = is_market_open(utc);
    let is_extended = is_extended_hours(utc);

    let status = if is_open {
        "open"
    } else if is_extended {
        if et.time() < market_open() {
            "pre_market"
        } else {
            "after_hours"
        }
    } else {
        "closed"
    };

    MarketStatus {
        status: status.to_string(),
        is_open,
        is_extended_hours: is_extended,
        current_time_et: et.format("%Y-%m-%d %H:%M:%S %z").to_string(),
        weekday: et.format("%A").to_string(),
    }
}

/// Status report for now.
pub fn market_status() -> MarketStatus {
    market_status_at(Utc::now())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_nth_weekday() {
        // Second Sunday of March 2026 is the 8th.
        assert_eq!(
            nth_weekday(2026, 3, Weekday::Sun, 2),
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap()
        );
        // First Sunday of November 2026 is the 1st.
        assert_eq!(
            nth_weekday(2026, 11, Weekday::Sun, 1),
            NaiveDate::from_ymd_opt(2026, 11, 1).unwrap()
        );
    }

    #[test]
    fn test_eastern_offset_summer_winter() {
        // Mid-July: EDT (UTC-4)
        let summer = eastern_offset(utc(2026, 7, 15, 12, 0));
        assert_eq!(summer.local_minus_utc(), -4 * 3600);
        // Mid-January: EST (UTC-5)
        let winter = eastern_offset(utc(2026, 1, 15, 12, 0));
        assert_eq!(winter.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_open_during_regular_session() {
        // Wednesday 2026-07-15 14:00 UTC = 10:00 EDT
        assert!(is_market_open(utc(2026, 7, 15, 14, 0)));
        // Wednesday 2026-01-14 15:00 UTC = 10:00 EST
        assert!(is_market_open(utc(2026, 1, 14, 15, 0)));
    }

    #[test]
    fn test_closed_overnight_and_weekend() {
        // Wednesday 03:00 EDT
        assert!(!is_market_open(utc(2026, 7, 15, 7, 0)));
        // Saturday noon EDT
        assert!(!is_market_open(utc(2026, 7, 18, 16, 0)));
        assert!(!is_extended_hours(utc(2026, 7, 18, 16, 0)));
    }

    #[test]
    fn test_pre_market_window() {
        // Wednesday 2026-07-15 12:00 UTC = 08:00 EDT
        let t = utc(2026, 7, 15, 12, 0);
        assert!(!is_market_open(t));
        assert!(is_extended_hours(t));
        assert_eq!(market_status_at(t).status, "pre_market");
    }

    #[test]
    fn test_after_hours_window() {
        // Wednesday 2026-07-15 22:00 UTC = 18:00 EDT
        let t = utc(2026, 7, 15, 22, 0);
        assert!(!is_market_open(t));
        assert!(is_extended_hours(t));
        assert_eq!(market_status_at(t).status, "after_hours");
    }

    #[test]
    fn test_status_open() {
        let t = utc(2026, 7, 15, 14, 0);
        let status = market_status_at(t);
        assert_eq!(status.status, "open");
        assert!(status.is_open);
        assert!(!status.is_extended_hours);
        assert_eq!(status.weekday, "Wednesday");
    }

    #[test]
    fn test_session_boundaries() {
        // 09:30 EDT exactly → open; 09:29 → pre-market
        assert!(is_market_open(utc(2026, 7, 15, 13, 30)));
        assert!(!is_market_open(utc(2026, 7, 15, 13, 29)));
        // 16:00 EDT exactly → open; 16:01 → after hours
        assert!(is_market_open(utc(2026, 7, 15, 20, 0)));
        assert!(!is_market_open(utc(2026, 7, 15, 20, 1)));
    }
}
