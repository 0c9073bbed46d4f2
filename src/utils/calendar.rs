// src/utils/calendar.rs

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

/// Parses an IANA timezone name, falling back to UTC for anything
/// unrecognized so a corrupt profile field can never break quota math.
pub fn resolve_tz(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown timezone {:?}, falling back to UTC", name);
        Tz::UTC
    })
}

/// The calendar date of `instant` as seen in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// True when both instants fall on the same calendar date in `tz`.
/// 23:58 and 00:05 local time are different days even though they are
/// minutes apart.
pub fn is_same_day(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    local_date(a, tz) == local_date(b, tz)
}

/// True when `next` is exactly the calendar day after `prev`.
pub fn is_next_day(prev: NaiveDate, next: NaiveDate) -> bool {
    prev.succ_opt() == Some(next)
}

/// ISO (year, week) pair for badge keys, e.g. streak badges are granted at
/// most once per ISO week.
pub fn iso_year_week(date: NaiveDate) -> (i32, u32) {
    let iso = date.iso_week();
    (iso.year(), iso.week())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_boundary_is_local_not_utc() {
        let tz = resolve_tz("Asia/Karachi"); // UTC+5
        // 20:00 UTC = 01:00 next day in Karachi.
        let evening = Utc.with_ymd_and_hms(2026, 3, 10, 20, 0, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        assert!(!is_same_day(evening, morning, tz));
        assert!(is_same_day(evening, morning, Tz::UTC));
    }

    #[test]
    fn next_day_requires_exact_succession() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert!(is_next_day(d, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()));
        assert!(!is_next_day(d, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        assert!(!is_next_day(d, d));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(resolve_tz("Not/AZone"), Tz::UTC);
    }
}
