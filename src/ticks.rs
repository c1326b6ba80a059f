//! Time encoding for visit timestamps.
//!
//! A visit boundary arrives as a local date (`M/D/YYYY`) and a 12-hour clock
//! time (`H:MM AM|PM`). [`encode_tick`] folds the pair into one integer tick
//! that orders instants within a single dataset.
//!
//! The default [`TickMode::Approximate`] treats every month as 31 days and
//! ignores the year. It is applied identically to entry and exit times, so
//! ordering holds within a month and across consecutive months of the same
//! year. [`TickMode::Calendar`] computes real minutes since the Unix epoch
//! and must be requested explicitly.
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Ordering-only instant. Not a calendar timestamp in the default mode.
pub type Tick = i64;

pub const MINUTES_PER_HOUR: Tick = 60;
pub const MINUTES_PER_DAY: Tick = 1_440;
/// 31 days.
pub const MINUTES_PER_MONTH: Tick = 44_640;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{1,2})/([0-9]{1,2})/([0-9]{4})$").expect("date pattern is valid")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{1,2}):([0-9]{2})\s+([AaPp][Mm])$").expect("time pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    #[error("malformed date {0:?} (expected M/D/YYYY)")]
    BadDate(String),
    #[error("malformed time {0:?} (expected H:MM AM|PM)")]
    BadTime(String),
    #[error("{field} out of range in {input:?}")]
    OutOfRange { field: &'static str, input: String },
}

/// Which encoding to apply to every timestamp of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickMode {
    #[default]
    Approximate,
    Calendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

/// Wall-clock time already converted to 24-hour form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
}

fn number<T: std::str::FromStr>(digits: &str, err: impl FnOnce() -> TickError) -> Result<T, TickError> {
    digits.parse::<T>().map_err(|_| err())
}

pub fn parse_date(input: &str) -> Result<LocalDate, TickError> {
    let s = input.trim();
    let bad = || TickError::BadDate(input.to_string());
    let caps = DATE_RE.captures(s).ok_or_else(bad)?;
    let month: u32 = number(&caps[1], bad)?;
    let day: u32 = number(&caps[2], bad)?;
    let year: i32 = number(&caps[3], bad)?;
    if !(1..=12).contains(&month) {
        return Err(TickError::OutOfRange {
            field: "month",
            input: input.to_string(),
        });
    }
    if !(1..=31).contains(&day) {
        return Err(TickError::OutOfRange {
            field: "day",
            input: input.to_string(),
        });
    }
    Ok(LocalDate { year, month, day })
}

/// Parse `H:MM AM|PM`. 12 AM becomes hour 0, 12 PM stays 12, other PM
/// hours gain 12.
pub fn parse_time(input: &str) -> Result<ClockTime, TickError> {
    let s = input.trim();
    let bad = || TickError::BadTime(input.to_string());
    let caps = TIME_RE.captures(s).ok_or_else(bad)?;
    let hour: u32 = number(&caps[1], bad)?;
    let minute: u32 = number(&caps[2], bad)?;
    let is_pm = caps[3].eq_ignore_ascii_case("pm");
    if !(1..=12).contains(&hour) {
        return Err(TickError::OutOfRange {
            field: "hour",
            input: input.to_string(),
        });
    }
    if minute > 59 {
        return Err(TickError::OutOfRange {
            field: "minute",
            input: input.to_string(),
        });
    }
    let hour = match (is_pm, hour) {
        (false, 12) => 0,
        (true, 12) => 12,
        (true, h) => h + 12,
        (false, h) => h,
    };
    Ok(ClockTime { hour, minute })
}

fn approximate(date: LocalDate, time: ClockTime) -> Tick {
    Tick::from(time.minute)
        + Tick::from(time.hour) * MINUTES_PER_HOUR
        + Tick::from(date.day) * MINUTES_PER_DAY
        + Tick::from(date.month) * MINUTES_PER_MONTH
}

fn calendar(date: LocalDate, time: ClockTime, input: &str) -> Result<Tick, TickError> {
    let instant = NaiveDate::from_ymd_opt(date.year, date.month, date.day)
        .and_then(|d| d.and_hms_opt(time.hour, time.minute, 0))
        .ok_or_else(|| TickError::OutOfRange {
            field: "calendar date",
            input: input.to_string(),
        })?;
    Ok(instant.and_utc().timestamp() / 60)
}

/// Encode a local date and 12-hour time into a tick.
pub fn encode_tick(date: &str, time: &str, mode: TickMode) -> Result<Tick, TickError> {
    let d = parse_date(date)?;
    let t = parse_time(time)?;
    match mode {
        TickMode::Approximate => Ok(approximate(d, t)),
        TickMode::Calendar => calendar(d, t, date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approximate_formula_matches_components() {
        let t = encode_tick("6/26/2025", "1:30 PM", TickMode::Approximate).unwrap();
        assert_eq!(t, 30 + 13 * 60 + 26 * 1_440 + 6 * 44_640);
    }

    #[test]
    fn twelve_am_and_pm_conversion() {
        let midnight = parse_time("12:05 AM").unwrap();
        assert_eq!(midnight, ClockTime { hour: 0, minute: 5 });
        let noon = parse_time("12:00 pm").unwrap();
        assert_eq!(noon, ClockTime { hour: 12, minute: 0 });
        let evening = parse_time(" 7:45 PM ").unwrap();
        assert_eq!(evening, ClockTime { hour: 19, minute: 45 });
        let morning = parse_time("9:01 AM").unwrap();
        assert_eq!(morning, ClockTime { hour: 9, minute: 1 });
    }

    #[test]
    fn ordering_within_day_and_month() {
        let a = encode_tick("3/4/2025", "11:59 AM", TickMode::Approximate).unwrap();
        let b = encode_tick("3/4/2025", "12:00 PM", TickMode::Approximate).unwrap();
        let c = encode_tick("3/5/2025", "12:00 AM", TickMode::Approximate).unwrap();
        let d = encode_tick("4/1/2025", "12:00 AM", TickMode::Approximate).unwrap();
        assert!(a < b && b < c && c < d);
    }

    #[test]
    fn calendar_mode_counts_minutes_since_epoch() {
        assert_eq!(
            encode_tick("1/1/1970", "12:00 AM", TickMode::Calendar).unwrap(),
            0
        );
        assert_eq!(
            encode_tick("1/2/1970", "1:00 AM", TickMode::Calendar).unwrap(),
            1_500
        );
    }

    #[test]
    fn calendar_mode_orders_across_year_end() {
        let dec = encode_tick("12/31/2024", "11:00 PM", TickMode::Calendar).unwrap();
        let jan = encode_tick("1/1/2025", "1:00 AM", TickMode::Calendar).unwrap();
        assert_eq!(jan - dec, 120);
    }

    #[test]
    fn calendar_mode_rejects_impossible_dates() {
        let err = encode_tick("2/30/2025", "1:00 AM", TickMode::Calendar).unwrap_err();
        assert!(matches!(err, TickError::OutOfRange { .. }));
        // the approximation does not know month lengths
        assert!(encode_tick("2/30/2025", "1:00 AM", TickMode::Approximate).is_ok());
    }

    #[test]
    fn malformed_inputs_fail() {
        assert!(matches!(parse_date("2025-06-26"), Err(TickError::BadDate(_))));
        assert!(matches!(parse_date("6/26"), Err(TickError::BadDate(_))));
        assert!(matches!(parse_date("13/1/2025"), Err(TickError::OutOfRange { .. })));
        assert!(matches!(parse_date("1/0/2025"), Err(TickError::OutOfRange { .. })));
        assert!(matches!(parse_time("13:30"), Err(TickError::BadTime(_))));
        assert!(matches!(parse_time("1:3 PM"), Err(TickError::BadTime(_))));
        assert!(matches!(parse_time("1:30PM extra"), Err(TickError::BadTime(_))));
        assert!(matches!(parse_time("0:30 AM"), Err(TickError::OutOfRange { .. })));
        assert!(matches!(parse_time("1:60 AM"), Err(TickError::OutOfRange { .. })));
        assert!(matches!(parse_time(""), Err(TickError::BadTime(_))));
    }
}
