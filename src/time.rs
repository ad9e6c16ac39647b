use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

use crate::error::{AppError, AppResult};

pub const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Half-open `[start, end)` window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> AppResult<Self> {
        if end <= start {
            return Err(AppError::invalid_range(
                "Invalid date range: end date must be after start date",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn duration_seconds(&self) -> i64 {
        self.end - self.start
    }

    pub fn duration_days(&self) -> f64 {
        self.duration_seconds() as f64 / SECONDS_PER_DAY as f64
    }
}

/// Parses a signed UTC offset such as `+8`, `-11`, `-0500` or `+08:00`.
///
/// A single colon is dropped first. One or two digits are whole hours; three or
/// four digits are `HHMM`.
pub fn parse_timezone_offset(raw: &str) -> AppResult<FixedOffset> {
    let cleaned = raw.trim().replacen(':', "", 1);
    let (sign, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::invalid_timezone());
    }

    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits, "0"),
        3 | 4 => digits.split_at(digits.len() - 2),
        _ => return Err(AppError::invalid_timezone()),
    };
    let hours: i32 = hours.parse().map_err(|_| AppError::invalid_timezone())?;
    let minutes: i32 = minutes.parse().map_err(|_| AppError::invalid_timezone())?;
    if hours > 23 || minutes > 59 {
        return Err(AppError::invalid_timezone());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(AppError::invalid_timezone)
}

/// Unix seconds of `00:00:00 UTC` on the given calendar day.
///
/// Out-of-range months and days roll over into neighbouring months and years
/// (month 13 is January of the next year, day 0 is the last day of the previous
/// month).
pub fn utc_midnight(year: i32, month: i32, day: i32) -> Option<i64> {
    let month_index = month.checked_sub(1)?;
    let year = year.checked_add(month_index.div_euclid(12))?;
    let month = month_index.rem_euclid(12) as u32 + 1;
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let date = first.checked_add_signed(Duration::days(i64::from(day) - 1))?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

/// Unix seconds of local midnight on the given day under `offset`.
pub fn local_midnight(year: i32, month: i32, day: i32, offset: FixedOffset) -> AppResult<i64> {
    let utc = utc_midnight(year, month, day)
        .ok_or_else(|| AppError::invalid_range(format!("Invalid date {year}-{month}-{day}")))?;
    Ok(utc - i64::from(offset.local_minus_utc()))
}

/// The local calendar month `[1st 00:00, next 1st 00:00)` as a UTC window.
pub fn month_window(year: i32, month: u32, offset: FixedOffset) -> AppResult<TimeRange> {
    if !(1..=12).contains(&month) {
        return Err(AppError::invalid_range("month must be between 1 and 12"));
    }
    let month = month as i32;
    let start = local_midnight(year, month, 1, offset)?;
    let end = local_midnight(year, month + 1, 1, offset)?;
    TimeRange::new(start, end)
}

/// Calendar day of `timestamp` as seen from `offset`.
pub fn local_date(timestamp: i64, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.with_timezone(&offset).date_naive())
}
