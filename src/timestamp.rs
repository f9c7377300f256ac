//! # Timestamp Normalizer
//! Turns the feed's `YYYYMMDD` date and loosely-formatted time strings into a
//! `NaiveDateTime`. Pure: no clock access, same input always yields the same
//! output.
//!
//! Accepted time shapes (after stripping separators such as `:`):
//! - `HHMMSS` (6 digits)
//! - `HMMSS`  (5 digits, leading zero dropped upstream)
//! - `HHMM`   (4 digits, seconds omitted)
//! - `HMM`    (3 digits)

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::TimestampError;

/// Normalize a `(date, time)` pair into a point in time.
pub fn normalize(date_str: &str, time_str: &str) -> Result<NaiveDateTime, TimestampError> {
    let date = parse_date(date_str)?;
    let time = parse_time_of_day(time_str)?;
    Ok(date.and_time(time))
}

/// Parse an 8-digit `YYYYMMDD` date.
pub fn parse_date(date_str: &str) -> Result<NaiveDate, TimestampError> {
    let d = date_str.trim();
    if d.len() != 8 || !d.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError::DateShape(date_str.to_string()));
    }
    NaiveDate::parse_from_str(d, "%Y%m%d").map_err(|_| TimestampError::DateValue(d.to_string()))
}

/// Zero-pad a 3..=6 digit time string to canonical `HHMMSS`.
///
/// Non-digit characters are dropped first, so `06:19:38` is accepted.
pub fn canonical_time(time_str: &str) -> Result<String, TimestampError> {
    let digits: String = time_str.chars().filter(|c| c.is_ascii_digit()).collect();
    let canon = match digits.len() {
        6 => digits,
        5 => format!("0{digits}"),
        4 => format!("{digits}00"),
        3 => format!("0{digits}00"),
        _ => return Err(TimestampError::TimeShape(time_str.to_string())),
    };
    Ok(canon)
}

/// Parse a time-of-day string in any accepted shape.
pub fn parse_time_of_day(time_str: &str) -> Result<NaiveTime, TimestampError> {
    let canon = canonical_time(time_str)?;
    // Byte slicing is safe: `canon` is six ASCII digits.
    let field = |r: std::ops::Range<usize>| canon[r].parse::<u32>().unwrap_or(u32::MAX);
    let (h, m, s) = (field(0..2), field(2..4), field(4..6));
    NaiveTime::from_hms_opt(h, m, s).ok_or(TimestampError::TimeValue(canon))
}
