//! Business-day calendar: weekends plus a configured holiday list.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::timestamp;

/// Holidays of the local exchange, 2025 session.
pub const DEFAULT_HOLIDAYS: &[&str] = &[
    "20250101", "20250128", "20250129", "20250130", // new year, lunar new year
    "20250301", "20250505", "20250506", "20250815", // independence, children's day, liberation
    "20250917", "20250918", "20250919", // chuseok
    "20251003", "20251009", "20251225",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Build from `YYYYMMDD` strings; any malformed entry is a config error.
    pub fn from_strs<S: AsRef<str>>(days: &[S]) -> Result<Self> {
        let mut holidays = BTreeSet::new();
        for d in days {
            let date = timestamp::parse_date(d.as_ref())
                .map_err(|e| EngineError::Config(format!("holiday list: {e}")))?;
            holidays.insert(date);
        }
        Ok(Self { holidays })
    }

    pub fn with_default_holidays() -> Self {
        Self::from_strs(DEFAULT_HOLIDAYS).unwrap_or_default()
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    pub fn len(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holidays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_and_holidays_are_not_business_days() {
        let cal = HolidayCalendar::with_default_holidays();
        assert_eq!(cal.len(), DEFAULT_HOLIDAYS.len());
        assert!(!cal.is_business_day(d(2025, 8, 16))); // Saturday
        assert!(!cal.is_business_day(d(2025, 8, 15))); // liberation day, Friday
        assert!(cal.is_business_day(d(2025, 8, 14)));
    }

    #[test]
    fn malformed_holiday_is_config_error() {
        let err = HolidayCalendar::from_strs(&["2025-01-01"]).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
