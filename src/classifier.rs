//! # Status Classifier
//! Pure logic that maps `(raw item, feed kind, schedule, now)` → `ClassifiedItem`.
//! No I/O and no clock access: `now` is always passed in.
//!
//! Order of checks:
//! 1. missing title/body → MISSING
//! 2. unparseable date/time → INVALID
//! 3. business-day-only feed dated on a weekend/holiday → STALE
//! 4. dated before today → STALE; after today → INVALID
//! 5. dated today → LATEST / DELAYED / EARLY against the tolerance window
//!
//! Internal failures never escape: they become an ERROR item for that feed.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::calendar::HolidayCalendar;
use crate::error::{EngineError, Result};
use crate::feed::{FeedKind, FeedSchedule, RawFeedItem, ScheduleTable};
use crate::status::{DelaySeverity, FeedStatus};
use crate::telemetry;
use crate::timestamp;

/// Result of classifying one feed item. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub kind: FeedKind,
    pub display_name: String,
    pub title: String,
    pub body: String,
    /// Present iff both date and time were well-formed.
    pub timestamp: Option<NaiveDateTime>,
    pub status: FeedStatus,
    pub detail: String,
    pub is_delayed: bool,
    /// Nonzero only for DELAYED.
    pub delay_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<DelaySeverity>,
    pub expected_time: NaiveTime,
}

/// Outcome of the time-window rules, before it is attached to item fields.
struct Verdict {
    status: FeedStatus,
    detail: String,
    delay_minutes: u32,
    severity: Option<DelaySeverity>,
}

impl Verdict {
    fn new(status: FeedStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            delay_minutes: 0,
            severity: None,
        }
    }
}

/// Expected time reported on ERROR items whose feed has no schedule.
fn fallback_expected_time() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Classify one feed item. Never fails; see module docs.
pub fn classify(
    item: Option<&RawFeedItem>,
    kind: FeedKind,
    schedules: &ScheduleTable,
    calendar: &HolidayCalendar,
    now: NaiveDateTime,
) -> ClassifiedItem {
    let out = match try_classify(item, kind, schedules, calendar, now) {
        Ok(classified) => classified,
        Err(e) => {
            warn!(target: "classifier", feed = %kind, error = %e, "classification failed");
            error_item(item, kind, schedules, &e)
        }
    };
    debug!(
        target: "classifier",
        feed = %kind,
        status = %out.status,
        delay = out.delay_minutes,
        id = %telemetry::anon_id(&out.title),
        "classified"
    );
    telemetry::record_classified(out.status);
    out
}

/// Same as [`classify`] but surfaces internal failures instead of folding
/// them into an ERROR item.
pub fn try_classify(
    item: Option<&RawFeedItem>,
    kind: FeedKind,
    schedules: &ScheduleTable,
    calendar: &HolidayCalendar,
    now: NaiveDateTime,
) -> Result<ClassifiedItem> {
    let schedule = schedules.get(&kind).ok_or_else(|| EngineError::Classification {
        kind,
        reason: "no schedule configured for this feed".into(),
    })?;

    let empty = RawFeedItem::default();
    let raw = item.unwrap_or(&empty);
    let normalized = timestamp::normalize(&raw.date, &raw.time);

    let verdict = if item.is_none() || raw.title.trim().is_empty() || raw.body.trim().is_empty() {
        Verdict::new(FeedStatus::Missing, "no data")
    } else {
        match &normalized {
            Err(e) => {
                debug!(target: "classifier", feed = %kind, error = %e, "timestamp rejected");
                Verdict::new(FeedStatus::Invalid, "time information error")
            }
            Ok(ts) => judge_timestamp(kind, *ts, schedule, calendar, now)?,
        }
    };

    Ok(ClassifiedItem {
        kind,
        display_name: schedule.display_name.clone(),
        title: raw.title.clone(),
        body: raw.body.clone(),
        timestamp: normalized.ok(),
        is_delayed: verdict.status == FeedStatus::Delayed,
        status: verdict.status,
        detail: verdict.detail,
        delay_minutes: verdict.delay_minutes,
        severity: verdict.severity,
        expected_time: schedule.expected_time,
    })
}

fn judge_timestamp(
    kind: FeedKind,
    ts: NaiveDateTime,
    schedule: &FeedSchedule,
    calendar: &HolidayCalendar,
    now: NaiveDateTime,
) -> Result<Verdict> {
    let item_date = ts.date();
    let today = now.date();

    if schedule.business_days_only && !calendar.is_business_day(item_date) {
        return Ok(Verdict::new(FeedStatus::Stale, "non-business-day item"));
    }

    if item_date < today {
        let days = days_between(kind, item_date, today)?;
        let unit = if days == 1 { "day" } else { "days" };
        return Ok(Verdict::new(FeedStatus::Stale, format!("{days} {unit} old")));
    }
    if item_date > today {
        return Ok(Verdict::new(FeedStatus::Invalid, "future timestamp (clock skew?)"));
    }

    let expected = today.and_time(schedule.expected_time);
    let diff_minutes = (ts - expected).num_seconds() as f64 / 60.0;
    let tolerance = schedule.tolerance_minutes as f64;

    if diff_minutes.abs() <= tolerance {
        Ok(Verdict::new(FeedStatus::Latest, "on time"))
    } else if diff_minutes > tolerance {
        let delay_minutes = to_minutes(kind, diff_minutes)?;
        let severity = DelaySeverity::from_minutes(delay_minutes);
        Ok(Verdict {
            status: FeedStatus::Delayed,
            detail: format!("delayed {delay_minutes} min ({} delay)", severity.label()),
            delay_minutes,
            severity: Some(severity),
        })
    } else {
        let early = to_minutes(kind, -diff_minutes)?;
        Ok(Verdict::new(FeedStatus::Early, format!("{early} min early")))
    }
}

fn days_between(kind: FeedKind, from: NaiveDate, to: NaiveDate) -> Result<u32> {
    u32::try_from(to.signed_duration_since(from).num_days()).map_err(|_| {
        EngineError::Classification {
            kind,
            reason: format!("day span {from}..{to} out of range"),
        }
    })
}

/// Whole minutes outside the window, never below one: a status of DELAYED or
/// EARLY always reports a nonzero offset.
fn to_minutes(kind: FeedKind, minutes: f64) -> Result<u32> {
    let rounded = minutes.round().max(1.0);
    if !rounded.is_finite() || rounded < 0.0 || rounded > f64::from(u32::MAX) {
        return Err(EngineError::Classification {
            kind,
            reason: format!("minute offset {minutes} out of range"),
        });
    }
    Ok(rounded as u32)
}

fn error_item(
    item: Option<&RawFeedItem>,
    kind: FeedKind,
    schedules: &ScheduleTable,
    err: &EngineError,
) -> ClassifiedItem {
    let schedule = schedules.get(&kind);
    ClassifiedItem {
        kind,
        display_name: schedule
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| kind.default_display_name().to_string()),
        title: item.map(|i| i.title.clone()).unwrap_or_default(),
        body: item.map(|i| i.body.clone()).unwrap_or_default(),
        timestamp: item.and_then(|i| timestamp::normalize(&i.date, &i.time).ok()),
        status: FeedStatus::Error,
        detail: err.to_string(),
        is_delayed: false,
        delay_minutes: 0,
        severity: None,
        expected_time: schedule
            .map(|s| s.expected_time)
            .unwrap_or_else(fallback_expected_time),
    }
}

/// Sanity check over a classified batch. Returns human-readable problems;
/// an empty list means the batch is usable.
pub fn validate_classified(items: &BTreeMap<FeedKind, ClassifiedItem>) -> Vec<String> {
    let mut problems = Vec::new();
    if items.is_empty() {
        problems.push("no classified items".to_string());
    }
    for (kind, item) in items {
        if item.kind != *kind {
            problems.push(format!("{kind}: item filed under the wrong feed ({})", item.kind));
        }
        if item.status == FeedStatus::Error {
            problems.push(format!("{kind}: classification error ({})", item.detail));
        }
        if (item.delay_minutes != 0) != (item.status == FeedStatus::Delayed) {
            problems.push(format!("{kind}: delay minutes inconsistent with status"));
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::default_schedules;

    fn now() -> NaiveDateTime {
        // Tuesday
        timestamp::normalize("20250812", "170000").unwrap()
    }

    fn item(date: &str, time: &str) -> RawFeedItem {
        RawFeedItem::new("title", "body", date, time)
    }

    fn run(kind: FeedKind, it: &RawFeedItem) -> ClassifiedItem {
        classify(
            Some(it),
            kind,
            &default_schedules(),
            &HolidayCalendar::with_default_holidays(),
            now(),
        )
    }

    #[test]
    fn within_tolerance_is_latest() {
        let c = run(FeedKind::LocalClose, &item("20250812", "154500"));
        assert_eq!(c.status, FeedStatus::Latest);
        assert!(!c.is_delayed);
        assert_eq!(c.delay_minutes, 0);
    }

    #[test]
    fn exact_tolerance_boundary_is_latest() {
        // 15:40 + 10 min
        let c = run(FeedKind::LocalClose, &item("20250812", "155000"));
        assert_eq!(c.status, FeedStatus::Latest);
        let c = run(FeedKind::LocalClose, &item("20250812", "155001"));
        assert_eq!(c.status, FeedStatus::Delayed);
        assert_eq!(c.delay_minutes, 10);
        assert_eq!(c.severity, Some(DelaySeverity::Minor));
    }

    #[test]
    fn late_is_delayed_with_severity() {
        let c = run(FeedKind::UsPremarket, &item("20250812", "073000"));
        assert_eq!(c.status, FeedStatus::Delayed);
        assert!(c.is_delayed);
        assert_eq!(c.delay_minutes, 90);
        assert_eq!(c.severity, Some(DelaySeverity::Critical));
        assert!(c.detail.contains("critical"));
    }

    #[test]
    fn zero_tolerance_still_reports_a_minute() {
        let mut schedules = default_schedules();
        if let Some(s) = schedules.get_mut(&FeedKind::FxClose) {
            s.tolerance_minutes = 0;
        }
        let at = |time| {
            classify(
                Some(&item("20250812", time)),
                FeedKind::FxClose,
                &schedules,
                &HolidayCalendar::default(),
                now(),
            )
        };

        // 20 s late
        let c = at("163020");
        assert_eq!(c.status, FeedStatus::Delayed);
        assert!(c.is_delayed);
        assert_eq!(c.delay_minutes, 1);
        assert!(validate_classified(&BTreeMap::from([(FeedKind::FxClose, c)])).is_empty());

        // 20 s early
        let c = at("162940");
        assert_eq!(c.status, FeedStatus::Early);
        assert_eq!(c.detail, "1 min early");

        assert_eq!(at("163000").status, FeedStatus::Latest);
    }

    #[test]
    fn early_reports_minutes() {
        let c = run(FeedKind::FxClose, &item("20250812", "160000"));
        assert_eq!(c.status, FeedStatus::Early);
        assert_eq!(c.detail, "30 min early");
        assert_eq!(c.delay_minutes, 0);
    }

    #[test]
    fn old_and_future_dates() {
        let c = run(FeedKind::UsPremarket, &item("20250810", "060000"));
        assert_eq!(c.status, FeedStatus::Stale);
        assert_eq!(c.detail, "2 days old");
        let c = run(FeedKind::UsPremarket, &item("20250813", "060000"));
        assert_eq!(c.status, FeedStatus::Invalid);
        assert!(c.detail.contains("future"));
    }

    #[test]
    fn weekend_only_matters_for_business_day_feeds() {
        // Sunday 2025-08-10
        let c = run(FeedKind::LocalClose, &item("20250810", "154000"));
        assert_eq!(c.detail, "non-business-day item");
        let c = run(FeedKind::UsPremarket, &item("20250810", "060000"));
        assert_eq!(c.detail, "2 days old");
    }

    #[test]
    fn missing_title_or_body() {
        let mut it = item("20250812", "154000");
        it.body.clear();
        let c = run(FeedKind::LocalClose, &it);
        assert_eq!(c.status, FeedStatus::Missing);
        assert_eq!(c.detail, "no data");
        // timestamp still reflects the well-formed date/time
        assert!(c.timestamp.is_some());

        let c = classify(
            None,
            FeedKind::FxClose,
            &default_schedules(),
            &HolidayCalendar::default(),
            now(),
        );
        assert_eq!(c.status, FeedStatus::Missing);
        assert!(c.timestamp.is_none());
    }

    #[test]
    fn bad_time_is_invalid() {
        let c = run(FeedKind::LocalClose, &item("20250812", "99"));
        assert_eq!(c.status, FeedStatus::Invalid);
        assert_eq!(c.detail, "time information error");
        assert!(c.timestamp.is_none());
    }

    #[test]
    fn missing_schedule_becomes_error_item() {
        let mut schedules = default_schedules();
        schedules.remove(&FeedKind::FxClose);
        let c = classify(
            Some(&item("20250812", "163000")),
            FeedKind::FxClose,
            &schedules,
            &HolidayCalendar::default(),
            now(),
        );
        assert_eq!(c.status, FeedStatus::Error);
        assert!(c.detail.contains("no schedule"));
        assert_eq!(c.delay_minutes, 0);
    }

    #[test]
    fn validation_flags_errors_and_misfiled_items() {
        let mut map = BTreeMap::new();
        let mut c = run(FeedKind::LocalClose, &item("20250812", "154500"));
        assert!(validate_classified(&map).len() == 1);
        map.insert(FeedKind::LocalClose, c.clone());
        assert!(validate_classified(&map).is_empty());
        c.kind = FeedKind::FxClose;
        map.insert(FeedKind::LocalClose, c);
        assert_eq!(validate_classified(&map).len(), 1);
    }
}
