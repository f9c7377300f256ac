//! Feed kinds, raw items as delivered by the retrieval layer, and the
//! per-feed publication schedule.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, Result};

/// The three fixed market-news feeds.
///
/// Declaration order is the iteration order everywhere (first-seen wins on
/// priority ties during aggregation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    #[serde(alias = "newyork-market-watch")]
    UsPremarket,
    #[serde(alias = "kospi-close")]
    LocalClose,
    #[serde(alias = "exchange-rate")]
    FxClose,
}

impl FeedKind {
    pub const ALL: [FeedKind; 3] = [FeedKind::UsPremarket, FeedKind::LocalClose, FeedKind::FxClose];

    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::UsPremarket => "us_premarket",
            FeedKind::LocalClose => "local_close",
            FeedKind::FxClose => "fx_close",
        }
    }

    /// Key used by the upstream news API.
    pub fn wire_key(self) -> &'static str {
        match self {
            FeedKind::UsPremarket => "newyork-market-watch",
            FeedKind::LocalClose => "kospi-close",
            FeedKind::FxClose => "exchange-rate",
        }
    }

    /// Accepts both the snake_case name and the upstream wire key.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        FeedKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.wire_key() == s)
    }

    pub fn default_display_name(self) -> &'static str {
        match self {
            FeedKind::UsPremarket => "US pre-market",
            FeedKind::LocalClose => "Local close",
            FeedKind::FxClose => "FX close",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item as fetched; immutable once received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeedItem {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "content")]
    pub body: String,
    /// `YYYYMMDD`
    #[serde(default)]
    pub date: String,
    /// 3 to 6 digits, `HHMMSS` canonical.
    #[serde(default)]
    pub time: String,
    /// Anything else the upstream sent; passed through untouched.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RawFeedItem {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        date: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            date: date.into(),
            time: time.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Title and body joined, as the enrichers read them.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// Input of one engine run. Absent kinds are classified as MISSING.
pub type RawPayload = BTreeMap<FeedKind, RawFeedItem>;

/// Parse an upstream JSON object keyed by feed name.
///
/// Unknown keys are skipped and reported back as warnings, as are values that
/// are not item objects (`null` becomes an absent feed).
pub fn payload_from_json(json: &str) -> Result<(RawPayload, Vec<String>)> {
    let root: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| EngineError::Config(format!("payload is not JSON: {e}")))?;
    let obj = root
        .as_object()
        .ok_or_else(|| EngineError::Config("payload must be a JSON object".into()))?;

    let mut payload = RawPayload::new();
    let mut warnings = Vec::new();
    for (key, value) in obj {
        let Some(kind) = FeedKind::parse(key) else {
            warnings.push(format!("unknown feed `{key}` ignored"));
            continue;
        };
        if value.is_null() {
            continue;
        }
        match serde_json::from_value::<RawFeedItem>(value.clone()) {
            Ok(item) => {
                payload.insert(kind, item);
            }
            Err(e) => warnings.push(format!("feed `{key}` is malformed: {e}")),
        }
    }
    Ok((payload, warnings))
}

/// When a feed is expected to publish and how late it may be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSchedule {
    pub display_name: String,
    pub expected_time: NaiveTime,
    pub tolerance_minutes: i64,
    /// Items dated on weekends/holidays are STALE for these feeds.
    pub business_days_only: bool,
    /// Times of day worth re-checking a late feed, ascending.
    pub delay_check_times: Vec<NaiveTime>,
}

pub type ScheduleTable = BTreeMap<FeedKind, FeedSchedule>;

fn hms(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl FeedSchedule {
    pub fn default_for(kind: FeedKind) -> Self {
        let (expected, tolerance, business_days_only, checks) = match kind {
            FeedKind::UsPremarket => (
                hms(6, 0),
                15,
                false,
                vec![hms(7, 0), hms(7, 30), hms(8, 0), hms(8, 30)],
            ),
            FeedKind::LocalClose => (
                hms(15, 40),
                10,
                true,
                vec![hms(15, 55), hms(16, 0), hms(16, 30), hms(17, 0)],
            ),
            FeedKind::FxClose => (
                hms(16, 30),
                5,
                true,
                vec![hms(16, 40), hms(17, 0), hms(17, 30), hms(18, 0)],
            ),
        };
        Self {
            display_name: kind.default_display_name().to_string(),
            expected_time: expected,
            tolerance_minutes: tolerance,
            business_days_only,
            delay_check_times: checks,
        }
    }

    /// First configured check strictly after `now`.
    pub fn next_check_after(&self, now: NaiveTime) -> Option<NaiveTime> {
        self.delay_check_times.iter().copied().filter(|t| *t > now).min()
    }
}

pub fn default_schedules() -> ScheduleTable {
    FeedKind::ALL
        .into_iter()
        .map(|k| (k, FeedSchedule::default_for(k)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_accepts_wire_keys_and_snake_case() {
        assert_eq!(FeedKind::parse("kospi-close"), Some(FeedKind::LocalClose));
        assert_eq!(FeedKind::parse("FX_CLOSE"), Some(FeedKind::FxClose));
        assert_eq!(FeedKind::parse("crypto"), None);
        let k: FeedKind = serde_json::from_str("\"newyork-market-watch\"").unwrap();
        assert_eq!(k, FeedKind::UsPremarket);
    }

    #[test]
    fn payload_skips_unknown_feeds_and_keeps_extras() {
        let json = r#"{
            "kospi-close": {"title": "t", "content": "b", "date": "20250812", "time": "154500", "id": 7},
            "exchange-rate": null,
            "crypto-close": {"title": "x"}
        }"#;
        let (payload, warnings) = payload_from_json(json).unwrap();
        assert_eq!(payload.len(), 1);
        let item = &payload[&FeedKind::LocalClose];
        assert_eq!(item.body, "b");
        assert_eq!(item.extra.get("id"), Some(&serde_json::json!(7)));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn default_schedule_matches_deployment() {
        let s = FeedSchedule::default_for(FeedKind::LocalClose);
        assert_eq!(s.expected_time, hms(15, 40));
        assert_eq!(s.tolerance_minutes, 10);
        assert!(s.business_days_only);
        assert_eq!(s.next_check_after(hms(16, 10)), Some(hms(16, 30)));
        assert_eq!(s.next_check_after(hms(17, 0)), None);
    }
}
