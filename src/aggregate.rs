//! # Aggregator
//! Folds the per-feed classified items (and any enrichment) into one
//! cross-feed snapshot: dominant status, counts, delay statistics, a one-line
//! market summary and up to five recommendations.
//!
//! Aggregation is the only stage whose failure aborts a run; it fails on
//! inconsistent input instead of returning a partial snapshot.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::classifier::ClassifiedItem;
use crate::enrich::StructuredFields;
use crate::error::{EngineError, Result};
use crate::feed::{FeedKind, ScheduleTable};
use crate::status::FeedStatus;
use crate::telemetry;

pub const MAX_RECOMMENDATIONS: usize = 5;
pub const SUMMARY_SEPARATOR: &str = " | ";

/// A classified item with the enricher's fields, when there are any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedItem {
    pub classified: ClassifiedItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<StructuredFields>,
}

/// LATEST and EARLY both count as `latest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub latest: usize,
    pub delayed: usize,
    pub stale: usize,
    pub missing: usize,
    pub error: usize,
    pub invalid: usize,
    pub total: usize,
}

impl StatusCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a FeedStatus>) -> Self {
        let mut c = StatusCounts::default();
        for s in statuses {
            match s {
                FeedStatus::Latest | FeedStatus::Early => c.latest += 1,
                FeedStatus::Delayed => c.delayed += 1,
                FeedStatus::Stale => c.stale += 1,
                FeedStatus::Missing => c.missing += 1,
                FeedStatus::Error => c.error += 1,
                FeedStatus::Invalid => c.invalid += 1,
            }
            c.total += 1;
        }
        c
    }

    /// Sum of the per-status buckets; equals `total` for a consistent tally.
    pub fn bucket_sum(&self) -> usize {
        self.latest + self.delayed + self.stale + self.missing + self.error + self.invalid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayStats {
    pub has_delays: bool,
    pub delayed_count: usize,
    pub max_delay_minutes: u32,
    pub avg_delay_minutes: f64,
    pub delayed_feeds: Vec<FeedKind>,
}

impl DelayStats {
    /// Over `is_delayed` items only.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ClassifiedItem>) -> Self {
        let delayed: Vec<&ClassifiedItem> = items.into_iter().filter(|i| i.is_delayed).collect();
        if delayed.is_empty() {
            return DelayStats::default();
        }
        let total: u64 = delayed.iter().map(|i| u64::from(i.delay_minutes)).sum();
        DelayStats {
            has_delays: true,
            delayed_count: delayed.len(),
            max_delay_minutes: delayed.iter().map(|i| i.delay_minutes).max().unwrap_or(0),
            avg_delay_minutes: total as f64 / delayed.len() as f64,
            delayed_feeds: delayed.iter().map(|i| i.kind).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub generated_at: NaiveDateTime,
    pub items: BTreeMap<FeedKind, EnrichedItem>,
    pub overall_status: FeedStatus,
    pub counts: StatusCounts,
    pub delays: DelayStats,
    pub summary: String,
    pub recommendations: Vec<String>,
}

impl AggregateSnapshot {
    pub fn item(&self, kind: FeedKind) -> Option<&ClassifiedItem> {
        self.items.get(&kind).map(|e| &e.classified)
    }
}

/// Highest-priority status; on ties the first one seen wins. No items → MISSING.
pub fn dominant_status<'a>(statuses: impl IntoIterator<Item = &'a FeedStatus>) -> FeedStatus {
    let mut best: Option<FeedStatus> = None;
    for s in statuses {
        if best.map_or(true, |b| s.priority() > b.priority()) {
            best = Some(*s);
        }
    }
    best.unwrap_or(FeedStatus::Missing)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn status_clause(counts: &StatusCounts) -> String {
    if counts.total > 0 && counts.latest == counts.total {
        "all feeds on time".to_string()
    } else if counts.delayed > 0 {
        format!("{} delayed", plural(counts.delayed, "feed", "feeds"))
    } else {
        "mixed status".to_string()
    }
}

fn market_summary(counts: &StatusCounts, items: &BTreeMap<FeedKind, EnrichedItem>) -> String {
    let mut clauses = vec![status_clause(counts)];
    for item in items.values() {
        if let Some(fields) = &item.fields {
            clauses.push(format!("{}: {}", item.classified.display_name, fields.sentiment()));
        }
    }
    clauses.join(SUMMARY_SEPARATOR)
}

/// Earliest configured re-check after `now` among feeds that are not on time.
fn next_check(
    items: &BTreeMap<FeedKind, EnrichedItem>,
    schedules: &ScheduleTable,
    now: NaiveTime,
) -> Option<NaiveTime> {
    items
        .values()
        .filter(|i| !i.classified.status.is_on_time())
        .filter_map(|i| schedules.get(&i.classified.kind)?.next_check_after(now))
        .min()
}

fn recommendations(
    counts: &StatusCounts,
    items: &BTreeMap<FeedKind, EnrichedItem>,
    schedules: &ScheduleTable,
    now: NaiveDateTime,
) -> Vec<String> {
    let mut out = Vec::new();

    if counts.total > 0 {
        let ratio = counts.latest as f64 / counts.total as f64;
        let on_time = format!("{}/{} feeds on time", counts.latest, counts.total);
        out.push(if ratio >= 1.0 {
            format!("good: {on_time}")
        } else if ratio >= 0.5 {
            format!("partial delay: {on_time}")
        } else {
            format!("widespread delay: {on_time}")
        });
    }
    if counts.error > 0 {
        out.push(format!(
            "{} failed during classification; check the logs",
            plural(counts.error, "feed", "feeds")
        ));
    }
    if counts.missing > 0 {
        out.push(format!(
            "{} without data; check the upstream source",
            plural(counts.missing, "feed", "feeds")
        ));
    }
    if let Some(t) = next_check(items, schedules, now.time()) {
        out.push(format!("next check at {}", t.format("%H:%M")));
    }
    if out.is_empty() {
        out.push("normal operation, keep monitoring".to_string());
    }
    out.truncate(MAX_RECOMMENDATIONS);
    out
}

/// Build the snapshot for one run.
///
/// Fails with [`EngineError::Aggregation`] when an item or enrichment is filed
/// under the wrong feed kind, or when the status tally is inconsistent.
pub fn aggregate(
    items: BTreeMap<FeedKind, ClassifiedItem>,
    enrichments: BTreeMap<FeedKind, StructuredFields>,
    schedules: &ScheduleTable,
    now: NaiveDateTime,
) -> Result<AggregateSnapshot> {
    build(items, enrichments, schedules, now).map_err(|e| {
        warn!(target: "aggregate", error = %e, "aggregation failed");
        telemetry::record_aggregation_failure();
        e
    })
}

fn build(
    items: BTreeMap<FeedKind, ClassifiedItem>,
    mut enrichments: BTreeMap<FeedKind, StructuredFields>,
    schedules: &ScheduleTable,
    now: NaiveDateTime,
) -> Result<AggregateSnapshot> {
    let mut merged = BTreeMap::new();
    for (kind, classified) in items {
        if classified.kind != kind {
            return Err(EngineError::Aggregation(format!(
                "item for {} filed under {kind}",
                classified.kind
            )));
        }
        let fields = enrichments.remove(&kind);
        if let Some(f) = &fields {
            if f.kind() != kind {
                return Err(EngineError::Aggregation(format!(
                    "{} enrichment filed under {kind}",
                    f.kind()
                )));
            }
        }
        merged.insert(kind, EnrichedItem { classified, fields });
    }
    if let Some(kind) = enrichments.keys().next() {
        return Err(EngineError::Aggregation(format!(
            "enrichment for {kind} has no classified item"
        )));
    }

    let statuses: Vec<FeedStatus> = merged.values().map(|i| i.classified.status).collect();
    let counts = StatusCounts::tally(&statuses);
    if counts.bucket_sum() != counts.total || counts.total != merged.len() {
        return Err(EngineError::Aggregation(format!(
            "status counts do not add up: {counts:?}"
        )));
    }

    let overall_status = dominant_status(&statuses);
    let delays = DelayStats::from_items(merged.values().map(|i| &i.classified));
    let summary = market_summary(&counts, &merged);
    let recommendations = recommendations(&counts, &merged, schedules, now);

    debug!(
        target: "aggregate",
        overall = %overall_status,
        total = counts.total,
        delayed = counts.delayed,
        "snapshot built"
    );

    Ok(AggregateSnapshot {
        generated_at: now,
        items: merged,
        overall_status,
        counts,
        delays,
        summary,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::HolidayCalendar;
    use crate::classifier::classify;
    use crate::enrich::Sentiment;
    use crate::feed::{default_schedules, RawFeedItem};
    use crate::timestamp;

    fn now() -> NaiveDateTime {
        timestamp::normalize("20250812", "170000").unwrap()
    }

    fn classified(kind: FeedKind, time: Option<&str>) -> ClassifiedItem {
        let raw = time.map(|t| RawFeedItem::new("title", "body", "20250812", t));
        classify(
            raw.as_ref(),
            kind,
            &default_schedules(),
            &HolidayCalendar::default(),
            now(),
        )
    }

    fn items(list: &[(FeedKind, Option<&str>)]) -> BTreeMap<FeedKind, ClassifiedItem> {
        list.iter().map(|(k, t)| (*k, classified(*k, *t))).collect()
    }

    #[test]
    fn dominant_prefers_priority_then_first_seen() {
        use FeedStatus::*;
        assert_eq!(dominant_status(&[Latest, Delayed, Missing]), Delayed);
        assert_eq!(dominant_status(&[Early, Latest]), Early);
        assert_eq!(dominant_status(&[Stale, Invalid]), Invalid);
        assert_eq!(dominant_status(&Vec::<FeedStatus>::new()), Missing);
    }

    #[test]
    fn all_on_time() {
        let snap = aggregate(
            items(&[
                (FeedKind::UsPremarket, Some("060500")),
                (FeedKind::LocalClose, Some("154000")),
                (FeedKind::FxClose, Some("163000")),
            ]),
            BTreeMap::new(),
            &default_schedules(),
            now(),
        )
        .unwrap();
        assert_eq!(snap.overall_status, FeedStatus::Latest);
        assert_eq!(snap.summary, "all feeds on time");
        assert_eq!(snap.recommendations, vec!["good: 3/3 feeds on time".to_string()]);
        assert!(!snap.delays.has_delays);
    }

    #[test]
    fn delays_missing_and_next_check() {
        let snap = aggregate(
            items(&[
                (FeedKind::UsPremarket, Some("073000")),
                (FeedKind::LocalClose, Some("160500")),
                (FeedKind::FxClose, None),
            ]),
            BTreeMap::new(),
            &default_schedules(),
            now(),
        )
        .unwrap();
        assert_eq!(snap.overall_status, FeedStatus::Delayed);
        assert_eq!(snap.counts.delayed, 2);
        assert_eq!(snap.counts.missing, 1);
        assert_eq!(snap.delays.max_delay_minutes, 90);
        assert!((snap.delays.avg_delay_minutes - 57.5).abs() < 1e-9);
        assert_eq!(snap.delays.delayed_feeds, vec![FeedKind::UsPremarket, FeedKind::LocalClose]);
        assert_eq!(snap.summary, "2 feeds delayed");
        // now = 17:00; FX checks at 17:30, local close has none left, US none left
        assert_eq!(
            snap.recommendations,
            vec![
                "widespread delay: 0/3 feeds on time".to_string(),
                "1 feed without data; check the upstream source".to_string(),
                "next check at 17:30".to_string(),
            ]
        );
    }

    #[test]
    fn empty_input_is_missing_with_default_note() {
        let snap = aggregate(BTreeMap::new(), BTreeMap::new(), &default_schedules(), now()).unwrap();
        assert_eq!(snap.overall_status, FeedStatus::Missing);
        assert_eq!(snap.counts.total, 0);
        assert_eq!(snap.recommendations, vec!["normal operation, keep monitoring".to_string()]);
    }

    #[test]
    fn summary_names_enriched_sentiment() {
        let mut enrichments = BTreeMap::new();
        enrichments.insert(FeedKind::LocalClose, StructuredFields::default_for(FeedKind::LocalClose));
        let snap = aggregate(
            items(&[(FeedKind::LocalClose, Some("154000"))]),
            enrichments,
            &default_schedules(),
            now(),
        )
        .unwrap();
        assert_eq!(
            snap.summary,
            format!("all feeds on time | Local close: {}", Sentiment::Mixed)
        );
        assert!(snap.items[&FeedKind::LocalClose].fields.is_some());
    }

    #[test]
    fn misfiled_item_or_enrichment_fails() {
        let mut bad = items(&[(FeedKind::LocalClose, Some("154000"))]);
        let moved = bad.remove(&FeedKind::LocalClose).unwrap();
        bad.insert(FeedKind::FxClose, moved);
        let err = aggregate(bad, BTreeMap::new(), &default_schedules(), now()).unwrap_err();
        assert!(matches!(err, EngineError::Aggregation(_)));

        let mut enrichments = BTreeMap::new();
        enrichments.insert(FeedKind::LocalClose, StructuredFields::default_for(FeedKind::FxClose));
        let err = aggregate(
            items(&[(FeedKind::LocalClose, Some("154000"))]),
            enrichments,
            &default_schedules(),
            now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("enrichment"));
    }

    #[test]
    fn counts_include_invalid() {
        let c = StatusCounts::tally(&[FeedStatus::Invalid, FeedStatus::Early, FeedStatus::Error]);
        assert_eq!(c.invalid, 1);
        assert_eq!(c.latest, 1);
        assert_eq!(c.bucket_sum(), c.total);
    }
}
