//! # Feed Status Engine
//! Service object tying the pipeline together:
//! classify every feed → enrich the ones with text → aggregate → cache.
//!
//! Holds its configuration, holiday calendar, result cache and clock; nothing
//! is read from globals. `run` is the uncached pipeline, `get_or_compute` the
//! memoized entry point keyed by the payload fingerprint.

use chrono::{Duration, FixedOffset, NaiveDateTime, Utc};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::aggregate::{self, AggregateSnapshot};
use crate::cache::{self, ResultCache};
use crate::calendar::HolidayCalendar;
use crate::classifier::{self, ClassifiedItem};
use crate::config::EngineConfig;
use crate::enrich::{self, StructuredFields};
use crate::error::{EngineError, Result};
use crate::feed::{FeedKind, RawFeedItem, RawPayload, ScheduleTable};
use crate::telemetry;
use crate::timestamp;

/// Source of "now" in market-local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock shifted to the market's UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self(Mutex::new(at))
    }

    fn lock(&self) -> MutexGuard<'_, NaiveDateTime> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut t = self.lock();
        *t += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }
}

/// Running totals over every `run` / `get_or_compute` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub total_runs: u64,
    pub successful: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub avg_processing_ms: f64,
    pub cache_size: usize,
    /// 0.0 to 1.0; 0.0 before the first run.
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct RunStats {
    total_runs: u64,
    successful: u64,
    failed: u64,
    cache_hits: u64,
    total_ms: f64,
}

pub struct FeedStatusEngine {
    schedules: ScheduleTable,
    calendar: HolidayCalendar,
    parallel_enrichment: bool,
    cache: ResultCache<AggregateSnapshot>,
    clock: Arc<dyn Clock>,
    stats: Mutex<RunStats>,
}

impl std::fmt::Debug for FeedStatusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedStatusEngine")
            .field("feeds", &self.schedules.len())
            .field("holidays", &self.calendar.len())
            .field("parallel_enrichment", &self.parallel_enrichment)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for FeedStatusEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FeedStatusEngine {
    /// Engine on the system clock at the configured market offset.
    pub fn new(config: EngineConfig) -> Self {
        let clock = Arc::new(SystemClock::new(config.market_offset));
        Self::with_clock(config, clock)
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        telemetry::ensure_metrics_described();
        Self {
            cache: ResultCache::new(config.cache_ttl_secs, config.cache_capacity),
            schedules: config.schedules,
            calendar: config.calendar,
            parallel_enrichment: config.parallel_enrichment,
            clock,
            stats: Mutex::new(RunStats::default()),
        }
    }

    pub fn schedules(&self) -> &ScheduleTable {
        &self.schedules
    }

    pub fn calendar(&self) -> &HolidayCalendar {
        &self.calendar
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// One classified item per known feed; absent feeds come back MISSING.
    pub fn classify_all(
        &self,
        payload: &RawPayload,
        now: NaiveDateTime,
    ) -> BTreeMap<FeedKind, ClassifiedItem> {
        FeedKind::ALL
            .into_iter()
            .map(|kind| {
                let item = classifier::classify(
                    payload.get(&kind),
                    kind,
                    &self.schedules,
                    &self.calendar,
                    now,
                );
                (kind, item)
            })
            .collect()
    }

    /// Structured fields for every payload item that carries text.
    ///
    /// Enricher failures degrade to the feed's default fields; with
    /// `parallel_enrichment` a panicking enricher only loses its own slot.
    pub fn enrich_all(&self, payload: &RawPayload) -> BTreeMap<FeedKind, StructuredFields> {
        let work: Vec<(FeedKind, &RawFeedItem)> = payload
            .iter()
            .filter(|(_, item)| has_text(item))
            .map(|(kind, item)| (*kind, item))
            .collect();

        if !self.parallel_enrichment || work.len() < 2 {
            return work
                .into_iter()
                .map(|(kind, item)| (kind, enrich::enrich_or_default(kind, item).0))
                .collect();
        }

        thread::scope(|s| {
            let handles: Vec<_> = work
                .into_iter()
                .map(|(kind, item)| (kind, s.spawn(move || enrich::enrich_or_default(kind, item).0)))
                .collect();
            handles
                .into_iter()
                .map(|(kind, handle)| {
                    let fields = handle.join().unwrap_or_else(|_| {
                        warn!(target: "engine", feed = %kind, "enricher panicked; using defaults");
                        telemetry::record_enrichment_failure();
                        StructuredFields::default_for(kind)
                    });
                    (kind, fields)
                })
                .collect()
        })
    }

    /// Enrich a single feed, surfacing the failure instead of degrading.
    pub fn enrich_feed(&self, payload: &RawPayload, kind: FeedKind) -> Result<StructuredFields> {
        let item = payload
            .get(&kind)
            .filter(|i| has_text(i))
            .ok_or(EngineError::MissingData(kind))?;
        enrich::enrich(kind, item)
    }

    /// Publication time of one feed's item.
    pub fn feed_timestamp(&self, payload: &RawPayload, kind: FeedKind) -> Result<NaiveDateTime> {
        let item = payload.get(&kind).ok_or(EngineError::MissingData(kind))?;
        timestamp::normalize(&item.date, &item.time)
            .map_err(|source| EngineError::InvalidTimestamp { kind, source })
    }

    fn pipeline(&self, payload: &RawPayload, now: NaiveDateTime) -> Result<AggregateSnapshot> {
        // 1) Classify every known feed (never fails per item)
        let items = self.classify_all(payload, now);

        // 2) Batch sanity check; problems are reported, not fatal
        for problem in classifier::validate_classified(&items) {
            debug!(target: "engine", %problem, "classified batch");
        }

        // 3) Enrich items with text (failures degrade to defaults)
        let enrichments = self.enrich_all(payload);

        // 4) Aggregate; the only stage whose error aborts the run
        aggregate::aggregate(items, enrichments, &self.schedules, now)
    }

    fn lock_stats(&self) -> MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record_run(&self, ok: bool, cache_hit: bool, ms: f64) {
        let mut st = self.lock_stats();
        st.total_runs += 1;
        if ok {
            st.successful += 1;
        } else {
            st.failed += 1;
        }
        if cache_hit {
            st.cache_hits += 1;
        }
        st.total_ms += ms;
        drop(st);
        telemetry::record_run_ms(ms);
    }

    /// Uncached pipeline run at `now`.
    pub fn run(&self, payload: &RawPayload, now: NaiveDateTime) -> Result<AggregateSnapshot> {
        let started = Instant::now();
        let result = self.pipeline(payload, now);
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record_run(result.is_ok(), false, ms);
        match &result {
            Ok(snap) => info!(
                target: "engine",
                overall = %snap.overall_status,
                delayed = snap.counts.delayed,
                ms = %format!("{ms:.2}"),
                "run complete"
            ),
            Err(e) => warn!(target: "engine", error = %e, "run failed"),
        }
        result
    }

    /// Memoized run at the clock's current time.
    ///
    /// Identical payloads within the cache TTL share one snapshot. If the
    /// payload cannot be fingerprinted the run goes uncached.
    pub fn get_or_compute(&self, payload: &RawPayload) -> Result<Arc<AggregateSnapshot>> {
        let now = self.clock.now();
        let key = match cache::fingerprint(payload) {
            Ok(k) => k,
            Err(e) => {
                warn!(target: "engine", error = %e, "payload fingerprint failed; running uncached");
                return self.run(payload, now).map(Arc::new);
            }
        };

        let started = Instant::now();
        let result = self
            .cache
            .get_or_try_insert_with(&key, now, || self.pipeline(payload, now));
        let ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok((snap, hit)) => {
                self.record_run(true, hit, ms);
                if !hit {
                    info!(
                        target: "engine",
                        overall = %snap.overall_status,
                        delayed = snap.counts.delayed,
                        ms = %format!("{ms:.2}"),
                        "run complete"
                    );
                }
                Ok(snap)
            }
            Err(e) => {
                self.record_run(false, false, ms);
                warn!(target: "engine", error = %e, "run failed");
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> EngineStats {
        let cache_size = self.cache.len();
        let st = self.lock_stats();
        let runs = st.total_runs as f64;
        EngineStats {
            total_runs: st.total_runs,
            successful: st.successful,
            failed: st.failed,
            cache_hits: st.cache_hits,
            avg_processing_ms: if st.total_runs == 0 { 0.0 } else { st.total_ms / runs },
            cache_size,
            success_rate: if st.total_runs == 0 { 0.0 } else { st.successful as f64 / runs },
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!(target: "engine", "cache cleared");
    }
}

fn has_text(item: &RawFeedItem) -> bool {
    !item.title.trim().is_empty() || !item.body.trim().is_empty()
}
