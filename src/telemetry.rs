//! Logging and metrics plumbing.
//!
//! The engine only emits `tracing` events and `metrics` counters; installing a
//! subscriber or a metrics recorder is left to the embedding binary.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::status::FeedStatus;

pub const ENV_LOG_FILTER: &str = "FEED_STATUS_LOG";
pub const ENV_LOG_JSON: &str = "FEED_STATUS_LOG_JSON";
const DEFAULT_FILTER: &str = "info";

/// Install a global subscriber. Safe to call more than once; later calls are no-ops.
///
/// Filter comes from `FEED_STATUS_LOG` (EnvFilter syntax); `FEED_STATUS_LOG_JSON=1`
/// switches to JSON lines.
pub fn init_tracing() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        let filter = EnvFilter::try_from_env(ENV_LOG_FILTER)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let json = std::env::var(ENV_LOG_JSON)
            .ok()
            .is_some_and(|v| v == "1");

        let registry = tracing_subscriber::registry().with(filter);
        // Err only means another subscriber is already installed.
        let _ = if json {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().compact()).try_init()
        };
    });
}

/// One-time metrics registration (so series show up once a recorder exists).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "feed_items_classified_total",
            "Feed items classified, labelled by status."
        );
        describe_counter!("feed_cache_hits_total", "Runs served from the result cache.");
        describe_counter!("feed_cache_misses_total", "Runs that required a full computation.");
        describe_counter!(
            "feed_enrichment_failures_total",
            "Enricher failures degraded to default fields."
        );
        describe_counter!(
            "feed_aggregation_failures_total",
            "Runs aborted during aggregation."
        );
        describe_histogram!("feed_run_ms", "Full pipeline run time in milliseconds.");
    });
}

pub fn record_classified(status: FeedStatus) {
    counter!("feed_items_classified_total", "status" => status.as_str()).increment(1);
}

pub fn record_cache(hit: bool) {
    if hit {
        counter!("feed_cache_hits_total").increment(1);
    } else {
        counter!("feed_cache_misses_total").increment(1);
    }
}

pub fn record_enrichment_failure() {
    counter!("feed_enrichment_failures_total").increment(1);
}

pub fn record_aggregation_failure() {
    counter!("feed_aggregation_failures_total").increment(1);
}

pub fn record_run_ms(ms: f64) {
    histogram!("feed_run_ms").record(ms);
}

/// Short anonymized id for log lines; raw feed text is never logged.
pub fn anon_id(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
