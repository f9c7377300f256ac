// tests/engine_cache.rs
//! Memoization through the engine: identical payloads inside the TTL share
//! one snapshot; expiry, payload changes and capacity force recomputation.

use chrono::{Duration, NaiveDateTime};
use feed_status_engine::{
    cache::{fingerprint, ResultCache},
    timestamp, AggregateSnapshot, Clock, EngineConfig, FeedKind, FeedStatusEngine, FixedClock,
    RawFeedItem, RawPayload,
};
use std::cell::Cell;
use std::sync::Arc;

fn t0() -> NaiveDateTime {
    timestamp::normalize("20250812", "170000").unwrap()
}

fn payload(fx_time: &str) -> RawPayload {
    let mut p = RawPayload::new();
    p.insert(
        FeedKind::LocalClose,
        RawFeedItem::new(
            "코스피, 외국인 매수에 상승 마감",
            "코스피는 전일 대비 15.20포인트(0.60%) 오른 2,540.50에 장을 마쳤다.",
            "20250812",
            "154500",
        ),
    );
    p.insert(
        FeedKind::FxClose,
        RawFeedItem::new(
            "원/달러 환율 하락",
            "원/달러 환율은 전 거래일보다 5.2원 내린 1,320.5원에 마감했다.",
            "20250812",
            fx_time,
        ),
    );
    p
}

fn engine_at(clock: &Arc<FixedClock>, config: EngineConfig) -> FeedStatusEngine {
    FeedStatusEngine::with_clock(config, clock.clone())
}

#[test]
fn same_payload_within_ttl_is_computed_once() {
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = engine_at(&clock, EngineConfig::default());

    let a = engine.get_or_compute(&payload("163000")).unwrap();
    clock.advance(Duration::seconds(299));
    let b = engine.get_or_compute(&payload("163000")).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    let st = engine.stats();
    assert_eq!(st.total_runs, 2);
    assert_eq!(st.cache_hits, 1);
    assert_eq!(st.cache_size, 1);
    // the snapshot carries the time of the computing run
    assert_eq!(b.generated_at, t0());
}

#[test]
fn pipeline_counter_sees_a_single_computation() {
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = engine_at(&clock, EngineConfig::default());
    let cache: ResultCache<AggregateSnapshot> = ResultCache::new(300, 10);
    let calls = Cell::new(0u32);
    let p = payload("163000");
    let key = fingerprint(&p).unwrap();

    let compute = || {
        calls.set(calls.get() + 1);
        engine.run(&p, clock.now())
    };
    let (a, hit_a) = cache.get_or_try_insert_with(&key, t0(), compute).unwrap();
    let (b, hit_b) = cache
        .get_or_try_insert_with(&key, t0() + Duration::seconds(120), compute)
        .unwrap();

    assert_eq!(calls.get(), 1);
    assert!(!hit_a && hit_b);
    assert_eq!(a, b);
}

#[test]
fn expiry_recomputes_with_new_time() {
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = engine_at(&clock, EngineConfig::default());

    let a = engine.get_or_compute(&payload("163000")).unwrap();
    clock.advance(Duration::seconds(300));
    let b = engine.get_or_compute(&payload("163000")).unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(b.generated_at, t0() + Duration::seconds(300));
    assert_eq!(engine.stats().cache_hits, 0);
}

#[test]
fn one_field_change_is_a_different_key() {
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = engine_at(&clock, EngineConfig::default());

    let on_time = engine.get_or_compute(&payload("163000")).unwrap();
    let late = engine.get_or_compute(&payload("171500")).unwrap();

    assert!(!Arc::ptr_eq(&on_time, &late));
    assert_ne!(fingerprint(&payload("163000")).unwrap(), fingerprint(&payload("171500")).unwrap());
    assert_eq!(engine.stats().cache_size, 2);
    assert_eq!(engine.stats().cache_hits, 0);
}

#[test]
fn capacity_bounds_the_cache() {
    let clock = Arc::new(FixedClock::new(t0()));
    let engine = engine_at(
        &clock,
        EngineConfig {
            cache_capacity: 2,
            ..EngineConfig::default()
        },
    );

    for fx_time in ["163000", "163100", "163200"] {
        engine.get_or_compute(&payload(fx_time)).unwrap();
        clock.advance(Duration::seconds(1));
    }
    assert_eq!(engine.stats().cache_size, 2);

    // the oldest key was evicted, the newest is still served from cache
    engine.get_or_compute(&payload("163200")).unwrap();
    assert_eq!(engine.stats().cache_hits, 1);
    engine.get_or_compute(&payload("163000")).unwrap();
    assert_eq!(engine.stats().cache_hits, 1);

    engine.clear_cache();
    assert_eq!(engine.stats().cache_size, 0);
}
