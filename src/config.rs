// src/config.rs
//! Engine configuration: per-feed schedules, holiday calendar, cache bounds,
//! market clock offset.
//!
//! The core takes an [`EngineConfig`] value at construction and never reads
//! files itself; the loaders here are for embedding binaries.

use anyhow::{anyhow, Context};
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL_SECS, MAX_TTL_SECS};
use crate::calendar::HolidayCalendar;
use crate::error::{EngineError, Result};
use crate::feed::{default_schedules, FeedKind, FeedSchedule, ScheduleTable};

pub const ENV_CONFIG_PATH: &str = "FEED_STATUS_CONFIG_PATH";
const DEFAULT_TOML: &str = "config/feed_status.toml";
const DEFAULT_JSON: &str = "config/feed_status.json";

/// Local market clock, UTC+09:00.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub schedules: ScheduleTable,
    pub calendar: HolidayCalendar,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    /// Offset applied to UTC to get the market-local wall clock.
    pub market_offset: FixedOffset,
    /// Run the per-feed enrichers on scoped threads.
    pub parallel_enrichment: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedules: default_schedules(),
            calendar: HolidayCalendar::with_default_holidays(),
            cache_ttl_secs: DEFAULT_TTL_SECS,
            cache_capacity: DEFAULT_CAPACITY,
            market_offset: default_offset(),
            parallel_enrichment: false,
        }
    }
}

fn default_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    cache: RawCache,
    #[serde(default)]
    market: RawMarket,
    #[serde(default)]
    engine: RawEngine,
    #[serde(default)]
    feeds: BTreeMap<String, RawSchedule>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCache {
    ttl_secs: Option<u64>,
    capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMarket {
    /// `+09:00` style.
    utc_offset: Option<String>,
    /// Replaces the built-in list when present.
    holidays: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngine {
    parallel_enrichment: Option<bool>,
}

/// Per-feed overrides; absent fields keep the feed's default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchedule {
    display_name: Option<String>,
    expected_time: Option<String>,
    tolerance_minutes: Option<i64>,
    business_days_only: Option<bool>,
    delay_check_times: Option<Vec<String>>,
}

fn config_err(msg: impl Into<String>) -> EngineError {
    EngineError::Config(msg.into())
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_clock(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| config_err(format!("`{s}` is not a HH:MM[:SS] time")))
}

/// `+HH:MM` / `-HH:MM`.
fn parse_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    let bad = || config_err(format!("`{s}` is not a +HH:MM offset"));
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(bad()),
    };
    let (h, m) = rest.split_once(':').ok_or_else(bad)?;
    let h: i32 = h.parse().map_err(|_| bad())?;
    let m: i32 = m.parse().map_err(|_| bad())?;
    if !(0..=23).contains(&h) || !(0..=59).contains(&m) {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60)).ok_or_else(bad)
}

fn apply_schedule(kind: FeedKind, raw: RawSchedule) -> Result<FeedSchedule> {
    let mut s = FeedSchedule::default_for(kind);
    if let Some(name) = raw.display_name {
        s.display_name = name;
    }
    if let Some(t) = raw.expected_time {
        s.expected_time = parse_clock(&t)?;
    }
    if let Some(tol) = raw.tolerance_minutes {
        if tol < 0 {
            return Err(config_err(format!("{kind}: tolerance_minutes must be >= 0")));
        }
        s.tolerance_minutes = tol;
    }
    if let Some(b) = raw.business_days_only {
        s.business_days_only = b;
    }
    if let Some(times) = raw.delay_check_times {
        let mut parsed = times.iter().map(|t| parse_clock(t)).collect::<Result<Vec<_>>>()?;
        parsed.sort();
        parsed.dedup();
        s.delay_check_times = parsed;
    }
    Ok(s)
}

impl EngineConfig {
    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut cfg = EngineConfig::default();

        if let Some(ttl) = raw.cache.ttl_secs {
            if ttl == 0 {
                return Err(config_err("cache.ttl_secs must be > 0"));
            }
            if ttl > MAX_TTL_SECS {
                return Err(config_err(format!(
                    "cache.ttl_secs must be <= {MAX_TTL_SECS}, got {ttl}"
                )));
            }
            cfg.cache_ttl_secs = ttl;
        }
        if let Some(cap) = raw.cache.capacity {
            if cap == 0 {
                return Err(config_err("cache.capacity must be > 0"));
            }
            cfg.cache_capacity = cap;
        }
        if let Some(off) = raw.market.utc_offset {
            cfg.market_offset = parse_offset(&off)?;
        }
        if let Some(days) = raw.market.holidays {
            cfg.calendar = HolidayCalendar::from_strs(&days)?;
        }
        if let Some(p) = raw.engine.parallel_enrichment {
            cfg.parallel_enrichment = p;
        }
        for (key, sched) in raw.feeds {
            let kind =
                FeedKind::parse(&key).ok_or_else(|| config_err(format!("unknown feed `{key}`")))?;
            cfg.schedules.insert(kind, apply_schedule(kind, sched)?);
        }
        Ok(cfg)
    }

    /// Parse and validate a TOML document. Missing sections keep defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(s).map_err(|e| config_err(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Same shape as the TOML form, as JSON.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(s).map_err(|e| config_err(e.to_string()))?;
        Self::from_raw(raw)
    }
}

/// Load from an explicit path; `.json` is read as JSON, anything else as TOML.
pub fn load_from(path: &Path) -> anyhow::Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading engine config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = if ext == "json" {
        EngineConfig::from_json_str(&content)
    } else {
        EngineConfig::from_toml_str(&content)
    };
    cfg.with_context(|| format!("invalid engine config in {}", path.display()))
}

/// Load using `.env` + env var + fallbacks:
/// 1) $FEED_STATUS_CONFIG_PATH
/// 2) config/feed_status.toml
/// 3) config/feed_status.json
/// 4) built-in defaults
pub fn load_default() -> anyhow::Result<EngineConfig> {
    let _ = dotenvy::dotenv();
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in [DEFAULT_TOML, DEFAULT_JSON] {
        let pb = PathBuf::from(candidate);
        if pb.exists() {
            return load_from(&pb);
        }
    }
    Ok(EngineConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const SAMPLE: &str = r#"
        [cache]
        ttl_secs = 60
        capacity = 5

        [market]
        utc_offset = "+09:00"
        holidays = ["20250815"]

        [engine]
        parallel_enrichment = true

        [feeds.kospi-close]
        expected_time = "15:45"
        tolerance_minutes = 5
        delay_check_times = ["16:30", "16:00", "16:00"]
    "#;

    #[test]
    fn toml_overrides_only_what_it_names() {
        let cfg = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.cache_ttl_secs, 60);
        assert_eq!(cfg.cache_capacity, 5);
        assert!(cfg.parallel_enrichment);
        assert_eq!(cfg.calendar.len(), 1);
        assert_eq!(cfg.market_offset.local_minus_utc(), 9 * 3600);

        let local = &cfg.schedules[&FeedKind::LocalClose];
        assert_eq!(local.expected_time, NaiveTime::from_hms_opt(15, 45, 0).unwrap());
        assert_eq!(local.tolerance_minutes, 5);
        assert!(local.business_days_only);
        assert_eq!(local.delay_check_times.len(), 2);
        assert_eq!(local.display_name, "Local close");
        assert_eq!(cfg.schedules[&FeedKind::FxClose], FeedSchedule::default_for(FeedKind::FxClose));
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn shipped_config_spells_out_the_defaults() {
        let shipped = include_str!("../config/feed_status.toml");
        assert_eq!(EngineConfig::from_toml_str(shipped).unwrap(), EngineConfig::default());
    }

    #[test]
    fn bad_values_are_config_errors() {
        for doc in [
            "[cache]\ncapacity = 0",
            "[cache]\nttl_secs = 10000000000000000",
            "[market]\nutc_offset = \"9\"",
            "[market]\nholidays = [\"2025-08-15\"]",
            "[feeds.crypto]\ntolerance_minutes = 1",
            "[feeds.fx_close]\nexpected_time = \"25:00\"",
            "[feeds.fx_close]\ntolerance_minutes = -1",
            "[bogus]\nx = 1",
        ] {
            let err = EngineConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, EngineError::Config(_)), "{doc}: {err}");
        }
    }

    #[test]
    fn negative_offsets_parse() {
        assert_eq!(parse_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert!(parse_offset("+24:00").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        // nothing on disk
        assert_eq!(load_default().unwrap(), EngineConfig::default());

        // config/feed_status.toml fallback
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(tmp.path().join(DEFAULT_TOML), "[cache]\nttl_secs = 42").unwrap();
        assert_eq!(load_default().unwrap().cache_ttl_secs, 42);

        // env var wins
        let p_json = tmp.path().join("engine.json");
        fs::write(&p_json, r#"{"cache": {"capacity": 7}}"#).unwrap();
        env::set_var(ENV_CONFIG_PATH, p_json.display().to_string());
        let cfg = load_default().unwrap();
        assert_eq!(cfg.cache_capacity, 7);
        assert_eq!(cfg.cache_ttl_secs, DEFAULT_TTL_SECS);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
