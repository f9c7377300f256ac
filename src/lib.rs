// src/lib.rs
// Public library surface for embedding binaries and integration tests.

pub mod aggregate;
pub mod cache;
pub mod calendar;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod status;
pub mod telemetry;
pub mod timestamp;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{AggregateSnapshot, DelayStats, EnrichedItem, StatusCounts};
pub use crate::cache::ResultCache;
pub use crate::calendar::HolidayCalendar;
pub use crate::classifier::{classify, ClassifiedItem};
pub use crate::config::EngineConfig;
pub use crate::engine::{Clock, EngineStats, FeedStatusEngine, FixedClock, SystemClock};
pub use crate::enrich::{Sentiment, StructuredFields};
pub use crate::error::{EngineError, Result, TimestampError};
pub use crate::feed::{FeedKind, FeedSchedule, RawFeedItem, RawPayload, ScheduleTable};
pub use crate::status::{DelaySeverity, FeedStatus};
