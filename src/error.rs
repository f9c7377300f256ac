//! Error taxonomy for the feed status engine.
//!
//! Item-level failures (timestamp, missing data, enrichment, classification)
//! are recovered into item statuses by the pipeline; only `Aggregation`
//! aborts a whole run.

use thiserror::Error;

use crate::feed::FeedKind;

/// Why a `(date, time)` pair could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("date `{0}` is not an 8-digit YYYYMMDD string")]
    DateShape(String),
    #[error("date `{0}` is not a calendar date")]
    DateValue(String),
    #[error("time `{0}` must have 3 to 6 digits")]
    TimeShape(String),
    #[error("time `{0}` is out of range")]
    TimeValue(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid timestamp for {kind}: {source}")]
    InvalidTimestamp {
        kind: FeedKind,
        #[source]
        source: TimestampError,
    },

    #[error("no data for {0}")]
    MissingData(FeedKind),

    #[error("enrichment failed for {kind}: {reason}")]
    Enrichment { kind: FeedKind, reason: String },

    #[error("classification failed for {kind}: {reason}")]
    Classification { kind: FeedKind, reason: String },

    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
