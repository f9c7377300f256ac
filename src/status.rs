//! Publication status of a feed item and delay severity tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Publication status of one feed item relative to its expected window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedStatus {
    /// Published within tolerance of the expected time.
    Latest,
    /// Published today, earlier than the tolerance window.
    Early,
    /// Published today, after the tolerance window.
    Delayed,
    /// Dated before today, or on a non-business day.
    Stale,
    /// Empty title or body, or the feed is absent.
    Missing,
    /// Unparseable or future-dated timestamp.
    Invalid,
    /// Internal failure while classifying this item.
    Error,
}

impl FeedStatus {
    /// Fixed priority used to pick the dominant status of a snapshot.
    pub fn priority(self) -> u8 {
        match self {
            FeedStatus::Error => 5,
            FeedStatus::Delayed => 4,
            FeedStatus::Missing => 3,
            FeedStatus::Invalid => 2,
            FeedStatus::Latest | FeedStatus::Early => 1,
            FeedStatus::Stale => 0,
        }
    }

    /// LATEST and EARLY both count as on time.
    pub fn is_on_time(self) -> bool {
        matches!(self, FeedStatus::Latest | FeedStatus::Early)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedStatus::Latest => "latest",
            FeedStatus::Early => "early",
            FeedStatus::Delayed => "delayed",
            FeedStatus::Stale => "stale",
            FeedStatus::Missing => "missing",
            FeedStatus::Invalid => "invalid",
            FeedStatus::Error => "error",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a delay is, by minutes past the tolerance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelaySeverity {
    Minor,
    Moderate,
    Severe,
    Critical,
}

impl DelaySeverity {
    /// ≤15 minor, ≤30 moderate, ≤60 severe, else critical.
    pub fn from_minutes(delay_minutes: u32) -> Self {
        match delay_minutes {
            0..=15 => DelaySeverity::Minor,
            16..=30 => DelaySeverity::Moderate,
            31..=60 => DelaySeverity::Severe,
            _ => DelaySeverity::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DelaySeverity::Minor => "minor",
            DelaySeverity::Moderate => "moderate",
            DelaySeverity::Severe => "severe",
            DelaySeverity::Critical => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_follow_table() {
        assert!(FeedStatus::Error.priority() > FeedStatus::Delayed.priority());
        assert!(FeedStatus::Delayed.priority() > FeedStatus::Missing.priority());
        assert!(FeedStatus::Missing.priority() > FeedStatus::Invalid.priority());
        assert_eq!(FeedStatus::Latest.priority(), FeedStatus::Early.priority());
        assert_eq!(FeedStatus::Stale.priority(), 0);
    }

    #[test]
    fn severity_tiers_are_inclusive_upper_bounds() {
        assert_eq!(DelaySeverity::from_minutes(15), DelaySeverity::Minor);
        assert_eq!(DelaySeverity::from_minutes(16), DelaySeverity::Moderate);
        assert_eq!(DelaySeverity::from_minutes(30), DelaySeverity::Moderate);
        assert_eq!(DelaySeverity::from_minutes(60), DelaySeverity::Severe);
        assert_eq!(DelaySeverity::from_minutes(61), DelaySeverity::Critical);
    }

    #[test]
    fn status_serializes_uppercase() {
        let v = serde_json::to_value(FeedStatus::Delayed).unwrap();
        assert_eq!(v, serde_json::json!("DELAYED"));
    }
}
