//! Feed enrichers: turn a raw item's free text into structured market fields.
//!
//! Each feed kind has its own extractor module; they share the pattern
//! machinery in [`extract`]. Enrichment is pure and deterministic for a given
//! input. A failing enricher never fails the run: [`enrich_or_default`] logs
//! it and substitutes [`StructuredFields::default_for`].

pub mod extract;
pub mod fx_close;
pub mod local_close;
pub mod us_premarket;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::feed::{FeedKind, RawFeedItem};
use crate::telemetry;

pub use fx_close::{FxCloseFields, RateReading, Volatility};
pub use local_close::{InvestorFlows, LocalCloseFields};
pub use us_premarket::UsPremarketFields;

/// Longest text handed to the extractors, in chars.
pub const MAX_TEXT_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Mixed,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    Flat,
}

impl Direction {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Direction::Up
        } else if change < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }
}

/// One named number read from the text (an index level, a rate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub name: String,
    pub value: f64,
    /// Signed; zero when no change was found near the value.
    pub change: f64,
    pub change_percent: f64,
    pub direction: Direction,
}

#[cfg(test)]
impl Quantity {
    pub(crate) fn test_new(name: &str, direction: Direction) -> Self {
        let change = match direction {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
            Direction::Flat => 0.0,
        };
        Self {
            name: name.to_string(),
            value: 100.0,
            change,
            change_percent: change,
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// A sentence naming something that moved the market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub category: String,
    pub phrase: String,
    pub impact: Impact,
}

/// Enricher output, one variant per feed kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feed", rename_all = "snake_case")]
pub enum StructuredFields {
    UsPremarket(UsPremarketFields),
    LocalClose(LocalCloseFields),
    FxClose(FxCloseFields),
}

impl StructuredFields {
    /// Empty fields with MIXED sentiment, used when enrichment fails.
    pub fn default_for(kind: FeedKind) -> Self {
        match kind {
            FeedKind::UsPremarket => StructuredFields::UsPremarket(UsPremarketFields::default()),
            FeedKind::LocalClose => StructuredFields::LocalClose(LocalCloseFields::default()),
            FeedKind::FxClose => StructuredFields::FxClose(FxCloseFields::default()),
        }
    }

    pub fn kind(&self) -> FeedKind {
        match self {
            StructuredFields::UsPremarket(_) => FeedKind::UsPremarket,
            StructuredFields::LocalClose(_) => FeedKind::LocalClose,
            StructuredFields::FxClose(_) => FeedKind::FxClose,
        }
    }

    pub fn sentiment(&self) -> Sentiment {
        match self {
            StructuredFields::UsPremarket(f) => f.sentiment,
            StructuredFields::LocalClose(f) => f.sentiment,
            StructuredFields::FxClose(f) => f.sentiment,
        }
    }

    pub fn factors(&self) -> &[Factor] {
        match self {
            StructuredFields::UsPremarket(f) => &f.factors,
            StructuredFields::LocalClose(f) => &f.factors,
            StructuredFields::FxClose(f) => &f.factors,
        }
    }
}

static RE_TAGS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").ok());
static RE_WS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").ok());
static RE_NL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s*\n\s*").ok());

/// Clean article text before extraction: decode entities, strip tags, unify
/// quotes, collapse runs of spaces (newlines survive as sentence breaks) and
/// cap the length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    if let Some(re) = RE_TAGS.as_ref() {
        out = re.replace_all(&out, " ").to_string();
    }

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");

    if let Some(re) = RE_WS.as_ref() {
        out = re.replace_all(&out, " ").to_string();
    }
    if let Some(re) = RE_NL.as_ref() {
        out = re.replace_all(&out, "\n").to_string();
    }
    out = out.trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

pub(crate) fn pattern_error(kind: FeedKind, e: &regex::Error) -> EngineError {
    EngineError::Enrichment {
        kind,
        reason: format!("pattern set v{} failed to compile: {e}", extract::PATTERN_VERSION),
    }
}

/// Run the enricher for `kind` over `item`.
///
/// Fails on empty text or when a pattern set is unusable.
pub fn enrich(kind: FeedKind, item: &RawFeedItem) -> Result<StructuredFields> {
    let text = normalize_text(&format!("{}\n{}", item.title, item.body));
    if text.is_empty() {
        return Err(EngineError::Enrichment {
            kind,
            reason: "no text to enrich".into(),
        });
    }
    let fields = match kind {
        FeedKind::UsPremarket => StructuredFields::UsPremarket(us_premarket::enrich(&text, item)?),
        FeedKind::LocalClose => StructuredFields::LocalClose(local_close::enrich(&text)?),
        FeedKind::FxClose => StructuredFields::FxClose(fx_close::enrich(&text)?),
    };
    debug!(
        target: "enrich",
        feed = %kind,
        sentiment = %fields.sentiment(),
        factors = fields.factors().len(),
        id = %telemetry::anon_id(&item.title),
        "enriched"
    );
    Ok(fields)
}

/// [`enrich`], degrading any failure to the feed's default fields.
/// The failure reason is returned alongside for reporting.
pub fn enrich_or_default(kind: FeedKind, item: &RawFeedItem) -> (StructuredFields, Option<String>) {
    match enrich(kind, item) {
        Ok(fields) => (fields, None),
        Err(e) => {
            warn!(target: "enrich", feed = %kind, error = %e, "enrichment failed; using defaults");
            telemetry::record_enrichment_failure();
            (StructuredFields::default_for(kind), Some(e.to_string()))
        }
    }
}
