//! FX close: the USD rate against the local currency plus secondary pairs.
//!
//! Sentiment is read from the local currency's side: a falling USD/KRW rate
//! is a stronger won and counts as positive.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::extract::{self, AmountLabels, CompiledRule, FactorRule, Lexicon, QuantityRule, NUM};
use super::{pattern_error, Factor, Quantity, Sentiment};
use crate::error::Result;
use crate::feed::FeedKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    Low,
    #[default]
    Medium,
    High,
}

impl Volatility {
    /// |percent move| above 1.0 is high, above 0.3 medium, anything else low.
    pub fn from_percent(pct: f64) -> Option<Self> {
        let abs = pct.abs();
        if abs > 1.0 {
            Some(Volatility::High)
        } else if abs > 0.3 {
            Some(Volatility::Medium)
        } else if abs > 0.0 {
            Some(Volatility::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateReading {
    pub rate: Quantity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FxCloseFields {
    pub sentiment: Sentiment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usd_krw: Option<RateReading>,
    pub other_pairs: Vec<Quantity>,
    pub volatility: Volatility,
    pub factors: Vec<Factor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_volume: Option<String>,
}

pub const PRIMARY_PAIR: &str = "USD/KRW";

const RATE_RULES: &[QuantityRule] = &[
    QuantityRule {
        name: PRIMARY_PAIR,
        patterns: &[
            r"(?:원\s*/?\s*달러|달러\s*/?\s*원)(?:\s*환율)?",
            r"(?i)\bUSD\s*/?\s*KRW\b",
            r"(?i)\bdollar[-/\s]won\b(?:\s+rate)?",
            r"(?i)\bthe\s+won\b",
        ],
        reject: &[],
    },
    QuantityRule {
        name: "JPY/KRW",
        patterns: &[r"원\s*/?\s*엔(?:\s*환율)?|엔화(?:\s*환율)?", r"(?i)\bJPY\s*/?\s*KRW\b|\byen\b"],
        reject: &[],
    },
    QuantityRule {
        name: "EUR/KRW",
        patterns: &[r"원\s*/?\s*유로(?:\s*환율)?|유로화", r"(?i)\bEUR\s*/?\s*KRW\b|\beuro\b"],
        reject: &[],
    },
    QuantityRule {
        name: "CNY/KRW",
        patterns: &[r"위안화?(?:\s*환율)?", r"(?i)\bCNY\s*/?\s*KRW\b|\byuan\b"],
        reject: &[],
    },
    QuantityRule {
        name: "GBP/KRW",
        patterns: &[r"원\s*/?\s*파운드(?:\s*환율)?|파운드화", r"(?i)\bGBP\s*/?\s*KRW\b|\bpound\b|\bsterling\b"],
        reject: &[],
    },
];

const LEXICON: Lexicon = Lexicon {
    positive: &[
        "원화 강세", "원화가 강세", "원고", "달러 약세", "환율 하락", "won strength", "won gain",
        "stronger won", "dollar weak", "weaker dollar",
    ],
    negative: &[
        "원화 약세", "원화가 약세", "원저", "달러 강세", "환율 상승", "won weak", "won fell",
        "won slid", "weaker won", "dollar strength", "stronger dollar",
    ],
    mixed: &["보합", "횡보", "변동 없", "unchanged", "flat", "steady", "rangebound", "range-bound"],
};

const HIGH_WORDS: &[&str] = &[
    "급등", "급락", "폭등", "폭락", "큰 폭", "대폭", "변동성 확대", "surge", "plunge", "sharp",
    "volatile", "tumble", "jump",
];
const MEDIUM_WORDS: &[&str] = &["상승", "하락", "등락", "변동", "rose", "fell", "gained", "lost"];
const LOW_WORDS: &[&str] = &[
    "보합", "횡보", "안정", "소폭", "변동성 축소", "steady", "flat", "narrow", "slight",
];

const OUTLOOK_ANCHORS: &[&str] = &[
    "전망", "예상", "내일", "향후", "outlook", "expect", "tomorrow", "next week", "next session",
];

const FACTOR_RULES: &[FactorRule] = &[
    FactorRule {
        category: "domestic",
        anchors: &[
            "한국은행", "한은", "국내", "수출", "경상수지", "외국인", "bank of korea", "exports",
            "current account", "foreign investors",
        ],
    },
    FactorRule {
        category: "international",
        anchors: &[
            "연준", "미국", "달러인덱스", "달러 인덱스", "fed", "dollar index", "greenback",
            "treasury", "global",
        ],
    },
    FactorRule {
        category: "technical",
        anchors: &["저항선", "지지선", "기술적", "이동평균", "resistance", "support level", "technical"],
    },
    FactorRule {
        category: "geopolitical",
        anchors: &["지정학", "전쟁", "리스크", "geopolitical", "war", "risk"],
    },
];

struct RangePatterns {
    high: Regex,
    low: Regex,
    volume: Vec<Regex>,
}

static RATES: Lazy<Result<Vec<CompiledRule>, regex::Error>> =
    Lazy::new(|| extract::compile_rules(RATE_RULES));

const VOLUME_LABELS: AmountLabels = AmountLabels {
    korean: r"거래량|거래대금|거래\s*규모",
    korean_units: r"억\s*달러|억\s*원|억|조|만",
    english: "volume|turnover",
    english_units: "billion|million",
};

static RANGE: Lazy<Result<RangePatterns, regex::Error>> = Lazy::new(|| {
    Ok(RangePatterns {
        high: Regex::new(&format!(r"(?i)(?:고가|최고|고점|\bhigh\b)[^0-9.\n]{{0,10}}({NUM})"))?,
        low: Regex::new(&format!(r"(?i)(?:저가|최저|저점|\blow\b)[^0-9.\n]{{0,10}}({NUM})"))?,
        volume: extract::compile_amounts(&VOLUME_LABELS)?,
    })
});

fn first_number(re: &Regex, text: &str) -> Option<f64> {
    extract::parse_number(re.captures(text)?.get(1)?.as_str())
}

/// Percent move of a rate, derived from the point change when the text gave none.
fn effective_percent(q: &Quantity) -> f64 {
    if q.change_percent != 0.0 {
        return q.change_percent;
    }
    let previous = q.value - q.change;
    if q.change != 0.0 && previous > 0.0 {
        q.change / previous * 100.0
    } else {
        0.0
    }
}

fn volatility(text: &str, usd: Option<&Quantity>) -> Volatility {
    let lower = text.to_lowercase();
    let high = extract::count_hits(&lower, HIGH_WORDS);
    let medium = extract::count_hits(&lower, MEDIUM_WORDS);
    let low = extract::count_hits(&lower, LOW_WORDS);
    let by_rate = usd.and_then(|q| Volatility::from_percent(effective_percent(q)));

    if high > 0 || by_rate == Some(Volatility::High) {
        Volatility::High
    } else if matches!(by_rate, Some(Volatility::Low) | None) && low > medium {
        Volatility::Low
    } else if by_rate == Some(Volatility::Low) && medium == 0 {
        Volatility::Low
    } else {
        Volatility::Medium
    }
}

pub fn enrich(text: &str) -> Result<FxCloseFields> {
    let kind = FeedKind::FxClose;
    let rules = RATES.as_ref().map_err(|e| pattern_error(kind, e))?;
    let range = RANGE.as_ref().map_err(|e| pattern_error(kind, e))?;

    let rates = extract::extract_quantities(text, rules);
    let sentiment = extract::vote_sentiment(text, &LEXICON, &rates, PRIMARY_PAIR, true);
    let (usd, other_pairs): (Vec<Quantity>, Vec<Quantity>) =
        rates.into_iter().partition(|q| q.name == PRIMARY_PAIR);
    let usd = usd.into_iter().next();

    Ok(FxCloseFields {
        sentiment,
        volatility: volatility(text, usd.as_ref()),
        usd_krw: usd.map(|rate| RateReading {
            rate,
            day_high: first_number(&range.high, text),
            day_low: first_number(&range.low, text),
        }),
        other_pairs,
        factors: extract::extract_factors(text, FACTOR_RULES),
        outlook: extract::sentence_with(text, OUTLOOK_ANCHORS),
        trading_volume: extract::first_amount(text, &range.volume),
    })
}
