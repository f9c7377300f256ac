//! US overnight market wrap, published before the local open.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::extract::{self, AmountLabels, CompiledRule, FactorRule, Lexicon, QuantityRule};
use super::{pattern_error, Factor, Quantity, Sentiment};
use crate::error::Result;
use crate::feed::{FeedKind, RawFeedItem};
use crate::timestamp;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsPremarketFields {
    pub sentiment: Sentiment,
    /// In rule order: Dow, Nasdaq, S&P 500, Russell 2000, VIX.
    pub indices: Vec<Quantity>,
    pub factors: Vec<Factor>,
    /// Item time falls outside the regular US session (local clock).
    pub after_hours: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_volume: Option<String>,
}

pub const PRIMARY_INDEX: &str = "Dow Jones";

const INDEX_RULES: &[QuantityRule] = &[
    QuantityRule {
        name: "Dow Jones",
        patterns: &[
            r"다우(?:존스)?(?:\s*산업평균지수|\s*지수)?",
            r"(?i)\bdow(?:\s+jones)?(?:\s+industrial\s+average|\s+industrials)?\b",
            r"(?i)\bDJIA\b",
        ],
        reject: &[],
    },
    QuantityRule {
        name: "Nasdaq",
        patterns: &[
            r"나스닥(?:\s*종합지수|\s*지수)?",
            r"(?i)\bnasdaq(?:\s+composite)?(?:\s+index)?\b",
        ],
        reject: &[r"(?i)^nasdaq\s*100\b"],
    },
    QuantityRule {
        name: "S&P 500",
        patterns: &[
            r"(?i)S&P\s*500(?:\s*지수|\s+index)?",
            r"(?i)\bstandard\s*(?:&|and)\s*poor'?s\s*500\b",
        ],
        reject: &[],
    },
    QuantityRule {
        name: "Russell 2000",
        patterns: &[r"러셀\s*2000(?:\s*지수)?", r"(?i)\brussell\s*2000\b"],
        reject: &[],
    },
    QuantityRule {
        name: "VIX",
        patterns: &[r"(?i)\bVIX\b(?:\s*지수|\s+index)?", r"(?i)변동성\s*지수", r"(?i)\bvolatility\s+index\b"],
        reject: &[],
    },
];

const LEXICON: Lexicon = Lexicon {
    positive: &[
        "상승", "오름", "증가", "강세", "호조", "급등", "반등", "rally", "rallied", "gain", "rose",
        "higher", "rebound", "advance", "climb", "surge",
    ],
    negative: &[
        "하락", "내림", "감소", "약세", "부진", "급락", "폭락", "fell", "drop", "decline", "lower",
        "slump", "slide", "plunge", "sell-off", "selloff",
    ],
    mixed: &["혼조", "보합", "엇갈", "mixed", "flat", "unchanged", "choppy"],
};

const FACTOR_RULES: &[FactorRule] = &[
    FactorRule {
        category: "policy",
        anchors: &["연준", "fed", "fomc", "금리", "인플레이션", "물가", "interest rate", "inflation"],
    },
    FactorRule {
        category: "earnings",
        anchors: &["실적", "어닝", "earnings", "profit", "revenue", "guidance"],
    },
    FactorRule {
        category: "trade",
        anchors: &["무역", "관세", "중국", "trade", "tariff", "china"],
    },
    FactorRule {
        category: "commodity",
        anchors: &["유가", "원유", "국제유가", "oil", "crude", "gold"],
    },
    FactorRule {
        category: "sector",
        anchors: &["기술주", "반도체", "빅테크", "tech", "semiconductor", "chipmaker"],
    },
    FactorRule {
        category: "macro",
        anchors: &["경제지표", "고용", "gdp", "cpi", "payrolls", "jobs report", "retail sales"],
    },
];

static INDICES: Lazy<Result<Vec<CompiledRule>, regex::Error>> =
    Lazy::new(|| extract::compile_rules(INDEX_RULES));

const VOLUME_LABELS: AmountLabels = AmountLabels {
    korean: "거래량",
    korean_units: r"억\s*주|만\s*주|억|만|주",
    english: "volume",
    english_units: "billion|million",
};

static VOLUME: Lazy<Result<Vec<Regex>, regex::Error>> =
    Lazy::new(|| extract::compile_amounts(&VOLUME_LABELS));

/// Regular US session on the local clock: 22:30 through 05:00 (wraps midnight).
fn in_regular_session(t: NaiveTime) -> bool {
    let open = NaiveTime::from_hms_opt(22, 30, 0).unwrap_or(NaiveTime::MIN);
    let close = NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN);
    t >= open || t <= close
}

pub fn enrich(text: &str, item: &RawFeedItem) -> Result<UsPremarketFields> {
    let kind = FeedKind::UsPremarket;
    let rules = INDICES.as_ref().map_err(|e| pattern_error(kind, e))?;
    let volume = VOLUME.as_ref().map_err(|e| pattern_error(kind, e))?;

    let indices = extract::extract_quantities(text, rules);
    let sentiment = extract::vote_sentiment(text, &LEXICON, &indices, PRIMARY_INDEX, false);
    let after_hours = timestamp::parse_time_of_day(&item.time)
        .map(|t| !in_regular_session(t))
        .unwrap_or(false);

    Ok(UsPremarketFields {
        sentiment,
        indices,
        factors: extract::extract_factors(text, FACTOR_RULES),
        after_hours,
        trading_volume: extract::first_amount(text, volume),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{normalize_text, Direction};

    fn run(title: &str, body: &str, time: &str) -> UsPremarketFields {
        let item = RawFeedItem::new(title, body, "20250812", time);
        enrich(&normalize_text(&format!("{title}\n{body}")), &item).unwrap()
    }

    #[test]
    fn korean_wrap_reads_levels_moves_and_factors() {
        let f = run(
            "[뉴욕마켓워치] 미국 증시 상승 마감",
            "다우존스 산업평균지수는 35,123.45로 전일 대비 +150.25포인트(+0.43%) 상승했습니다. \
             나스닥 종합지수는 14,567.89로 +45.67포인트(+0.31%) 올랐습니다. \
             연준의 금리 동결 기대감이 지수를 지지했습니다.",
            "061938",
        );
        assert_eq!(f.indices.len(), 2);
        let dow = &f.indices[0];
        assert_eq!(dow.name, "Dow Jones");
        assert!((dow.value - 35123.45).abs() < 1e-9);
        assert!((dow.change - 150.25).abs() < 1e-9);
        assert!((dow.change_percent - 0.43).abs() < 1e-9);
        assert_eq!(f.indices[1].direction, Direction::Up);
        assert_eq!(f.sentiment, Sentiment::Positive);
        assert_eq!(f.factors[0].category, "policy");
        assert!(f.after_hours);
    }

    #[test]
    fn english_wrap_with_move_before_level() {
        let f = run(
            "Wall Street ends lower",
            "The Dow Jones Industrial Average fell 210.5 points, or 0.6%, to 34,890.12. \
             The S&P 500 lost 0.4% to 4,456.78. Volume 11.2 billion shares.",
            "2350",
        );
        let dow = &f.indices[0];
        assert!((dow.value - 34890.12).abs() < 1e-9);
        assert!((dow.change + 210.5).abs() < 1e-9);
        assert!((dow.change_percent + 0.6).abs() < 1e-9);
        let spx = f.indices.iter().find(|q| q.name == "S&P 500").unwrap();
        assert!((spx.value - 4456.78).abs() < 1e-9);
        assert_eq!(f.sentiment, Sentiment::Negative);
        assert_eq!(f.trading_volume.as_deref(), Some("11.2billion"));
        assert!(!f.after_hours);
    }

    #[test]
    fn mixed_keyword_wins() {
        let f = run("뉴욕증시 혼조 마감", "다우 35,000 +10포인트, 나스닥 14,000 -20포인트.", "060000");
        assert_eq!(f.sentiment, Sentiment::Mixed);
    }

    #[test]
    fn session_wraps_midnight() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(in_regular_session(t(23, 0)));
        assert!(in_regular_session(t(4, 59)));
        assert!(!in_regular_session(t(6, 0)));
        assert!(!in_regular_session(t(22, 29)));
    }
}
