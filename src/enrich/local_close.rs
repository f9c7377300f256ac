//! Local equity market close: index levels, investor flows, sector moves.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::extract::{self, AmountLabels, CompiledRule, FactorRule, Lexicon, QuantityRule, NUM};
use super::{pattern_error, Direction, Factor, Quantity, Sentiment};
use crate::error::Result;
use crate::feed::FeedKind;

/// Net buying (+) or selling (-) per investor class, in units of 100 million won.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestorFlows {
    pub foreign: Option<f64>,
    pub institution: Option<f64>,
    pub individual: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalCloseFields {
    pub sentiment: Sentiment,
    pub indices: Vec<Quantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows: Option<InvestorFlows>,
    /// Sector label → direction of the sentence that mentions it.
    pub sectors: BTreeMap<String, Direction>,
    pub factors: Vec<Factor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turnover: Option<String>,
}

/// Its direction takes precedence over the other indices.
pub const PRIMARY_INDEX: &str = "KOSPI";

const FLOW_WINDOW_CHARS: usize = 50;

const INDEX_RULES: &[QuantityRule] = &[
    QuantityRule {
        name: "KOSPI",
        patterns: &[r"코스피(?:\s*지수)?", r"(?i)\bKOSPI\b(?:\s+index)?"],
        reject: &[r"^코스피\s*200", r"(?i)^KOSPI\s*200\b"],
    },
    QuantityRule {
        name: "KOSDAQ",
        patterns: &[r"코스닥(?:\s*지수)?", r"(?i)\bKOSDAQ\b(?:\s+index)?"],
        reject: &[r"^코스닥\s*150", r"(?i)^KOSDAQ\s*150\b"],
    },
    QuantityRule {
        name: "KOSPI 200",
        patterns: &[r"코스피\s*200", r"(?i)\bKOSPI\s*200\b"],
        reject: &[],
    },
];

const LEXICON: Lexicon = Lexicon {
    positive: &[
        "상승", "오름", "증가", "강세", "호조", "급등", "반등", "상향", "돌파", "rally", "gain",
        "rose", "higher", "rebound", "advance", "climb", "surge",
    ],
    negative: &[
        "하락", "내림", "감소", "약세", "부진", "급락", "폭락", "하향", "이탈", "fell", "drop",
        "decline", "lower", "slump", "slide", "plunge",
    ],
    mixed: &["혼조", "보합", "등락", "엇갈", "횡보", "mixed", "flat", "unchanged"],
};

const SECTORS: &[(&str, &[&str])] = &[
    ("semiconductor", &["반도체", "semiconductor", "chipmaker", "chip"]),
    ("battery", &["2차전지", "이차전지", "배터리", "battery"]),
    ("bio", &["바이오", "제약", "biotech", "pharma"]),
    ("auto", &["자동차", "automaker", "carmaker"]),
    ("finance", &["금융", "은행", "증권", "bank", "financial"]),
    ("chemical", &["화학", "chemical"]),
    ("steel", &["철강", "steel"]),
    ("shipbuilding", &["조선", "shipbuild"]),
    ("construction", &["건설", "construction"]),
    ("retail", &["유통", "백화점", "retailer"]),
    ("telecom", &["통신", "telecom"]),
];

const FACTOR_RULES: &[FactorRule] = &[
    FactorRule {
        category: "flows",
        anchors: &["외국인", "기관", "개인", "foreign investors", "institutions", "retail investors"],
    },
    FactorRule {
        category: "policy",
        anchors: &["금리", "한국은행", "한은", "정책", "interest rate", "bank of korea", "policy"],
    },
    FactorRule {
        category: "global",
        anchors: &["미국 증시", "뉴욕", "중국", "글로벌", "wall street", "global", "china"],
    },
    FactorRule {
        category: "fx",
        anchors: &["환율", "원달러", "원화", "exchange rate", "the won"],
    },
    FactorRule {
        category: "earnings",
        anchors: &["실적", "어닝", "earnings", "profit"],
    },
];

const SELL_WORDS: &[&str] = &["순매도", "매도", "net sold", "sold", "net sell", "sell", "dumped"];

struct FlowPatterns {
    /// Foreign, institution, individual.
    anchors: [Regex; 3],
    amount: Regex,
}

static INDICES: Lazy<Result<Vec<CompiledRule>, regex::Error>> =
    Lazy::new(|| extract::compile_rules(INDEX_RULES));

static FLOWS: Lazy<Result<FlowPatterns, regex::Error>> = Lazy::new(|| {
    Ok(FlowPatterns {
        anchors: [
            Regex::new(r"(?i)외국인|외인|\bforeign(?:ers|\s+investors)?\b")?,
            Regex::new(r"(?i)기관(?:투자자)?|\binstitution(?:s|al\s+investors)?\b")?,
            Regex::new(r"(?i)개인(?:투자자)?|\b(?:individual|retail)(?:s|\s+investors)?\b")?,
        ],
        amount: Regex::new(&format!(
            r"(?i)(?P<sign>[+-]?)\s*(?P<num>{NUM})\s*(?P<unit>억|조|billion|bn|trillion)"
        ))?,
    })
});

const TURNOVER_LABELS: AmountLabels = AmountLabels {
    korean: "거래대금",
    korean_units: r"조\s*원|억\s*원|조|억",
    english: r"turnover|trading\s+value",
    english_units: "trillion|billion",
};

static TURNOVER: Lazy<Result<Vec<Regex>, regex::Error>> =
    Lazy::new(|| extract::compile_amounts(&TURNOVER_LABELS));

fn flow_amount(segment: &str, amount: &Regex) -> Option<f64> {
    let caps = amount.captures(segment)?;
    let num = caps.name("num")?;
    let value = extract::parse_number(num.as_str())?;
    let scale = match caps.name("unit")?.as_str().to_lowercase().as_str() {
        "조" | "trillion" => 10_000.0,
        "billion" | "bn" => 10.0,
        _ => 1.0,
    };
    let sign = caps.name("sign").map(|s| s.as_str()).unwrap_or("");
    let end = caps.get(0).map(|m| m.end()).unwrap_or(num.end());
    let context = format!("{} {}", &segment[..num.start()], extract::window_after(segment, end, 10)).to_lowercase();
    let sell = match sign {
        "-" => true,
        "+" => false,
        _ => SELL_WORDS.iter().any(|w| context.contains(w)),
    };
    Some(if sell { -value * scale } else { value * scale })
}

fn extract_flows(text: &str, p: &FlowPatterns) -> Option<InvestorFlows> {
    let mut values: [Option<f64>; 3] = [None; 3];
    for (class, re) in p.anchors.iter().enumerate() {
        let Some(m) = re.find(text) else { continue };
        let mut segment = extract::window_after(text, m.end(), FLOW_WINDOW_CHARS);
        for (other, other_re) in p.anchors.iter().enumerate() {
            if other == class {
                continue;
            }
            if let Some(o) = other_re.find(segment) {
                segment = &segment[..o.start()];
            }
        }
        values[class] = flow_amount(extract::cut_at_sentence_end(segment), &p.amount);
    }
    if values.iter().all(Option::is_none) {
        return None;
    }
    let [foreign, institution, individual] = values;
    Some(InvestorFlows {
        foreign,
        institution,
        individual,
    })
}

fn extract_sectors(text: &str) -> BTreeMap<String, Direction> {
    let sentences = extract::sentences(text);
    SECTORS
        .iter()
        .filter_map(|(label, keywords)| {
            let sentence = sentences.iter().find(|s| {
                let lower = s.to_lowercase();
                keywords.iter().any(|k| lower.contains(k))
            })?;
            Some((label.to_string(), extract::window_direction(sentence, &LEXICON)))
        })
        .collect()
}

pub fn enrich(text: &str) -> Result<LocalCloseFields> {
    let kind = FeedKind::LocalClose;
    let rules = INDICES.as_ref().map_err(|e| pattern_error(kind, e))?;
    let flows = FLOWS.as_ref().map_err(|e| pattern_error(kind, e))?;
    let turnover = TURNOVER.as_ref().map_err(|e| pattern_error(kind, e))?;

    let indices = extract::extract_quantities(text, rules);
    let sentiment = extract::vote_sentiment(text, &LEXICON, &indices, PRIMARY_INDEX, false);

    Ok(LocalCloseFields {
        sentiment,
        indices,
        flows: extract_flows(text, flows),
        sectors: extract_sectors(text),
        factors: extract::extract_factors(text, FACTOR_RULES),
        turnover: extract::first_amount(text, turnover),
    })
}
