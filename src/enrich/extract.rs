//! Shared extraction primitives for the feed enrichers: ordered pattern sets,
//! change/percent search near a value, keyword sentiment voting and
//! keyword-anchored factor sentences.
//!
//! Regexes must be compatible with the `regex` crate (no lookarounds); where a
//! lookahead would be needed, rules carry anchored `reject` patterns instead.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Direction, Factor, Impact, Quantity, Sentiment};

/// Bumped whenever a pattern list changes meaning.
pub const PATTERN_VERSION: u32 = 1;

/// How many characters after a value are searched for its change.
pub const CHANGE_WINDOW_CHARS: usize = 100;
pub const MAX_FACTORS: usize = 5;
const FACTOR_MIN_CHARS: usize = 10;
const FACTOR_MAX_CHARS: usize = 100;

/// Number with optional thousands separators and decimals.
pub const NUM: &str = r"[0-9][0-9,]*(?:\.[0-9]+)?";

/// One named quantity and the ordered patterns that find its name.
#[derive(Debug, Clone, Copy)]
pub struct QuantityRule {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
    /// `^`-anchored patterns tested at the match start; a hit discards the match.
    pub reject: &'static [&'static str],
}

#[derive(Debug)]
pub struct CompiledRule {
    pub name: &'static str,
    patterns: Vec<Regex>,
    reject: Vec<Regex>,
}

pub fn compile_rules(rules: &[QuantityRule]) -> Result<Vec<CompiledRule>, regex::Error> {
    rules
        .iter()
        .map(|r| {
            Ok(CompiledRule {
                name: r.name,
                patterns: r.patterns.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
                reject: r.reject.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

/// Keyword lists used for sentiment voting.
#[derive(Debug, Clone, Copy)]
pub struct Lexicon {
    pub positive: &'static [&'static str],
    pub negative: &'static [&'static str],
    pub mixed: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct FactorRule {
    pub category: &'static str,
    pub anchors: &'static [&'static str],
}

/// Words that flip an unsigned change to negative.
const NEGATIVE_MOVES: &[&str] = &[
    "down", "fell", "lost", "dropped", "declined", "shed", "lower", "slid", "weaker", "하락",
    "내린", "내렸", "떨어", "급락", "약세",
];

/// A number right after one of these is a move, not a level.
const PRECEDING_MOVE: &[&str] = &[
    "대비", "by", "up", "down", "rose", "fell", "gained", "lost", "added", "shed", "climbed",
    "dropped", "declined", "advanced",
];

/// A number followed by one of these is a move or a date, not a level.
const TRAILING_UNIT: &[&str] = &[
    "포인트", "point", "pt", "%", "퍼센트", "percent", "bp", "일", "월", "년", "엔", "yen",
];

const IMPACT_POSITIVE: &[&str] = &[
    "상승", "증가", "강세", "호재", "rise", "rose", "gain", "strong", "boost", "support",
];
const IMPACT_NEGATIVE: &[&str] = &[
    "하락", "감소", "약세", "악재", "fall", "fell", "drop", "weak", "pressure", "concern",
];

struct ChangePatterns {
    number: Regex,
    amount: Vec<Regex>,
    percent: Regex,
    sentence_end: Regex,
    sentence_split: Regex,
}

static CHANGE: Lazy<Result<ChangePatterns, regex::Error>> = Lazy::new(|| {
    Ok(ChangePatterns {
        number: Regex::new(&format!(r"(?P<sign>[+-])?(?P<num>{NUM})"))?,
        // Ordered: explicit sign + unit, movement word, "vs previous day", bare sign.
        amount: vec![
            Regex::new(&format!(
                r"(?i)(?P<sign>[+-])\s*(?P<num>{NUM})\s*(?:포인트|points?|pts?|점|원|won)"
            ))?,
            Regex::new(&format!(
                r"(?i)\b(?P<word>up|down|gained|lost|rose|fell|added|shed|climbed|dropped|declined|advanced)\s+(?:by\s+)?(?P<num>{NUM})"
            ))?,
            Regex::new(&format!(r"(?:전일|전날)\s*대비\s*(?P<sign>[+-]?)\s*(?P<num>{NUM})"))?,
            Regex::new(&format!(r"(?P<sign>[+-])\s*(?P<num>{NUM})"))?,
        ],
        percent: Regex::new(&format!(
            r"(?i)(?P<sign>[+-]?)\s*(?P<num>{NUM})\s*(?:%|퍼센트|percent)"
        ))?,
        sentence_end: Regex::new(r"[.。!?](?:\s|$)|\n")?,
        sentence_split: Regex::new(r"[.。!?](?:\s+|$)|\n+")?,
    })
});

fn change_patterns() -> Option<&'static ChangePatterns> {
    CHANGE.as_ref().ok()
}

pub fn parse_number(s: &str) -> Option<f64> {
    s.replace([',', ' '], "").parse::<f64>().ok()
}

/// Up to `max_chars` characters starting at byte `start`.
pub fn window_after(text: &str, start: usize, max_chars: usize) -> &str {
    let rest = text.get(start..).unwrap_or("");
    match rest.char_indices().nth(max_chars) {
        Some((end, _)) => &rest[..end],
        None => rest,
    }
}

fn has_any(haystack_lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack_lower.contains(&w.to_lowercase()))
}

pub fn count_hits(haystack_lower: &str, words: &[&str]) -> usize {
    words
        .iter()
        .filter(|w| haystack_lower.contains(&w.to_lowercase()))
        .count()
}

/// `s` up to (not including) its first sentence terminator or newline.
pub fn cut_at_sentence_end(s: &str) -> &str {
    match change_patterns().and_then(|cp| cp.sentence_end.find(s)) {
        Some(m) => &s[..m.start()],
        None => s,
    }
}

/// True if the next non-space char after byte `end` is a percent sign.
fn followed_by_percent(text: &str, end: usize) -> bool {
    let rest = text.get(end..).unwrap_or("").trim_start();
    rest.starts_with('%') || rest.starts_with("퍼센트") || rest.to_ascii_lowercase().starts_with("percent")
}

/// Signed change amount and signed percent found in `window`.
///
/// Percent without a sign inherits the sign of the change amount.
pub fn change_in_window(window: &str) -> (Option<f64>, Option<f64>) {
    let Some(cp) = change_patterns() else {
        return (None, None);
    };
    let window = cut_at_sentence_end(window);
    let lower = window.to_lowercase();

    let mut change = None;
    'rules: for re in &cp.amount {
        for caps in re.captures_iter(window) {
            let Some(num) = caps.name("num") else { continue };
            if followed_by_percent(window, num.end()) {
                continue;
            }
            let Some(v) = parse_number(num.as_str()) else { continue };
            let negative = match (caps.name("sign"), caps.name("word")) {
                (Some(s), _) if !s.as_str().is_empty() => s.as_str() == "-",
                (_, Some(w)) => has_any(&w.as_str().to_lowercase(), NEGATIVE_MOVES),
                _ => has_any(&lower, NEGATIVE_MOVES),
            };
            change = Some(if negative { -v } else { v });
            break 'rules;
        }
    }

    let percent = cp.percent.captures(window).and_then(|caps| {
        let v = parse_number(caps.name("num")?.as_str())?;
        let sign = caps.name("sign").map(|s| s.as_str()).unwrap_or("");
        Some(match sign {
            "-" => -v,
            "+" => v,
            _ if change.is_some_and(|c| c < 0.0) => -v,
            _ if change.is_none() && has_any(&lower, NEGATIVE_MOVES) => -v,
            _ => v,
        })
    });

    (change, percent)
}

/// Name matches of one rule that survive its reject list, in text order.
fn name_matches(text: &str, rule: &CompiledRule, pattern: &Regex) -> Vec<(usize, usize)> {
    pattern
        .find_iter(text)
        .filter(|m| !rule.reject.iter().any(|r| r.is_match(&text[m.start()..])))
        .map(|m| (m.start(), m.end()))
        .collect()
}

/// True if a number token reads as a move or a date rather than a level.
fn is_move_or_date(segment: &str, start: usize, end: usize) -> bool {
    let before = segment[..start].trim_end().to_lowercase();
    let after = segment[end..].trim_start().to_lowercase();
    PRECEDING_MOVE.iter().any(|w| before.ends_with(w)) || TRAILING_UNIT.iter().any(|u| after.starts_with(u))
}

/// First level-like number in `segment`: unsigned, not a move, not a date.
fn first_level(segment: &str) -> Option<f64> {
    let cp = change_patterns()?;
    cp.number.captures_iter(segment).find_map(|caps| {
        if caps.name("sign").is_some() {
            return None;
        }
        let num = caps.name("num")?;
        if is_move_or_date(segment, num.start(), num.end()) {
            return None;
        }
        parse_number(num.as_str())
    })
}

/// Extract every rule's quantity; the first pattern that matches wins.
///
/// Patterns match the quantity's name only. The level is the first plain
/// number after the name, and the change is searched from the name onward,
/// stopping at the sentence end or the next quantity's name. Among one
/// pattern's matches the first with a change is preferred (titles often
/// repeat the level without the move).
pub fn extract_quantities(text: &str, rules: &[CompiledRule]) -> Vec<Quantity> {
    let mut boundaries: Vec<usize> = rules
        .iter()
        .flat_map(|rule| rule.patterns.iter().flat_map(move |p| name_matches(text, rule, p)))
        .map(|(start, _)| start)
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut out = Vec::new();
    for rule in rules {
        for re in &rule.patterns {
            let mut candidates = Vec::new();
            for (start, end) in name_matches(text, rule, re) {
                let mut segment = window_after(text, end, CHANGE_WINDOW_CHARS);
                if let Some(next) = boundaries.iter().find(|b| **b > start && **b >= end) {
                    segment = &segment[..segment.len().min(next - end)];
                }
                segment = cut_at_sentence_end(segment);
                let Some(value) = first_level(segment) else {
                    continue;
                };
                let (change, pct) = change_in_window(segment);
                candidates.push((value, change, pct));
            }
            let pick = candidates
                .iter()
                .find(|c| c.1.is_some())
                .or_else(|| candidates.first());
            if let Some(&(value, change, pct)) = pick {
                let change = change.unwrap_or(0.0);
                out.push(Quantity {
                    name: rule.name.to_string(),
                    value,
                    change,
                    change_percent: pct.unwrap_or(0.0),
                    direction: Direction::from_change(change),
                });
                break;
            }
        }
    }
    out
}

/// Combine keyword counts with quantity directions.
///
/// `primary` names the quantity whose direction overrides the majority.
/// `invert` flips quantity directions (FX: a falling USD rate is positive
/// for the local currency).
pub fn vote_sentiment(
    text: &str,
    lexicon: &Lexicon,
    quantities: &[Quantity],
    primary: &str,
    invert: bool,
) -> Sentiment {
    let lower = text.to_lowercase();
    let pos = count_hits(&lower, lexicon.positive);
    let neg = count_hits(&lower, lexicon.negative);
    let mixed = count_hits(&lower, lexicon.mixed);
    if mixed > 0 {
        return Sentiment::Mixed;
    }

    let keyword_signal = if pos > neg {
        Some(Sentiment::Positive)
    } else if neg > pos {
        Some(Sentiment::Negative)
    } else {
        None
    };

    let signed = |d: Direction| match (d, invert) {
        (Direction::Up, false) | (Direction::Down, true) => Some(Sentiment::Positive),
        (Direction::Down, false) | (Direction::Up, true) => Some(Sentiment::Negative),
        (Direction::Flat, _) => None,
    };
    let primary_signal = quantities
        .iter()
        .find(|q| q.name == primary)
        .and_then(|q| signed(q.direction));
    let index_signal = primary_signal.or_else(|| {
        let ups = quantities.iter().filter(|q| signed(q.direction) == Some(Sentiment::Positive)).count();
        let downs = quantities.iter().filter(|q| signed(q.direction) == Some(Sentiment::Negative)).count();
        match ups.cmp(&downs) {
            std::cmp::Ordering::Greater => Some(Sentiment::Positive),
            std::cmp::Ordering::Less => Some(Sentiment::Negative),
            std::cmp::Ordering::Equal if ups > 0 => Some(Sentiment::Mixed),
            std::cmp::Ordering::Equal => None,
        }
    });

    match (keyword_signal, index_signal) {
        (_, Some(Sentiment::Mixed)) => Sentiment::Mixed,
        (Some(k), Some(i)) if k != i => Sentiment::Mixed,
        (Some(s), _) | (None, Some(s)) => s,
        (None, None) => Sentiment::Mixed,
    }
}

/// Direction of a free-text window by keyword presence (positive checked first).
pub fn window_direction(window: &str, lexicon: &Lexicon) -> Direction {
    let lower = window.to_lowercase();
    if has_any(&lower, lexicon.positive) {
        Direction::Up
    } else if has_any(&lower, lexicon.negative) {
        Direction::Down
    } else {
        Direction::Flat
    }
}

/// Split into sentences on `.`/`。`/`!`/`?` followed by whitespace, or newlines.
pub fn sentences(text: &str) -> Vec<&str> {
    match change_patterns() {
        Some(cp) => cp
            .sentence_split
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect(),
        None => vec![text.trim()],
    }
}

/// First sentence containing any of `anchors`, cut to the factor length cap.
pub fn sentence_with(text: &str, anchors: &[&str]) -> Option<String> {
    sentences(text).into_iter().find_map(|s| {
        if has_any(&s.to_lowercase(), anchors) && s.chars().count() >= FACTOR_MIN_CHARS {
            Some(s.chars().take(FACTOR_MAX_CHARS).collect())
        } else {
            None
        }
    })
}

/// At most one sentence per category, de-duplicated, capped at five.
pub fn extract_factors(text: &str, rules: &[FactorRule]) -> Vec<Factor> {
    let mut out: Vec<Factor> = Vec::new();
    for rule in rules {
        if out.len() >= MAX_FACTORS {
            break;
        }
        let Some(phrase) = sentence_with(text, rule.anchors) else {
            continue;
        };
        if out.iter().any(|f| f.phrase == phrase) {
            continue;
        }
        let lower = phrase.to_lowercase();
        let impact = if has_any(&lower, IMPACT_POSITIVE) {
            Impact::Positive
        } else if has_any(&lower, IMPACT_NEGATIVE) {
            Impact::Negative
        } else {
            Impact::Neutral
        };
        out.push(Factor {
            category: rule.category.to_string(),
            phrase,
            impact,
        });
    }
    out
}

/// A labelled amount such as "거래량 12억주" or "volume 11.2 billion": label and
/// unit alternations for each language.
#[derive(Debug, Clone, Copy)]
pub struct AmountLabels {
    pub korean: &'static str,
    pub korean_units: &'static str,
    pub english: &'static str,
    pub english_units: &'static str,
}

/// Korean pattern first, then the case-insensitive English one; group 1 is the
/// number and group 2 the optional unit, as `first_amount` expects.
pub fn compile_amounts(labels: &AmountLabels) -> Result<Vec<Regex>, regex::Error> {
    let AmountLabels { korean, korean_units, english, english_units } = labels;
    Ok(vec![
        Regex::new(&format!(r"(?:{korean})[^0-9\n]{{0,10}}({NUM})\s*(?:({korean_units}))?"))?,
        Regex::new(&format!(
            r"(?i)\b(?:{english})\b[^0-9\n]{{0,15}}({NUM})\s*(?:({english_units}))?"
        ))?,
    ])
}

/// First capture of the first matching pattern, with its unit group appended.
pub fn first_amount(text: &str, patterns: &[Regex]) -> Option<String> {
    patterns.iter().find_map(|re| {
        let caps = re.captures(text)?;
        let num = caps.get(1)?.as_str();
        let unit = caps.get(2).map(|u| u.as_str()).unwrap_or("");
        Some(format!("{num}{unit}").trim().to_string())
    })
}
