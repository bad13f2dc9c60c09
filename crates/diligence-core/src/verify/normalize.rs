//! Numeric claim normalization.
//!
//! Scans free text for magnitude expressions and turns each distinct
//! mention into a typed [`NormalizationEntry`]: the literal span, its value
//! in base units, the unit, and the nearest compatible business keyword.
//!
//! Patterns are applied in a fixed priority order and a later pattern never
//! claims text an earlier one already matched:
//!
//! 1. dollar amounts (`$1.5M`, `$45K/month`, `$52K monthly`)
//! 2. number words (`three hundred thousand dollars`)
//! 3. percentages, stored as decimals
//! 4. ratios (`3:1`, `4x`)
//! 5. time spans (`18 months`, `2 years`, `6-week`), in months
//! 6. counts of people or accounts (`45 employees`, `10,000 users`)
//! 7. bare numbers with a magnitude suffix (`2.5M`, `400 thousand`)
//! 8. plain numbers with separators or at least four digits
//!
//! Four-digit years between 1900 and 2100 are date references and are
//! skipped unless they carry a currency marker.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Business quantity a number refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTag {
    Revenue,
    Mrr,
    Arr,
    Cash,
    BurnRate,
    Runway,
    GrowthRate,
    Customers,
    Cac,
    Ltv,
    LtvCacRatio,
    ChurnRate,
    Tam,
    Sam,
    Som,
    MarketSize,
    Valuation,
    Funding,
    TeamSize,
    Price,
    Unspecified,
}

impl ContextTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextTag::Revenue => "revenue",
            ContextTag::Mrr => "mrr",
            ContextTag::Arr => "arr",
            ContextTag::Cash => "cash",
            ContextTag::BurnRate => "burn_rate",
            ContextTag::Runway => "runway",
            ContextTag::GrowthRate => "growth_rate",
            ContextTag::Customers => "customers",
            ContextTag::Cac => "cac",
            ContextTag::Ltv => "ltv",
            ContextTag::LtvCacRatio => "ltv_cac_ratio",
            ContextTag::ChurnRate => "churn_rate",
            ContextTag::Tam => "tam",
            ContextTag::Sam => "sam",
            ContextTag::Som => "som",
            ContextTag::MarketSize => "market_size",
            ContextTag::Valuation => "valuation",
            ContextTag::Funding => "funding",
            ContextTag::TeamSize => "team_size",
            ContextTag::Price => "price",
            ContextTag::Unspecified => "unspecified",
        }
    }

    /// Tags whose values are dollar amounts.
    pub fn is_monetary(&self) -> bool {
        matches!(
            self,
            ContextTag::Revenue
                | ContextTag::Mrr
                | ContextTag::Arr
                | ContextTag::Cash
                | ContextTag::BurnRate
                | ContextTag::Cac
                | ContextTag::Ltv
                | ContextTag::Tam
                | ContextTag::Sam
                | ContextTag::Som
                | ContextTag::MarketSize
                | ContextTag::Valuation
                | ContextTag::Funding
                | ContextTag::Price
        )
    }
}

impl std::fmt::Display for ContextTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a normalized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "USD/month")]
    UsdPerMonth,
    #[serde(rename = "USD/year")]
    UsdPerYear,
    /// Percentages, stored as fractions (`25%` is `0.25`).
    #[serde(rename = "decimal")]
    Decimal,
    #[serde(rename = "ratio")]
    Ratio,
    #[serde(rename = "months")]
    Months,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "number")]
    Number,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Usd => "USD",
            Unit::UsdPerMonth => "USD/month",
            Unit::UsdPerYear => "USD/year",
            Unit::Decimal => "decimal",
            Unit::Ratio => "ratio",
            Unit::Months => "months",
            Unit::Count => "count",
            Unit::Number => "number",
        }
    }

    pub fn is_currency(&self) -> bool {
        matches!(self, Unit::Usd | Unit::UsdPerMonth | Unit::UsdPerYear)
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One numeric mention. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationEntry {
    /// The literal text of the mention, exactly as written.
    pub original_text: String,
    pub normalized_value: f64,
    pub unit: Unit,
    pub context_tag: ContextTag,
    /// Byte range of the mention in the scanned text.
    pub span: (usize, usize),
    /// Index of the sentence the mention appears in.
    pub sentence: usize,
}

impl NormalizationEntry {
    pub fn triple(&self) -> (f64, Unit, ContextTag) {
        (self.normalized_value, self.unit, self.context_tag)
    }

    /// Value on a monthly basis: yearly dollar rates are divided by 12.
    pub fn monthly_value(&self) -> f64 {
        match self.unit {
            Unit::UsdPerYear => self.normalized_value / 12.0,
            _ => self.normalized_value,
        }
    }

    /// Re-runs normalization over this entry's literal with its context.
    ///
    /// A dollar rate that came from a qualifier outside the literal
    /// (`annual burn is $540K`) is carried over.
    pub fn renormalized(&self) -> Option<(f64, Unit, ContextTag)> {
        let (value, unit, tag) = normalize_literal(&self.original_text, self.context_tag)?;
        let unit = if unit == Unit::Usd && self.unit.is_currency() {
            self.unit
        } else {
            unit
        };
        Some((value, unit, tag))
    }
}

/// Every mention found in one text, in reading order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizationTable {
    pub entries: Vec<NormalizationEntry>,
    /// `(first, last)` entry indices of "from X to Y" style series.
    pub series: Vec<(usize, usize)>,
}

impl NormalizationTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn in_series(&self, idx: usize) -> bool {
        self.series.iter().any(|&(a, b)| idx == a || idx == b)
    }

    pub fn with_tag(&self, tag: ContextTag) -> impl Iterator<Item = (usize, &NormalizationEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.context_tag == tag)
    }

    pub fn in_sentence(&self, sentence: usize) -> impl Iterator<Item = (usize, &NormalizationEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.sentence == sentence)
    }
}

const NUM: &str = r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?";

const RATE: &str = r"(?:\s*(?:/\s*(?:month|mo|year|yr)\b|per\s+(?:month|year|annum)\b|a\s+(?:month|year)\b|monthly\b|annually\b|yearly\b))?";

static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\$\s?({NUM})(?:\s?(thousand|million|billion|trillion|bn|mm|k|m|b)\b)?({RATE})"
    ))
    .expect("valid currency regex")
});

static NUMBER_WORDS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b((?:(?:a|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|thirteen|fourteen|fifteen|sixteen|seventeen|eighteen|nineteen|twenty|thirty|forty|fifty|sixty|seventy|eighty|ninety|hundred)[\s-]+)+)(thousand|million|billion)\b(\s+dollars)?",
    )
    .expect("valid number words regex")
});

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s?(?:%|percent\b)").expect("valid percent regex")
});

static RATIO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)(?:\s?:\s?1\b|x\b)").expect("valid ratio regex")
});

static TIME_SPAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s?-?\s?(months?|mos?|years?|yrs?|weeks?|wks?)\b")
        .expect("valid time span regex")
});

static COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b({NUM})\s?(thousand|million|k|m)?\+?\s+(?:(?:paying|active|enterprise|full-time)\s+)?(employees|people|engineers|developers|staff|team\s+members|customers|users|clients|subscribers|merchants|accounts|downloads|installs|members|stores|locations)\b"
    ))
    .expect("valid count regex")
});

static SUFFIXED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d+(?:\.\d+)?)\s?(thousand|million|billion|trillion|bn|mm|k|m|b)\b({RATE})"
    ))
    .expect("valid suffixed number regex")
});

static PLAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,3}}(?:,\d{{3}})+(?:\.\d+)?|\d{{4,}}(?:\.\d+)?)\b({RATE})"))
        .expect("valid plain number regex")
});

/// A rate written in front of the keyword (`annual burn is $540K`).
static LEADING_RATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(annual(?:ized)?|yearly|monthly)\s+$").expect("valid leading rate regex")
});

static CLAUSE_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;.]\s|[\n()]").expect("valid clause regex"));

static SENTENCE_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)|\n+").expect("valid sentence regex"));

static SERIES_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:to|->|→|-|–|—)\s*$").expect("valid series regex"));

/// Keyword patterns per tag. Uppercase acronyms are matched case-sensitively
/// so names like "Sam" are not taken for market sizing.
static KEYWORDS: Lazy<Vec<(ContextTag, Regex)>> = Lazy::new(|| {
    let table: &[(ContextTag, &str)] = &[
        (ContextTag::Mrr, r"(?i)\bmonthly\s+recurring\s+revenue\b"),
        (ContextTag::Mrr, r"\bMRR\b"),
        (ContextTag::Arr, r"(?i)\bannual(?:ized)?\s+recurring\s+revenue\b|\brun[\s-]rate\b"),
        (ContextTag::Arr, r"\bARR\b"),
        (ContextTag::Revenue, r"(?i)\b(?:revenues?|sales|turnover|bookings)\b"),
        (ContextTag::Cash, r"(?i)\b(?:cash(?:\s+on\s+hand|\s+reserves?|\s+balance)?|in\s+the\s+bank|bank\s+balance)\b"),
        (ContextTag::BurnRate, r"(?i)\b(?:net\s+burn|burn\s+rate|burn|burning)\b"),
        (ContextTag::Runway, r"(?i)\brunway\b"),
        (ContextTag::GrowthRate, r"(?i)\b(?:growth(?:\s+rate)?|grew|growing|grow|increased?|increases)\b"),
        (ContextTag::GrowthRate, r"\b(?:MoM|YoY|CAGR)\b"),
        (ContextTag::Customers, r"(?i)\b(?:customers?|users?|clients?|subscribers?|merchants?)\b"),
        (ContextTag::Cac, r"(?i)\bcustomer\s+acquisition\s+costs?\b"),
        (ContextTag::Cac, r"\bCAC\b"),
        (ContextTag::Ltv, r"(?i)\b(?:customer\s+)?lifetime\s+value\b"),
        (ContextTag::Ltv, r"\b(?:LTV|CLV)\b"),
        (ContextTag::LtvCacRatio, r"(?i)\bltv\s*(?:[:/]|to)\s*cac\b"),
        (ContextTag::ChurnRate, r"(?i)\b(?:churn(?:\s+rate)?|churned)\b"),
        (ContextTag::Tam, r"(?i)\btotal\s+addressable\s+market\b"),
        (ContextTag::Tam, r"\bTAM\b"),
        (ContextTag::Sam, r"(?i)\bserviceable\s+(?:available|addressable)\s+market\b"),
        (ContextTag::Sam, r"\bSAM\b"),
        (ContextTag::Som, r"(?i)\bserviceable\s+obtainable\s+market\b"),
        (ContextTag::Som, r"\bSOM\b"),
        (ContextTag::MarketSize, r"(?i)\bmarket(?:\s+size)?\b"),
        (ContextTag::Valuation, r"(?i)\b(?:valuation|valued|pre[\s-]money|post[\s-]money)\b"),
        (ContextTag::Funding, r"(?i)\b(?:raised|raising|raise|funding|seed\s+round|round|investment)\b"),
        (ContextTag::TeamSize, r"(?i)\b(?:employees|headcount|team(?:\s+size|\s+members)?|staff|engineers|ftes?)\b"),
        (ContextTag::Price, r"(?i)\b(?:price[ds]?|pricing|subscription|per\s+seat|fee)\b"),
    ];
    table
        .iter()
        .map(|(tag, pattern)| (*tag, Regex::new(pattern).expect("valid keyword regex")))
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rate {
    None,
    Month,
    Year,
}

impl Rate {
    fn parse(qualifier: &str) -> Self {
        let q = qualifier.trim().to_ascii_lowercase();
        if q.is_empty() {
            Rate::None
        } else if q.contains("mo") {
            Rate::Month
        } else {
            Rate::Year
        }
    }

    fn currency_unit(self) -> Unit {
        match self {
            Rate::None => Unit::Usd,
            Rate::Month => Unit::UsdPerMonth,
            Rate::Year => Unit::UsdPerYear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Currency(Rate),
    /// A number whose unit depends on the surrounding keyword.
    Bare(Rate),
    Percent,
    Ratio,
    Months,
    Count,
}

#[derive(Debug, Clone)]
struct RawMention {
    range: Range<usize>,
    value: f64,
    kind: Kind,
}

fn parse_number(digits: &str) -> Option<f64> {
    digits.replace(',', "").parse::<f64>().ok()
}

fn multiplier(suffix: Option<&str>) -> f64 {
    match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("k") | Some("thousand") => 1e3,
        Some("m") | Some("mm") | Some("million") => 1e6,
        Some("b") | Some("bn") | Some("billion") => 1e9,
        Some("trillion") => 1e12,
        _ => 1.0,
    }
}

fn word_value(words: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut seen = false;
    for word in words
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
    {
        let w = word.to_ascii_lowercase();
        let small = match w.as_str() {
            "a" | "one" => 1.0,
            "two" => 2.0,
            "three" => 3.0,
            "four" => 4.0,
            "five" => 5.0,
            "six" => 6.0,
            "seven" => 7.0,
            "eight" => 8.0,
            "nine" => 9.0,
            "ten" => 10.0,
            "eleven" => 11.0,
            "twelve" => 12.0,
            "thirteen" => 13.0,
            "fourteen" => 14.0,
            "fifteen" => 15.0,
            "sixteen" => 16.0,
            "seventeen" => 17.0,
            "eighteen" => 18.0,
            "nineteen" => 19.0,
            "twenty" => 20.0,
            "thirty" => 30.0,
            "forty" => 40.0,
            "fifty" => 50.0,
            "sixty" => 60.0,
            "seventy" => 70.0,
            "eighty" => 80.0,
            "ninety" => 90.0,
            "hundred" => {
                total = if total == 0.0 { 100.0 } else { total * 100.0 };
                seen = true;
                continue;
            }
            _ => return None,
        };
        total += small;
        seen = true;
    }
    seen.then_some(total)
}

fn is_year(digits: &str) -> bool {
    digits.len() == 4
        && digits
            .parse::<u32>()
            .map(|y| (1900..=2100).contains(&y))
            .unwrap_or(false)
}

fn overlaps(claimed: &[Range<usize>], range: &Range<usize>) -> bool {
    claimed
        .iter()
        .any(|c| c.start < range.end && range.start < c.end)
}

/// Finds every raw mention, honoring pattern priority.
fn scan(text: &str) -> Vec<RawMention> {
    let mut found: Vec<RawMention> = Vec::new();
    let mut claimed: Vec<Range<usize>> = Vec::new();

    let mut push = |found: &mut Vec<RawMention>, range: Range<usize>, value: f64, kind: Kind| {
        if !overlaps(&claimed, &range) {
            claimed.push(range.clone());
            found.push(RawMention { range, value, kind });
        }
    };

    for caps in CURRENCY_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) else {
            continue;
        };
        let value = value * multiplier(caps.get(2).map(|m| m.as_str()));
        let rate = Rate::parse(caps.get(3).map_or("", |m| m.as_str()));
        push(&mut found, whole.range(), value, Kind::Currency(rate));
    }

    for caps in NUMBER_WORDS_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(base) = caps.get(1).and_then(|m| word_value(m.as_str())) else {
            continue;
        };
        let value = base * multiplier(caps.get(2).map(|m| m.as_str()));
        let kind = if caps.get(3).is_some() {
            Kind::Currency(Rate::None)
        } else {
            Kind::Bare(Rate::None)
        };
        push(&mut found, whole.range(), value, kind);
    }

    for caps in PERCENT_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            push(&mut found, whole.range(), value / 100.0, Kind::Percent);
        }
    }

    for caps in RATIO_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            push(&mut found, whole.range(), value, Kind::Ratio);
        }
    }

    for caps in TIME_SPAN_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) else {
            continue;
        };
        let unit = caps.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
        let months = if unit.starts_with('y') {
            value * 12.0
        } else if unit.starts_with('w') {
            value * 12.0 / 52.0
        } else {
            value
        };
        push(&mut found, whole.range(), months, Kind::Months);
    }

    for caps in COUNT_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            let value = value * multiplier(caps.get(2).map(|m| m.as_str()));
            push(&mut found, whole.range(), value, Kind::Count);
        }
    }

    for caps in SUFFIXED_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) else {
            continue;
        };
        let value = value * multiplier(caps.get(2).map(|m| m.as_str()));
        let rate = Rate::parse(caps.get(3).map_or("", |m| m.as_str()));
        push(&mut found, whole.range(), value, Kind::Bare(rate));
    }

    for caps in PLAIN_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(digits) = caps.get(1) else { continue };
        if is_year(digits.as_str()) {
            continue;
        }
        if let Some(value) = parse_number(digits.as_str()) {
            let rate = Rate::parse(caps.get(2).map_or("", |m| m.as_str()));
            push(&mut found, whole.range(), value, Kind::Bare(rate));
        }
    }

    found.sort_by_key(|m| m.range.start);
    found
}

fn compatible(kind: Kind, tag: ContextTag) -> bool {
    match kind {
        Kind::Currency(_) => tag.is_monetary(),
        Kind::Bare(_) => true,
        Kind::Percent => matches!(tag, ContextTag::GrowthRate | ContextTag::ChurnRate),
        Kind::Ratio => matches!(tag, ContextTag::LtvCacRatio | ContextTag::GrowthRate),
        Kind::Months => tag == ContextTag::Runway,
        Kind::Count => matches!(tag, ContextTag::Customers | ContextTag::TeamSize),
    }
}

fn finalize(kind: Kind, tag: ContextTag) -> Unit {
    match kind {
        Kind::Currency(rate) => rate.currency_unit(),
        Kind::Bare(rate) if tag.is_monetary() => rate.currency_unit(),
        Kind::Bare(_) => match tag {
            ContextTag::Customers | ContextTag::TeamSize => Unit::Count,
            ContextTag::Runway => Unit::Months,
            _ => Unit::Number,
        },
        Kind::Percent => Unit::Decimal,
        Kind::Ratio => Unit::Ratio,
        Kind::Months => Unit::Months,
        Kind::Count => Unit::Count,
    }
}

struct KeywordHit {
    tag: ContextTag,
    range: Range<usize>,
}

/// Keyword hits in `text`, dropping hits contained in a longer hit.
fn keyword_hits(text: &str) -> Vec<KeywordHit> {
    let mut hits: Vec<KeywordHit> = KEYWORDS
        .iter()
        .flat_map(|(tag, re)| {
            re.find_iter(text).map(move |m| KeywordHit {
                tag: *tag,
                range: m.range(),
            })
        })
        .collect();
    hits.sort_by_key(|h| (h.range.start, std::cmp::Reverse(h.range.end)));
    let mut kept: Vec<KeywordHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        let nested = kept.iter().any(|k| {
            k.range.start <= hit.range.start
                && hit.range.end <= k.range.end
                && k.range.len() > hit.range.len()
        });
        if !nested {
            kept.push(hit);
        }
    }
    kept
}

fn distance(a: &Range<usize>, b: &Range<usize>) -> usize {
    if a.end <= b.start {
        b.start - a.end
    } else if b.end <= a.start {
        a.start - b.end
    } else {
        0
    }
}

fn clause_of(breaks: &[Range<usize>], range: &Range<usize>, len: usize) -> Range<usize> {
    let start = breaks
        .iter()
        .filter(|b| b.end <= range.start)
        .map(|b| b.end)
        .max()
        .unwrap_or(0);
    let end = breaks
        .iter()
        .filter(|b| b.start >= range.end)
        .map(|b| b.start)
        .min()
        .unwrap_or(len);
    start..end
}

fn nearest_tag(kind: Kind, mention: &Range<usize>, clause: &Range<usize>, hits: &[KeywordHit]) -> ContextTag {
    hits.iter()
        .filter(|h| h.range.start >= clause.start && h.range.end <= clause.end)
        .filter(|h| compatible(kind, h.tag))
        .min_by_key(|h| (distance(mention, &h.range), std::cmp::Reverse(h.range.len())))
        .map(|h| h.tag)
        .unwrap_or(ContextTag::Unspecified)
}

/// Tags whose dollar amounts are flows and may carry a leading rate.
fn takes_leading_rate(tag: ContextTag) -> bool {
    matches!(tag, ContextTag::BurnRate | ContextTag::Revenue | ContextTag::Price)
}

fn leading_rate(
    text: &str,
    mention: &Range<usize>,
    clause: &Range<usize>,
    tag: ContextTag,
    hits: &[KeywordHit],
) -> Rate {
    hits.iter()
        .filter(|h| h.tag == tag && h.range.start >= clause.start && h.range.end <= clause.end)
        .min_by_key(|h| distance(mention, &h.range))
        .and_then(|h| LEADING_RATE_RE.captures(&text[clause.start..h.range.start]))
        .map_or(Rate::None, |caps| Rate::parse(&caps[1]))
}

/// Applies a leading qualifier to mentions that carry no rate of their own.
fn with_leading_rate(
    kind: Kind,
    tag: ContextTag,
    rate: impl FnOnce() -> Rate,
) -> Kind {
    if !takes_leading_rate(tag) {
        return kind;
    }
    match kind {
        Kind::Currency(Rate::None) => Kind::Currency(rate()),
        Kind::Bare(Rate::None) => Kind::Bare(rate()),
        other => other,
    }
}

/// Byte ranges of the sentences in `text`, trimmed, empty ones dropped.
pub fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    for brk in SENTENCE_BREAK_RE.find_iter(text) {
        // keep the terminal punctuation inside the sentence
        let end = text[brk.start()..brk.end()]
            .find(char::is_whitespace)
            .map_or(brk.end(), |ws| brk.start() + ws);
        push_trimmed(text, start..end, &mut spans);
        start = brk.end();
    }
    push_trimmed(text, start..text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, range: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail < slice.len() {
        spans.push(range.start + lead..range.end - trail);
    }
}

/// Normalizes every numeric mention in `text`.
pub fn normalize(text: &str) -> NormalizationTable {
    let raw = scan(text);
    if raw.is_empty() {
        return NormalizationTable::default();
    }

    let breaks: Vec<Range<usize>> = CLAUSE_BREAK_RE.find_iter(text).map(|m| m.range()).collect();
    let hits = keyword_hits(text);
    let sentences = sentence_spans(text);

    let entries: Vec<NormalizationEntry> = raw
        .into_iter()
        .map(|m| {
            let clause = clause_of(&breaks, &m.range, text.len());
            let tag = nearest_tag(m.kind, &m.range, &clause, &hits);
            let kind = with_leading_rate(m.kind, tag, || {
                leading_rate(text, &m.range, &clause, tag, &hits)
            });
            let sentence = sentences
                .iter()
                .position(|s| s.start <= m.range.start && m.range.start < s.end.max(s.start + 1))
                .unwrap_or(0);
            NormalizationEntry {
                original_text: text[m.range.clone()].to_string(),
                normalized_value: m.value,
                unit: finalize(kind, tag),
                context_tag: tag,
                span: (m.range.start, m.range.end),
                sentence,
            }
        })
        .collect();

    let series = entries
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| {
            pair[0].context_tag == pair[1].context_tag
                && pair[0].unit == pair[1].unit
                && SERIES_GAP_RE.is_match(&text[pair[0].span.1..pair[1].span.0])
        })
        .map(|(i, _)| (i, i + 1))
        .collect();

    NormalizationTable { entries, series }
}

/// Normalizes a lone literal under a known context.
///
/// Returns `None` if the literal holds no recognizable magnitude.
pub fn normalize_literal(literal: &str, context: ContextTag) -> Option<(f64, Unit, ContextTag)> {
    let mention = scan(literal).into_iter().next()?;
    let tag = if compatible(mention.kind, context) {
        context
    } else {
        ContextTag::Unspecified
    };
    Some((mention.value, finalize(mention.kind, tag), tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(text: &str) -> NormalizationEntry {
        let table = normalize(text);
        assert_eq!(table.len(), 1, "expected one entry in {:?}: {:?}", text, table.entries);
        table.entries.into_iter().next().unwrap()
    }

    #[test]
    fn currency_with_suffix_and_rate() {
        let e = only("We burn $45K/month on payroll");
        assert_eq!(e.original_text, "$45K/month");
        assert_eq!(e.triple(), (45_000.0, Unit::UsdPerMonth, ContextTag::BurnRate));

        let e = only("Burn is $52K monthly");
        assert_eq!(e.original_text, "$52K monthly");
        assert_eq!(e.unit, Unit::UsdPerMonth);

        let e = only("ARR of $1.2M");
        assert!((e.normalized_value - 1_200_000.0).abs() < 1e-6);
        assert_eq!((e.unit, e.context_tag), (Unit::Usd, ContextTag::Arr));
    }

    #[test]
    fn span_points_at_literal() {
        let text = "Cash: $500K";
        let e = only(text);
        assert_eq!(&text[e.span.0..e.span.1], "$500K");
    }

    #[test]
    fn runway_scenario_tags_each_clause() {
        let table = normalize("$500K cash, $100K/month burn, 16 months runway");
        let triples: Vec<_> = table.entries.iter().map(|e| e.triple()).collect();
        assert_eq!(
            triples,
            vec![
                (500_000.0, Unit::Usd, ContextTag::Cash),
                (100_000.0, Unit::UsdPerMonth, ContextTag::BurnRate),
                (16.0, Unit::Months, ContextTag::Runway),
            ]
        );
    }

    #[test]
    fn percentages_become_decimals() {
        let e = only("Monthly churn rate is 3.5%");
        assert!((e.normalized_value - 0.035).abs() < 1e-12);
        assert_eq!(e.unit, Unit::Decimal);
        assert_eq!(e.context_tag, ContextTag::ChurnRate);
    }

    #[test]
    fn number_words() {
        let e = only("We raised three hundred thousand dollars");
        assert_eq!(e.triple(), (300_000.0, Unit::Usd, ContextTag::Funding));
        let e = only("revenue of two million");
        assert_eq!(e.triple(), (2_000_000.0, Unit::Usd, ContextTag::Revenue));
    }

    #[test]
    fn ratios_and_years_in_months() {
        let e = only("LTV:CAC of 3:1");
        assert_eq!(e.triple(), (3.0, Unit::Ratio, ContextTag::LtvCacRatio));
        let e = only("runway of 2 years");
        assert_eq!(e.triple(), (24.0, Unit::Months, ContextTag::Runway));
    }

    #[test]
    fn counts_take_their_noun() {
        let e = only("We have 45 employees");
        assert_eq!(e.triple(), (45.0, Unit::Count, ContextTag::TeamSize));
        let e = only("10,000 paying customers");
        assert_eq!(e.triple(), (10_000.0, Unit::Count, ContextTag::Customers));
    }

    #[test]
    fn years_are_not_numbers() {
        assert!(normalize("Founded in 2019 and relaunched in 2021").is_empty());
        let e = only("Revenue in 2023 was 2500000");
        assert_eq!(e.normalized_value, 2_500_000.0);
    }

    #[test]
    fn bare_number_idempotent_with_currency() {
        let bare = only("Revenue: 2000000");
        assert_eq!(bare.triple(), (2_000_000.0, Unit::Usd, ContextTag::Revenue));
        assert_eq!(bare.renormalized(), Some(bare.triple()));
        assert_eq!(normalize_literal("2000000", ContextTag::Revenue), Some(bare.triple()));
        assert_eq!(normalize_literal("$2M", ContextTag::Revenue), Some(bare.triple()));
    }

    #[test]
    fn leading_rate_qualifier_applies_to_the_amount() {
        let e = only("Annual burn is $540K");
        assert_eq!(e.triple(), (540_000.0, Unit::UsdPerYear, ContextTag::BurnRate));
        assert!((e.monthly_value() - 45_000.0).abs() < 1e-6);
        assert_eq!(e.renormalized(), Some(e.triple()));

        let e = only("Monthly revenue of 80,000");
        assert_eq!(e.triple(), (80_000.0, Unit::UsdPerMonth, ContextTag::Revenue));

        // the literal's own rate wins
        let e = only("Annual burn of $50K/month");
        assert_eq!(e.unit, Unit::UsdPerMonth);

        // stocks never take a rate
        let e = only("Monthly cash balance is $2M");
        assert_eq!(e.triple(), (2_000_000.0, Unit::Usd, ContextTag::Cash));
    }

    #[test]
    fn acronyms_are_case_sensitive() {
        let e = only("Sam said the deal is 2500000");
        assert_eq!(e.context_tag, ContextTag::Unspecified);
        assert_eq!(e.unit, Unit::Number);
    }

    #[test]
    fn from_to_pairs_form_a_series() {
        let table = normalize("ARR grew from $1M to $3M this year");
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries[0].context_tag, ContextTag::Arr);
        assert_eq!(table.series, vec![(0, 1)]);
        assert!(table.in_series(1));
    }

    #[test]
    fn sentences_split_on_terminators() {
        let text = "Revenue is $1.5M. Burn is $40K!\nRunway 12 months";
        let spans = sentence_spans(text);
        let parts: Vec<&str> = spans.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(parts, vec!["Revenue is $1.5M.", "Burn is $40K!", "Runway 12 months"]);
        let table = normalize(text);
        let sentences: Vec<usize> = table.entries.iter().map(|e| e.sentence).collect();
        assert_eq!(sentences, vec![0, 1, 2]);
    }
}
