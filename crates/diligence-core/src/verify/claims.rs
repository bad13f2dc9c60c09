//! Claim extraction, query consolidation, and snippet corroboration.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::normalize::{sentence_spans, NormalizationTable};
use crate::capability::SearchHit;

/// What a sentence asserts. Declaration order is search priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimCategory {
    MarketSizing,
    PersonnelCredentials,
    CompetitorFigures,
    RegulatoryFacts,
    IntellectualProperty,
    Partnerships,
    Traction,
}

impl ClaimCategory {
    pub const ALL: [ClaimCategory; 7] = [
        ClaimCategory::MarketSizing,
        ClaimCategory::PersonnelCredentials,
        ClaimCategory::CompetitorFigures,
        ClaimCategory::RegulatoryFacts,
        ClaimCategory::IntellectualProperty,
        ClaimCategory::Partnerships,
        ClaimCategory::Traction,
    ];

    /// High-priority categories are eligible for external lookups.
    pub fn is_high_priority(&self) -> bool {
        !matches!(self, ClaimCategory::Partnerships | ClaimCategory::Traction)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClaimCategory::MarketSizing => "market sizing",
            ClaimCategory::PersonnelCredentials => "personnel credentials",
            ClaimCategory::CompetitorFigures => "competitor figures",
            ClaimCategory::RegulatoryFacts => "regulatory facts",
            ClaimCategory::IntellectualProperty => "intellectual property",
            ClaimCategory::Partnerships => "partnerships",
            ClaimCategory::Traction => "traction",
        }
    }

    fn search_hint(&self) -> &'static str {
        match self {
            ClaimCategory::MarketSizing => "market size report",
            ClaimCategory::PersonnelCredentials => "founder background",
            ClaimCategory::CompetitorFigures => "competitor funding revenue",
            ClaimCategory::RegulatoryFacts => "regulatory approval status",
            ClaimCategory::IntellectualProperty => "patent filing",
            ClaimCategory::Partnerships => "partnership announcement",
            ClaimCategory::Traction => "company traction",
        }
    }

    fn pattern(&self) -> &'static Regex {
        &CATEGORY_PATTERNS[*self as usize]
    }
}

static CATEGORY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:market\s+size|addressable\s+market|serviceable\s+\w+\s+market|billion[\s-]dollar\s+market|market\s+(?:is\s+)?(?:worth|valued)|cagr)\b|\b(?:TAM|SAM|SOM)\b",
        r"(?i)\b(?:founders?|co-?founders?|ceo|cto|cfo|coo|ph\.?d|mba|formerly|previously|ex-\w+|alumni|graduated|years\s+of\s+experience|veteran)\b",
        r"(?i)\b(?:competitors?|competing|competition|incumbents?|rivals?|market\s+leader|market\s+share|compared\s+to|versus)\b",
        r"(?i)\b(?:regulat\w*|complian\w*|fda|gdpr|hipaa|licen[cs]e[ds]?|approv(?:al|ed)|certif\w*|soc\s?2|iso\s?\d{4,5})\b",
        r"(?i)\b(?:patents?|patented|patent-pending|trademarks?|proprietary|intellectual\s+property|copyrights?)\b|\bIP\b",
        r"(?i)\b(?:partners?|partnerships?|partnered|collaborat\w*|alliance|integrat(?:ion|ed)\s+with|letter\s+of\s+intent|loi)\b",
        r"(?i)\b(?:customers?|users?|revenue|growth|grew|signed|pilots?|waitlist|downloads|awards?|won|featured|mrr|arr)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid claim category regex"))
    .collect()
});

static TOKEN_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "after", "also", "been", "being", "from", "have", "into", "more", "most", "other",
        "over", "since", "than", "that", "their", "them", "then", "there", "these", "they", "this",
        "those", "which", "while", "with", "will", "would", "your", "were", "what", "when", "where",
        "our", "the", "and", "for", "are", "has", "was",
    ]
    .into_iter()
    .collect()
});

/// One checkable assertion: a sentence and the numeric mentions inside it.
#[derive(Debug, Clone, Serialize)]
pub struct Claim {
    pub id: usize,
    pub category: ClaimCategory,
    pub text: String,
    pub sentence: usize,
    pub mention_spans: Vec<(usize, usize)>,
}

/// Extracts claims sentence by sentence. The first matching category wins.
pub fn extract_claims(text: &str, table: &NormalizationTable) -> Vec<Claim> {
    sentence_spans(text)
        .into_iter()
        .enumerate()
        .filter_map(|(sentence, range)| {
            let body = &text[range];
            let category = ClaimCategory::ALL
                .into_iter()
                .find(|c| c.pattern().is_match(body))?;
            Some((sentence, body, category))
        })
        .enumerate()
        .map(|(id, (sentence, body, category))| Claim {
            id,
            category,
            text: body.to_string(),
            sentence,
            mention_spans: table.in_sentence(sentence).map(|(_, e)| e.span).collect(),
        })
        .collect()
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '$' || c == '.'))
        .map(|t| t.trim_matches('.').to_lowercase())
        .filter(|t| {
            (t.len() >= 4 || t.chars().any(|c| c.is_ascii_digit()))
                && !TOKEN_STOPWORDS.contains(t.as_str())
        })
        .collect()
}

fn condensed(text: &str) -> String {
    text.split_whitespace().take(16).collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}

/// Maximum characters of one consolidated query.
pub const MAX_QUERY_CHARS: usize = 300;

/// One query covering several claims of the same category.
pub fn build_query(category: ClaimCategory, claims: &[&Claim]) -> String {
    let body = claims
        .iter()
        .map(|c| condensed(&c.text))
        .collect::<Vec<_>>()
        .join("; ");
    truncate_chars(&format!("{}: {}", category.search_hint(), body), MAX_QUERY_CHARS)
}

/// Query suggested to a human for a claim that was never looked up.
pub fn suggested_query(claim: &Claim) -> String {
    truncate_chars(
        &format!("{}: {}", claim.category.search_hint(), condensed(&claim.text)),
        MAX_QUERY_CHARS,
    )
}

/// Share of the claim's significant tokens found in the snippets, 0 to 100.
pub fn corroboration_percent(claim_text: &str, hits: &[SearchHit]) -> u8 {
    let wanted = tokens(claim_text);
    if wanted.is_empty() || hits.is_empty() {
        return 0;
    }
    let haystack: HashSet<String> = hits.iter().flat_map(|h| tokens(&h.snippet)).collect();
    let found = wanted.iter().filter(|t| haystack.contains(*t)).count();
    ((found * 100) / wanted.len()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::normalize::normalize;

    #[test]
    fn categories_follow_priority() {
        let text = "The TAM is $40B. Our CEO was formerly at Stripe. We partnered with Visa. We have 500 customers. The weather is nice.";
        let claims = extract_claims(text, &normalize(text));
        let cats: Vec<ClaimCategory> = claims.iter().map(|c| c.category).collect();
        assert_eq!(
            cats,
            vec![
                ClaimCategory::MarketSizing,
                ClaimCategory::PersonnelCredentials,
                ClaimCategory::Partnerships,
                ClaimCategory::Traction,
            ]
        );
        assert_eq!(claims[0].mention_spans.len(), 1);
        assert!(claims[0].category.is_high_priority());
        assert!(!claims[3].category.is_high_priority());
    }

    #[test]
    fn query_is_bounded() {
        let long = "word ".repeat(200);
        let claim = Claim {
            id: 0,
            category: ClaimCategory::IntellectualProperty,
            text: long,
            sentence: 0,
            mention_spans: vec![],
        };
        let q = build_query(claim.category, &[&claim, &claim, &claim]);
        assert!(q.chars().count() <= MAX_QUERY_CHARS);
        assert!(q.starts_with("patent filing: "));
    }

    #[test]
    fn corroboration_counts_significant_tokens() {
        let hits = vec![SearchHit {
            url: "https://example.com".into(),
            snippet: "Acme holds patent 11,234,567 for battery chemistry".into(),
        }];
        assert_eq!(corroboration_percent("Acme holds a patent on battery chemistry", &hits), 100);
        assert_eq!(corroboration_percent("Acme holds a patent on battery chemistry", &[]), 0);
        assert!(corroboration_percent("Zeta owns quantum lasers", &hits) < 25);
    }
}
