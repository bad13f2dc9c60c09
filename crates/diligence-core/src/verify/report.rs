//! Fact-check report model, verdict rules, and markdown rendering.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::calculate::{Calculation, CalculationOutcome, ConsistencyFinding};
use super::claims::ClaimCategory;
use super::normalize::NormalizationEntry;

/// Categorical outcome of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Proceed,
    ProceedWithCaution,
    InvestigateFurther,
    HighRisk,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Proceed => "proceed",
            Verdict::ProceedWithCaution => "proceed_with_caution",
            Verdict::InvestigateFurther => "investigate_further",
            Verdict::HighRisk => "high_risk",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence strength bands: High >= 75%, Medium 50-74%, Low 25-49%,
/// Unverifiable below 25%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
    Unverifiable,
}

impl ConfidenceBand {
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            75..=u8::MAX => ConfidenceBand::High,
            50..=74 => ConfidenceBand::Medium,
            25..=49 => ConfidenceBand::Low,
            _ => ConfidenceBand::Unverifiable,
        }
    }

    pub fn is_supporting(&self) -> bool {
        matches!(self, ConfidenceBand::High | ConfidenceBand::Medium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    WebVerified,
    NotSupported,
    LookupFailed,
    RequiresVerification,
    InternallyChecked,
    NotEligible,
}

impl ClaimStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ClaimStatus::WebVerified | ClaimStatus::InternallyChecked)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimCheck {
    pub category: ClaimCategory,
    pub text: String,
    pub status: ClaimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_percent: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_query: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchLogEntry {
    pub query: String,
    pub results_found: usize,
    pub quota_remaining: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal output of the verification engine.
#[derive(Debug, Clone, Serialize)]
pub struct FactCheckReport {
    pub run_id: String,
    pub generated_at: String,
    pub normalization_table: Vec<NormalizationEntry>,
    pub calculations: Vec<Calculation>,
    pub consistency_findings: Vec<ConsistencyFinding>,
    pub insufficient_data: Vec<String>,
    pub claims: Vec<ClaimCheck>,
    pub search_log: Vec<SearchLogEntry>,
    pub searches_used: u32,
    pub search_budget: u32,
    pub verdict: Verdict,
}

/// Applies the verdict rules, most severe first.
pub fn derive_verdict(outcome: &CalculationOutcome, claims: &[ClaimCheck]) -> Verdict {
    if outcome.any_failed() || outcome.any_contradiction() {
        return Verdict::HighRisk;
    }
    let unresolved = |high: bool| {
        claims
            .iter()
            .any(|c| c.category.is_high_priority() == high && !c.status.is_resolved())
    };
    if unresolved(true) {
        Verdict::InvestigateFurther
    } else if unresolved(false) {
        Verdict::ProceedWithCaution
    } else {
        Verdict::Proceed
    }
}

fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.4}", v)
    }
}

impl FactCheckReport {
    pub fn unresolved_claims(&self) -> impl Iterator<Item = &ClaimCheck> {
        self.claims.iter().filter(|c| !c.status.is_resolved())
    }

    fn summary_line(&self) -> String {
        let high = self
            .unresolved_claims()
            .filter(|c| c.category.is_high_priority())
            .count();
        let low = self
            .unresolved_claims()
            .filter(|c| !c.category.is_high_priority())
            .count();
        match self.verdict {
            Verdict::HighRisk => "Contradicted by internal math".to_string(),
            Verdict::InvestigateFurther => {
                format!("Requires verification: {} high-priority claim(s) unresolved", high)
            }
            Verdict::ProceedWithCaution => {
                format!("Requires verification: {} low-priority claim(s) unresolved", low)
            }
            Verdict::Proceed => "All calculations passed and all claims resolved".to_string(),
        }
    }

    /// Renders the report under its fixed section headers.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        let _ = writeln!(md, "## NORMALIZATION TABLE\n");
        if self.normalization_table.is_empty() {
            let _ = writeln!(md, "No numeric mentions found.");
        } else {
            let _ = writeln!(md, "| Original | Value | Unit | Context |");
            let _ = writeln!(md, "|---|---|---|---|");
            for e in &self.normalization_table {
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {} |",
                    e.original_text.replace('|', "\\|"),
                    fmt_value(e.normalized_value),
                    e.unit,
                    e.context_tag
                );
            }
        }

        let _ = writeln!(md, "\n## SUMMARY_DECISION\n");
        let _ = writeln!(md, "Verdict: {}", self.verdict);
        let _ = writeln!(md, "{}", self.summary_line());

        let _ = writeln!(md, "\n## KEY_FINDINGS\n");
        let mut any_finding = false;
        for c in self.calculations.iter().filter(|c| !c.passed) {
            any_finding = true;
            let _ = writeln!(md, "- Contradicted by internal math: {}", c.label);
        }
        for f in self.consistency_findings.iter().filter(|f| f.contradiction) {
            any_finding = true;
            let _ = writeln!(
                md,
                "- Contradicted by internal math: {} \"{}\" vs \"{}\"",
                f.context_tag, f.quote_a, f.quote_b
            );
        }
        for c in &self.claims {
            let line = match c.status {
                ClaimStatus::NotSupported => "Not supported by evidence",
                ClaimStatus::RequiresVerification | ClaimStatus::LookupFailed => {
                    "Requires verification"
                }
                _ => continue,
            };
            any_finding = true;
            let _ = writeln!(md, "- {}: {}", line, c.text);
        }
        if !any_finding {
            let _ = writeln!(md, "- None");
        }

        let _ = writeln!(md, "\n## CALCULATIONS\n");
        if self.calculations.is_empty() {
            let _ = writeln!(md, "- None");
        }
        for c in &self.calculations {
            let inputs = c
                .formula_inputs
                .iter()
                .map(|i| format!("{} = {} (\"{}\")", i.name, fmt_value(i.value), i.quote))
                .collect::<Vec<_>>()
                .join(", ");
            let stated = c
                .expected
                .map(|e| format!(", stated {}", fmt_value(e)))
                .unwrap_or_default();
            let _ = writeln!(
                md,
                "- {}: {} = {}{} [{}]; inputs: {}",
                c.label,
                c.formula,
                fmt_value(c.result),
                stated,
                if c.passed { "pass" } else { "fail" },
                inputs
            );
        }
        for note in &self.insufficient_data {
            let _ = writeln!(md, "- {}", note);
        }

        let _ = writeln!(md, "\n## CONSISTENCY_CHECKS\n");
        if self.consistency_findings.is_empty() {
            let _ = writeln!(md, "- None");
        }
        for f in &self.consistency_findings {
            let _ = writeln!(
                md,
                "- {}: \"{}\" vs \"{}\" [{}]",
                f.context_tag,
                f.quote_a,
                f.quote_b,
                if f.contradiction { "contradiction" } else { "consistent" }
            );
        }

        let _ = writeln!(md, "\n## SEARCH_LOG\n");
        let _ = writeln!(
            md,
            "Searches used: {} of {}",
            self.searches_used, self.search_budget
        );
        for (i, s) in self.search_log.iter().enumerate() {
            let _ = write!(
                md,
                "{}. `{}` results: {}, quota remaining: {}",
                i + 1,
                s.query,
                s.results_found,
                s.quota_remaining
            );
            if let Some(err) = &s.error {
                let _ = write!(md, ", error: {}", err);
            }
            let _ = writeln!(md);
        }

        let _ = writeln!(md, "\n## RECOMMENDATIONS\n");
        let mut any_rec = false;
        for c in self.unresolved_claims() {
            any_rec = true;
            match &c.suggested_query {
                Some(q) => {
                    let _ = writeln!(md, "- Requires verification: {} (suggested query: {})", c.text, q);
                }
                None => {
                    let _ = writeln!(md, "- Requires verification: {}", c.text);
                }
            }
        }
        for note in &self.insufficient_data {
            any_rec = true;
            let _ = writeln!(md, "- {}", note);
        }
        if !any_rec {
            let _ = writeln!(md, "- None");
        }

        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(category: ClaimCategory, status: ClaimStatus) -> ClaimCheck {
        ClaimCheck {
            category,
            text: "claim".into(),
            status,
            confidence: None,
            confidence_percent: None,
            sources: vec![],
            suggested_query: None,
        }
    }

    #[test]
    fn confidence_band_edges() {
        assert_eq!(ConfidenceBand::from_percent(100), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_percent(75), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_percent(74), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_percent(50), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_percent(49), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_percent(25), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_percent(24), ConfidenceBand::Unverifiable);
    }

    #[test]
    fn verdict_precedence() {
        let clean = CalculationOutcome::default();
        assert_eq!(derive_verdict(&clean, &[]), Verdict::Proceed);
        assert_eq!(
            derive_verdict(
                &clean,
                &[claim(ClaimCategory::Traction, ClaimStatus::NotEligible)]
            ),
            Verdict::ProceedWithCaution
        );
        assert_eq!(
            derive_verdict(
                &clean,
                &[
                    claim(ClaimCategory::Traction, ClaimStatus::NotEligible),
                    claim(ClaimCategory::MarketSizing, ClaimStatus::RequiresVerification),
                ]
            ),
            Verdict::InvestigateFurther
        );
        assert_eq!(
            derive_verdict(
                &clean,
                &[claim(ClaimCategory::MarketSizing, ClaimStatus::WebVerified)]
            ),
            Verdict::Proceed
        );

        let mut failing = CalculationOutcome::default();
        failing.consistency_findings.push(ConsistencyFinding {
            context_tag: super::super::normalize::ContextTag::Cash,
            quote_a: "$1M".into(),
            quote_b: "$2M".into(),
            value_a: 1e6,
            value_b: 2e6,
            contradiction: true,
        });
        assert_eq!(derive_verdict(&failing, &[]), Verdict::HighRisk);
    }

    #[test]
    fn markdown_has_fixed_headers_in_order() {
        let report = FactCheckReport {
            run_id: "r".into(),
            generated_at: "t".into(),
            normalization_table: vec![],
            calculations: vec![],
            consistency_findings: vec![],
            insufficient_data: vec![],
            claims: vec![],
            search_log: vec![],
            searches_used: 0,
            search_budget: 10,
            verdict: Verdict::Proceed,
        };
        let md = report.to_markdown();
        let headers = [
            "## NORMALIZATION TABLE",
            "## SUMMARY_DECISION",
            "## KEY_FINDINGS",
            "## CALCULATIONS",
            "## CONSISTENCY_CHECKS",
            "## SEARCH_LOG",
            "## RECOMMENDATIONS",
        ];
        let positions: Vec<usize> = headers.iter().map(|h| md.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(md.contains("Verdict: proceed"));
    }
}
