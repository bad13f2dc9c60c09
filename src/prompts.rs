//! Instruction templates for every inference task.
//!
//! Wording is interchangeable; the markers other code relies on are
//! `Page number: N` in page prompts and `EXTRACTED PAGE DATA` in the
//! consolidation instruction.

use diligence_core::TextKind;

pub const EXTRACTION_RULES: &str = "\
Extract information exactly as stated. Do not assess, recommend, or infer \
facts that are not present. Preserve every number with its unit, period, and \
surrounding context. Quote key statements verbatim. Note information a \
diligence reviewer would expect but that is missing.";

/// Per-page extraction over the page text and, when attached, its image.
pub fn page_instruction(page_number: u32, page_text: &str) -> String {
    let text = if page_text.trim().is_empty() {
        "(no extractable text on this page; rely on the image)"
    } else {
        page_text
    };
    format!(
        "You extract data from one page of a startup document for downstream analysts.\n\
         {rules}\n\n\
         Page number: {page_number}\n\n\
         Report, for this page only: headings and body text; every figure in tables, \
         charts, and graphs with axis labels and periods; names, titles, and \
         organizations; and any visual element that carries information (logos of \
         customers or partners, diagrams, screenshots).\n\n\
         PAGE TEXT:\n{text}",
        rules = EXTRACTION_RULES,
    )
}

/// Consolidation of per-page extractions into one corpus.
pub const CONSOLIDATION_INSTRUCTION: &str = "\
You compile per-page extractions of one startup document into a single \
structured corpus for downstream analysts. Compile, do not interpret: keep every \
data point, number, name, and quote; merge duplicates; keep page references for \
figures; do not evaluate or recommend.\n\n\
Organize under: COMPANY, TEAM, PRODUCT, MARKET, TRACTION, FINANCIALS, FUNDING, \
COMPETITION, RISKS STATED, MISSING INFORMATION.\n\n\
EXTRACTED PAGE DATA:";

/// Whole-text extraction for email threads and call transcripts.
pub fn text_instruction(kind: TextKind) -> String {
    let focus = match kind {
        TextKind::Email => {
            "sender and recipients, dates, business updates with figures, customer and \
             product news, team changes, fundraising asks, and stated next steps"
        }
        TextKind::CallTranscript => {
            "participants and roles, questions asked and the answers given, every figure \
             mentioned with its speaker, commitments, concerns raised, and follow-ups"
        }
    };
    format!(
        "You extract information from a founder {label} for downstream analysts.\n\
         {rules}\n\n\
         Cover: {focus}.\n\n\
         RAW {upper}:",
        label = kind.label(),
        rules = EXTRACTION_RULES,
        focus = focus,
        upper = kind.label().to_uppercase(),
    )
}

pub const REVENUE_LENS: &str = "\
You identify revenue streams exactly as the startup states them. List the \
primary revenue model, each stream with its type and stated figures, the \
revenue mix if given (else \"Not specified\"), recurring versus one-time \
patterns, and scalability claims. Close with INFORMATION GAPS.\n\nSTARTUP DATA:";

pub const PRICING_LENS: &str = "\
You extract pricing exactly as the startup presents it. List the pricing model, \
every tier or price point with included features, customer segments per tier, \
discounts and contract terms, and stated competitive pricing claims. Close with \
INFORMATION GAPS.\n\nSTARTUP DATA:";

pub const MONETIZATION_LENS: &str = "\
You extract the monetization pipeline exactly as stated: acquisition channels, \
conversion steps and rates, sales cycle, CAC, LTV, payback, retention and churn, \
expansion revenue, and unit economics. Report figures as given. Close with \
INFORMATION GAPS.\n\nSTARTUP DATA:";

pub const ECONOMICS_REPORT: &str = "\
You write an investor-facing economics report from the three analyses below \
(revenue streams, pricing strategy, monetization pipeline). Attribute every \
figure to the startup (\"The startup states ...\"). Sections: EXECUTIVE SUMMARY, \
REVENUE MODEL, PRICING, MONETIZATION AND UNIT ECONOMICS, CONSISTENCY ACROSS \
ANALYSES, INFORMATION GAPS, QUESTIONS FOR THE FOUNDERS. If an analysis is marked \
unavailable, say so and work from the others.\n\nANALYSES:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_instruction_carries_page_marker() {
        let p = page_instruction(7, "Revenue grew 40%");
        assert!(p.contains("Page number: 7"));
        assert!(p.contains("Revenue grew 40%"));
        assert!(page_instruction(1, "  ").contains("no extractable text"));
    }

    #[test]
    fn text_instruction_names_the_kind() {
        assert!(text_instruction(TextKind::Email).contains("founder email"));
        assert!(text_instruction(TextKind::CallTranscript).contains("RAW CALL TRANSCRIPT:"));
    }
}
