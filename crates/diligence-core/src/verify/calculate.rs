//! Deterministic arithmetic over normalized values.
//!
//! Every calculation reads only [`NormalizationTable`] entries, never raw
//! text. A calculation with a stated comparator passes when the computed
//! value is within a relative tolerance of the stated one; a calculation
//! with no comparator is recorded as computed and passing.

use serde::Serialize;

use super::normalize::{ContextTag, NormalizationEntry, NormalizationTable, Unit};

/// One input of a formula, with the quote it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaInput {
    pub name: String,
    pub value: f64,
    pub quote: String,
    pub span: (usize, usize),
}

impl FormulaInput {
    fn from_entry(name: &str, value: f64, entry: &NormalizationEntry) -> Self {
        Self {
            name: name.to_string(),
            value,
            quote: entry.original_text.clone(),
            span: entry.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calculation {
    pub label: String,
    pub formula: String,
    pub formula_inputs: Vec<FormulaInput>,
    pub result: f64,
    /// The value stated in the text, when there is one to check against.
    pub expected: Option<f64>,
    pub passed: bool,
}

/// Two mentions of the same quantity compared on a monthly basis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyFinding {
    pub context_tag: ContextTag,
    pub quote_a: String,
    pub quote_b: String,
    pub value_a: f64,
    pub value_b: f64,
    pub contradiction: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CalculationOutcome {
    pub calculations: Vec<Calculation>,
    pub consistency_findings: Vec<ConsistencyFinding>,
    /// "Insufficient data for ..." notes.
    pub insufficient_data: Vec<String>,
}

impl CalculationOutcome {
    pub fn any_failed(&self) -> bool {
        self.calculations.iter().any(|c| !c.passed)
    }

    pub fn any_contradiction(&self) -> bool {
        self.consistency_findings.iter().any(|f| f.contradiction)
    }

    /// Whether the entry at `span` fed any calculation.
    pub fn is_input(&self, span: (usize, usize)) -> bool {
        self.calculations
            .iter()
            .flat_map(|c| c.formula_inputs.iter())
            .any(|i| i.span == span)
    }
}

/// `|actual - expected| <= tolerance * |expected|`.
pub fn within_tolerance(actual: f64, expected: f64, tolerance: f64) -> bool {
    if expected == 0.0 {
        return actual.abs() <= f64::EPSILON;
    }
    ((actual - expected) / expected).abs() <= tolerance
}

const CONTRADICTION_TAGS: &[ContextTag] = &[
    ContextTag::BurnRate,
    ContextTag::Cash,
    ContextTag::Runway,
    ContextTag::Mrr,
    ContextTag::Arr,
    ContextTag::Cac,
    ContextTag::Ltv,
    ContextTag::ChurnRate,
    ContextTag::TeamSize,
    ContextTag::Valuation,
];

struct Calculator<'a> {
    table: &'a NormalizationTable,
    tolerance: f64,
    out: CalculationOutcome,
}

impl<'a> Calculator<'a> {
    /// First non-series entry with `tag` whose unit passes `accept`.
    fn first(&self, tag: ContextTag, accept: fn(Unit) -> bool) -> Option<&'a NormalizationEntry> {
        self.table
            .with_tag(tag)
            .find(|(idx, e)| !self.table.in_series(*idx) && accept(e.unit))
            .map(|(_, e)| e)
    }

    fn check(
        &mut self,
        label: &str,
        formula: &str,
        inputs: Vec<FormulaInput>,
        result: f64,
        expected: Option<f64>,
    ) {
        let passed = match expected {
            Some(stated) => within_tolerance(result, stated, self.tolerance),
            None => result.is_finite(),
        };
        self.out.calculations.push(Calculation {
            label: label.to_string(),
            formula: formula.to_string(),
            formula_inputs: inputs,
            result,
            expected,
            passed,
        });
    }

    fn insufficient(&mut self, what: &str, missing: &[&str]) {
        self.out.insufficient_data.push(format!(
            "Insufficient data for {} (missing {})",
            what,
            missing.join(", ")
        ));
    }

    fn runway(&mut self) {
        let cash = self.first(ContextTag::Cash, |u| u.is_currency());
        let burn = self
            .first(ContextTag::BurnRate, |u| u.is_currency())
            .filter(|b| b.monthly_value() > 0.0);
        let stated = self.first(ContextTag::Runway, |u| u == Unit::Months);

        match (cash, burn) {
            (Some(cash), Some(burn)) => {
                let monthly_burn = burn.monthly_value();
                let months = cash.normalized_value / monthly_burn;
                let mut inputs = vec![
                    FormulaInput::from_entry("cash", cash.normalized_value, cash),
                    FormulaInput::from_entry("monthly_burn", monthly_burn, burn),
                ];
                if let Some(runway) = stated {
                    inputs.push(FormulaInput::from_entry(
                        "stated_runway_months",
                        runway.normalized_value,
                        runway,
                    ));
                }
                self.check(
                    "Runway",
                    "cash / monthly_burn",
                    inputs,
                    months,
                    stated.map(|r| r.normalized_value),
                );

                if let Some(runway) = stated {
                    self.check(
                        "Cash coverage",
                        "monthly_burn * stated_runway_months",
                        vec![
                            FormulaInput::from_entry("monthly_burn", monthly_burn, burn),
                            FormulaInput::from_entry(
                                "stated_runway_months",
                                runway.normalized_value,
                                runway,
                            ),
                            FormulaInput::from_entry("cash", cash.normalized_value, cash),
                        ],
                        monthly_burn * runway.normalized_value,
                        Some(cash.normalized_value),
                    );
                }
            }
            (cash, burn) if stated.is_some() => {
                let mut missing = Vec::new();
                if cash.is_none() {
                    missing.push("cash");
                }
                if burn.is_none() {
                    missing.push("burn rate");
                }
                self.insufficient("runway calculation", &missing);
            }
            _ => {}
        }
    }

    fn growth(&mut self) {
        let table = self.table;
        let mut unmatched_rates: Vec<usize> = table
            .with_tag(ContextTag::GrowthRate)
            .filter(|(idx, e)| {
                !table.in_series(*idx) && matches!(e.unit, Unit::Decimal | Unit::Ratio)
            })
            .map(|(idx, _)| idx)
            .collect();

        for &(a, b) in &table.series {
            let old = &table.entries[a];
            let new = &table.entries[b];
            if old.normalized_value <= 0.0 || old.unit == Unit::Decimal {
                continue;
            }
            let stated_idx = unmatched_rates
                .iter()
                .position(|&i| table.entries[i].sentence == old.sentence);
            let stated = stated_idx.map(|pos| &table.entries[unmatched_rates.remove(pos)]);

            let label = format!("Growth ({})", old.context_tag);
            let mut inputs = vec![
                FormulaInput::from_entry("old", old.normalized_value, old),
                FormulaInput::from_entry("new", new.normalized_value, new),
            ];
            match stated {
                Some(rate) if rate.unit == Unit::Ratio => {
                    inputs.push(FormulaInput::from_entry("stated_multiple", rate.normalized_value, rate));
                    self.check(
                        &label,
                        "new / old",
                        inputs,
                        new.normalized_value / old.normalized_value,
                        Some(rate.normalized_value),
                    );
                }
                Some(rate) => {
                    inputs.push(FormulaInput::from_entry("stated_growth", rate.normalized_value, rate));
                    self.check(
                        &label,
                        "(new - old) / old",
                        inputs,
                        (new.normalized_value - old.normalized_value) / old.normalized_value,
                        Some(rate.normalized_value),
                    );
                }
                None => self.check(
                    &label,
                    "(new - old) / old",
                    inputs,
                    (new.normalized_value - old.normalized_value) / old.normalized_value,
                    None,
                ),
            }
        }

        if !unmatched_rates.is_empty() && table.series.is_empty() {
            self.insufficient("growth calculation", &["from/to figures"]);
        }
    }

    fn ltv_cac(&mut self) {
        let ltv = self.first(ContextTag::Ltv, |u| u.is_currency());
        let cac = self
            .first(ContextTag::Cac, |u| u.is_currency())
            .filter(|c| c.normalized_value > 0.0);
        let stated = self.first(ContextTag::LtvCacRatio, |u| u == Unit::Ratio);

        match (ltv, cac) {
            (Some(ltv), Some(cac)) => {
                let mut inputs = vec![
                    FormulaInput::from_entry("ltv", ltv.normalized_value, ltv),
                    FormulaInput::from_entry("cac", cac.normalized_value, cac),
                ];
                if let Some(ratio) = stated {
                    inputs.push(FormulaInput::from_entry("stated_ratio", ratio.normalized_value, ratio));
                }
                self.check(
                    "LTV:CAC ratio",
                    "ltv / cac",
                    inputs,
                    ltv.normalized_value / cac.normalized_value,
                    stated.map(|r| r.normalized_value),
                );
            }
            (ltv, cac) if stated.is_some() => {
                let mut missing = Vec::new();
                if ltv.is_none() {
                    missing.push("LTV");
                }
                if cac.is_none() {
                    missing.push("CAC");
                }
                self.insufficient("LTV:CAC ratio", &missing);
            }
            _ => {}
        }
    }

    fn mrr_arr(&mut self) {
        let (Some(mrr), Some(arr)) = (
            self.first(ContextTag::Mrr, |u| u.is_currency()),
            self.first(ContextTag::Arr, |u| u.is_currency()),
        ) else {
            return;
        };
        let monthly = mrr.monthly_value();
        let annual = match arr.unit {
            Unit::UsdPerMonth => arr.normalized_value * 12.0,
            _ => arr.normalized_value,
        };
        self.check(
            "MRR to ARR",
            "mrr * 12",
            vec![
                FormulaInput::from_entry("mrr", monthly, mrr),
                FormulaInput::from_entry("stated_arr", annual, arr),
            ],
            monthly * 12.0,
            Some(annual),
        );
    }

    fn market_order(&mut self) {
        let tam = self.first(ContextTag::Tam, |u| u.is_currency());
        let sam = self.first(ContextTag::Sam, |u| u.is_currency());
        let som = self.first(ContextTag::Som, |u| u.is_currency());

        let pairs = match (tam, sam, som) {
            (Some(t), Some(s), Some(o)) => vec![(("TAM", t), ("SAM", s)), (("SAM", s), ("SOM", o))],
            (Some(t), Some(s), None) => vec![(("TAM", t), ("SAM", s))],
            (Some(t), None, Some(o)) => vec![(("TAM", t), ("SOM", o))],
            (None, Some(s), Some(o)) => vec![(("SAM", s), ("SOM", o))],
            _ => Vec::new(),
        };

        for ((outer_name, outer), (inner_name, inner)) in pairs {
            if outer.normalized_value <= 0.0 {
                continue;
            }
            let share = inner.normalized_value / outer.normalized_value;
            let name_outer = outer_name.to_ascii_lowercase();
            let name_inner = inner_name.to_ascii_lowercase();
            self.out.calculations.push(Calculation {
                label: format!("{} within {}", inner_name, outer_name),
                formula: format!("{} / {} <= 1", name_inner, name_outer),
                formula_inputs: vec![
                    FormulaInput::from_entry(&name_outer, outer.normalized_value, outer),
                    FormulaInput::from_entry(&name_inner, inner.normalized_value, inner),
                ],
                result: share,
                expected: None,
                passed: share <= 1.0,
            });
        }
    }

    fn churn_plausibility(&mut self) {
        let churns: Vec<&NormalizationEntry> = self
            .table
            .with_tag(ContextTag::ChurnRate)
            .filter(|(_, e)| e.unit == Unit::Decimal)
            .map(|(_, e)| e)
            .collect();
        for churn in churns {
            let value = churn.normalized_value;
            self.out.calculations.push(Calculation {
                label: "Churn plausibility".to_string(),
                formula: "0 <= churn <= 1".to_string(),
                formula_inputs: vec![FormulaInput::from_entry("churn", value, churn)],
                result: value,
                expected: None,
                passed: (0.0..=1.0).contains(&value),
            });
        }
    }

    fn consistency(&mut self, tolerance: f64) {
        for &tag in CONTRADICTION_TAGS {
            let mentions: Vec<&NormalizationEntry> = self
                .table
                .with_tag(tag)
                .filter(|(idx, _)| !self.table.in_series(*idx))
                .map(|(_, e)| e)
                .collect();
            let Some((first, rest)) = mentions.split_first() else {
                continue;
            };
            for other in rest {
                if unit_family(first.unit) != unit_family(other.unit) {
                    continue;
                }
                let a = first.monthly_value();
                let b = other.monthly_value();
                self.out.consistency_findings.push(ConsistencyFinding {
                    context_tag: tag,
                    quote_a: first.original_text.clone(),
                    quote_b: other.original_text.clone(),
                    value_a: a,
                    value_b: b,
                    contradiction: !within_tolerance(b, a, tolerance),
                });
            }
        }
    }
}

fn unit_family(unit: Unit) -> u8 {
    match unit {
        Unit::Usd | Unit::UsdPerMonth | Unit::UsdPerYear => 0,
        Unit::Decimal => 1,
        Unit::Ratio => 2,
        Unit::Months => 3,
        Unit::Count | Unit::Number => 4,
    }
}

/// Runs every calculation and consistency check over `table`.
pub fn calculate(
    table: &NormalizationTable,
    calc_tolerance: f64,
    consistency_tolerance: f64,
) -> CalculationOutcome {
    let mut calc = Calculator {
        table,
        tolerance: calc_tolerance,
        out: CalculationOutcome::default(),
    };
    calc.runway();
    calc.growth();
    calc.ltv_cac();
    calc.mrr_arr();
    calc.market_order();
    calc.churn_plausibility();
    calc.consistency(consistency_tolerance);
    calc.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::normalize::normalize;

    fn run(text: &str) -> CalculationOutcome {
        calculate(&normalize(text), 0.10, 0.01)
    }

    #[test]
    fn runway_mismatch_fails() {
        let out = run("$500K cash, $100K/month burn, 16 months runway");
        let runway = &out.calculations[0];
        assert_eq!(runway.label, "Runway");
        assert!((runway.result - 5.0).abs() < 1e-9);
        assert_eq!(runway.expected, Some(16.0));
        assert!(!runway.passed);
        assert!(out.any_failed());
    }

    #[test]
    fn runway_within_tolerance_passes() {
        let out = run("$1.6M cash, $100K/month burn, 16 months runway");
        assert!(out.calculations.iter().all(|c| c.passed), "{:?}", out.calculations);
    }

    #[test]
    fn stated_runway_without_inputs_is_insufficient() {
        let out = run("We have 18 months runway");
        assert!(out.calculations.is_empty());
        assert_eq!(out.insufficient_data.len(), 1);
        assert!(out.insufficient_data[0].starts_with("Insufficient data for runway calculation"));
    }

    #[test]
    fn growth_checked_against_stated_rate() {
        let out = run("ARR grew from $1M to $3M, a 200% increase");
        let growth = out
            .calculations
            .iter()
            .find(|c| c.label.starts_with("Growth"))
            .unwrap();
        assert!((growth.result - 2.0).abs() < 1e-9);
        assert!(growth.passed);

        let out = run("ARR grew from $1M to $3M, a 150% increase");
        assert!(out.any_failed());
    }

    #[test]
    fn ltv_cac_ratio() {
        let out = run("LTV of $900, CAC of $300, LTV:CAC of 5:1");
        let ratio = out.calculations.iter().find(|c| c.label == "LTV:CAC ratio").unwrap();
        assert!((ratio.result - 3.0).abs() < 1e-9);
        assert!(!ratio.passed);
    }

    #[test]
    fn mrr_times_twelve() {
        let out = run("MRR of $100K, ARR of $1.2M");
        assert_eq!(out.calculations.len(), 1);
        assert!(out.calculations[0].passed);
    }

    #[test]
    fn market_sizing_order() {
        let out = run("TAM of $1B; SAM of $5B; SOM of $50M");
        let labels: Vec<(&str, bool)> = out
            .calculations
            .iter()
            .map(|c| (c.label.as_str(), c.passed))
            .collect();
        assert_eq!(labels, vec![("SAM within TAM", false), ("SOM within SAM", true)]);
    }

    #[test]
    fn implausible_churn() {
        let out = run("churn rate of 120%");
        assert!(out.any_failed());
    }

    #[test]
    fn contradicting_burn_mentions() {
        let out = run("Our burn rate is $45K/month. Finance later reported burn of $52K monthly.");
        assert_eq!(out.consistency_findings.len(), 1);
        let f = &out.consistency_findings[0];
        assert_eq!(f.context_tag, ContextTag::BurnRate);
        assert_eq!(f.quote_a, "$45K/month");
        assert_eq!(f.quote_b, "$52K monthly");
        assert!(f.contradiction);
    }

    #[test]
    fn yearly_and_monthly_burn_agree() {
        let out = run("Burn is $50K/month. Annual burn of $600K per year.");
        assert_eq!(out.consistency_findings.len(), 1);
        assert!(!out.consistency_findings[0].contradiction);
    }

    #[test]
    fn leading_annual_qualifier_is_not_a_contradiction() {
        let out = run("Our burn rate is $45K/month. Annual burn is $540K.");
        assert_eq!(out.consistency_findings.len(), 1);
        assert!(!out.consistency_findings[0].contradiction);
        assert!(!out.any_failed());
    }

    #[test]
    fn runway_from_leading_annual_burn() {
        let out = run("$1M cash, annual burn of $1.2M, 10 months runway");
        let runway = &out.calculations[0];
        assert_eq!(runway.label, "Runway");
        assert!((runway.result - 10.0).abs() < 1e-9);
        assert!(runway.passed);
    }

    #[test]
    fn calculation_inputs_are_tracked() {
        let table = normalize("$500K cash, $100K/month burn");
        let out = calculate(&table, 0.10, 0.01);
        assert!(table.entries.iter().all(|e| out.is_input(e.span)));
    }
}
