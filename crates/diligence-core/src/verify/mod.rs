//! Fact-check verification engine.
//!
//! A verification run moves strictly forward through four phases, each a
//! distinct type so the order cannot be violated:
//!
//! ```text
//! Normalizing ──normalize()──▶ Calculating ──calculate()──▶ ExternalVerifying ──lookup()──▶ Concluded
//! ```
//!
//! - [`Normalizing`] holds the raw text and produces the normalization
//!   table and the sentence-level claims.
//! - [`Calculating`] sees only normalized values. It runs the arithmetic
//!   checks and marks claims resolved by them as internally checked.
//! - [`ExternalVerifying`] spends the [`SearchQuota`] on the remaining
//!   high-priority claims, one consolidated query per batch. Once the quota
//!   is spent the rest are marked "requires verification".
//! - [`Concluded`] derives the verdict and yields the [`FactCheckReport`].
//!
//! [`VerificationEngine`] runs the whole chain for one text.

pub mod calculate;
pub mod claims;
pub mod normalize;
pub mod quota;
pub mod report;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::InferenceClient;

pub use calculate::{Calculation, CalculationOutcome, ConsistencyFinding, FormulaInput};
pub use claims::{Claim, ClaimCategory};
pub use normalize::{ContextTag, NormalizationEntry, NormalizationTable, Unit};
pub use quota::{QuotaExhausted, SearchQuota};
pub use report::{
    ClaimCheck, ClaimStatus, ConfidenceBand, FactCheckReport, SearchLogEntry, Verdict,
};

/// Tunables for one verification run.
#[derive(Debug, Clone)]
pub struct VerificationSettings {
    /// Maximum external lookups per run.
    pub search_quota: u32,
    /// Relative tolerance for calculations against stated values.
    pub calc_tolerance: f64,
    /// Relative tolerance between two mentions of the same quantity.
    pub consistency_tolerance: f64,
    pub claims_per_query: usize,
    /// When false no lookup is dispatched and the quota is untouched.
    pub search_enabled: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            search_quota: 10,
            calc_tolerance: 0.10,
            consistency_tolerance: 0.01,
            claims_per_query: 3,
            search_enabled: true,
        }
    }
}

/// Phase 1: raw text in hand.
pub struct Normalizing<'t> {
    text: &'t str,
}

impl<'t> Normalizing<'t> {
    pub fn new(text: &'t str) -> Self {
        Self { text }
    }

    pub fn normalize(self) -> Calculating {
        let table = normalize::normalize(self.text);
        let claims = claims::extract_claims(self.text, &table);
        debug!(
            mentions = table.len(),
            claims = claims.len(),
            "normalization complete"
        );
        Calculating { table, claims }
    }
}

/// Phase 2: normalized values only; the raw text is gone.
pub struct Calculating {
    table: NormalizationTable,
    claims: Vec<Claim>,
}

impl Calculating {
    pub fn table(&self) -> &NormalizationTable {
        &self.table
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn calculate(self, calc_tolerance: f64, consistency_tolerance: f64) -> ExternalVerifying {
        let outcome = calculate::calculate(&self.table, calc_tolerance, consistency_tolerance);

        let checks: Vec<ClaimCheck> = self
            .claims
            .iter()
            .map(|claim| {
                let internal = !claim.mention_spans.is_empty()
                    && claim.mention_spans.iter().all(|s| outcome.is_input(*s));
                let status = if internal {
                    ClaimStatus::InternallyChecked
                } else if claim.category.is_high_priority() {
                    ClaimStatus::RequiresVerification
                } else {
                    ClaimStatus::NotEligible
                };
                ClaimCheck {
                    category: claim.category,
                    text: claim.text.clone(),
                    status,
                    confidence: None,
                    confidence_percent: None,
                    sources: Vec::new(),
                    suggested_query: None,
                }
            })
            .collect();

        let mut pending: Vec<usize> = checks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == ClaimStatus::RequiresVerification)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| self.claims[i].category);

        debug!(
            calculations = outcome.calculations.len(),
            failed = outcome.calculations.iter().filter(|c| !c.passed).count(),
            contradictions = outcome.consistency_findings.iter().filter(|f| f.contradiction).count(),
            pending_claims = pending.len(),
            "calculation complete"
        );

        ExternalVerifying {
            table: self.table,
            outcome,
            claims: self.claims,
            checks,
            pending,
            search_log: Vec::new(),
            searches_used: 0,
        }
    }
}

/// Phase 3: high-priority claims awaiting lookups.
pub struct ExternalVerifying {
    table: NormalizationTable,
    outcome: CalculationOutcome,
    claims: Vec<Claim>,
    checks: Vec<ClaimCheck>,
    pending: Vec<usize>,
    search_log: Vec<SearchLogEntry>,
    searches_used: u32,
}

impl ExternalVerifying {
    pub fn outcome(&self) -> &CalculationOutcome {
        &self.outcome
    }

    /// Number of claims eligible for a lookup.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn defer(&mut self, idx: usize) {
        let check = &mut self.checks[idx];
        check.status = ClaimStatus::RequiresVerification;
        check.suggested_query = Some(claims::suggested_query(&self.claims[idx]));
    }

    /// Looks up pending claims in priority order, batched per category.
    ///
    /// Every dispatched lookup costs exactly one unit of `quota`, whether
    /// it succeeds or not. With `search` absent nothing is dispatched.
    pub async fn lookup(
        mut self,
        search: Option<&dyn InferenceClient>,
        quota: &SearchQuota,
        claims_per_query: usize,
    ) -> Concluded {
        let pending = std::mem::take(&mut self.pending);

        let Some(client) = search else {
            for idx in pending {
                self.defer(idx);
            }
            return self.finish(quota);
        };

        let per_query = claims_per_query.max(1);
        let mut batches: Vec<Vec<usize>> = Vec::new();
        for idx in pending {
            let category = self.claims[idx].category;
            let fits = batches.last().map_or(false, |batch| {
                batch.len() < per_query && self.claims[batch[0]].category == category
            });
            if let (true, Some(batch)) = (fits, batches.last_mut()) {
                batch.push(idx);
                continue;
            }
            batches.push(vec![idx]);
        }

        let mut exhausted = false;
        for batch in batches {
            if exhausted {
                batch.into_iter().for_each(|idx| self.defer(idx));
                continue;
            }
            let remaining = match quota.try_acquire() {
                Ok(remaining) => remaining,
                Err(e) => {
                    info!(max = e.max, "search quota exhausted; remaining claims require verification");
                    exhausted = true;
                    batch.into_iter().for_each(|idx| self.defer(idx));
                    continue;
                }
            };
            self.searches_used += 1;

            let category = self.claims[batch[0]].category;
            let members: Vec<&Claim> = batch.iter().map(|&i| &self.claims[i]).collect();
            let query = claims::build_query(category, &members);
            debug!(query = %query, remaining, "dispatching lookup");

            match client.search(&query).await {
                Ok(hits) => {
                    let sources: Vec<String> = hits.iter().map(|h| h.url.clone()).collect();
                    for &idx in &batch {
                        let percent = claims::corroboration_percent(&self.claims[idx].text, &hits);
                        let band = ConfidenceBand::from_percent(percent);
                        let check = &mut self.checks[idx];
                        check.status = if band.is_supporting() {
                            ClaimStatus::WebVerified
                        } else {
                            ClaimStatus::NotSupported
                        };
                        check.confidence = Some(band);
                        check.confidence_percent = Some(percent);
                        check.sources = sources.iter().take(3).cloned().collect();
                    }
                    self.search_log.push(SearchLogEntry {
                        query,
                        results_found: hits.len(),
                        quota_remaining: remaining,
                        sources,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "lookup failed");
                    for &idx in &batch {
                        let check = &mut self.checks[idx];
                        check.status = ClaimStatus::LookupFailed;
                        check.suggested_query = Some(claims::suggested_query(&self.claims[idx]));
                    }
                    self.search_log.push(SearchLogEntry {
                        query,
                        results_found: 0,
                        quota_remaining: remaining,
                        sources: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.finish(quota)
    }

    fn finish(self, quota: &SearchQuota) -> Concluded {
        Concluded {
            table: self.table,
            outcome: self.outcome,
            checks: self.checks,
            search_log: self.search_log,
            searches_used: self.searches_used,
            search_budget: quota.max(),
        }
    }
}

/// Phase 4: everything known; only the verdict remains.
pub struct Concluded {
    table: NormalizationTable,
    outcome: CalculationOutcome,
    checks: Vec<ClaimCheck>,
    search_log: Vec<SearchLogEntry>,
    searches_used: u32,
    search_budget: u32,
}

impl Concluded {
    pub fn conclude(self) -> FactCheckReport {
        let verdict = report::derive_verdict(&self.outcome, &self.checks);
        FactCheckReport {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            normalization_table: self.table.entries,
            calculations: self.outcome.calculations,
            consistency_findings: self.outcome.consistency_findings,
            insufficient_data: self.outcome.insufficient_data,
            claims: self.checks,
            search_log: self.search_log,
            searches_used: self.searches_used,
            search_budget: self.search_budget,
            verdict,
        }
    }
}

/// Runs the four verification phases for one text.
#[derive(Clone)]
pub struct VerificationEngine {
    client: Arc<dyn InferenceClient>,
    settings: VerificationSettings,
    shared_quota: Option<Arc<SearchQuota>>,
}

impl VerificationEngine {
    pub fn new(client: Arc<dyn InferenceClient>, settings: VerificationSettings) -> Self {
        Self {
            client,
            settings,
            shared_quota: None,
        }
    }

    /// Draws every run's lookups from one shared budget instead of a fresh
    /// per-run quota.
    pub fn with_shared_quota(mut self, quota: Arc<SearchQuota>) -> Self {
        self.shared_quota = Some(quota);
        self
    }

    pub fn settings(&self) -> &VerificationSettings {
        &self.settings
    }

    pub async fn verify(&self, text: &str) -> FactCheckReport {
        let quota = self
            .shared_quota
            .clone()
            .unwrap_or_else(|| Arc::new(SearchQuota::new(self.settings.search_quota)));
        let search = self.settings.search_enabled.then(|| self.client.as_ref());

        let report = Normalizing::new(text)
            .normalize()
            .calculate(self.settings.calc_tolerance, self.settings.consistency_tolerance)
            .lookup(search, &quota, self.settings.claims_per_query)
            .await
            .conclude();

        info!(
            verdict = %report.verdict,
            mentions = report.normalization_table.len(),
            searches = report.searches_used,
            "verification complete"
        );
        report
    }
}
