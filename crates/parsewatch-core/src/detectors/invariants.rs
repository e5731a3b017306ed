//! Invariant Checker
//!
//! **Question**: Is every extraction well-formed, grounded in its journal,
//! and self-consistent?
//!
//! These are hard constraints: any failed check means rollback. There is no
//! human-review middle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::{find_contradictions, ground, Grounding};
use crate::policy::{InvariantThresholds, Policy};
use crate::types::{
    percentage, share_at_least, share_at_most, Action, CheckResult, CheckStatus, ExtractedItem,
    JournalSet, MonitorInputs, ParserOutputSet,
};

use super::{Detector, DetectorKind, Samples};

/// The four invariant checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantChecks {
    pub schema_validity: CheckResult,
    pub evidence_validity: CheckResult,
    pub hallucination_rate: CheckResult,
    pub contradiction_rate: CheckResult,
}

impl InvariantChecks {
    pub fn all(&self) -> [&CheckResult; 4] {
        [
            &self.schema_validity,
            &self.evidence_validity,
            &self.hallucination_rate,
            &self.contradiction_rate,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantSummary {
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub total_checks: usize,
}

/// Result of checking one parser run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub timestamp: DateTime<Utc>,
    pub overall_status: CheckStatus,
    pub final_recommended_action: Action,
    pub total_items_checked: usize,
    pub total_journals_checked: usize,
    pub checks: InvariantChecks,
    pub summary: InvariantSummary,
}

impl InvariantReport {
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.all().into_iter().filter(|c| !c.status.is_pass())
    }
}

/// Validates schema, evidence grounding and consistency of one parser run.
pub struct InvariantChecker {
    thresholds: InvariantThresholds,
    max_samples: usize,
}

impl InvariantChecker {
    pub fn new(policy: &Policy) -> Self {
        Self {
            thresholds: policy.invariants.clone(),
            max_samples: policy.reporting.max_samples,
        }
    }

    /// Check every item of `candidate` against `journals`.
    pub fn check(&self, candidate: &ParserOutputSet, journals: &JournalSet) -> InvariantReport {
        let schema_validity = self.check_schema(candidate, journals);
        let (evidence_validity, hallucination_rate) = self.check_evidence(candidate, journals);
        let contradiction_rate = self.check_contradictions(candidate);

        let checks = InvariantChecks {
            schema_validity,
            evidence_validity,
            hallucination_rate,
            contradiction_rate,
        };

        let passed_checks = checks.all().iter().filter(|c| c.status.is_pass()).count();
        let total_checks = checks.all().len();
        let overall_status = CheckStatus::from_pass(passed_checks == total_checks);
        let final_recommended_action = if overall_status.is_pass() {
            Action::Deploy
        } else {
            Action::Rollback
        };

        tracing::debug!(
            label = %candidate.label,
            passed = passed_checks,
            failed = total_checks - passed_checks,
            "Invariant checks complete"
        );

        InvariantReport {
            timestamp: Utc::now(),
            overall_status,
            final_recommended_action,
            total_items_checked: candidate.item_count(),
            total_journals_checked: candidate.records.len(),
            checks,
            summary: InvariantSummary {
                passed_checks,
                failed_checks: total_checks - passed_checks,
                total_checks,
            },
        }
    }

    /// Problems with one item, in field order. Empty when the item is valid.
    fn schema_errors(&self, item: &ExtractedItem) -> Vec<String> {
        let mut errors = Vec::new();

        match &item.domain {
            None => errors.push("missing_or_empty_field: domain".to_string()),
            Some(d) if !d.is_valid() => errors.push(format!("invalid_domain: {}", d)),
            Some(_) => {}
        }

        if item.item_name.as_deref().map_or(true, |s| s.trim().is_empty()) {
            errors.push("missing_or_empty_field: item_name".to_string());
        }

        match &item.polarity {
            None => errors.push("missing_or_empty_field: polarity".to_string()),
            Some(p) if !p.is_valid() => errors.push(format!("invalid_polarity: {}", p)),
            Some(_) => {}
        }

        match &item.intensity {
            None if self.thresholds.require_intensity => {
                errors.push("missing_or_empty_field: intensity".to_string())
            }
            Some(i) if !i.is_valid() => errors.push(format!("invalid_intensity: {}", i)),
            _ => {}
        }

        if item.evidence().trim().is_empty() {
            errors.push("missing_or_empty_field: evidence_span".to_string());
        }

        errors
    }

    fn check_schema(&self, candidate: &ParserOutputSet, journals: &JournalSet) -> CheckResult {
        let mut samples = Samples::new(self.max_samples);
        let mut total = 0;
        let mut valid = 0;

        for (journal_id, record) in &candidate.records {
            let known = journals.contains_key(journal_id);
            if !known && record.items.is_empty() {
                // Counted like a malformed record: one failing unit
                total += 1;
                samples.push(|| format!("journal_id={}: unknown journal_id", journal_id));
                continue;
            }
            for (index, item) in record.items.iter().enumerate() {
                total += 1;
                let mut errors = self.schema_errors(item);
                if !known {
                    errors.insert(0, "unknown journal_id".to_string());
                }
                if errors.is_empty() {
                    valid += 1;
                } else {
                    samples.push(|| {
                        format!("journal_id={} item={}: {}", journal_id, index, errors.join(", "))
                    });
                }
            }
        }

        for malformed in &candidate.malformed {
            total += malformed.failing_units();
            samples.push(|| {
                format!(
                    "line {} (journal_id={}): {}",
                    malformed.line,
                    malformed.journal_id.as_deref().unwrap_or("?"),
                    malformed.reason
                )
            });
        }

        let min = self.thresholds.schema_validity_min;
        CheckResult {
            name: "schema_validity".to_string(),
            status: CheckStatus::from_pass(share_at_least(valid, total, min)),
            observed_value: percentage(valid, total, 100.0),
            threshold: self.thresholds.schema_validity_min,
            detail: format!("{} of {} items schema-valid", valid, total),
            samples: samples.kept,
        }
    }

    fn check_evidence(
        &self,
        candidate: &ParserOutputSet,
        journals: &JournalSet,
    ) -> (CheckResult, CheckResult) {
        let mut invalid_samples = Samples::new(self.max_samples);
        let mut fabricated_samples = Samples::new(self.max_samples);
        let (mut grounded, mut paraphrased, mut fabricated) = (0, 0, 0);

        for (journal_id, record) in &candidate.records {
            let text = journals.get(journal_id).map(|j| j.text.as_str());
            for item in &record.items {
                match ground(item.evidence(), text) {
                    Grounding::Grounded => grounded += 1,
                    Grounding::Paraphrased => {
                        paraphrased += 1;
                        invalid_samples.push(|| {
                            format!("journal_id={}: '{}' not verbatim", journal_id, item.evidence())
                        });
                    }
                    Grounding::Fabricated => {
                        fabricated += 1;
                        let sample = || {
                            format!(
                                "journal_id={}: '{}' not in journal",
                                journal_id,
                                item.evidence()
                            )
                        };
                        invalid_samples.push(sample);
                        fabricated_samples.push(sample);
                    }
                }
            }
        }

        let total = grounded + paraphrased + fabricated;
        let validity_min = self.thresholds.evidence_validity_min;
        let hallucination_max = self.thresholds.hallucination_rate_max;

        let evidence_validity = CheckResult {
            name: "evidence_validity".to_string(),
            status: CheckStatus::from_pass(share_at_least(grounded, total, validity_min)),
            observed_value: percentage(grounded, total, 100.0),
            threshold: self.thresholds.evidence_validity_min,
            detail: format!(
                "{} of {} items grounded verbatim ({} paraphrased, {} fabricated)",
                grounded, total, paraphrased, fabricated
            ),
            samples: invalid_samples.kept,
        };

        let hallucination_rate = CheckResult {
            name: "hallucination_rate".to_string(),
            status: CheckStatus::from_pass(share_at_most(fabricated, total, hallucination_max)),
            observed_value: percentage(fabricated, total, 0.0),
            threshold: hallucination_max,
            detail: format!(
                "{} of {} items have fabricated or missing evidence",
                fabricated, total
            ),
            samples: fabricated_samples.kept,
        };

        (evidence_validity, hallucination_rate)
    }

    /// Contradictions are grouped per record: the same words in two journals
    /// are two different pieces of evidence.
    fn check_contradictions(&self, candidate: &ParserOutputSet) -> CheckResult {
        let mut samples = Samples::new(self.max_samples);
        let mut count = 0;
        let mut groups = 0;

        for (journal_id, record) in &candidate.records {
            let (found, group_count) = find_contradictions(&record.items);
            groups += group_count;
            count += found.len();
            for c in &found {
                samples.push(|| {
                    format!(
                        "journal_id={}: '{}' asserted as {}",
                        journal_id,
                        c.evidence_span,
                        c.polarities.join(" and ")
                    )
                });
            }
        }

        CheckResult {
            name: "contradiction_rate".to_string(),
            status: CheckStatus::from_pass(count <= self.thresholds.contradictions_max),
            observed_value: count as f64,
            threshold: self.thresholds.contradictions_max as f64,
            detail: format!(
                "{} contradicting evidence groups out of {} ({}%)",
                count,
                groups,
                percentage(count, groups, 0.0)
            ),
            samples: samples.kept,
        }
    }
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new(&Policy::default())
    }
}

impl Detector for InvariantChecker {
    type Report = InvariantReport;

    fn kind(&self) -> DetectorKind {
        DetectorKind::Invariants
    }

    /// Canary journals missing from the main set are checked too; the main
    /// text wins for ids present in both.
    fn run(&self, inputs: &MonitorInputs) -> InvariantReport {
        let extra: Vec<_> = inputs
            .canary_journals
            .iter()
            .filter(|(id, _)| !inputs.journals.contains_key(*id))
            .collect();
        if extra.is_empty() {
            return self.check(&inputs.candidate, &inputs.journals);
        }

        tracing::debug!(count = extra.len(), "Including canary-only journals");
        let mut journals = inputs.journals.clone();
        journals.extend(extra.into_iter().map(|(id, j)| (id.clone(), j.clone())));
        self.check(&inputs.candidate, &journals)
    }
}
