//! Canary Evaluator
//!
//! **Question**: Does the candidate agree with hand labels where they exist?
//!
//! The canary set is small and open-ended: gold labels say what is certainly
//! in a journal, not everything that is. So the evaluator only scores what it
//! can verify (grounded evidence, polarity of items both sides found, and
//! self-consistency). There is no recall or precision metric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::{find_contradictions, ground, normalize, Grounding};
use crate::policy::{CanaryThresholds, Policy};
use crate::types::{
    percentage, round2, share_at_least, Action, AlertLevel, CheckResult, CheckStatus, Domain,
    ExtractedItem, GoldSet, JournalSet, MonitorInputs, ParserOutputSet, Polarity,
};

use super::{Detector, DetectorKind, Samples};

/// What a triggered condition does to the alert level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionEffect {
    Rollback,
    HumanReview,
}

/// A canary threshold that was breached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryCondition {
    pub name: String,
    pub effect: ConditionEffect,
    pub message: String,
}

impl CanaryCondition {
    pub const CONTRADICTIONS: &'static str = "contradictions";
    pub const EVIDENCE_VALIDITY_SEVERE: &'static str = "evidence_validity_severe";
    pub const EVIDENCE_VALIDITY: &'static str = "evidence_validity";
    pub const POLARITY_CORRECTNESS: &'static str = "polarity_correctness";

    /// ROLLBACK if any condition forces it, PASS if none triggered, else
    /// HUMAN_REVIEW.
    pub fn alert_level(conditions: &[CanaryCondition]) -> AlertLevel {
        if conditions.iter().any(|c| c.effect == ConditionEffect::Rollback) {
            AlertLevel::Rollback
        } else if conditions.is_empty() {
            AlertLevel::Pass
        } else {
            AlertLevel::HumanReview
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetrics {
    pub evidence_validity: CheckResult,
    pub polarity_correctness: CheckResult,
    pub contradiction_count: CheckResult,
    pub total_predicted_items: usize,
    pub total_gold_items: usize,
    pub total_matched_items: usize,
    pub unmatched_predicted_items: usize,
    pub unmatched_gold_items: usize,
}

/// Per-journal breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryJournalDetail {
    pub journal_id: String,
    pub predicted_items: usize,
    pub gold_items: usize,
    pub matched: usize,
    pub unmatched_predicted: usize,
    pub unmatched_gold: usize,
    pub polarity_mismatches: usize,
    pub evidence_validity: f64,
    pub contradictions: usize,
    pub status: CheckStatus,
}

/// Result of scoring one parser run against the gold set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryReport {
    pub timestamp: DateTime<Utc>,
    pub candidate_label: String,
    pub canary_journals_evaluated: usize,
    pub alert_level: AlertLevel,
    pub recommended_action: Action,
    pub metrics: CanaryMetrics,
    pub conditions: Vec<CanaryCondition>,
    pub reasoning: String,
    pub details: Vec<CanaryJournalDetail>,
    pub thresholds_used: CanaryThresholds,
}

impl CanaryReport {
    pub fn rollback_conditions(&self) -> impl Iterator<Item = &CanaryCondition> {
        self.conditions
            .iter()
            .filter(|c| c.effect == ConditionEffect::Rollback)
    }

    pub fn review_conditions(&self) -> impl Iterator<Item = &CanaryCondition> {
        self.conditions
            .iter()
            .filter(|c| c.effect == ConditionEffect::HumanReview)
    }
}

/// Headline canary numbers for one parser version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryVersionSummary {
    pub label: String,
    pub alert_level: AlertLevel,
    pub evidence_validity: f64,
    pub polarity_correctness: f64,
    pub matched: usize,
    pub unmatched_predicted: usize,
    pub unmatched_gold: usize,
    pub contradictions: usize,
}

impl From<&CanaryReport> for CanaryVersionSummary {
    fn from(report: &CanaryReport) -> Self {
        let m = &report.metrics;
        Self {
            label: report.candidate_label.clone(),
            alert_level: report.alert_level,
            evidence_validity: m.evidence_validity.observed_value,
            polarity_correctness: m.polarity_correctness.observed_value,
            matched: m.total_matched_items,
            unmatched_predicted: m.unmatched_predicted_items,
            unmatched_gold: m.unmatched_gold_items,
            contradictions: m.contradiction_count.observed_value as usize,
        }
    }
}

/// Candidate minus baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryDelta {
    pub evidence_validity: f64,
    pub polarity_correctness: f64,
    pub matched: i64,
    pub unmatched_predicted: i64,
    pub unmatched_gold: i64,
    pub contradictions: i64,
}

/// Two parser versions scored against the same gold set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryComparison {
    pub timestamp: DateTime<Utc>,
    pub baseline: CanaryVersionSummary,
    pub candidate: CanaryVersionSummary,
    pub delta: CanaryDelta,
    pub baseline_details: Vec<CanaryJournalDetail>,
    pub candidate_details: Vec<CanaryJournalDetail>,
}

/// Match key: domain plus normalized evidence.
type MatchKey = (Option<Domain>, String);

fn match_key(item: &ExtractedItem) -> Option<MatchKey> {
    let evidence = normalize(item.evidence());
    if evidence.is_empty() {
        return None;
    }
    Some((item.domain.clone(), evidence))
}

/// Polarity with legacy spellings folded in.
fn canonical_polarity(polarity: &Polarity) -> String {
    if polarity.is_present_like() {
        "present".to_string()
    } else if polarity.is_absent_like() {
        "absent".to_string()
    } else if polarity.is_uncertain_like() {
        "unknown".to_string()
    } else {
        polarity.as_str().to_lowercase()
    }
}

fn same_polarity(a: Option<&Polarity>, b: Option<&Polarity>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => canonical_polarity(a) == canonical_polarity(b),
        _ => false,
    }
}

/// Totals over every evaluated journal.
#[derive(Default)]
struct Tally {
    predicted: usize,
    gold: usize,
    grounded: usize,
    matched: usize,
    agreeing: usize,
    contradictions: usize,
}

impl Tally {
    fn evidence_at_least(&self, min_percent: f64) -> bool {
        share_at_least(self.grounded, self.predicted, min_percent)
    }

    fn polarity_at_least(&self, min_percent: f64) -> bool {
        share_at_least(self.agreeing, self.matched, min_percent)
    }
}

/// Scores a parser run against the hand-labelled canary set.
pub struct CanaryEvaluator {
    thresholds: CanaryThresholds,
    max_samples: usize,
}

impl CanaryEvaluator {
    pub fn new(policy: &Policy) -> Self {
        Self {
            thresholds: policy.canary.clone(),
            max_samples: policy.reporting.max_samples,
        }
    }

    /// Score `candidate` on every journal of `gold`, in journal id order.
    ///
    /// Records for journals outside the gold set are ignored. A gold journal
    /// the candidate has no record for counts as zero predicted items.
    pub fn evaluate(
        &self,
        candidate: &ParserOutputSet,
        gold: &GoldSet,
        canary_journals: &JournalSet,
    ) -> CanaryReport {
        let mut tally = Tally::default();
        let mut details = Vec::with_capacity(gold.len());
        let mut evidence_samples = Samples::new(self.max_samples);
        let mut polarity_samples = Samples::new(self.max_samples);
        let mut contradiction_samples = Samples::new(self.max_samples);

        for (journal_id, gold_record) in gold {
            let predicted: &[ExtractedItem] = candidate
                .records
                .get(journal_id)
                .map(|r| r.items.as_slice())
                .unwrap_or_default();
            let text = canary_journals.get(journal_id).map(|j| j.text.as_str());
            if text.is_none() {
                tracing::warn!(journal_id = %journal_id, "Gold journal has no canary journal text");
            }

            let mut grounded = 0;
            for item in predicted {
                if ground(item.evidence(), text) == Grounding::Grounded {
                    grounded += 1;
                } else {
                    evidence_samples.push(|| {
                        format!("journal_id={}: '{}' not in journal", journal_id, item.evidence())
                    });
                }
            }

            // One-to-one: each gold item is consumed by at most one prediction
            let gold_keys: Vec<Option<MatchKey>> =
                gold_record.items.iter().map(match_key).collect();
            let mut consumed = vec![false; gold_keys.len()];
            let (mut matched, mut agreeing) = (0, 0);

            for item in predicted {
                let Some(key) = match_key(item) else { continue };
                let Some(g) = (0..gold_keys.len())
                    .find(|&g| !consumed[g] && gold_keys[g].as_ref() == Some(&key))
                else {
                    continue;
                };
                consumed[g] = true;
                matched += 1;

                let gold_item = &gold_record.items[g];
                if same_polarity(item.polarity.as_ref(), gold_item.polarity.as_ref()) {
                    agreeing += 1;
                } else {
                    polarity_samples.push(|| {
                        format!(
                            "journal_id={}: '{}' predicted {} but labelled {}",
                            journal_id,
                            item.evidence(),
                            item.polarity.as_ref().map_or("<missing>", |p| p.as_str()),
                            gold_item.polarity.as_ref().map_or("<missing>", |p| p.as_str()),
                        )
                    });
                }
            }

            let (found, _) = find_contradictions(predicted);
            for c in &found {
                contradiction_samples.push(|| {
                    format!(
                        "journal_id={}: '{}' asserted as {}",
                        journal_id,
                        c.evidence_span,
                        c.polarities.join(" and ")
                    )
                });
            }

            let t = &self.thresholds;
            let passed = share_at_least(grounded, predicted.len(), t.evidence_validity_min)
                && share_at_least(agreeing, matched, t.polarity_correctness_min)
                && found.len() <= t.contradictions_max;

            details.push(CanaryJournalDetail {
                journal_id: journal_id.clone(),
                predicted_items: predicted.len(),
                gold_items: gold_record.items.len(),
                matched,
                unmatched_predicted: predicted.len() - matched,
                unmatched_gold: gold_record.items.len() - matched,
                polarity_mismatches: matched - agreeing,
                evidence_validity: percentage(grounded, predicted.len(), 100.0),
                contradictions: found.len(),
                status: CheckStatus::from_pass(passed),
            });

            tally.predicted += predicted.len();
            tally.gold += gold_record.items.len();
            tally.grounded += grounded;
            tally.matched += matched;
            tally.agreeing += agreeing;
            tally.contradictions += found.len();
        }

        let evidence_validity = percentage(tally.grounded, tally.predicted, 100.0);
        let polarity_correctness = percentage(tally.agreeing, tally.matched, 100.0);
        let t = &self.thresholds;

        let metrics = CanaryMetrics {
            evidence_validity: CheckResult {
                name: "evidence_validity".to_string(),
                status: CheckStatus::from_pass(tally.evidence_at_least(t.evidence_validity_min)),
                observed_value: evidence_validity,
                threshold: self.thresholds.evidence_validity_min,
                detail: format!(
                    "{} of {} predicted items grounded verbatim",
                    tally.grounded, tally.predicted
                ),
                samples: evidence_samples.kept,
            },
            polarity_correctness: CheckResult {
                name: "polarity_correctness".to_string(),
                status: CheckStatus::from_pass(
                    tally.polarity_at_least(t.polarity_correctness_min),
                ),
                observed_value: polarity_correctness,
                threshold: self.thresholds.polarity_correctness_min,
                detail: format!(
                    "{} of {} matched items agree on polarity",
                    tally.agreeing, tally.matched
                ),
                samples: polarity_samples.kept,
            },
            contradiction_count: CheckResult {
                name: "contradiction_count".to_string(),
                status: CheckStatus::from_pass(
                    tally.contradictions <= self.thresholds.contradictions_max,
                ),
                observed_value: tally.contradictions as f64,
                threshold: self.thresholds.contradictions_max as f64,
                detail: format!("{} contradicting evidence groups", tally.contradictions),
                samples: contradiction_samples.kept,
            },
            total_predicted_items: tally.predicted,
            total_gold_items: tally.gold,
            total_matched_items: tally.matched,
            unmatched_predicted_items: tally.predicted - tally.matched,
            unmatched_gold_items: tally.gold - tally.matched,
        };

        let conditions = self.conditions(&metrics, &tally);
        let alert_level = CanaryCondition::alert_level(&conditions);

        let reasoning = if conditions.is_empty() {
            format!(
                "All canary checks passed: {}% evidence validity, no contradictions, \
                 and {}% polarity correctness on {} matched items.",
                evidence_validity, polarity_correctness, tally.matched
            )
        } else {
            conditions
                .iter()
                .map(|c| c.message.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        };

        tracing::debug!(
            label = %candidate.label,
            alert_level = %alert_level,
            journals = details.len(),
            "Canary evaluation complete"
        );

        CanaryReport {
            timestamp: Utc::now(),
            candidate_label: candidate.label.clone(),
            canary_journals_evaluated: details.len(),
            alert_level,
            recommended_action: alert_level.action(),
            metrics,
            conditions,
            reasoning,
            details,
            thresholds_used: self.thresholds.clone(),
        }
    }

    /// Score two parser versions against the same gold set.
    pub fn compare_versions(
        &self,
        baseline: &ParserOutputSet,
        candidate: &ParserOutputSet,
        gold: &GoldSet,
        canary_journals: &JournalSet,
    ) -> CanaryComparison {
        let before = self.evaluate(baseline, gold, canary_journals);
        let after = self.evaluate(candidate, gold, canary_journals);

        let b = CanaryVersionSummary::from(&before);
        let a = CanaryVersionSummary::from(&after);
        let diff = |after: usize, before: usize| after as i64 - before as i64;

        let delta = CanaryDelta {
            evidence_validity: round2(a.evidence_validity - b.evidence_validity),
            polarity_correctness: round2(a.polarity_correctness - b.polarity_correctness),
            matched: diff(a.matched, b.matched),
            unmatched_predicted: diff(a.unmatched_predicted, b.unmatched_predicted),
            unmatched_gold: diff(a.unmatched_gold, b.unmatched_gold),
            contradictions: diff(a.contradictions, b.contradictions),
        };

        CanaryComparison {
            timestamp: Utc::now(),
            baseline: b,
            candidate: a,
            delta,
            baseline_details: before.details,
            candidate_details: after.details,
        }
    }

    fn conditions(&self, metrics: &CanaryMetrics, tally: &Tally) -> Vec<CanaryCondition> {
        let t = &self.thresholds;
        let evidence = metrics.evidence_validity.observed_value;
        let polarity = metrics.polarity_correctness.observed_value;
        let mut conditions = Vec::new();

        if tally.contradictions > t.contradictions_max {
            conditions.push(CanaryCondition {
                name: CanaryCondition::CONTRADICTIONS.to_string(),
                effect: ConditionEffect::Rollback,
                message: format!(
                    "Found {} contradiction(s) where the same evidence has conflicting \
                     polarity; the parser has a logic error.",
                    tally.contradictions
                ),
            });
        }

        let ungrounded = tally.predicted - tally.grounded;
        if !tally.evidence_at_least(t.evidence_validity_severe) {
            conditions.push(CanaryCondition {
                name: CanaryCondition::EVIDENCE_VALIDITY_SEVERE.to_string(),
                effect: ConditionEffect::Rollback,
                message: format!(
                    "Evidence validity is {}% ({} ungrounded spans), below the {}% severe cutoff.",
                    evidence, ungrounded, t.evidence_validity_severe
                ),
            });
        } else if !tally.evidence_at_least(t.evidence_validity_min) {
            conditions.push(CanaryCondition {
                name: CanaryCondition::EVIDENCE_VALIDITY.to_string(),
                effect: ConditionEffect::HumanReview,
                message: format!(
                    "Evidence validity is {}% ({} ungrounded spans), below the {}% threshold.",
                    evidence, ungrounded, t.evidence_validity_min
                ),
            });
        }

        if !tally.polarity_at_least(t.polarity_correctness_min) {
            conditions.push(CanaryCondition {
                name: CanaryCondition::POLARITY_CORRECTNESS.to_string(),
                effect: ConditionEffect::HumanReview,
                message: format!(
                    "Polarity correctness is {}% on {} matched items, below the {}% \
                     threshold; presence/absence may be misread.",
                    polarity, tally.matched, t.polarity_correctness_min
                ),
            });
        }

        conditions
    }
}

impl Default for CanaryEvaluator {
    fn default() -> Self {
        Self::new(&Policy::default())
    }
}

impl Detector for CanaryEvaluator {
    type Report = CanaryReport;

    fn kind(&self) -> DetectorKind {
        DetectorKind::Canary
    }

    fn run(&self, inputs: &MonitorInputs) -> CanaryReport {
        let candidate = inputs.candidate.restricted_to(inputs.gold.keys());
        self.evaluate(&candidate, &inputs.gold, &inputs.canary_journals)
    }
}
