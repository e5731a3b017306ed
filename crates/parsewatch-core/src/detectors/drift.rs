//! Drift Analyzer
//!
//! **Question**: Does the candidate behave like the baseline on the same journals?
//!
//! No labels are needed: this is a relative comparison of two parser runs
//! over the journals both runs covered.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{DriftThresholds, Policy, Tiers};
use crate::types::{
    percentage, round2, Action, Domain, DriftMetricResult, DriftSeverity, Intensity,
    MonitorInputs, ParserOutputRecord, ParserOutputSet,
};

use super::{Detector, DetectorKind};

/// Items-per-journal statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub average: f64,
    pub min: usize,
    pub max: usize,
    pub median: f64,
    pub standard_deviation: f64,
    pub total_journals: usize,
    pub total_items: usize,
}

impl VolumeStats {
    fn from_records(records: &[&ParserOutputRecord]) -> Self {
        let mut counts: Vec<usize> = records.iter().map(|r| r.items.len()).collect();
        if counts.is_empty() {
            return Self::default();
        }
        counts.sort_unstable();

        let n = counts.len();
        let total: usize = counts.iter().sum();
        let mean = total as f64 / n as f64;
        let median = if n % 2 == 1 {
            counts[n / 2] as f64
        } else {
            (counts[n / 2 - 1] + counts[n / 2]) as f64 / 2.0
        };
        let standard_deviation = if n > 1 {
            let variance = counts
                .iter()
                .map(|&c| (c as f64 - mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Self {
            average: mean,
            min: counts[0],
            max: counts[n - 1],
            median,
            standard_deviation: round2(standard_deviation),
            total_journals: n,
            total_items: total,
        }
    }
}

/// Share (%) of items per intensity. Missing or invalid intensity reads as unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntensityShares {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub unknown: f64,
}

impl IntensityShares {
    fn from_records(records: &[&ParserOutputRecord]) -> Self {
        let mut counts = [0usize; 4];
        let mut total = 0;
        for item in records.iter().flat_map(|r| r.items.iter()) {
            total += 1;
            let slot = match item.effective_intensity() {
                Intensity::High => 0,
                Intensity::Medium => 1,
                Intensity::Low => 2,
                Intensity::Unknown | Intensity::Invalid(_) => 3,
            };
            counts[slot] += 1;
        }

        Self {
            high: percentage(counts[0], total, 0.0),
            medium: percentage(counts[1], total, 0.0),
            low: percentage(counts[2], total, 0.0),
            unknown: percentage(counts[3], total, 0.0),
        }
    }
}

/// Share (%) of items per domain. Missing or invalid domains go to `other`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainShares {
    pub symptom: f64,
    pub food: f64,
    pub emotion: f64,
    pub mind: f64,
    pub other: f64,
}

impl DomainShares {
    fn from_records(records: &[&ParserOutputRecord]) -> Self {
        let mut counts = [0usize; 5];
        let mut total = 0;
        for item in records.iter().flat_map(|r| r.items.iter()) {
            total += 1;
            let slot = match &item.domain {
                Some(Domain::Symptom) => 0,
                Some(Domain::Food) => 1,
                Some(Domain::Emotion) => 2,
                Some(Domain::Mind) => 3,
                Some(Domain::Invalid(_)) | None => 4,
            };
            counts[slot] += 1;
        }

        Self {
            symptom: percentage(counts[0], total, 0.0),
            food: percentage(counts[1], total, 0.0),
            emotion: percentage(counts[2], total, 0.0),
            mind: percentage(counts[3], total, 0.0),
            other: percentage(counts[4], total, 0.0),
        }
    }

    pub fn share(&self, domain: &Domain) -> f64 {
        match domain {
            Domain::Symptom => self.symptom,
            Domain::Food => self.food,
            Domain::Emotion => self.emotion,
            Domain::Mind => self.mind,
            Domain::Invalid(_) => self.other,
        }
    }
}

/// A drift metric plus the distributions behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedMetric<S> {
    #[serde(flatten)]
    pub result: DriftMetricResult,

    pub baseline: S,
    pub candidate: S,

    /// Per-component results (domain mix only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<DriftMetricResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetrics {
    /// Relative change (%) of mean items per journal
    pub extraction_volume: DetailedMetric<VolumeStats>,

    /// Percentage-point change of uncertain polarity share
    pub uncertainty_rate: DriftMetricResult,

    /// Percentage-point change of high intensity share
    pub intensity_distribution: DetailedMetric<IntensityShares>,

    /// Largest percentage-point change of any single domain's share
    pub domain_mix: DetailedMetric<DomainShares>,
}

impl DriftMetrics {
    pub fn results(&self) -> [&DriftMetricResult; 4] {
        [
            &self.extraction_volume.result,
            &self.uncertainty_rate,
            &self.intensity_distribution.result,
            &self.domain_mix.result,
        ]
    }
}

/// A metric (or single domain) whose drift is above `none`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftFlag {
    pub metric: String,
    pub baseline_value: f64,
    pub observed_value: f64,
    pub change: f64,

    /// Bound that was crossed to raise the flag
    pub threshold: f64,

    /// "%" for relative change, "pp" for percentage points
    pub unit: String,

    pub severity: DriftSeverity,
    pub reason: String,
}

/// Which journals the comparison could use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub overlapping: usize,
    pub baseline_only: usize,
    pub candidate_only: usize,
}

/// Result of comparing a candidate run to a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub timestamp: DateTime<Utc>,
    pub baseline_label: String,
    pub candidate_label: String,
    pub overall_drift_status: DriftSeverity,
    pub recommended_action: Action,
    pub metrics: DriftMetrics,
    pub drift_flags: Vec<DriftFlag>,
    pub coverage: Coverage,

    /// No journal was covered by both runs; nothing could be compared
    pub zero_overlap: bool,

    pub thresholds_used: DriftThresholds,
}

/// Compares two parser runs over their shared journals.
pub struct DriftAnalyzer {
    thresholds: DriftThresholds,
}

impl DriftAnalyzer {
    pub fn new(policy: &Policy) -> Self {
        Self {
            thresholds: policy.drift.clone(),
        }
    }

    /// Compare `candidate` to `baseline` on journal ids present in both.
    pub fn analyze(&self, baseline: &ParserOutputSet, candidate: &ParserOutputSet) -> DriftReport {
        let baseline_ids: BTreeSet<&String> = baseline.records.keys().collect();
        let candidate_ids: BTreeSet<&String> = candidate.records.keys().collect();
        let shared: Vec<&String> = baseline_ids.intersection(&candidate_ids).copied().collect();

        let coverage = Coverage {
            overlapping: shared.len(),
            baseline_only: baseline_ids.len() - shared.len(),
            candidate_only: candidate_ids.len() - shared.len(),
        };
        let zero_overlap = shared.is_empty();

        if zero_overlap {
            tracing::warn!(
                baseline = %baseline.label,
                candidate = %candidate.label,
                "No journals shared between runs, drift cannot be computed"
            );
        } else if coverage.baseline_only > 0 || coverage.candidate_only > 0 {
            tracing::warn!(
                baseline_only = coverage.baseline_only,
                candidate_only = coverage.candidate_only,
                "Runs cover different journals, comparing the overlap only"
            );
        }

        let base: Vec<&ParserOutputRecord> =
            shared.iter().map(|id| &baseline.records[*id]).collect();
        let cand: Vec<&ParserOutputRecord> =
            shared.iter().map(|id| &candidate.records[*id]).collect();

        let metrics = DriftMetrics {
            extraction_volume: self.extraction_volume(&base, &cand),
            uncertainty_rate: self.uncertainty_rate(&base, &cand),
            intensity_distribution: self.intensity_distribution(&base, &cand),
            domain_mix: self.domain_mix(&base, &cand),
        };

        let drift_flags = self.flags(&metrics);
        let overall_drift_status = metrics
            .results()
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or_default();

        tracing::debug!(
            status = %overall_drift_status,
            flags = drift_flags.len(),
            overlapping = coverage.overlapping,
            "Drift analysis complete"
        );

        DriftReport {
            timestamp: Utc::now(),
            baseline_label: baseline.label.clone(),
            candidate_label: candidate.label.clone(),
            overall_drift_status,
            recommended_action: overall_drift_status.recommended_action(),
            metrics,
            drift_flags,
            coverage,
            zero_overlap,
            thresholds_used: self.thresholds.clone(),
        }
    }

    fn extraction_volume(
        &self,
        base: &[&ParserOutputRecord],
        cand: &[&ParserOutputRecord],
    ) -> DetailedMetric<VolumeStats> {
        let baseline = VolumeStats::from_records(base);
        let candidate = VolumeStats::from_records(cand);
        let delta = relative_change(baseline.average, candidate.average);

        DetailedMetric {
            result: DriftMetricResult {
                name: "extraction_volume".to_string(),
                baseline_value: round2(baseline.average),
                candidate_value: round2(candidate.average),
                delta,
                severity: self.thresholds.extraction_volume.classify(delta),
            },
            baseline: VolumeStats {
                average: round2(baseline.average),
                ..baseline
            },
            candidate: VolumeStats {
                average: round2(candidate.average),
                ..candidate
            },
            components: Vec::new(),
        }
    }

    fn uncertainty_rate(
        &self,
        base: &[&ParserOutputRecord],
        cand: &[&ParserOutputRecord],
    ) -> DriftMetricResult {
        let rate = |records: &[&ParserOutputRecord]| {
            let items: Vec<_> = records.iter().flat_map(|r| r.items.iter()).collect();
            let uncertain = items
                .iter()
                .filter(|i| i.polarity.as_ref().is_some_and(|p| p.is_uncertain_like()))
                .count();
            percentage(uncertain, items.len(), 0.0)
        };

        point_change(
            "uncertainty_rate",
            rate(base),
            rate(cand),
            &self.thresholds.uncertainty_rate,
        )
    }

    fn intensity_distribution(
        &self,
        base: &[&ParserOutputRecord],
        cand: &[&ParserOutputRecord],
    ) -> DetailedMetric<IntensityShares> {
        let baseline = IntensityShares::from_records(base);
        let candidate = IntensityShares::from_records(cand);

        DetailedMetric {
            result: point_change(
                "intensity_distribution",
                baseline.high,
                candidate.high,
                &self.thresholds.high_intensity,
            ),
            baseline,
            candidate,
            components: Vec::new(),
        }
    }

    fn domain_mix(
        &self,
        base: &[&ParserOutputRecord],
        cand: &[&ParserOutputRecord],
    ) -> DetailedMetric<DomainShares> {
        let baseline = DomainShares::from_records(base);
        let candidate = DomainShares::from_records(cand);

        let components: Vec<DriftMetricResult> = Domain::ALL
            .iter()
            .map(|domain| {
                point_change(
                    &format!("domain_mix_{}", domain),
                    baseline.share(domain),
                    candidate.share(domain),
                    &self.thresholds.domain_mix,
                )
            })
            .collect();

        // Headline is the domain that moved the most; first one wins ties
        let mut headline = components[0].clone();
        for component in &components[1..] {
            if component.delta.abs() > headline.delta.abs() {
                headline = component.clone();
            }
        }
        headline.name = "domain_mix".to_string();

        DetailedMetric {
            result: headline,
            baseline,
            candidate,
            components,
        }
    }

    fn flags(&self, metrics: &DriftMetrics) -> Vec<DriftFlag> {
        let t = &self.thresholds;
        let mut flags = Vec::new();

        let mut push = |result: &DriftMetricResult, tiers: &Tiers, unit: &str, reason: &str| {
            if result.severity == DriftSeverity::None {
                return;
            }
            flags.push(DriftFlag {
                metric: result.name.clone(),
                baseline_value: result.baseline_value,
                observed_value: result.candidate_value,
                change: result.delta,
                threshold: match result.severity {
                    DriftSeverity::Severe => tiers.severe,
                    DriftSeverity::Moderate => tiers.moderate,
                    _ => tiers.minor,
                },
                unit: unit.to_string(),
                severity: result.severity,
                reason: reason.to_string(),
            });
        };

        push(
            &metrics.extraction_volume.result,
            &t.extraction_volume,
            "%",
            "Extraction volume shift indicates a parser sensitivity change: over-parsing creates noise, under-parsing misses health signals",
        );
        push(
            &metrics.uncertainty_rate,
            &t.uncertainty_rate,
            "pp",
            "Uncertainty shift suggests a change in parser confidence; users expect definitive parsing of what they wrote",
        );
        push(
            &metrics.intensity_distribution.result,
            &t.high_intensity,
            "pp",
            "High intensity over-reporting causes user anxiety; under-reporting may cause dismissal of serious symptoms",
        );
        for component in &metrics.domain_mix.components {
            push(component, &t.domain_mix, "pp", domain_reason(&component.name));
        }

        flags
    }
}

impl Default for DriftAnalyzer {
    fn default() -> Self {
        Self::new(&Policy::default())
    }
}

impl Detector for DriftAnalyzer {
    type Report = DriftReport;

    fn kind(&self) -> DetectorKind {
        DetectorKind::Drift
    }

    fn run(&self, inputs: &MonitorInputs) -> DriftReport {
        self.analyze(&inputs.baseline, &inputs.candidate)
    }
}

/// Relative change (%) from `baseline` to `current`.
///
/// A zero baseline yields 0 when nothing changed and 100 otherwise.
fn relative_change(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        return if current == 0.0 { 0.0 } else { 100.0 };
    }
    round2((current - baseline) / baseline * 100.0)
}

fn point_change(name: &str, baseline: f64, candidate: f64, tiers: &Tiers) -> DriftMetricResult {
    let delta = round2(candidate - baseline);
    DriftMetricResult {
        name: name.to_string(),
        baseline_value: baseline,
        candidate_value: candidate,
        delta,
        severity: tiers.classify(delta),
    }
}

fn domain_reason(metric: &str) -> &'static str {
    match metric.trim_start_matches("domain_mix_") {
        "symptom" => "Symptom under-detection risks missing physical health signals",
        "food" => "Food tracking drift affects nutritional insights and dietary pattern analysis",
        "emotion" => {
            "Emotional over-parsing increases the risk of inappropriate mental health nudges"
        }
        "mind" => "Mind/cognitive drift affects stress and mental state monitoring",
        _ => "Domain distribution shift affects downstream analytics",
    }
}
