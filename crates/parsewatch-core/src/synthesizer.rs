//! Synthesizer: combines the three detector reports into one verdict.
//!
//! The precedence is fixed and not configurable; the most conservative
//! signal wins:
//! 1. Invariants FAIL → rollback
//! 2. Else canary ROLLBACK → rollback
//! 3. Else drift severe → rollback
//! 4. Else canary HUMAN_REVIEW or drift minor/moderate → human_review
//! 5. Else → deploy
//!
//! The synthesizer never fails. A report that cannot be read, or that
//! contradicts its own contents, counts as the worst outcome for its detector.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detectors::{
    CanaryCondition, CanaryReport, ConditionEffect, DetectorKind, DriftReport, InvariantReport,
};
use crate::types::{Action, AlertLevel, Bound, CheckStatus, DriftSeverity, ROUNDING_SLACK};

/// How much an issue weighs on the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Warning,
}

/// One counted problem behind a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub source: DetectorKind,
    pub severity: IssueSeverity,
    pub message: String,
}

/// The deployment decision for a candidate parser run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub action: Action,
    pub exit_code: i32,
    pub critical_issues: usize,
    pub warnings: usize,

    /// Which precedence rule decided
    pub reason: String,

    /// Effective per-detector outcomes the decision used
    pub invariant_status: CheckStatus,
    pub drift_status: DriftSeverity,
    pub canary_alert_level: AlertLevel,

    pub issues: Vec<Issue>,
    pub decided_at: DateTime<Utc>,
}

/// Per-detector outcomes plus the issues found while reading them.
struct Signals {
    invariant: CheckStatus,
    drift: DriftSeverity,
    canary: AlertLevel,
    issues: Vec<Issue>,
}

impl Signals {
    fn new() -> Self {
        Self {
            invariant: CheckStatus::Pass,
            drift: DriftSeverity::None,
            canary: AlertLevel::Pass,
            issues: Vec::new(),
        }
    }

    fn push(&mut self, source: DetectorKind, severity: IssueSeverity, message: String) {
        self.issues.push(Issue {
            source,
            severity,
            message,
        });
    }

    fn read_invariant(&mut self, report: &InvariantReport) {
        for check in report.failed_checks() {
            self.push(
                DetectorKind::Invariants,
                IssueSeverity::Critical,
                format!(
                    "Invariant '{}' failed: observed {} against threshold {}",
                    check.name, check.observed_value, check.threshold
                ),
            );
        }

        self.invariant = match invariant_problem(report) {
            None => report.overall_status,
            Some(what) => {
                self.inconsistent(DetectorKind::Invariants, what);
                CheckStatus::Fail
            }
        };
    }

    fn read_drift(&mut self, report: &DriftReport) {
        for flag in &report.drift_flags {
            let severity = match flag.severity {
                DriftSeverity::Severe => IssueSeverity::Critical,
                _ => IssueSeverity::Warning,
            };
            self.push(
                DetectorKind::Drift,
                severity,
                format!(
                    "{} drift on {}: {} → {} ({}{} change). {}",
                    flag.severity,
                    flag.metric,
                    flag.baseline_value,
                    flag.observed_value,
                    flag.change,
                    flag.unit,
                    flag.reason
                ),
            );
        }

        self.drift = match drift_problem(report) {
            None => report.overall_drift_status,
            Some(what) => {
                self.inconsistent(DetectorKind::Drift, what);
                DriftSeverity::Severe
            }
        };
    }

    fn read_canary(&mut self, report: &CanaryReport) {
        for condition in &report.conditions {
            let severity = match condition.effect {
                ConditionEffect::Rollback => IssueSeverity::Critical,
                ConditionEffect::HumanReview => IssueSeverity::Warning,
            };
            self.push(DetectorKind::Canary, severity, condition.message.clone());
        }

        self.canary = match canary_problem(report) {
            None => report.alert_level,
            Some(what) => {
                self.inconsistent(DetectorKind::Canary, what);
                AlertLevel::Rollback
            }
        };
    }

    fn inconsistent(&mut self, source: DetectorKind, what: &str) {
        self.push(
            source,
            IssueSeverity::Critical,
            format!(
                "{} report is inconsistent ({}); treated as worst case",
                report_name(source),
                what
            ),
        );
    }

    /// Record an unreadable report and assume the worst for its detector.
    fn unreadable(&mut self, source: DetectorKind, error: &str) {
        self.push(
            source,
            IssueSeverity::Critical,
            format!(
                "{} report could not be read ({}); treated as worst case",
                report_name(source),
                error
            ),
        );
        match source {
            DetectorKind::Invariants => self.invariant = CheckStatus::Fail,
            DetectorKind::Drift => self.drift = DriftSeverity::Severe,
            DetectorKind::Canary => self.canary = AlertLevel::Rollback,
        }
    }
}

/// First way an invariant report disagrees with its own numbers.
fn invariant_problem(report: &InvariantReport) -> Option<&'static str> {
    let c = &report.checks;
    let bounded = [
        (&c.schema_validity, Bound::AtLeast),
        (&c.evidence_validity, Bound::AtLeast),
        (&c.hallucination_rate, Bound::AtMost),
        (&c.contradiction_rate, Bound::AtMost),
    ];
    if bounded.iter().any(|(check, bound)| !check.status_is_plausible(*bound)) {
        return Some("a check status disagrees with its observed value");
    }

    let failed = report.failed_checks().count();
    if report.overall_status != CheckStatus::from_pass(failed == 0) {
        return Some("overall status disagrees with its checks");
    }
    let expected_action = if failed == 0 {
        Action::Deploy
    } else {
        Action::Rollback
    };
    if report.final_recommended_action != expected_action {
        return Some("recommended action disagrees with its status");
    }

    let summary = &report.summary;
    if summary.failed_checks != failed
        || summary.total_checks != bounded.len()
        || summary.passed_checks + failed != bounded.len()
    {
        return Some("summary disagrees with its checks");
    }
    None
}

/// First way a drift report disagrees with its own numbers.
fn drift_problem(report: &DriftReport) -> Option<&'static str> {
    let m = &report.metrics;
    let t = &report.thresholds_used;
    let domain = &m.domain_mix;

    let Some(worst_domain) = domain.components.iter().map(|c| c.severity).max() else {
        return Some("domain mix has no per-domain results");
    };
    if domain.result.severity != worst_domain {
        return Some("domain mix severity disagrees with its domains");
    }

    let tiered = [
        (&m.extraction_volume.result, &t.extraction_volume),
        (&m.uncertainty_rate, &t.uncertainty_rate),
        (&m.intensity_distribution.result, &t.high_intensity),
        (&domain.result, &t.domain_mix),
    ];
    let components = domain.components.iter().map(|c| (c, &t.domain_mix));
    if tiered
        .into_iter()
        .chain(components)
        .any(|(result, tiers)| result.severity != tiers.classify(result.delta))
    {
        return Some("a metric severity disagrees with its delta");
    }

    let worst_metric = m.results().iter().map(|r| r.severity).max().unwrap_or_default();
    if report.overall_drift_status != worst_metric {
        return Some("overall status disagrees with its metrics");
    }
    if report.recommended_action != worst_metric.recommended_action() {
        return Some("recommended action disagrees with its status");
    }

    // Every non-none metric (domains individually) is flagged exactly once
    let mut expected: Vec<(&str, DriftSeverity)> = [
        &m.extraction_volume.result,
        &m.uncertainty_rate,
        &m.intensity_distribution.result,
    ]
    .into_iter()
    .chain(&domain.components)
    .filter(|r| r.severity > DriftSeverity::None)
    .map(|r| (r.name.as_str(), r.severity))
    .collect();
    let mut flagged: Vec<(&str, DriftSeverity)> = report
        .drift_flags
        .iter()
        .map(|f| (f.metric.as_str(), f.severity))
        .collect();
    expected.sort();
    flagged.sort();
    if expected != flagged {
        return Some("drift flags disagree with its metrics");
    }
    None
}

/// First way a canary report disagrees with its own numbers.
fn canary_problem(report: &CanaryReport) -> Option<&'static str> {
    let m = &report.metrics;
    let t = &report.thresholds_used;

    if m.evidence_validity.threshold != t.evidence_validity_min
        || m.polarity_correctness.threshold != t.polarity_correctness_min
        || m.contradiction_count.threshold != t.contradictions_max as f64
    {
        return Some("metric thresholds disagree with thresholds_used");
    }

    let bounded = [
        (&m.evidence_validity, Bound::AtLeast),
        (&m.polarity_correctness, Bound::AtLeast),
        (&m.contradiction_count, Bound::AtMost),
    ];
    if bounded.iter().any(|(check, bound)| !check.status_is_plausible(*bound)) {
        return Some("a metric status disagrees with its observed value");
    }

    let has = |name: &str, effect: ConditionEffect| {
        report.conditions.iter().any(|c| c.name == name && c.effect == effect)
    };

    let contradictions_failed = !m.contradiction_count.status.is_pass();
    if contradictions_failed != has(CanaryCondition::CONTRADICTIONS, ConditionEffect::Rollback) {
        return Some("contradiction condition disagrees with contradiction_count");
    }

    let evidence = &m.evidence_validity;
    let severe = has(CanaryCondition::EVIDENCE_VALIDITY_SEVERE, ConditionEffect::Rollback);
    let review = has(CanaryCondition::EVIDENCE_VALIDITY, ConditionEffect::HumanReview);
    let evidence_agrees = match (evidence.status.is_pass(), severe, review) {
        (true, false, false) => true,
        (false, true, false) => {
            evidence.observed_value <= t.evidence_validity_severe + ROUNDING_SLACK
        }
        (false, false, true) => {
            evidence.observed_value >= t.evidence_validity_severe - ROUNDING_SLACK
        }
        _ => false,
    };
    if !evidence_agrees {
        return Some("evidence condition disagrees with evidence_validity");
    }

    let polarity_failed = !m.polarity_correctness.status.is_pass();
    let polarity_flagged =
        has(CanaryCondition::POLARITY_CORRECTNESS, ConditionEffect::HumanReview);
    if polarity_failed != polarity_flagged {
        return Some("polarity condition disagrees with polarity_correctness");
    }

    let triggered = bounded.iter().filter(|(check, _)| !check.status.is_pass()).count();
    if report.conditions.len() != triggered {
        return Some("unexpected or duplicate conditions");
    }

    if report.alert_level != CanaryCondition::alert_level(&report.conditions) {
        return Some("alert level disagrees with its conditions");
    }
    if report.recommended_action != report.alert_level.action() {
        return Some("recommended action disagrees with its alert level");
    }
    None
}

fn report_name(kind: DetectorKind) -> &'static str {
    match kind {
        DetectorKind::Invariants => "Invariant",
        DetectorKind::Drift => "Drift",
        DetectorKind::Canary => "Canary",
    }
}

/// The Synthesizer turns detector reports into a final verdict.
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate typed reports into a verdict.
    pub fn aggregate(
        &self,
        invariant: &InvariantReport,
        drift: &DriftReport,
        canary: &CanaryReport,
    ) -> FinalVerdict {
        let mut signals = Signals::new();
        signals.read_invariant(invariant);
        signals.read_drift(drift);
        signals.read_canary(canary);
        self.decide(signals)
    }

    /// Aggregate reports given as untyped JSON.
    ///
    /// Each report is decoded independently. One that does not decode is
    /// treated as invariant FAIL, drift severe or canary ROLLBACK respectively.
    pub fn aggregate_values(
        &self,
        invariant: &Value,
        drift: &Value,
        canary: &Value,
    ) -> FinalVerdict {
        let mut signals = Signals::new();

        match decode::<InvariantReport>(invariant) {
            Ok(report) => signals.read_invariant(&report),
            Err(e) => signals.unreadable(DetectorKind::Invariants, &e),
        }
        match decode::<DriftReport>(drift) {
            Ok(report) => signals.read_drift(&report),
            Err(e) => signals.unreadable(DetectorKind::Drift, &e),
        }
        match decode::<CanaryReport>(canary) {
            Ok(report) => signals.read_canary(&report),
            Err(e) => signals.unreadable(DetectorKind::Canary, &e),
        }

        self.decide(signals)
    }

    fn decide(&self, signals: Signals) -> FinalVerdict {
        let (action, reason) = if signals.invariant == CheckStatus::Fail {
            (Action::Rollback, "Invariant checks failed".to_string())
        } else if signals.canary == AlertLevel::Rollback {
            (Action::Rollback, "Canary evaluation requires rollback".to_string())
        } else if signals.drift == DriftSeverity::Severe {
            (Action::Rollback, "Severe drift from baseline".to_string())
        } else if signals.canary == AlertLevel::HumanReview {
            (Action::HumanReview, "Canary evaluation needs human review".to_string())
        } else if signals.drift > DriftSeverity::None {
            (
                Action::HumanReview,
                format!("{} drift from baseline", capitalize(signals.drift.as_str())),
            )
        } else {
            (
                Action::Deploy,
                "All invariants hold, no drift, canary passed".to_string(),
            )
        };

        let critical_issues = signals
            .issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical)
            .count();
        let warnings = signals.issues.len() - critical_issues;

        tracing::info!(
            action = %action,
            critical_issues,
            warnings,
            reason = %reason,
            "Verdict reached"
        );

        FinalVerdict {
            action,
            exit_code: action.exit_code(),
            critical_issues,
            warnings,
            reason,
            invariant_status: signals.invariant,
            drift_status: signals.drift,
            canary_alert_level: signals.canary,
            issues: signals.issues,
            decided_at: Utc::now(),
        }
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    T::deserialize(value).map_err(|e| e.to_string())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::{CanaryEvaluator, DriftAnalyzer, InvariantChecker};
    use crate::types::{
        Domain, ExtractedItem, GoldSet, Journal, JournalSet, ParserOutputRecord, ParserOutputSet,
        Polarity,
    };
    use serde_json::json;

    fn headache(polarity: Polarity) -> ExtractedItem {
        ExtractedItem::new(Domain::Symptom, "headache", polarity, "had a headache")
    }

    fn journals() -> JournalSet {
        let journal = Journal {
            id: "j1".to_string(),
            text: "I had a headache all day.".to_string(),
        };
        [("j1".to_string(), journal)].into_iter().collect()
    }

    fn run(label: &str, items: Vec<ExtractedItem>) -> ParserOutputSet {
        ParserOutputSet::from_records(
            label,
            [ParserOutputRecord {
                journal_id: "j1".to_string(),
                items,
            }],
        )
    }

    fn invariant(pass: bool) -> InvariantReport {
        let mut items = vec![headache(Polarity::Present)];
        if !pass {
            items.push(headache(Polarity::Absent));
        }
        InvariantChecker::default().check(&run("day1", items), &journals())
    }

    /// Drift report for a volume change from 20 to `count` items.
    fn drift(count: usize) -> DriftReport {
        let baseline = run("day0", vec![headache(Polarity::Present); 20]);
        let candidate = run("day1", vec![headache(Polarity::Present); count]);
        DriftAnalyzer::default().analyze(&baseline, &candidate)
    }

    fn canary(level: AlertLevel) -> CanaryReport {
        let gold: GoldSet = [(
            "j1".to_string(),
            ParserOutputRecord {
                journal_id: "j1".to_string(),
                items: vec![headache(Polarity::Present)],
            },
        )]
        .into_iter()
        .collect();

        let items = match level {
            AlertLevel::Pass => vec![headache(Polarity::Present)],
            AlertLevel::HumanReview => vec![headache(Polarity::Unknown)],
            AlertLevel::Rollback => vec![headache(Polarity::Present), headache(Polarity::Absent)],
        };
        CanaryEvaluator::default().evaluate(&run("day1", items), &gold, &journals())
    }

    fn aggregate(i: InvariantReport, d: DriftReport, c: CanaryReport) -> FinalVerdict {
        Synthesizer::new().aggregate(&i, &d, &c)
    }

    fn values(i: &InvariantReport, d: &DriftReport, c: &CanaryReport) -> (Value, Value, Value) {
        (
            serde_json::to_value(i).unwrap(),
            serde_json::to_value(d).unwrap(),
            serde_json::to_value(c).unwrap(),
        )
    }

    fn flagged_inconsistent(verdict: &FinalVerdict, source: DetectorKind) -> bool {
        verdict
            .issues
            .iter()
            .any(|i| i.source == source && i.message.contains("inconsistent"))
    }

    #[test]
    fn test_fixtures_produce_intended_levels() {
        assert_eq!(invariant(true).overall_status, CheckStatus::Pass);
        assert_eq!(invariant(false).overall_status, CheckStatus::Fail);
        assert_eq!(drift(25).overall_drift_status, DriftSeverity::Minor);
        assert_eq!(drift(29).overall_drift_status, DriftSeverity::Moderate);
        assert_eq!(drift(32).overall_drift_status, DriftSeverity::Severe);
        assert_eq!(canary(AlertLevel::HumanReview).alert_level, AlertLevel::HumanReview);
        assert_eq!(canary(AlertLevel::Rollback).alert_level, AlertLevel::Rollback);
    }

    #[test]
    fn test_all_clear_yields_deploy() {
        let verdict = aggregate(invariant(true), drift(20), canary(AlertLevel::Pass));

        assert_eq!(verdict.action, Action::Deploy);
        assert_eq!(verdict.exit_code, 0);
        assert_eq!(verdict.critical_issues, 0);
        assert_eq!(verdict.warnings, 0);
    }

    #[test]
    fn test_invariant_failure_overrides_everything() {
        let verdict = aggregate(invariant(false), drift(25), canary(AlertLevel::Pass));

        assert_eq!(verdict.action, Action::Rollback);
        assert_eq!(verdict.exit_code, 2);
        assert!(verdict.critical_issues >= 1);
        assert_eq!(verdict.warnings, 1);
        assert!(verdict.issues.iter().any(|i| {
            i.source == DetectorKind::Invariants && i.message.contains("contradiction_rate")
        }));
    }

    #[test]
    fn test_moderate_drift_yields_review() {
        let verdict = aggregate(invariant(true), drift(29), canary(AlertLevel::Pass));

        assert_eq!(verdict.action, Action::HumanReview);
        assert_eq!(verdict.exit_code, 1);
        assert_eq!(verdict.critical_issues, 0);
        assert_eq!(verdict.warnings, 1);
    }

    #[test]
    fn test_minor_drift_yields_review() {
        let verdict = aggregate(invariant(true), drift(25), canary(AlertLevel::Pass));
        assert_eq!(verdict.action, Action::HumanReview);
    }

    #[test]
    fn test_severe_drift_yields_rollback() {
        let verdict = aggregate(invariant(true), drift(32), canary(AlertLevel::Pass));

        assert_eq!(verdict.action, Action::Rollback);
        assert_eq!(verdict.critical_issues, 1);
    }

    #[test]
    fn test_canary_levels() {
        let s = Synthesizer::new();

        let review = s.aggregate(&invariant(true), &drift(20), &canary(AlertLevel::HumanReview));
        assert_eq!(review.action, Action::HumanReview);
        assert_eq!(review.warnings, 1);

        let rollback = s.aggregate(&invariant(true), &drift(29), &canary(AlertLevel::Rollback));
        assert_eq!(rollback.action, Action::Rollback);
        assert_eq!(rollback.reason, "Canary evaluation requires rollback");
    }

    #[test]
    fn test_values_match_typed_aggregation() {
        let (i, d, c) = (invariant(true), drift(29), canary(AlertLevel::Pass));
        let typed = Synthesizer::new().aggregate(&i, &d, &c);
        let (vi, vd, vc) = values(&i, &d, &c);
        let untyped = Synthesizer::new().aggregate_values(&vi, &vd, &vc);

        assert_eq!(untyped.action, typed.action);
        assert_eq!(untyped.issues, typed.issues);
    }

    #[test]
    fn test_unreadable_report_is_worst_case() {
        let s = Synthesizer::new();
        let good_inv = serde_json::to_value(invariant(true)).unwrap();
        let good_drift = serde_json::to_value(drift(20)).unwrap();
        let good_canary = serde_json::to_value(canary(AlertLevel::Pass)).unwrap();

        let bad_drift = json!({"overall_drift_status": "fine"});
        let verdict = s.aggregate_values(&good_inv, &bad_drift, &good_canary);
        assert_eq!(verdict.action, Action::Rollback);
        assert_eq!(verdict.drift_status, DriftSeverity::Severe);
        assert_eq!(verdict.critical_issues, 1);

        let verdict = s.aggregate_values(&json!(null), &good_drift, &good_canary);
        assert_eq!(verdict.invariant_status, CheckStatus::Fail);
        assert_eq!(verdict.action, Action::Rollback);
    }

    #[test]
    fn test_inconsistent_report_is_worst_case() {
        let mut report = invariant(false);
        report.overall_status = CheckStatus::Pass;
        report.final_recommended_action = Action::Deploy;

        let verdict = aggregate(report, drift(20), canary(AlertLevel::Pass));
        assert_eq!(verdict.action, Action::Rollback);
        assert!(verdict.issues.iter().any(|i| i.message.contains("inconsistent")));

        let mut report = canary(AlertLevel::HumanReview);
        report.alert_level = AlertLevel::Pass;
        let verdict = aggregate(invariant(true), drift(20), report);
        assert_eq!(verdict.canary_alert_level, AlertLevel::Rollback);
        assert_eq!(verdict.action, Action::Rollback);
    }

    #[test]
    fn test_invariant_status_is_rechecked_against_observed_value() {
        let (mut inv, d, c) = values(&invariant(true), &drift(20), &canary(AlertLevel::Pass));
        inv["checks"]["contradiction_rate"]["observed_value"] = json!(3.0);

        let verdict = Synthesizer::new().aggregate_values(&inv, &d, &c);

        assert_eq!(verdict.invariant_status, CheckStatus::Fail);
        assert_eq!(verdict.action, Action::Rollback);
        assert!(flagged_inconsistent(&verdict, DetectorKind::Invariants));
    }

    #[test]
    fn test_rounded_failure_is_not_inconsistent() {
        // 20000 of 20001 shows as 100.0 against a 100.0 threshold and still fails
        let mut items = vec![headache(Polarity::Present); 20_000];
        let invalid =
            ExtractedItem::new(Domain::from("sleep"), "nap", Polarity::Present, "all day");
        items.push(invalid);
        let report = InvariantChecker::default().check(&run("day1", items), &journals());
        assert_eq!(report.checks.schema_validity.observed_value, 100.0);

        let verdict = aggregate(report, drift(20), canary(AlertLevel::Pass));

        assert_eq!(verdict.invariant_status, CheckStatus::Fail);
        assert!(!flagged_inconsistent(&verdict, DetectorKind::Invariants));
        assert_eq!(verdict.critical_issues, 1);
    }

    #[test]
    fn test_drift_severity_is_rechecked_against_delta() {
        let (i, mut d, c) = values(&invariant(true), &drift(32), &canary(AlertLevel::Pass));
        d["metrics"]["extraction_volume"]["severity"] = json!("none");
        d["overall_drift_status"] = json!("none");
        d["recommended_action"] = json!("deploy");
        d["drift_flags"] = json!([]);

        let verdict = Synthesizer::new().aggregate_values(&i, &d, &c);

        assert_eq!(verdict.drift_status, DriftSeverity::Severe);
        assert_eq!(verdict.action, Action::Rollback);
        assert!(flagged_inconsistent(&verdict, DetectorKind::Drift));
    }

    #[test]
    fn test_drift_flags_must_cover_drifting_metrics() {
        let mut report = drift(29);
        report.drift_flags.clear();

        let verdict = aggregate(invariant(true), report, canary(AlertLevel::Pass));
        assert_eq!(verdict.drift_status, DriftSeverity::Severe);
        assert!(flagged_inconsistent(&verdict, DetectorKind::Drift));

        let mut report = drift(20);
        report.recommended_action = Action::Rollback;
        let verdict = aggregate(invariant(true), report, canary(AlertLevel::Pass));
        assert_eq!(verdict.drift_status, DriftSeverity::Severe);
    }

    #[test]
    fn test_canary_conditions_are_rederived_from_metrics() {
        let (i, d, mut c) = values(&invariant(true), &drift(20), &canary(AlertLevel::Pass));
        c["metrics"]["contradiction_count"]["observed_value"] = json!(2.0);
        c["metrics"]["contradiction_count"]["status"] = json!("FAIL");

        let verdict = Synthesizer::new().aggregate_values(&i, &d, &c);

        assert_eq!(verdict.canary_alert_level, AlertLevel::Rollback);
        assert_eq!(verdict.action, Action::Rollback);
        assert!(flagged_inconsistent(&verdict, DetectorKind::Canary));
    }

    #[test]
    fn test_canary_status_is_rechecked_against_observed_value() {
        let mut report = canary(AlertLevel::Pass);
        report.metrics.polarity_correctness.observed_value = 50.0;

        let verdict = aggregate(invariant(true), drift(20), report);
        assert_eq!(verdict.canary_alert_level, AlertLevel::Rollback);

        let mut report = canary(AlertLevel::HumanReview);
        report.recommended_action = Action::Deploy;
        let verdict = aggregate(invariant(true), drift(20), report);
        assert!(flagged_inconsistent(&verdict, DetectorKind::Canary));
    }

    #[test]
    fn test_honest_reports_are_never_inconsistent() {
        for (inv, count, level) in [
            (true, 20, AlertLevel::Pass),
            (false, 25, AlertLevel::HumanReview),
            (true, 32, AlertLevel::Rollback),
            (false, 0, AlertLevel::Pass),
        ] {
            let (i, d, c) = values(&invariant(inv), &drift(count), &canary(level));
            let verdict = Synthesizer::new().aggregate_values(&i, &d, &c);
            assert!(
                verdict.issues.iter().all(|issue| !issue.message.contains("inconsistent")),
                "{:?}",
                verdict.issues
            );
        }
    }
}
