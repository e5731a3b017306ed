//! # parsewatch-core
//!
//! Deterministic release monitoring for a journal extraction parser.
//!
//! There is no complete ground truth for what a journal "contains", so a new
//! parser version is judged by three independent detectors:
//! - **Invariants**: is every extraction well-formed, grounded and consistent?
//! - **Drift**: does the candidate behave like the baseline on the same journals?
//! - **Canary**: does it agree with hand labels where they exist?
//!
//! The [`Synthesizer`] folds the three reports into one action: `deploy`,
//! `human_review` or `rollback`.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same inputs and policy give the same reports (timestamps aside)
//! 2. **Total**: detectors and the synthesizer never fail on bad parser output
//! 3. **Conservative**: any unreadable or inconsistent signal counts as its worst case
//! 4. **Parallel-safe**: detectors share nothing and only read their inputs
//!
//! ## Example
//!
//! ```rust,ignore
//! use parsewatch_core::{run, DataDir, Policy};
//!
//! let inputs = DataDir::new("data").load_inputs("day0", "day1")?;
//! let outcome = run(&inputs, &Policy::default())?;
//! std::process::exit(outcome.verdict.exit_code);
//! ```

pub mod detectors;
pub mod evidence;
pub mod loader;
pub mod policy;
pub mod synthesizer;
pub mod types;

// Re-export main types at crate root
pub use detectors::{
    CanaryComparison, CanaryEvaluator, CanaryReport, Detector, DetectorKind, DriftAnalyzer,
    DriftReport, InvariantChecker, InvariantReport,
};
pub use evidence::{ground, normalize, Grounding};
pub use loader::{load_gold, load_journals, load_output_set, write_report, DataDir, LoadError};
pub use policy::{Policy, PolicyError};
pub use synthesizer::{FinalVerdict, Issue, IssueSeverity, Synthesizer};
pub use types::{
    Action, AlertLevel, Bound, CheckResult, CheckStatus, Domain, DriftMetricResult, DriftSeverity,
    ExtractedItem, Intensity, Journal, MonitorInputs, ParserOutputRecord, ParserOutputSet,
    Polarity,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can stop a monitoring run
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Input error: {0}")]
    Load(#[from] LoadError),
}

/// Everything one monitoring run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorOutcome {
    pub invariant: InvariantReport,
    pub drift: DriftReport,
    pub canary: CanaryReport,
    pub verdict: FinalVerdict,
}

/// Run all three detectors on `inputs` and synthesize a verdict.
///
/// The policy is validated first; after that nothing can fail.
pub fn run(inputs: &MonitorInputs, policy: &Policy) -> Result<MonitorOutcome, MonitorError> {
    policy.validate()?;

    let invariant = InvariantChecker::new(policy).run(inputs);
    let drift = DriftAnalyzer::new(policy).run(inputs);
    let canary = CanaryEvaluator::new(policy).run(inputs);
    let verdict = Synthesizer::new().aggregate(&invariant, &drift, &canary);

    Ok(MonitorOutcome {
        invariant,
        drift,
        canary,
        verdict,
    })
}

/// Load the conventional data layout under `data` and run.
pub fn run_dir(
    data: &DataDir,
    baseline: &str,
    candidate: &str,
    policy: &Policy,
) -> Result<MonitorOutcome, MonitorError> {
    let inputs = data.load_inputs(baseline, candidate)?;
    run(&inputs, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Tiers;
    use std::fs;
    use tempfile::TempDir;

    fn inputs(candidate_items: Vec<ExtractedItem>) -> MonitorInputs {
        let journal = Journal {
            id: "j1".to_string(),
            text: "Had a headache in the morning. Skipped lunch.".to_string(),
        };
        let canary = Journal {
            id: "c1".to_string(),
            text: "No fever but felt anxious.".to_string(),
        };
        let baseline_items = vec![
            ExtractedItem::new(Domain::Symptom, "headache", Polarity::Present, "had a headache"),
            ExtractedItem::new(Domain::Food, "lunch", Polarity::Absent, "skipped lunch"),
        ];
        let gold_items = vec![
            ExtractedItem::new(Domain::Symptom, "fever", Polarity::Absent, "no fever"),
            ExtractedItem::new(Domain::Emotion, "anxiety", Polarity::Present, "felt anxious"),
        ];

        let record = |id: &str, items: Vec<ExtractedItem>| ParserOutputRecord {
            journal_id: id.to_string(),
            items,
        };

        MonitorInputs {
            journals: [("j1".to_string(), journal), ("c1".to_string(), canary.clone())]
                .into_iter()
                .collect(),
            baseline: ParserOutputSet::from_records(
                "day0",
                [record("j1", baseline_items), record("c1", gold_items.clone())],
            ),
            candidate: ParserOutputSet::from_records(
                "day1",
                [record("j1", candidate_items), record("c1", gold_items.clone())],
            ),
            canary_journals: [("c1".to_string(), canary)].into_iter().collect(),
            gold: [("c1".to_string(), record("c1", gold_items))].into_iter().collect(),
        }
    }

    fn same_as_baseline() -> Vec<ExtractedItem> {
        vec![
            ExtractedItem::new(Domain::Symptom, "headache", Polarity::Present, "had a headache"),
            ExtractedItem::new(Domain::Food, "lunch", Polarity::Absent, "skipped lunch"),
        ]
    }

    #[test]
    fn test_clean_run_deploys() {
        let outcome = run(&inputs(same_as_baseline()), &Policy::default()).unwrap();

        assert_eq!(outcome.invariant.overall_status, CheckStatus::Pass);
        assert_eq!(outcome.drift.overall_drift_status, DriftSeverity::None);
        assert_eq!(outcome.canary.alert_level, AlertLevel::Pass);
        assert_eq!(outcome.verdict.action, Action::Deploy);
        assert_eq!(outcome.verdict.exit_code, 0);
    }

    #[test]
    fn test_contradiction_rolls_back() {
        let mut items = same_as_baseline();
        items.push(ExtractedItem::new(
            Domain::Symptom,
            "headache",
            Polarity::Absent,
            "HAD A HEADACHE",
        ));
        let outcome = run(&inputs(items), &Policy::default()).unwrap();

        assert_eq!(outcome.invariant.overall_status, CheckStatus::Fail);
        assert_eq!(outcome.verdict.action, Action::Rollback);
        assert!(outcome.verdict.critical_issues >= 1);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let mut policy = Policy::default();
        policy.drift.domain_mix = Tiers::new(50.0, 40.0, 30.0);

        let err = run(&inputs(same_as_baseline()), &policy).unwrap_err();
        assert!(matches!(err, MonitorError::Policy(_)));
    }

    #[test]
    fn test_run_dir_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        let journals = "{\"id\": \"j1\", \"text\": \"x\"}\n";
        fs::write(dir.path().join("journals.jsonl"), journals).unwrap();

        let err =
            run_dir(&DataDir::new(dir.path()), "day0", "day1", &Policy::default()).unwrap_err();
        assert!(matches!(err, MonitorError::Load(LoadError::Io { .. })));
    }
}
