//! The three detectors.
//!
//! Each detector answers one question about a candidate parser run and
//! returns a freshly built report. Detectors share no state and never fail,
//! so they can run in any order or in parallel.

mod canary;
mod drift;
mod invariants;

pub use canary::{
    CanaryComparison, CanaryCondition, CanaryDelta, CanaryEvaluator, CanaryJournalDetail,
    CanaryMetrics, CanaryReport, CanaryVersionSummary, ConditionEffect,
};
pub use drift::{
    Coverage, DetailedMetric, DomainShares, DriftAnalyzer, DriftFlag, DriftMetrics, DriftReport,
    IntensityShares, VolumeStats,
};
pub use invariants::{InvariantChecker, InvariantChecks, InvariantReport, InvariantSummary};

use serde::{Deserialize, Serialize};

use crate::types::MonitorInputs;

/// Which detector produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Invariants,
    Drift,
    Canary,
}

impl DetectorKind {
    /// The question this detector answers.
    pub fn question(&self) -> &'static str {
        match self {
            DetectorKind::Invariants => {
                "Is every extraction well-formed, grounded in its journal, and self-consistent?"
            }
            DetectorKind::Drift => {
                "Does the candidate behave like the baseline on the same journals?"
            }
            DetectorKind::Canary => "Does the candidate agree with hand labels where they exist?",
        }
    }

    pub fn report_file(&self) -> &'static str {
        match self {
            DetectorKind::Invariants => "invariant_report.json",
            DetectorKind::Drift => "drift_report.json",
            DetectorKind::Canary => "canary_report.json",
        }
    }
}

/// A detector over one monitoring run's inputs.
pub trait Detector: Send + Sync {
    type Report: Send;

    fn kind(&self) -> DetectorKind;

    /// Run against the candidate described by `inputs`.
    fn run(&self, inputs: &MonitorInputs) -> Self::Report;

    fn question(&self) -> &'static str {
        self.kind().question()
    }
}

/// Keeps at most `limit` offending examples.
struct Samples {
    limit: usize,
    kept: Vec<String>,
}

impl Samples {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            kept: Vec::new(),
        }
    }

    fn push(&mut self, sample: impl FnOnce() -> String) {
        if self.kept.len() < self.limit {
            self.kept.push(sample());
        }
    }
}
