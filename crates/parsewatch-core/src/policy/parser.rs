//! Policy parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_policy_schema;
use crate::types::DriftSeverity;

/// Errors that can occur when loading a policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Policy does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Policy validation failed: {0}")]
    ValidationError(String),
}

/// Severity bounds for one drift metric.
///
/// A magnitude strictly above a bound enters that tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tiers {
    pub minor: f64,
    pub moderate: f64,
    pub severe: f64,
}

impl Tiers {
    pub const fn new(minor: f64, moderate: f64, severe: f64) -> Self {
        Self {
            minor,
            moderate,
            severe,
        }
    }

    /// Classify the magnitude of a delta.
    pub fn classify(&self, delta: f64) -> DriftSeverity {
        let magnitude = delta.abs();
        if magnitude > self.severe {
            DriftSeverity::Severe
        } else if magnitude > self.moderate {
            DriftSeverity::Moderate
        } else if magnitude > self.minor {
            DriftSeverity::Minor
        } else {
            DriftSeverity::None
        }
    }

    fn validate(&self, name: &str) -> Result<(), PolicyError> {
        let finite = self.minor.is_finite() && self.moderate.is_finite() && self.severe.is_finite();
        let increasing = self.minor < self.moderate && self.moderate < self.severe;
        if !finite || self.minor < 0.0 || !increasing {
            return Err(PolicyError::ValidationError(format!(
                "drift.{name} tiers must satisfy 0 <= minor < moderate < severe (got {}/{}/{})",
                self.minor, self.moderate, self.severe
            )));
        }
        Ok(())
    }
}

/// Hard limits for a single parser run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvariantThresholds {
    /// Minimum % of schema-valid items
    pub schema_validity_min: f64,

    /// Minimum % of items with verbatim evidence
    pub evidence_validity_min: f64,

    /// Maximum % of items with fabricated evidence
    pub hallucination_rate_max: f64,

    /// Maximum number of contradicting evidence groups
    pub contradictions_max: usize,

    /// Whether a missing `intensity` is a schema violation
    pub require_intensity: bool,
}

impl Default for InvariantThresholds {
    fn default() -> Self {
        Self {
            schema_validity_min: 100.0,
            evidence_validity_min: 95.0,
            hallucination_rate_max: 5.0,
            contradictions_max: 0,
            require_intensity: false,
        }
    }
}

/// Severity tiers for each drift metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    /// Relative change (%) of mean items per journal
    pub extraction_volume: Tiers,

    /// Percentage-point change of `unknown` polarity share
    pub uncertainty_rate: Tiers,

    /// Percentage-point change of `high` intensity share
    pub high_intensity: Tiers,

    /// Percentage-point change of any single domain's share
    pub domain_mix: Tiers,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            extraction_volume: Tiers::new(20.0, 35.0, 50.0),
            uncertainty_rate: Tiers::new(15.0, 25.0, 40.0),
            high_intensity: Tiers::new(25.0, 30.0, 40.0),
            domain_mix: Tiers::new(30.0, 40.0, 50.0),
        }
    }
}

/// Canary cutoffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryThresholds {
    /// Evidence validity needed for PASS
    pub evidence_validity_min: f64,

    /// Evidence validity below this forces ROLLBACK
    pub evidence_validity_severe: f64,

    /// Polarity agreement on matched items needed for PASS
    pub polarity_correctness_min: f64,

    /// Contradictions above this force ROLLBACK
    pub contradictions_max: usize,
}

impl Default for CanaryThresholds {
    fn default() -> Self {
        Self {
            evidence_validity_min: 95.0,
            evidence_validity_severe: 80.0,
            polarity_correctness_min: 90.0,
            contradictions_max: 0,
        }
    }
}

/// Report shaping options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingOptions {
    /// Offending examples kept per check
    pub max_samples: usize,
}

impl Default for ReportingOptions {
    fn default() -> Self {
        Self { max_samples: 10 }
    }
}

/// A complete monitoring policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub invariants: InvariantThresholds,
    pub drift: DriftThresholds,
    pub canary: CanaryThresholds,
    pub reporting: ReportingOptions,
}

impl Policy {
    /// Parse a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a policy from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a policy file; `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, PolicyError> {
        // An empty document means "all defaults"
        let value = if value.is_null() {
            serde_json::json!({})
        } else {
            value
        };

        validate_policy_schema(&value).map_err(PolicyError::SchemaError)?;

        let policy: Policy = serde_json::from_value(value)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check the policy for internal consistency.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.drift.extraction_volume.validate("extraction_volume")?;
        self.drift.uncertainty_rate.validate("uncertainty_rate")?;
        self.drift.high_intensity.validate("high_intensity")?;
        self.drift.domain_mix.validate("domain_mix")?;

        let percents = [
            ("invariants.schema_validity_min", self.invariants.schema_validity_min),
            ("invariants.evidence_validity_min", self.invariants.evidence_validity_min),
            ("invariants.hallucination_rate_max", self.invariants.hallucination_rate_max),
            ("canary.evidence_validity_min", self.canary.evidence_validity_min),
            ("canary.evidence_validity_severe", self.canary.evidence_validity_severe),
            ("canary.polarity_correctness_min", self.canary.polarity_correctness_min),
        ];
        for (name, value) in percents {
            if !(0.0..=100.0).contains(&value) {
                return Err(PolicyError::ValidationError(format!(
                    "{name} must be within 0..=100 (got {value})"
                )));
            }
        }

        if self.canary.evidence_validity_severe > self.canary.evidence_validity_min {
            return Err(PolicyError::ValidationError(format!(
                "canary.evidence_validity_severe ({}) must not exceed canary.evidence_validity_min ({})",
                self.canary.evidence_validity_severe, self.canary.evidence_validity_min
            )));
        }

        Ok(())
    }
}
