//! Monitoring policy: every threshold the detectors use.
//!
//! Policies are structured data validated against JSON Schema, then checked
//! for internal consistency. Anything not set falls back to the defaults.

mod parser;
mod schema;

pub use parser::{
    CanaryThresholds, DriftThresholds, InvariantThresholds, Policy, PolicyError,
    ReportingOptions, Tiers,
};
pub use schema::validate_policy_schema;
