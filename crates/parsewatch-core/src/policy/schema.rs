//! JSON Schema validation for policy documents.
//!
//! Policies are validated against schema/policy.schema.json before they are
//! deserialized, so typos in threshold names are rejected instead of silently
//! falling back to defaults.

use std::sync::OnceLock;

/// Embedded policy schema (loaded at compile time).
const POLICY_SCHEMA_JSON: &str = include_str!("../../../../schema/policy.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(POLICY_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(Clone::clone)
}

/// Validate a policy document against the schema.
///
/// Returns every violation, each with its location in the document.
pub fn validate_policy_schema(policy_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(policy_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_policy_passes_schema() {
        assert!(validate_policy_schema(&json!({})).is_ok());
    }

    #[test]
    fn test_full_policy_passes_schema() {
        let value = json!({
            "invariants": {
                "schema_validity_min": 100,
                "evidence_validity_min": 95,
                "hallucination_rate_max": 5,
                "contradictions_max": 0,
                "require_intensity": false
            },
            "drift": {
                "extraction_volume": { "minor": 20, "moderate": 35, "severe": 50 }
            },
            "canary": { "evidence_validity_severe": 80 },
            "reporting": { "max_samples": 3 }
        });
        assert!(validate_policy_schema(&value).is_ok());
    }

    #[test]
    fn test_percent_out_of_range_fails() {
        let value = json!({ "invariants": { "evidence_validity_min": 120 } });
        assert!(validate_policy_schema(&value).is_err());
    }

    #[test]
    fn test_partial_tiers_fail() {
        let value = json!({ "drift": { "domain_mix": { "minor": 10 } } });
        assert!(validate_policy_schema(&value).is_err());
    }

    #[test]
    fn test_unknown_section_fails_with_location() {
        let value = json!({ "alerts": {} });
        let errors = validate_policy_schema(&value).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_wrong_type_fails() {
        let value = json!({ "invariants": { "require_intensity": "yes" } });
        let errors = validate_policy_schema(&value).unwrap_err();
        assert!(errors[0].contains("/invariants/require_intensity"));
    }
}
