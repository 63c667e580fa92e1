//! Compiled validators for tool output schemas.
//!
//! Output schemas are arbitrary JSON Schema documents supplied by tool
//! authors, so they are compiled with the `jsonschema` crate rather than the
//! declarative model. Instance paths are re-joined dotted to match the
//! rest of the runtime's error reporting.

use serde_json::Value;

use crate::error::{Error, Result, SchemaViolation};

/// A compiled tool output schema.
pub struct OutputValidator {
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for OutputValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputValidator").finish_non_exhaustive()
    }
}

impl OutputValidator {
    /// Compile a JSON Schema document.
    pub fn compile(schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::InvalidParams(format!("invalid output schema: {e}")))?;
        Ok(Self { validator })
    }

    /// Validate structured tool output.
    ///
    /// Returns every violation, each with a dotted instance path.
    pub fn validate(&self, instance: &Value) -> std::result::Result<(), Vec<SchemaViolation>> {
        let errors: Vec<SchemaViolation> = self
            .validator
            .iter_errors(instance)
            .map(|e| SchemaViolation {
                path: dotted_path(&e.instance_path().to_string()),
                message: e.to_string(),
            })
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// True when `instance` satisfies the schema.
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }
}

/// Convert a JSON Pointer (`/a/0/b`) to the dotted form (`a.0.b`) used by
/// schema violations.
fn dotted_path(pointer: &str) -> String {
    pointer
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "required": ["temperature", "conditions"],
            "properties": {
                "temperature": {"type": "number"},
                "conditions": {"type": "string"},
            },
        })
    }

    #[test]
    fn valid_output_passes() {
        let v = OutputValidator::compile(&weather_schema()).unwrap();
        assert!(
            v.validate(&json!({"temperature": 72.5, "conditions": "sunny"}))
                .is_ok()
        );
    }

    #[test]
    fn wrong_type_reports_dotted_path() {
        let v = OutputValidator::compile(&weather_schema()).unwrap();
        let errs = v
            .validate(&json!({"temperature": "hot", "conditions": "sunny"}))
            .unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "temperature");
    }

    #[test]
    fn missing_required_field_fails() {
        let v = OutputValidator::compile(&weather_schema()).unwrap();
        assert!(v.validate(&json!({"temperature": 1.0})).is_err());
        assert!(!v.is_valid(&json!({})));
    }

    #[test]
    fn nested_paths() {
        let v = OutputValidator::compile(&json!({
            "type": "object",
            "properties": {
                "outer": {
                    "type": "object",
                    "properties": {"inner": {"type": "integer"}},
                },
            },
        }))
        .unwrap();
        let errs = v.validate(&json!({"outer": {"inner": "x"}})).unwrap_err();
        assert_eq!(errs[0].path, "outer.inner");
    }

    #[test]
    fn malformed_schema_fails_compilation() {
        assert!(OutputValidator::compile(&json!({"type": 42})).is_err());
    }
}
