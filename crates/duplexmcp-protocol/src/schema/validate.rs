//! Coercing validation for declarative schemas.
//!
//! Validation walks the schema and the value together, collecting every
//! violation with a dotted path rather than stopping at the first. Temporal
//! fields are parsed (not merely shape-checked) so malformed dates fail here
//! instead of inside handlers; defaults are substituted for absent fields.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{FieldSpec, FieldType, Schema};
use crate::error::{Error, Result, SchemaViolation};

/// A compiled validator for one [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: Schema,
    patterns: HashMap<String, Regex>,
}

impl SchemaValidator {
    /// Compile `schema`, pre-building every regex it declares.
    pub fn compile(schema: Schema) -> Result<Self> {
        let mut patterns = HashMap::new();
        collect_patterns(&schema, &mut patterns)?;
        Ok(Self { schema, patterns })
    }

    /// Validate and coerce `value`.
    ///
    /// On success returns the coerced object (defaults filled in). On
    /// failure returns every violation found, each with a dotted path.
    pub fn validate(&self, value: &Value) -> std::result::Result<Value, Vec<SchemaViolation>> {
        let mut errors = Vec::new();
        let coerced = self.check_object(&self.schema, value, "", &mut errors);
        if errors.is_empty() {
            Ok(coerced)
        } else {
            Err(errors)
        }
    }

    fn check_object(
        &self,
        schema: &Schema,
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaViolation>,
    ) -> Value {
        let Some(object) = value.as_object() else {
            push(errors, path, "expected object");
            return Value::Null;
        };

        let mut coerced = Map::new();
        for (name, spec) in schema.iter() {
            let field_path = join(path, name);
            match object.get(name) {
                Some(v) => {
                    let out = self.check_field(spec, v, &field_path, errors);
                    coerced.insert(name.to_string(), out);
                }
                None => {
                    if let Some(default) = &spec.default {
                        coerced.insert(name.to_string(), default.clone());
                    } else if spec.required {
                        push(errors, &field_path, "is required");
                    }
                }
            }
        }

        for (name, v) in object {
            if schema.iter().any(|(declared, _)| declared == name) {
                continue;
            }
            if schema.deny_unknown {
                push(errors, &join(path, name), "is not a declared field");
            } else {
                // Unknown fields pass through untouched.
                coerced.insert(name.clone(), v.clone());
            }
        }
        Value::Object(coerced)
    }

    fn check_field(
        &self,
        spec: &FieldSpec,
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaViolation>,
    ) -> Value {
        let before = errors.len();
        let coerced = self.check_type(spec, value, path, errors);
        // Constraint checks only make sense on a value of the right type.
        if errors.len() == before {
            self.check_constraints(spec, value, path, errors);
        }
        coerced
    }

    fn check_type(
        &self,
        spec: &FieldSpec,
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaViolation>,
    ) -> Value {
        match &spec.ty {
            FieldType::Any => value.clone(),
            FieldType::String => {
                if !value.is_string() {
                    push(errors, path, "expected string");
                }
                value.clone()
            }
            FieldType::Integer => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    push(errors, path, "expected integer");
                }
                value.clone()
            }
            FieldType::Float => {
                if !value.is_number() {
                    push(errors, path, "expected number");
                }
                value.clone()
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    push(errors, path, "expected boolean");
                }
                value.clone()
            }
            FieldType::Date => {
                coerce_temporal(value, path, errors, "expected ISO 8601 date", |s| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                })
            }
            FieldType::Time => {
                coerce_temporal(value, path, errors, "expected ISO 8601 time", |s| {
                    NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()
                })
            }
            FieldType::DateTime => coerce_temporal(
                value,
                path,
                errors,
                "expected ISO 8601 datetime with offset",
                |s| DateTime::parse_from_rfc3339(s).is_ok(),
            ),
            FieldType::NaiveDateTime => {
                if let Some(s) = value.as_str() {
                    if has_utc_offset(s) {
                        push(errors, path, "must not carry a UTC offset");
                    } else if NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_err() {
                        push(errors, path, "expected ISO 8601 datetime without offset");
                    }
                } else {
                    push(errors, path, "expected ISO 8601 datetime without offset");
                }
                value.clone()
            }
            FieldType::Enum { values, base } => {
                let base_spec = FieldSpec::of_type((**base).clone());
                let mut scratch = Vec::new();
                self.check_type(&base_spec, value, path, &mut scratch);
                if !scratch.is_empty() {
                    errors.extend(scratch);
                } else if !values.contains(value) {
                    push(errors, path, "is not an allowed value");
                }
                value.clone()
            }
            FieldType::List(item) => {
                let Some(items) = value.as_array() else {
                    push(errors, path, "expected list");
                    return value.clone();
                };
                let coerced = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.check_field(item, v, &join(path, &i.to_string()), errors))
                    .collect();
                Value::Array(coerced)
            }
            FieldType::Object(schema) => self.check_object(schema, value, path, errors),
            FieldType::Either(a, b) => self.check_alternatives(&[a, b], value, path, errors),
            FieldType::OneOf(specs) => {
                let refs: Vec<&FieldSpec> = specs.iter().collect();
                self.check_alternatives(&refs, value, path, errors)
            }
            FieldType::Literal(expected) => {
                if value != expected {
                    push(errors, path, "does not match the expected literal");
                }
                value.clone()
            }
        }
    }

    fn check_alternatives(
        &self,
        specs: &[&FieldSpec],
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaViolation>,
    ) -> Value {
        for spec in specs {
            let mut scratch = Vec::new();
            let coerced = self.check_field(spec, value, path, &mut scratch);
            if scratch.is_empty() {
                return coerced;
            }
        }
        push(errors, path, "does not match any allowed type");
        value.clone()
    }

    fn check_constraints(
        &self,
        spec: &FieldSpec,
        value: &Value,
        path: &str,
        errors: &mut Vec<SchemaViolation>,
    ) {
        if let Some(pattern) = &spec.pattern
            && let Some(s) = value.as_str()
            && let Some(regex) = self.patterns.get(pattern)
            && !regex.is_match(s)
        {
            push(errors, path, format!("does not match pattern {pattern}"));
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = spec.min_length
                && len < min
            {
                push(errors, path, format!("length {len} is below minimum {min}"));
            }
            if let Some(max) = spec.max_length
                && len > max
            {
                push(errors, path, format!("length {len} exceeds maximum {max}"));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = spec.minimum
                && n < min
            {
                push(errors, path, format!("{n} is below minimum {min}"));
            }
            if let Some(max) = spec.maximum
                && n > max
            {
                push(errors, path, format!("{n} exceeds maximum {max}"));
            }
            if let Some(min) = spec.exclusive_minimum
                && n <= min
            {
                push(errors, path, format!("{n} must be greater than {min}"));
            }
            if let Some(max) = spec.exclusive_maximum
                && n >= max
            {
                push(errors, path, format!("{n} must be less than {max}"));
            }
        }
    }
}

impl FieldSpec {
    fn of_type(ty: FieldType) -> Self {
        let mut spec = FieldSpec::any();
        spec.ty = ty;
        spec
    }
}

fn coerce_temporal(
    value: &Value,
    path: &str,
    errors: &mut Vec<SchemaViolation>,
    message: &str,
    parses: impl Fn(&str) -> bool,
) -> Value {
    match value.as_str() {
        Some(s) if parses(s) => {}
        _ => push(errors, path, message),
    }
    value.clone()
}

/// True when the string carries a trailing `Z` or an explicit `±HH:MM`
/// offset.
fn has_utc_offset(s: &str) -> bool {
    if s.ends_with('Z') || s.ends_with('z') {
        return true;
    }
    if s.len() < 6 {
        return false;
    }
    let Some(tail) = s.get(s.len() - 6..) else {
        return false;
    };
    let mut chars = tail.chars();
    matches!(chars.next(), Some('+' | '-'))
        && tail[1..]
            .chars()
            .enumerate()
            .all(|(i, c)| if i == 2 { c == ':' } else { c.is_ascii_digit() })
}

fn collect_patterns(schema: &Schema, out: &mut HashMap<String, Regex>) -> Result<()> {
    for (_, spec) in schema.iter() {
        collect_spec_patterns(spec, out)?;
    }
    Ok(())
}

fn collect_spec_patterns(spec: &FieldSpec, out: &mut HashMap<String, Regex>) -> Result<()> {
    if let Some(pattern) = &spec.pattern
        && !out.contains_key(pattern)
    {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::InvalidParams(format!("invalid pattern {pattern}: {e}")))?;
        out.insert(pattern.clone(), regex);
    }
    match &spec.ty {
        FieldType::List(item) => collect_spec_patterns(item, out)?,
        FieldType::Object(schema) => collect_patterns(schema, out)?,
        FieldType::Either(a, b) => {
            collect_spec_patterns(a, out)?;
            collect_spec_patterns(b, out)?;
        }
        FieldType::OneOf(specs) => {
            for s in specs {
                collect_spec_patterns(s, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn push(errors: &mut Vec<SchemaViolation>, path: &str, message: impl Into<String>) {
    errors.push(SchemaViolation {
        path: path.to_string(),
        message: message.into(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(schema: Schema) -> SchemaValidator {
        schema.validator().unwrap()
    }

    #[test]
    fn required_and_defaults() {
        let v = validator(
            Schema::new()
                .field("name", FieldSpec::string().required())
                .field("count", FieldSpec::integer().default_value(json!(1))),
        );

        let out = v.validate(&json!({"name": "x"})).unwrap();
        assert_eq!(out, json!({"name": "x", "count": 1}));

        let errs = v.validate(&json!({})).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "name");
        assert_eq!(errs[0].message, "is required");
    }

    #[test]
    fn nested_paths_are_dotted() {
        let v = validator(Schema::new().field(
            "point",
            FieldSpec::object(
                Schema::new()
                    .field("x", FieldSpec::float().required())
                    .field("y", FieldSpec::float().required()),
            )
            .required(),
        ));

        let errs = v.validate(&json!({"point": {"x": "no"}})).unwrap_err();
        let paths: Vec<_> = errs.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"point.x"));
        assert!(paths.contains(&"point.y"));
    }

    #[test]
    fn list_paths_carry_index() {
        let v = validator(
            Schema::new().field("tags", FieldSpec::list(FieldSpec::string()).required()),
        );
        let errs = v.validate(&json!({"tags": ["ok", 3]})).unwrap_err();
        assert_eq!(errs[0].path, "tags.1");
        assert_eq!(errs[0].message, "expected string");
    }

    #[test]
    fn temporal_coercions() {
        let v = validator(
            Schema::new()
                .field("on", FieldSpec::date())
                .field("at", FieldSpec::datetime())
                .field("local", FieldSpec::naive_datetime()),
        );

        assert!(
            v.validate(&json!({
                "on": "2026-08-01",
                "at": "2026-08-01T12:00:00Z",
                "local": "2026-08-01T12:00:00",
            }))
            .is_ok()
        );

        let errs = v.validate(&json!({"on": "08/01/2026"})).unwrap_err();
        assert_eq!(errs[0].path, "on");
    }

    #[test]
    fn naive_datetime_rejects_offsets() {
        let v = validator(Schema::new().field("local", FieldSpec::naive_datetime()));

        for bad in ["2026-08-01T12:00:00Z", "2026-08-01T12:00:00+02:00", "2026-08-01T12:00:00-05:30"] {
            let errs = v.validate(&json!({"local": bad})).unwrap_err();
            assert_eq!(errs[0].message, "must not carry a UTC offset", "{bad}");
        }
    }

    #[test]
    fn enum_membership() {
        let v = validator(
            Schema::new().field("units", FieldSpec::enumeration(["metric", "imperial"])),
        );
        assert!(v.validate(&json!({"units": "metric"})).is_ok());
        let errs = v.validate(&json!({"units": "kelvin"})).unwrap_err();
        assert_eq!(errs[0].message, "is not an allowed value");
    }

    #[test]
    fn either_takes_first_match() {
        let v = validator(Schema::new().field(
            "id",
            FieldSpec::either(FieldSpec::string(), FieldSpec::integer()).required(),
        ));
        assert!(v.validate(&json!({"id": "abc"})).is_ok());
        assert!(v.validate(&json!({"id": 42})).is_ok());
        let errs = v.validate(&json!({"id": true})).unwrap_err();
        assert_eq!(errs[0].message, "does not match any allowed type");
    }

    #[test]
    fn literal_pinning() {
        let v = validator(Schema::new().field("kind", FieldSpec::literal(json!("weather"))));
        assert!(v.validate(&json!({"kind": "weather"})).is_ok());
        assert!(v.validate(&json!({"kind": "news"})).is_err());
    }

    #[test]
    fn pattern_and_bounds() {
        let v = validator(
            Schema::new()
                .field("code", FieldSpec::string().pattern("^[A-Z]{3}$"))
                .field("ratio", FieldSpec::float().exclusive_minimum(0.0).maximum(1.0)),
        );
        assert!(v.validate(&json!({"code": "NYC", "ratio": 0.5})).is_ok());

        let errs = v.validate(&json!({"code": "nyc", "ratio": 0.0})).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].path, "code");
        assert_eq!(errs[1].path, "ratio");
    }

    #[test]
    fn unknown_fields_pass_through_unless_closed() {
        let open = validator(Schema::new().field("a", FieldSpec::string()));
        let out = open.validate(&json!({"a": "x", "b": 1})).unwrap();
        assert_eq!(out["b"], 1);

        let closed = validator(Schema::new().field("a", FieldSpec::string()).closed());
        let errs = closed.validate(&json!({"a": "x", "b": 1})).unwrap_err();
        assert_eq!(errs[0].path, "b");
    }

    #[test]
    fn invalid_pattern_fails_compilation() {
        let schema = Schema::new().field("x", FieldSpec::string().pattern("(unclosed"));
        assert!(schema.validator().is_err());
    }
}
