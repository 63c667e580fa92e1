//! JSON Schema emission for declarative schemas.

use serde_json::{Map, Value, json};

use super::{FieldSpec, FieldType, Schema};

impl Schema {
    /// Emit a JSON Schema object for this schema.
    ///
    /// Produces `type`, `properties` (declaration order preserved) and
    /// `required`; `additionalProperties: false` appears only for closed
    /// schemas.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.fields {
            properties.insert(name.clone(), spec.to_json_schema());
            if spec.required {
                required.push(Value::String(name.clone()));
            }
        }

        let mut out = Map::new();
        out.insert("type".into(), json!("object"));
        out.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            out.insert("required".into(), Value::Array(required));
        }
        if self.deny_unknown {
            out.insert("additionalProperties".into(), json!(false));
        }
        Value::Object(out)
    }
}

impl FieldSpec {
    /// Emit the JSON Schema fragment for this field.
    ///
    /// Unknown or unconstrained specs emit `{}` (open).
    pub fn to_json_schema(&self) -> Value {
        let mut out = match &self.ty {
            FieldType::String => type_object("string"),
            FieldType::Integer => type_object("integer"),
            FieldType::Float => type_object("number"),
            FieldType::Boolean => type_object("boolean"),
            FieldType::Any => Map::new(),
            FieldType::Date => formatted_string("date"),
            FieldType::Time => formatted_string("time"),
            FieldType::DateTime => formatted_string("date-time"),
            FieldType::NaiveDateTime => formatted_string("date-time"),
            FieldType::Enum { values, base } => {
                let mut m = match base.as_ref() {
                    FieldType::Integer => type_object("integer"),
                    FieldType::Float => type_object("number"),
                    _ => type_object("string"),
                };
                m.insert("enum".into(), Value::Array(values.clone()));
                m
            }
            FieldType::List(item) => {
                let mut m = type_object("array");
                m.insert("items".into(), item.to_json_schema());
                m
            }
            FieldType::Object(schema) => {
                let Value::Object(m) = schema.to_json_schema() else {
                    unreachable!("schema emission always yields an object");
                };
                m
            }
            FieldType::Either(a, b) => {
                let mut m = Map::new();
                m.insert(
                    "anyOf".into(),
                    Value::Array(vec![a.to_json_schema(), b.to_json_schema()]),
                );
                m
            }
            FieldType::OneOf(specs) => {
                let mut m = Map::new();
                m.insert(
                    "anyOf".into(),
                    Value::Array(specs.iter().map(FieldSpec::to_json_schema).collect()),
                );
                m
            }
            FieldType::Literal(value) => {
                let mut m = Map::new();
                m.insert("const".into(), value.clone());
                m
            }
        };

        if let Some(ty) = &self.type_override {
            out.insert("type".into(), ty.clone());
        }
        if let Some(text) = &self.description {
            out.insert("description".into(), json!(text));
        }
        if let Some(format) = &self.format {
            out.insert("format".into(), json!(format));
        }
        if let Some(pattern) = &self.pattern {
            out.insert("pattern".into(), json!(pattern));
        }
        if let Some(min) = self.minimum {
            out.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            out.insert("maximum".into(), json!(max));
        }
        if let Some(min) = self.exclusive_minimum {
            out.insert("exclusiveMinimum".into(), json!(min));
        }
        if let Some(max) = self.exclusive_maximum {
            out.insert("exclusiveMaximum".into(), json!(max));
        }
        if let Some(len) = self.min_length {
            out.insert("minLength".into(), json!(len));
        }
        if let Some(len) = self.max_length {
            out.insert("maxLength".into(), json!(len));
        }
        if let Some(default) = &self.default {
            out.insert("default".into(), default.clone());
        }
        Value::Object(out)
    }
}

fn type_object(ty: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("type".into(), json!(ty));
    m
}

fn formatted_string(format: &str) -> Map<String, Value> {
    let mut m = type_object("string");
    m.insert("format".into(), json!(format));
    m
}

#[cfg(test)]
mod tests {
    use super::super::{FieldSpec, Schema};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn object_schema_shape() {
        let schema = Schema::new()
            .field(
                "location",
                FieldSpec::string().required().description("City name"),
            )
            .field("days", FieldSpec::integer().minimum(1.0).maximum(14.0));

        assert_eq!(
            schema.to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "City name"},
                    "days": {"type": "integer", "minimum": 1.0, "maximum": 14.0},
                },
                "required": ["location"],
            })
        );
    }

    #[test]
    fn enum_and_list_emission() {
        let schema = Schema::new()
            .field("units", FieldSpec::enumeration(["metric", "imperial"]))
            .field(
                "tags",
                FieldSpec::list(FieldSpec::string().min_length(1)).max_length(8),
            );

        let v = schema.to_json_schema();
        assert_eq!(v["properties"]["units"]["enum"], json!(["metric", "imperial"]));
        assert_eq!(v["properties"]["tags"]["type"], "array");
        assert_eq!(v["properties"]["tags"]["items"]["minLength"], 1);
        assert_eq!(v["properties"]["tags"]["maxLength"], 8);
    }

    #[test]
    fn temporal_fields_carry_formats() {
        let schema = Schema::new()
            .field("on", FieldSpec::date())
            .field("at", FieldSpec::datetime());
        let v = schema.to_json_schema();
        assert_eq!(v["properties"]["on"]["format"], "date");
        assert_eq!(v["properties"]["at"]["format"], "date-time");
    }

    #[test]
    fn either_emits_any_of() {
        let schema = Schema::new().field(
            "id",
            FieldSpec::either(FieldSpec::string(), FieldSpec::integer()),
        );
        let v = schema.to_json_schema();
        assert_eq!(v["properties"]["id"]["anyOf"][0]["type"], "string");
        assert_eq!(v["properties"]["id"]["anyOf"][1]["type"], "integer");
    }

    #[test]
    fn any_field_is_open() {
        let schema = Schema::new().field("extra", FieldSpec::any());
        assert_eq!(schema.to_json_schema()["properties"]["extra"], json!({}));
    }

    #[test]
    fn closed_schema_denies_unknown() {
        let v = Schema::new()
            .field("x", FieldSpec::string())
            .closed()
            .to_json_schema();
        assert_eq!(v["additionalProperties"], json!(false));
    }

    #[test]
    fn type_override_wins() {
        let v = Schema::new()
            .field("raw", FieldSpec::string().type_override(json!(["string", "null"])))
            .to_json_schema();
        assert_eq!(v["properties"]["raw"]["type"], json!(["string", "null"]));
    }
}
