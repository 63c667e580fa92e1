//! Declarative parameter schemas.
//!
//! A [`Schema`] is an ordered mapping of field names to [`FieldSpec`]s built
//! with plain constructor functions. From one schema the runtime derives
//! both the JSON Schema document advertised in listings
//! ([`Schema::to_json_schema`]) and a coercing validator
//! ([`Schema::validator`]) that reports path-qualified errors.
//!
//! ```
//! use duplexmcp_protocol::schema::{FieldSpec, Schema};
//!
//! let schema = Schema::new()
//!     .field("location", FieldSpec::string().required().description("City name"))
//!     .field("units", FieldSpec::enumeration(["metric", "imperial"]));
//!
//! let json = schema.to_json_schema();
//! assert_eq!(json["type"], "object");
//! assert_eq!(json["required"][0], "location");
//! ```

mod json_schema;
mod output;
mod validate;

pub use output::OutputValidator;
pub use validate::SchemaValidator;

use serde_json::Value;

/// The type half of a field specification.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Integer number
    Integer,
    /// Any number
    Float,
    /// Boolean
    Boolean,
    /// Anything
    Any,
    /// ISO 8601 calendar date (`2026-08-01`)
    Date,
    /// ISO 8601 time of day (`13:45:00`)
    Time,
    /// ISO 8601 datetime with offset (`2026-08-01T13:45:00Z`)
    DateTime,
    /// ISO 8601 datetime **without** an offset; values bearing a trailing
    /// `Z` or an explicit `±HH:MM` offset are rejected
    NaiveDateTime,
    /// Closed set of allowed values
    Enum {
        /// Allowed values
        values: Vec<Value>,
        /// Base type the values belong to (string unless stated)
        base: Box<FieldType>,
    },
    /// Homogeneous list
    List(Box<FieldSpec>),
    /// Nested object
    Object(Schema),
    /// First-match of two alternatives
    Either(Box<FieldSpec>, Box<FieldSpec>),
    /// First-match of many alternatives
    OneOf(Vec<FieldSpec>),
    /// Exactly one value
    Literal(Value),
}

/// One field's specification: its type plus metadata and constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// The field type
    pub ty: FieldType,
    /// Whether the field must be present
    pub required: bool,
    /// Value substituted when the field is absent
    pub default: Option<Value>,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON Schema `format` annotation
    pub format: Option<String>,
    /// Regex the (string) value must match
    pub pattern: Option<String>,
    /// Inclusive lower bound for numbers
    pub minimum: Option<f64>,
    /// Inclusive upper bound for numbers
    pub maximum: Option<f64>,
    /// Exclusive lower bound for numbers
    pub exclusive_minimum: Option<f64>,
    /// Exclusive upper bound for numbers
    pub exclusive_maximum: Option<f64>,
    /// Minimum length for strings and lists
    pub min_length: Option<usize>,
    /// Maximum length for strings and lists
    pub max_length: Option<usize>,
    /// Raw override for the emitted JSON Schema `type`
    pub type_override: Option<Value>,
}

impl FieldSpec {
    fn of(ty: FieldType) -> Self {
        Self {
            ty,
            required: false,
            default: None,
            description: None,
            format: None,
            pattern: None,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
            min_length: None,
            max_length: None,
            type_override: None,
        }
    }

    /// A string field.
    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    /// An integer field.
    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    /// A number field.
    pub fn float() -> Self {
        Self::of(FieldType::Float)
    }

    /// A boolean field.
    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    /// A field accepting any JSON value.
    pub fn any() -> Self {
        Self::of(FieldType::Any)
    }

    /// An ISO 8601 date field.
    pub fn date() -> Self {
        Self::of(FieldType::Date)
    }

    /// An ISO 8601 time field.
    pub fn time() -> Self {
        Self::of(FieldType::Time)
    }

    /// An ISO 8601 datetime field (offset required).
    pub fn datetime() -> Self {
        Self::of(FieldType::DateTime)
    }

    /// An ISO 8601 datetime field (offset forbidden).
    pub fn naive_datetime() -> Self {
        Self::of(FieldType::NaiveDateTime)
    }

    /// A string-based enum field.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::of(FieldType::Enum {
            values: values.into_iter().map(|s| Value::String(s.into())).collect(),
            base: Box::new(FieldType::String),
        })
    }

    /// An enum field over arbitrary values with an explicit base type.
    pub fn enumeration_of(values: Vec<Value>, base: FieldType) -> Self {
        Self::of(FieldType::Enum {
            values,
            base: Box::new(base),
        })
    }

    /// A list field.
    pub fn list(item: FieldSpec) -> Self {
        Self::of(FieldType::List(Box::new(item)))
    }

    /// A nested object field.
    pub fn object(schema: Schema) -> Self {
        Self::of(FieldType::Object(schema))
    }

    /// A field matching one of two alternatives, tried in order.
    pub fn either(a: FieldSpec, b: FieldSpec) -> Self {
        Self::of(FieldType::Either(Box::new(a), Box::new(b)))
    }

    /// A field matching one of many alternatives, tried in order.
    pub fn one_of<I: IntoIterator<Item = FieldSpec>>(specs: I) -> Self {
        Self::of(FieldType::OneOf(specs.into_iter().collect()))
    }

    /// A field pinned to exactly one value.
    pub fn literal(value: Value) -> Self {
        Self::of(FieldType::Literal(value))
    }

    /// Mark the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Substitute `value` when the field is absent.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Attach a description.
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Attach a `format` annotation.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Require the value to match a regex.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Inclusive lower bound.
    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }

    /// Inclusive upper bound.
    pub fn maximum(mut self, max: f64) -> Self {
        self.maximum = Some(max);
        self
    }

    /// Exclusive lower bound.
    pub fn exclusive_minimum(mut self, min: f64) -> Self {
        self.exclusive_minimum = Some(min);
        self
    }

    /// Exclusive upper bound.
    pub fn exclusive_maximum(mut self, max: f64) -> Self {
        self.exclusive_maximum = Some(max);
        self
    }

    /// Minimum string/list length.
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Maximum string/list length.
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Override the emitted JSON Schema `type` keyword.
    pub fn type_override(mut self, ty: Value) -> Self {
        self.type_override = Some(ty);
        self
    }
}

/// An ordered field mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub(crate) fields: Vec<(String, FieldSpec)>,
    pub(crate) deny_unknown: bool,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Declaration order is preserved in the emitted JSON
    /// Schema.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Reject fields not declared in the schema
    /// (`additionalProperties: false`).
    pub fn closed(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    /// Iterate fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compile a coercing validator for this schema.
    ///
    /// Fails only when a declared `pattern` is not a valid regex.
    pub fn validator(&self) -> crate::error::Result<SchemaValidator> {
        SchemaValidator::compile(self.clone())
    }
}
