//! Lazy field handles and pre-built CEL values.
//!
//! A [`Reference`] stands in for a resource field whose value is only known
//! once the orchestrator evaluates the graph. A [`CelExpression`] is an
//! already-lowered CEL string. Both carry an opaque brand through
//! serialization so they can never be mistaken for plain data on the wire.

use crate::error::CelforgeError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Sentinel resource id naming the graph's declared input schema.
pub const SCHEMA_ID: &str = "__schema__";

/// Brand tag written to the wire for references.
pub const REFERENCE_BRAND: &str = "resource-reference";

/// Brand tag written to the wire for CEL expressions.
pub const CEL_BRAND: &str = "cel-expression";

/// Coarse value type carried as metadata on references and CEL expressions.
///
/// Never used to re-derive what a value is; only to pick coercions when
/// emitting CEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeHint {
    String,
    Number,
    Boolean,
    Object,
    List,
}

impl TypeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::List => "list",
        }
    }
}

/// A lazy handle to a field of a resource (or of the input schema).
///
/// Identity is the `(resource_id, field_path)` pair; the type hint is
/// metadata only and never participates in equality or hashing.
#[derive(Debug, Clone)]
pub struct Reference {
    resource_id: String,
    field_path: String,
    type_hint: Option<TypeHint>,
}

impl Reference {
    /// Build a reference to a named resource's field.
    ///
    /// Validates the invariants: both parts non-empty, no leading/trailing
    /// dot, no consecutive dots in the path.
    pub fn new(
        resource_id: impl Into<String>,
        field_path: impl Into<String>,
    ) -> Result<Self, CelforgeError> {
        let resource_id = resource_id.into();
        let field_path = field_path.into();
        if resource_id.is_empty() {
            return Err(CelforgeError::InvalidReference(
                "resource id must not be empty".into(),
            ));
        }
        if field_path.is_empty() {
            return Err(CelforgeError::InvalidReference(
                "field path must not be empty".into(),
            ));
        }
        if field_path.starts_with('.') || field_path.ends_with('.') {
            return Err(CelforgeError::InvalidReference(format!(
                "field path '{}' must not start or end with a dot",
                field_path
            )));
        }
        if field_path.contains("..") {
            return Err(CelforgeError::InvalidReference(format!(
                "field path '{}' must not contain consecutive dots",
                field_path
            )));
        }
        Ok(Self {
            resource_id,
            field_path,
            type_hint: None,
        })
    }

    /// Build a reference into the declared input schema.
    pub fn schema(field_path: impl Into<String>) -> Result<Self, CelforgeError> {
        Self::new(SCHEMA_ID, field_path)
    }

    pub fn with_type(mut self, hint: TypeHint) -> Self {
        self.type_hint = Some(hint);
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    pub fn type_hint(&self) -> Option<TypeHint> {
        self.type_hint
    }

    /// Whether this reference points into the input schema rather than a
    /// resource in the graph.
    pub fn is_schema(&self) -> bool {
        self.resource_id == SCHEMA_ID
    }

    /// The CEL path this reference renders to: `schema.<path>` for schema
    /// references, `resources.<id>.<path>` otherwise.
    pub fn cel_path(&self) -> String {
        if self.is_schema() {
            format!("schema.{}", self.field_path)
        } else {
            format!("resources.{}.{}", self.resource_id, self.field_path)
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.resource_id == other.resource_id && self.field_path == other.field_path
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_id.hash(state);
        self.field_path.hash(state);
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cel_path())
    }
}

#[derive(Serialize, Deserialize)]
struct ReferenceWire {
    #[serde(rename = "__brand__")]
    brand: String,
    #[serde(rename = "resourceId")]
    resource_id: String,
    #[serde(rename = "fieldPath")]
    field_path: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    type_hint: Option<TypeHint>,
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReferenceWire {
            brand: REFERENCE_BRAND.to_string(),
            resource_id: self.resource_id.clone(),
            field_path: self.field_path.clone(),
            type_hint: self.type_hint,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = ReferenceWire::deserialize(deserializer)?;
        if wire.brand != REFERENCE_BRAND {
            return Err(D::Error::custom(format!(
                "expected brand '{}', got '{}'",
                REFERENCE_BRAND, wire.brand
            )));
        }
        let mut reference = Reference::new(wire.resource_id, wire.field_path)
            .map_err(|e| D::Error::custom(e.to_string()))?;
        reference.type_hint = wire.type_hint;
        Ok(reference)
    }
}

/// An already-lowered CEL expression, distinguished from plain strings by
/// its brand. A reference is never conflated with a CEL expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CelExpression {
    expression: String,
    type_hint: Option<TypeHint>,
}

impl CelExpression {
    pub fn new(expression: impl Into<String>) -> Result<Self, CelforgeError> {
        let expression = expression.into();
        if expression.is_empty() {
            return Err(CelforgeError::InvalidCel(
                "expression must not be empty".into(),
            ));
        }
        Ok(Self {
            expression,
            type_hint: None,
        })
    }

    pub fn with_type(mut self, hint: TypeHint) -> Self {
        self.type_hint = Some(hint);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    pub fn type_hint(&self) -> Option<TypeHint> {
        self.type_hint
    }
}

impl fmt::Display for CelExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

#[derive(Serialize, Deserialize)]
struct CelWire {
    #[serde(rename = "__brand__")]
    brand: String,
    expression: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    type_hint: Option<TypeHint>,
}

impl Serialize for CelExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CelWire {
            brand: CEL_BRAND.to_string(),
            expression: self.expression.clone(),
            type_hint: self.type_hint,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CelExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = CelWire::deserialize(deserializer)?;
        if wire.brand != CEL_BRAND {
            return Err(D::Error::custom(format!(
                "expected brand '{}', got '{}'",
                CEL_BRAND, wire.brand
            )));
        }
        let mut cel =
            CelExpression::new(wire.expression).map_err(|e| D::Error::custom(e.to_string()))?;
        cel.type_hint = wire.type_hint;
        Ok(cel)
    }
}
