//! The host-value model the analyzer operates on.
//!
//! Authors hand the compiler arbitrary nested data: manifests, status
//! shapes, predicate expressions. [`Value`] is the tagged sum over
//! everything the pipeline accepts. References and CEL expressions are
//! distinct variants, never re-derived by shape inspection.

use crate::reference::{CelExpression, Reference};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Reference(Reference),
    Cel(CelExpression),
    /// Host-language expression source, supplied explicitly by the caller
    /// and parsed during analysis. This is the stand-in for closures: there
    /// is no runtime source reflection, so builders pass the text.
    Expression(String),
}

impl Value {
    /// Scalars and plain strings that never need conversion on their own.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)
        )
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Reference(_) => "reference",
            Value::Cel(_) => "cel",
            Value::Expression(_) => "expression",
        }
    }

    /// Convenience constructor for object values.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Value::Reference(v)
    }
}

impl From<CelExpression> for Value {
    fn from(v: CelExpression) -> Self {
        Value::Cel(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Value::Reference(r) => r.serialize(serializer),
            Value::Cel(c) => c.serialize(serializer),
            Value::Expression(src) => {
                let mut out = serializer.serialize_map(Some(2))?;
                out.serialize_entry("__brand__", "host-expression")?;
                out.serialize_entry("source", src)?;
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::TypeHint;

    #[test]
    fn test_kind_and_predicates() {
        assert!(Value::Int(3).is_primitive());
        assert!(Value::from("plain").is_primitive());
        assert!(!Value::Array(vec![]).is_primitive());
        assert!(Value::object([("a", Value::Null)]).is_container());
        assert_eq!(
            Value::Reference(Reference::schema("spec.name").unwrap()).kind(),
            "reference"
        );
    }

    #[test]
    fn test_from_json_value() {
        let json: serde_json::Value = serde_json::json!({
            "replicas": 3,
            "labels": {"app": "web"},
            "ports": [80, 443],
        });
        let value = Value::from(json);
        let object = value.as_object().unwrap();
        assert_eq!(object["replicas"], Value::Int(3));
        assert_eq!(object["ports"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_serialize_preserves_brands() {
        let value = Value::object([
            ("name", Value::from("api")),
            (
                "replicas",
                Value::Reference(
                    Reference::new("deployment", "spec.replicas")
                        .unwrap()
                        .with_type(TypeHint::Number),
                ),
            ),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"__brand__\""));
        assert!(json.contains("resource-reference"));
    }
}
