//! Tagged attribute values.
//!
//! Every attribute stored on a registry entity is a [`Value`]. The set of
//! variants is closed: schema validation in the model crate decides which
//! variant is acceptable for a given attribute type, so nothing downstream
//! ever needs to inspect untyped JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::{PathSegment, PropPath};

/// An attribute bag, keyed by attribute name.
pub type Object = BTreeMap<String, Value>;

/// A single attribute value.
///
/// Objects are kept in a `BTreeMap` so extension attributes and nested maps
/// always serialize in a stable, sorted order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
}

impl Value {
    /// An empty object value.
    pub fn object() -> Self {
        Value::Object(Object::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for every variant except arrays and objects.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Consume the value, returning the object map if it is one.
    pub fn into_object(self) -> Option<Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the variant, as used in validation messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// The textual form used when comparing against filter operands.
    ///
    /// Only scalars have one; `null`, arrays and objects never match a
    /// value comparison.
    pub fn filter_text(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Walk a property path into this value.
    pub fn lookup(&self, path: &PropPath) -> Option<&Value> {
        let mut cur = self;
        for seg in path.segments() {
            cur = match (seg, cur) {
                (PathSegment::Key(k), Value::Object(o)) => o.get(k)?,
                (PathSegment::Index(i), Value::Array(a)) => a.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Convert into a `serde_json::Value` without consuming `self`.
    pub fn to_json(&self) -> serde_json::Value {
        self.clone().into()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Decimal(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Decimal(d) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_keeps_shape() {
        let src = json!({"b": [1, 2.5, "x"], "a": {"n": null, "t": true}});
        let v = Value::from(src.clone());
        let obj = v.as_object().unwrap();
        assert_eq!(obj.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(v.to_json(), src);
    }

    #[test]
    fn integers_stay_integers() {
        let v = Value::from(json!(12));
        assert_eq!(v, Value::Int(12));
        assert_eq!(v.kind_name(), "integer");
        assert_eq!(Value::from(json!(1.5)).kind_name(), "decimal");
    }

    #[test]
    fn serde_roundtrip_through_value() {
        let v: Value = serde_json::from_str(r#"{"x":[true,null]}"#).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"x":[true,null]}"#);
    }

    #[test]
    fn filter_text_only_for_scalars() {
        assert_eq!(Value::Bool(true).filter_text().as_deref(), Some("true"));
        assert_eq!(Value::Int(7).filter_text().as_deref(), Some("7"));
        assert_eq!(Value::Null.filter_text(), None);
        assert_eq!(Value::object().filter_text(), None);
    }

    #[test]
    fn lookup_nested() {
        let v = Value::from(json!({"labels": {"a.b": "x"}, "list": [1, {"k": 2}]}));
        let p = PropPath::parse("labels['a.b']").unwrap();
        assert_eq!(v.lookup(&p), Some(&Value::from("x")));
        let p = PropPath::parse("list[1].k").unwrap();
        assert_eq!(v.lookup(&p), Some(&Value::Int(2)));
        let p = PropPath::parse("list[5]").unwrap();
        assert_eq!(v.lookup(&p), None);
    }

    #[test]
    fn display_strings_unquoted() {
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::Int(3).to_string(), "3");
    }
}
