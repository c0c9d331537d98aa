//! Attribute definitions.

use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use xreg_types::Value;

use crate::error::{ModelError, ModelResult};

/// Attribute name that admits any otherwise undeclared attribute.
pub const WILDCARD: &str = "*";

/// The closed set of attribute types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Any,
    Array,
    Boolean,
    Decimal,
    Integer,
    Map,
    Object,
    Relation,
    String,
    Timestamp,
    UInteger,
    Url,
    Xid,
}

impl AttrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Array => "array",
            Self::Boolean => "boolean",
            Self::Decimal => "decimal",
            Self::Integer => "integer",
            Self::Map => "map",
            Self::Object => "object",
            Self::Relation => "relation",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::UInteger => "uinteger",
            Self::Url => "url",
            Self::Xid => "xid",
        }
    }

    /// Scalar types may carry an `enum`.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Any | Self::Array | Self::Map | Self::Object)
    }

    /// Map and array types describe their members with an `item`.
    pub fn needs_item(&self) -> bool {
        matches!(self, Self::Array | Self::Map)
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Type descriptor for the members of a map or array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Box<Item>>,
}

impl Item {
    pub fn new(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            attributes: None,
            item: None,
        }
    }

    /// An object item with the given member attributes.
    pub fn object(attributes: AttributeSet) -> Self {
        Self {
            attr_type: AttrType::Object,
            attributes: Some(attributes),
            item: None,
        }
    }

    /// A map or array item whose members are themselves described by `inner`.
    pub fn nested(attr_type: AttrType, inner: Item) -> Self {
        Self {
            attr_type,
            attributes: None,
            item: Some(Box::new(inner)),
        }
    }
}

/// One attribute definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeSet>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            description: None,
            enum_values: None,
            strict: None,
            readonly: false,
            immutable: false,
            required: false,
            default: None,
            target: None,
            item: None,
            attributes: None,
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>, strict: bool) -> Self {
        self.enum_values = Some(values);
        self.strict = Some(strict);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Whether out-of-enum values are rejected. Enums are strict unless
    /// declared otherwise.
    pub fn is_strict(&self) -> bool {
        self.strict.unwrap_or(true)
    }

    /// Add a member attribute to an `object`-typed attribute.
    pub fn add_attr(&mut self, name: &str, attr_type: AttrType) -> ModelResult<&mut Attribute> {
        if self.attr_type != AttrType::Object {
            return Err(ModelError::Definition(format!(
                "Attribute {:?} is not an object",
                self.name
            )));
        }
        self.attributes
            .get_or_insert_with(AttributeSet::new)
            .add(Attribute::new(name, attr_type))
    }
}

/// An ordered set of attribute definitions, serialized as a JSON object
/// keyed by attribute name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeSet {
    attrs: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attrs.iter_mut().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns `true` when undeclared attributes are admitted.
    pub fn allows_extensions(&self) -> bool {
        self.contains(WILDCARD)
    }

    /// Look up `name`, falling back to the `*` wildcard definition.
    pub fn resolve(&self, name: &str) -> Option<&Attribute> {
        self.get(name).or_else(|| self.get(WILDCARD))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter()
    }

    /// Add a new definition. Fails if the name is already taken.
    pub fn add(&mut self, attr: Attribute) -> ModelResult<&mut Attribute> {
        if self.contains(&attr.name) {
            return Err(ModelError::Definition(format!(
                "Attribute {:?} already exists",
                attr.name
            )));
        }
        self.attrs.push(attr);
        let last = self.attrs.len() - 1;
        Ok(&mut self.attrs[last])
    }

    /// Insert or replace a definition, keeping its position if present.
    pub fn upsert(&mut self, attr: Attribute) {
        match self.attrs.iter_mut().find(|a| a.name == attr.name) {
            Some(slot) => *slot = attr,
            None => self.attrs.push(attr),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        let idx = self.attrs.iter().position(|a| a.name == name)?;
        Some(self.attrs.remove(idx))
    }

    /// Concatenate, with definitions in `other` appended after `self`.
    pub fn merged(&self, other: &AttributeSet) -> AttributeSet {
        let mut out = self.clone();
        for attr in other.iter() {
            out.upsert(attr.clone());
        }
        out
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self {
            attrs: iter.into_iter().collect(),
        }
    }
}

impl Serialize for AttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attrs.len()))?;
        for attr in &self.attrs {
            map.serialize_entry(&attr.name, attr)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // serde_json's `preserve_order` keeps the document's attribute order.
        let raw = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut attrs = Vec::with_capacity(raw.len());
        for (key, val) in raw {
            let mut attr: Attribute = serde_json::from_value(val).map_err(D::Error::custom)?;
            if attr.name.is_empty() {
                attr.name = key.clone();
            }
            if attr.name != key {
                return Err(D::Error::custom(format!(
                    "attribute {key:?} has a mismatched \"name\" ({:?})",
                    attr.name
                )));
            }
            attrs.push(attr);
        }
        Ok(Self { attrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_in_declaration_order() {
        let set: AttributeSet = vec![
            Attribute::new("zeta", AttrType::String).required(),
            Attribute::new("alpha", AttrType::Map).with_item(Item::new(AttrType::String)),
        ]
        .into_iter()
        .collect();
        let out = serde_json::to_string(&set).unwrap();
        assert_eq!(
            out,
            r#"{"zeta":{"name":"zeta","type":"string","required":true},"alpha":{"name":"alpha","type":"map","item":{"type":"string"}}}"#
        );
    }

    #[test]
    fn deserialize_fills_missing_names() {
        let set: AttributeSet =
            serde_json::from_value(json!({"b": {"type": "integer"}, "a": {"type": "any"}})).unwrap();
        let names: Vec<_> = set.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(set.get("b").unwrap().attr_type, AttrType::Integer);
    }

    #[test]
    fn deserialize_rejects_mismatched_names() {
        let res: Result<AttributeSet, _> =
            serde_json::from_value(json!({"b": {"name": "c", "type": "string"}}));
        assert!(res.is_err());
    }

    #[test]
    fn wildcard_resolution() {
        let mut set = AttributeSet::new();
        set.add(Attribute::new("name", AttrType::String)).unwrap();
        assert!(set.resolve("other").is_none());
        set.add(Attribute::new(WILDCARD, AttrType::Any)).unwrap();
        assert_eq!(set.resolve("other").unwrap().attr_type, AttrType::Any);
        assert_eq!(set.resolve("name").unwrap().attr_type, AttrType::String);
    }

    #[test]
    fn duplicate_add_fails() {
        let mut set = AttributeSet::new();
        set.add(Attribute::new("x", AttrType::String)).unwrap();
        assert!(set.add(Attribute::new("x", AttrType::Integer)).is_err());
        set.upsert(Attribute::new("x", AttrType::Integer));
        assert_eq!(set.get("x").unwrap().attr_type, AttrType::Integer);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn object_attributes_take_members() {
        let mut obj = Attribute::new("obj", AttrType::Object);
        obj.add_attr("inner", AttrType::Boolean).unwrap();
        assert!(obj.attributes.as_ref().unwrap().contains("inner"));

        let mut s = Attribute::new("s", AttrType::String);
        assert!(s.add_attr("inner", AttrType::Boolean).is_err());
    }
}
