//! Attributes every entity carries regardless of the user's model.
//!
//! These are synthesized on demand rather than stored, and are listed ahead
//! of user-defined attributes when the model is rendered.

use xreg_types::Value;

use crate::attribute::{AttrType, Attribute, AttributeSet, Item};

/// Values accepted for the meta `compatibility` attribute.
pub const COMPATIBILITY_VALUES: &[&str] = &[
    "none",
    "backward",
    "backward_transitive",
    "forward",
    "forward_transitive",
    "full",
    "full_transitive",
];

fn common_tail() -> Vec<Attribute> {
    vec![
        Attribute::new("name", AttrType::String),
        Attribute::new("description", AttrType::String),
        Attribute::new("documentation", AttrType::Url),
        Attribute::new("labels", AttrType::Map).with_item(Item::new(AttrType::String)),
        Attribute::new("createdat", AttrType::Timestamp).required(),
        Attribute::new("modifiedat", AttrType::Timestamp).required(),
    ]
}

fn self_xid_epoch() -> Vec<Attribute> {
    vec![
        Attribute::new("self", AttrType::Url).readonly().required(),
        Attribute::new("xid", AttrType::Xid).readonly().required(),
        Attribute::new("epoch", AttrType::UInteger).required(),
    ]
}

pub fn registry_attributes() -> AttributeSet {
    let mut attrs = vec![
        Attribute::new("specversion", AttrType::String)
            .readonly()
            .immutable()
            .required(),
        Attribute::new("registryid", AttrType::String).immutable().required(),
    ];
    attrs.extend(self_xid_epoch());
    attrs.extend(common_tail());
    attrs.into_iter().collect()
}

pub fn group_attributes(singular: &str) -> AttributeSet {
    let mut attrs = vec![Attribute::new(format!("{singular}id"), AttrType::String)
        .immutable()
        .required()];
    attrs.extend(self_xid_epoch());
    attrs.extend(common_tail());
    attrs.into_iter().collect()
}

/// Attributes of a Version (and of a Resource, which renders its default
/// Version).
pub fn version_attributes(singular: &str, has_document: bool) -> AttributeSet {
    let mut attrs = vec![
        Attribute::new(format!("{singular}id"), AttrType::String)
            .immutable()
            .required(),
        Attribute::new("versionid", AttrType::String).immutable().required(),
    ];
    attrs.extend(self_xid_epoch());
    let mut tail = common_tail();
    // `isdefault` sits between `name` and `description`.
    tail.insert(
        1,
        Attribute::new("isdefault", AttrType::Boolean)
            .readonly()
            .required()
            .with_default(false),
    );
    attrs.extend(tail);
    attrs.push(Attribute::new("ancestor", AttrType::String).required());
    if has_document {
        attrs.push(Attribute::new("contenttype", AttrType::String));
    }
    attrs.into_iter().collect()
}

pub fn meta_attributes(singular: &str) -> AttributeSet {
    let compat: Vec<Value> = COMPATIBILITY_VALUES.iter().map(|v| Value::from(*v)).collect();
    vec![
        Attribute::new(format!("{singular}id"), AttrType::String)
            .immutable()
            .required(),
        Attribute::new("self", AttrType::Url).readonly().required(),
        Attribute::new("xid", AttrType::Xid).readonly().required(),
        Attribute::new("xref", AttrType::Url),
        Attribute::new("epoch", AttrType::UInteger).required(),
        Attribute::new("createdat", AttrType::Timestamp).required(),
        Attribute::new("modifiedat", AttrType::Timestamp).required(),
        Attribute::new("readonly", AttrType::Boolean)
            .required()
            .with_default(false),
        Attribute::new("compatibility", AttrType::String)
            .with_enum(compat, true)
            .required()
            .with_default("none"),
        Attribute::new("defaultversionid", AttrType::String).required(),
        Attribute::new("defaultversionurl", AttrType::Url)
            .readonly()
            .required(),
        Attribute::new("defaultversionsticky", AttrType::Boolean)
            .readonly()
            .required()
            .with_default(false),
    ]
    .into_iter()
    .collect()
}

/// Names generated by the server, which clients may echo back but never
/// set. Group and resource collection `*url` / `*count` names depend on the
/// model and are handled by the registry engine.
pub fn is_generated(name: &str) -> bool {
    matches!(
        name,
        "self"
            | "xid"
            | "specversion"
            | "isdefault"
            | "defaultversionurl"
            | "metaurl"
            | "versionsurl"
            | "versionscount"
    )
}
