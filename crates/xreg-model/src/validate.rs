//! Schema-driven validation of attribute values.

use xreg_types::{normalize_timestamp, EntityKind, Object, Value, Xid};

use crate::attribute::{AttrType, Attribute, AttributeSet, Item, WILDCARD};
use crate::error::{ModelError, ModelResult};

/// Longest attribute name accepted.
pub const MAX_ATTR_NAME: usize = 63;

/// Returns `true` if `name` is a legal attribute name:
/// `[a-z_][a-z0-9_]{0,62}`.
pub fn is_valid_attr_name(name: &str) -> bool {
    is_valid_name(name, MAX_ATTR_NAME)
}

pub(crate) fn is_valid_name(name: &str, max: usize) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= max && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Reject attribute names that are not legal identifiers.
///
/// Names starting with `#` are internal and never reach this check.
pub fn check_attrs(obj: &Object) -> ModelResult<()> {
    for name in obj.keys() {
        if !is_valid_attr_name(name) {
            return Err(ModelError::InvalidValue(format!(
                "Invalid attribute name \"{name}\", must match: ^[a-z_][a-z_0-9]{{0,62}}$"
            )));
        }
    }
    Ok(())
}

/// Common view over [`Attribute`] and [`Item`] so nested definitions
/// validate with the same code.
trait TypeSpec {
    fn attr_type(&self) -> AttrType;
    fn item(&self) -> Option<&Item>;
    fn members(&self) -> Option<&AttributeSet>;
    fn enum_values(&self) -> Option<&[Value]> {
        None
    }
    fn strict(&self) -> bool {
        true
    }
    fn target(&self) -> Option<&str> {
        None
    }
}

impl TypeSpec for Attribute {
    fn attr_type(&self) -> AttrType {
        self.attr_type
    }
    fn item(&self) -> Option<&Item> {
        self.item.as_ref()
    }
    fn members(&self) -> Option<&AttributeSet> {
        self.attributes.as_ref()
    }
    fn enum_values(&self) -> Option<&[Value]> {
        self.enum_values.as_deref()
    }
    fn strict(&self) -> bool {
        self.is_strict()
    }
    fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

impl TypeSpec for Item {
    fn attr_type(&self) -> AttrType {
        self.attr_type
    }
    fn item(&self) -> Option<&Item> {
        self.item.as_deref()
    }
    fn members(&self) -> Option<&AttributeSet> {
        self.attributes.as_ref()
    }
}

/// Validate a bag of client-supplied attributes against `defs`.
///
/// `null` values are treated as absent. Unknown names are collected and
/// reported together unless `defs` holds a `*` wildcard.
pub fn validate_object(defs: &AttributeSet, obj: &Object) -> ModelResult<()> {
    validate_members(defs, obj, "")
}

fn validate_members(defs: &AttributeSet, obj: &Object, prefix: &str) -> ModelResult<()> {
    let mut unknown = Vec::new();
    for (name, value) in obj {
        if value.is_null() || name.starts_with('#') {
            continue;
        }
        let label = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match defs.resolve(name) {
            Some(def) => check_value(def, value, &label)?,
            None => unknown.push(label),
        }
    }
    if !unknown.is_empty() {
        unknown.sort();
        return Err(ModelError::InvalidExtensions(unknown));
    }
    Ok(())
}

/// Check that every required, client-settable attribute in `defs` is present.
pub fn check_required(defs: &AttributeSet, obj: &Object) -> ModelResult<()> {
    for def in defs.iter() {
        if !def.required || def.readonly || def.default.is_some() || def.name == WILDCARD {
            continue;
        }
        if obj.get(&def.name).map_or(true, Value::is_null) {
            return Err(ModelError::InvalidValue(format!(
                "Required property \"{}\" is missing",
                def.name
            )));
        }
    }
    Ok(())
}

/// Validate one value against a single definition.
pub fn check_attribute_value(attr: &Attribute, value: &Value) -> ModelResult<()> {
    check_value(attr, value, &attr.name)
}

fn type_error(label: &str, want: &str) -> ModelError {
    ModelError::InvalidValue(format!("Attribute \"{label}\" must be {want}"))
}

fn check_value(spec: &dyn TypeSpec, value: &Value, label: &str) -> ModelResult<()> {
    match spec.attr_type() {
        AttrType::Any => {}
        AttrType::String => {
            value.as_str().ok_or_else(|| type_error(label, "a string"))?;
        }
        AttrType::Url => {
            value.as_str().ok_or_else(|| type_error(label, "a url"))?;
        }
        AttrType::Boolean => {
            value.as_bool().ok_or_else(|| type_error(label, "a boolean"))?;
        }
        AttrType::Integer => {
            if !matches!(value, Value::Int(_)) {
                return Err(type_error(label, "an integer"));
            }
        }
        AttrType::UInteger => match value {
            Value::Int(i) if *i >= 0 => {}
            _ => return Err(type_error(label, "a uinteger")),
        },
        AttrType::Decimal => {
            value.as_f64().ok_or_else(|| type_error(label, "a decimal"))?;
        }
        AttrType::Timestamp => {
            let s = value.as_str().ok_or_else(|| type_error(label, "a timestamp"))?;
            normalize_timestamp(s).map_err(|_| type_error(label, "a timestamp"))?;
        }
        AttrType::Xid => {
            let s = value.as_str().ok_or_else(|| type_error(label, "an xid"))?;
            Xid::parse(s).map_err(|_| type_error(label, "an xid"))?;
        }
        AttrType::Relation => {
            let s = value.as_str().ok_or_else(|| type_error(label, "an xid"))?;
            let xid = Xid::parse(s).map_err(|_| type_error(label, "an xid"))?;
            if let Some(target) = spec.target() {
                if !relation_matches(target, &xid) {
                    return Err(ModelError::InvalidValue(format!(
                        "Attribute \"{label}\" must point to a \"{target}\" entity, not \"{s}\""
                    )));
                }
            }
        }
        AttrType::Map => {
            let obj = value.as_object().ok_or_else(|| type_error(label, "a map"))?;
            if let Some(item) = spec.item() {
                for (key, member) in obj {
                    if member.is_null() {
                        continue;
                    }
                    check_value(item, member, &format!("{label}.{key}"))?;
                }
            }
        }
        AttrType::Array => {
            let arr = value.as_array().ok_or_else(|| type_error(label, "an array"))?;
            if let Some(item) = spec.item() {
                for (idx, member) in arr.iter().enumerate() {
                    check_value(item, member, &format!("{label}[{idx}]"))?;
                }
            }
        }
        AttrType::Object => {
            let obj = value.as_object().ok_or_else(|| type_error(label, "an object"))?;
            if let Some(members) = spec.members() {
                validate_members(members, obj, label)?;
            }
        }
    }

    if let Some(allowed) = spec.enum_values() {
        if spec.strict() && !allowed.contains(value) {
            let list: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(ModelError::InvalidValue(format!(
                "Attribute \"{label}\"({value}) must be one of the enum values: {}",
                list.join(",")
            )));
        }
    }
    Ok(())
}

/// Does `xid` address an entity of the abstract shape `target`
/// (`/dirs`, `/dirs/files`, `/dirs/files/versions`, `/dirs/files[/versions]`)?
pub fn relation_matches(target: &str, xid: &Xid) -> bool {
    let (base, optional_versions) = match target.strip_suffix("[/versions]") {
        Some(base) => (base, true),
        None => (target, false),
    };
    let parts: Vec<&str> = base.trim_start_matches('/').split('/').collect();
    let segs = xid.segments();
    match parts.as_slice() {
        [g] => xid.kind() == EntityKind::Group && segs[0] == *g,
        [g, r] => match xid.kind() {
            EntityKind::Resource => segs[0] == *g && segs[2] == *r,
            EntityKind::Version if optional_versions => segs[0] == *g && segs[2] == *r,
            _ => false,
        },
        [g, r, "versions"] => xid.kind() == EntityKind::Version && segs[0] == *g && segs[2] == *r,
        [g, r, "meta"] => xid.kind() == EntityKind::Meta && segs[0] == *g && segs[2] == *r,
        _ => false,
    }
}

/// Is `target` a syntactically valid relation target?
pub fn is_valid_target(target: &str) -> bool {
    let base = target.strip_suffix("[/versions]").unwrap_or(target);
    let Some(rest) = base.strip_prefix('/') else {
        return false;
    };
    let parts: Vec<&str> = rest.split('/').collect();
    let names_ok = |ps: &[&str]| ps.iter().all(|p| is_valid_name(p, MAX_ATTR_NAME));
    match parts.as_slice() {
        [_] | [_, _] => names_ok(parts.as_slice()),
        [g, r, "versions"] | [g, r, "meta"] => base.len() == target.len() && names_ok(&[*g, *r]),
        _ => false,
    }
}
