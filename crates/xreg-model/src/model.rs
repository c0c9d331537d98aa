//! Registry model: groups, resources and their attribute definitions.
//!
//! Only user-defined attributes are held here. System attributes are
//! synthesized by [`crate::system`] and prepended when the model is
//! rendered or used for validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use xreg_types::Value;

use crate::attribute::{AttrType, Attribute, AttributeSet, Item, WILDCARD};
use crate::error::{ModelError, ModelResult};
use crate::system;
use crate::validate::{check_attribute_value, is_valid_name, is_valid_target, MAX_ATTR_NAME};

/// Longest group or resource type name accepted.
pub const MAX_TYPE_NAME: usize = 57;

fn default_true() -> bool {
    true
}

/// Anything that owns a set of attribute definitions.
///
/// The `add_attr*` helpers build on [`AttrHolder::attrs_mut`] so the
/// registry, group and resource levels share one implementation.
pub trait AttrHolder {
    fn attrs_mut(&mut self) -> &mut AttributeSet;

    fn add_attr(&mut self, name: &str, attr_type: AttrType) -> ModelResult<&mut Attribute> {
        self.attrs_mut().add(Attribute::new(name, attr_type))
    }

    fn add_attr_map(&mut self, name: &str, item: Item) -> ModelResult<&mut Attribute> {
        self.attrs_mut()
            .add(Attribute::new(name, AttrType::Map).with_item(item))
    }

    fn add_attr_array(&mut self, name: &str, item: Item) -> ModelResult<&mut Attribute> {
        self.attrs_mut()
            .add(Attribute::new(name, AttrType::Array).with_item(item))
    }

    fn add_attr_obj(&mut self, name: &str) -> ModelResult<&mut Attribute> {
        let mut attr = Attribute::new(name, AttrType::Object);
        attr.attributes = Some(AttributeSet::new());
        self.attrs_mut().add(attr)
    }

    fn del_attr(&mut self, name: &str) -> Option<Attribute> {
        self.attrs_mut().remove(name)
    }
}

/// The full model of one registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default, skip_serializing_if = "AttributeSet::is_empty")]
    pub attributes: AttributeSet,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupModel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupModel {
    #[serde(default)]
    pub plural: String,
    pub singular: String,
    #[serde(default, skip_serializing_if = "AttributeSet::is_empty")]
    pub attributes: AttributeSet,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceModel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    #[serde(default)]
    pub plural: String,
    pub singular: String,
    /// Zero means unlimited.
    #[serde(default)]
    pub maxversions: u64,
    #[serde(default = "default_true")]
    pub setversionid: bool,
    #[serde(default = "default_true")]
    pub setdefaultversionsticky: bool,
    #[serde(default = "default_true")]
    pub hasdocument: bool,
    /// User-defined Version (and Resource) attributes.
    #[serde(default, skip_serializing_if = "AttributeSet::is_empty")]
    pub attributes: AttributeSet,
    #[serde(default, skip_serializing_if = "AttributeSet::is_empty")]
    pub metaattributes: AttributeSet,
}

impl AttrHolder for Model {
    fn attrs_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }
}

impl AttrHolder for GroupModel {
    fn attrs_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }
}

impl AttrHolder for ResourceModel {
    fn attrs_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }
}

fn check_type_name(what: &str, name: &str) -> ModelResult<()> {
    if !is_valid_name(name, MAX_TYPE_NAME) {
        return Err(ModelError::Definition(format!(
            "{what} name \"{name}\" must match: ^[a-z_][a-z_0-9]{{0,56}}$"
        )));
    }
    Ok(())
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_group_model(&self, plural: &str) -> Option<&GroupModel> {
        self.groups.get(plural)
    }

    pub fn find_group_model_mut(&mut self, plural: &str) -> Option<&mut GroupModel> {
        self.groups.get_mut(plural)
    }

    /// Look up the group and resource models for an abstract
    /// `<groups>/<resources>` pair.
    pub fn find_resource_model(&self, groups: &str, resources: &str) -> Option<&ResourceModel> {
        self.groups.get(groups)?.resources.get(resources)
    }

    pub fn add_group_model(&mut self, plural: &str, singular: &str) -> ModelResult<&mut GroupModel> {
        check_type_name("Group type", plural)?;
        check_type_name("Group type", singular)?;
        for gm in self.groups.values() {
            if gm.plural == plural || gm.singular == plural {
                return Err(ModelError::Definition(format!(
                    "Group type name \"{plural}\" is already in use"
                )));
            }
            if gm.plural == singular || gm.singular == singular {
                return Err(ModelError::Definition(format!(
                    "Group type name \"{singular}\" is already in use"
                )));
            }
        }
        debug!(plural, singular, "added group model");
        Ok(self
            .groups
            .entry(plural.to_string())
            .or_insert_with(|| GroupModel::new(plural, singular)))
    }

    pub fn del_group_model(&mut self, plural: &str) -> Option<GroupModel> {
        self.groups.remove(plural)
    }

    /// Registry-level attribute definitions, system attributes first.
    pub fn registry_attribute_set(&self) -> AttributeSet {
        system::registry_attributes().merged(&self.attributes)
    }

    /// Check the model for internal consistency.
    pub fn verify(&self) -> ModelResult<()> {
        verify_attrs(&self.attributes, &system::registry_attributes(), "")?;

        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, gm) in &self.groups {
            if *key != gm.plural {
                return Err(ModelError::Definition(format!(
                    "Group type \"{key}\" must have a \"plural\" value of \"{key}\", not \"{}\"",
                    gm.plural
                )));
            }
            check_type_name("Group type", &gm.plural)?;
            check_type_name("Group type", &gm.singular)?;
            if gm.plural == gm.singular {
                return Err(ModelError::Definition(format!(
                    "Group type \"{key}\" can't have the same plural and singular name"
                )));
            }
            for name in [gm.plural.as_str(), gm.singular.as_str()] {
                if let Some(other) = seen.insert(name, key) {
                    return Err(ModelError::Definition(format!(
                        "Group type name \"{name}\" is used by both \"{other}\" and \"{key}\""
                    )));
                }
            }
            gm.verify()?;
        }
        Ok(())
    }

    /// Merge `other` into this model.
    ///
    /// Groups, resources and attributes not mentioned in `other` are kept.
    /// Redefining an existing type with a different singular name, or an
    /// existing attribute with a different type, is an error. On error the
    /// live model is left untouched.
    pub fn apply_new_model(&mut self, other: &Model) -> ModelResult<()> {
        let mut merged = self.clone();
        merge_attrs(&mut merged.attributes, &other.attributes, "")?;

        for (plural, new_gm) in &other.groups {
            match merged.groups.get_mut(plural) {
                None => {
                    merged.groups.insert(plural.clone(), new_gm.clone());
                }
                Some(gm) => {
                    if gm.singular != new_gm.singular {
                        return Err(ModelError::Definition(format!(
                            "Changing the singular name of Group type \"{plural}\" is not allowed"
                        )));
                    }
                    merge_attrs(&mut gm.attributes, &new_gm.attributes, plural)?;
                    for (rplural, new_rm) in &new_gm.resources {
                        match gm.resources.get_mut(rplural) {
                            None => {
                                gm.resources.insert(rplural.clone(), new_rm.clone());
                            }
                            Some(rm) => {
                                if rm.singular != new_rm.singular {
                                    return Err(ModelError::Definition(format!(
                                        "Changing the singular name of Resource type \"{plural}/{rplural}\" is not allowed"
                                    )));
                                }
                                let label = format!("{plural}/{rplural}");
                                merge_attrs(&mut rm.attributes, &new_rm.attributes, &label)?;
                                merge_attrs(&mut rm.metaattributes, &new_rm.metaattributes, &label)?;
                                rm.maxversions = new_rm.maxversions;
                                rm.setversionid = new_rm.setversionid;
                                rm.setdefaultversionsticky = new_rm.setdefaultversionsticky;
                                rm.hasdocument = new_rm.hasdocument;
                            }
                        }
                    }
                }
            }
        }

        merged.verify()?;
        *self = merged;
        debug!(groups = self.groups.len(), "applied new model");
        Ok(())
    }

    /// The full model document, with system attributes at every level.
    pub fn to_document(&self) -> ModelResult<serde_json::Value> {
        let mut doc = serde_json::Map::new();
        doc.insert("attributes".into(), attrs_value(&self.registry_attribute_set())?);
        let mut groups = serde_json::Map::new();
        for (plural, gm) in &self.groups {
            groups.insert(plural.clone(), gm.to_document()?);
        }
        doc.insert("groups".into(), groups.into());
        Ok(doc.into())
    }

    /// The user portion of the model, for storage.
    pub fn to_value(&self) -> ModelResult<Value> {
        serde_json::to_value(self)
            .map(Value::from)
            .map_err(|e| ModelError::Serialize(e.to_string()))
    }

    pub fn from_value(value: &Value) -> ModelResult<Self> {
        parse_model_value(value.to_json())
    }
}

/// Documents keep declaration order, so they are built as raw JSON rather
/// than as the sorted `Object` map.
fn attrs_value(set: &AttributeSet) -> ModelResult<serde_json::Value> {
    serde_json::to_value(set).map_err(|e| ModelError::Serialize(e.to_string()))
}

impl GroupModel {
    pub fn new(plural: &str, singular: &str) -> Self {
        Self {
            plural: plural.to_string(),
            singular: singular.to_string(),
            attributes: AttributeSet::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn find_resource_model(&self, plural: &str) -> Option<&ResourceModel> {
        self.resources.get(plural)
    }

    pub fn find_resource_model_mut(&mut self, plural: &str) -> Option<&mut ResourceModel> {
        self.resources.get_mut(plural)
    }

    pub fn add_resource_model(
        &mut self,
        plural: &str,
        singular: &str,
        maxversions: u64,
        setversionid: bool,
        setdefaultversionsticky: bool,
        hasdocument: bool,
    ) -> ModelResult<&mut ResourceModel> {
        check_type_name("Resource type", plural)?;
        check_type_name("Resource type", singular)?;
        for rm in self.resources.values() {
            if [rm.plural.as_str(), rm.singular.as_str()]
                .iter()
                .any(|n| *n == plural || *n == singular)
            {
                return Err(ModelError::Definition(format!(
                    "Resource type \"{plural}\"/\"{singular}\" conflicts with \"{}\"",
                    rm.plural
                )));
            }
        }
        debug!(group = %self.plural, plural, singular, maxversions, "added resource model");
        Ok(self.resources.entry(plural.to_string()).or_insert(ResourceModel {
            plural: plural.to_string(),
            singular: singular.to_string(),
            maxversions,
            setversionid,
            setdefaultversionsticky,
            hasdocument,
            attributes: AttributeSet::new(),
            metaattributes: AttributeSet::new(),
        }))
    }

    pub fn del_resource_model(&mut self, plural: &str) -> Option<ResourceModel> {
        self.resources.remove(plural)
    }

    pub fn attribute_set(&self) -> AttributeSet {
        system::group_attributes(&self.singular).merged(&self.attributes)
    }

    fn verify(&self) -> ModelResult<()> {
        verify_attrs(
            &self.attributes,
            &system::group_attributes(&self.singular),
            &self.plural,
        )?;
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, rm) in &self.resources {
            if *key != rm.plural {
                return Err(ModelError::Definition(format!(
                    "Resource type \"{key}\" must have a \"plural\" value of \"{key}\", not \"{}\"",
                    rm.plural
                )));
            }
            check_type_name("Resource type", &rm.plural)?;
            check_type_name("Resource type", &rm.singular)?;
            if rm.plural == rm.singular {
                return Err(ModelError::Definition(format!(
                    "Resource type \"{key}\" can't have the same plural and singular name"
                )));
            }
            for name in [rm.plural.as_str(), rm.singular.as_str()] {
                if let Some(other) = seen.insert(name, key) {
                    return Err(ModelError::Definition(format!(
                        "Resource type name \"{name}\" is used by both \"{other}\" and \"{key}\""
                    )));
                }
                // `<collection>url` / `<collection>count` land on the group.
                if self.attributes.contains(&format!("{name}url"))
                    || self.attributes.contains(&format!("{name}count"))
                    || self.attributes.contains(name)
                {
                    return Err(ModelError::Definition(format!(
                        "Group type \"{}\" has an attribute that conflicts with Resource type \"{name}\"",
                        self.plural
                    )));
                }
            }
            rm.verify(&self.plural)?;
        }
        Ok(())
    }

    fn to_document(&self) -> ModelResult<serde_json::Value> {
        let mut doc = serde_json::Map::new();
        doc.insert("plural".into(), self.plural.clone().into());
        doc.insert("singular".into(), self.singular.clone().into());
        doc.insert("attributes".into(), attrs_value(&self.attribute_set())?);
        let mut resources = serde_json::Map::new();
        for (plural, rm) in &self.resources {
            resources.insert(plural.clone(), rm.to_document()?);
        }
        doc.insert("resources".into(), resources.into());
        Ok(doc.into())
    }
}

impl ResourceModel {
    pub fn add_meta_attr(&mut self, name: &str, attr_type: AttrType) -> ModelResult<&mut Attribute> {
        self.metaattributes.add(Attribute::new(name, attr_type))
    }

    /// Version attribute definitions, system attributes first. When the
    /// resource has a document, the `<singular>`, `<singular>base64` and
    /// `<singular>url` content attributes are appended.
    pub fn version_attribute_set(&self) -> AttributeSet {
        let mut set = system::version_attributes(&self.singular, self.hasdocument)
            .merged(&self.attributes);
        if self.hasdocument {
            for attr in self.document_attributes() {
                set.upsert(attr);
            }
        }
        set
    }

    pub fn meta_attribute_set(&self) -> AttributeSet {
        system::meta_attributes(&self.singular).merged(&self.metaattributes)
    }

    fn document_attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::new(self.singular.clone(), AttrType::Any),
            Attribute::new(format!("{}base64", self.singular), AttrType::String),
            Attribute::new(format!("{}url", self.singular), AttrType::Url),
        ]
    }

    /// Names of the document content attributes, or none.
    pub fn document_attr_names(&self) -> Vec<String> {
        if !self.hasdocument {
            return Vec::new();
        }
        self.document_attributes().into_iter().map(|a| a.name).collect()
    }

    fn verify(&self, group: &str) -> ModelResult<()> {
        let label = format!("{group}/{}", self.plural);
        let mut reserved = system::version_attributes(&self.singular, self.hasdocument);
        if self.hasdocument {
            for attr in self.document_attributes() {
                reserved.upsert(attr);
            }
        }
        for name in ["meta", "metaurl", "versions", "versionsurl", "versionscount"] {
            reserved.upsert(Attribute::new(name, AttrType::Any));
        }
        verify_attrs(&self.attributes, &reserved, &label)?;
        verify_attrs(
            &self.metaattributes,
            &system::meta_attributes(&self.singular),
            &label,
        )
    }

    fn to_document(&self) -> ModelResult<serde_json::Value> {
        let mut doc = serde_json::Map::new();
        doc.insert("plural".into(), self.plural.clone().into());
        doc.insert("singular".into(), self.singular.clone().into());
        doc.insert("maxversions".into(), self.maxversions.into());
        doc.insert("setversionid".into(), self.setversionid.into());
        doc.insert("setdefaultversionsticky".into(), self.setdefaultversionsticky.into());
        doc.insert("hasdocument".into(), self.hasdocument.into());
        let attrs = system::version_attributes(&self.singular, self.hasdocument)
            .merged(&self.attributes);
        doc.insert("attributes".into(), attrs_value(&attrs)?);
        doc.insert("metaattributes".into(), attrs_value(&self.meta_attribute_set())?);
        Ok(doc.into())
    }
}

/// User attributes may not shadow `reserved` names; each definition must
/// be well formed.
fn verify_attrs(user: &AttributeSet, reserved: &AttributeSet, level: &str) -> ModelResult<()> {
    for attr in user.iter() {
        if reserved.contains(&attr.name) {
            return Err(ModelError::Definition(format!(
                "Attribute \"{}\"{} conflicts with a system attribute",
                attr.name,
                at(level)
            )));
        }
        verify_attr(attr, &attr.name)?;
    }
    Ok(())
}

fn at(level: &str) -> String {
    if level.is_empty() {
        String::new()
    } else {
        format!(" (in \"{level}\")")
    }
}

fn verify_attr(attr: &Attribute, label: &str) -> ModelResult<()> {
    if attr.name != WILDCARD && !is_valid_name(&attr.name, MAX_ATTR_NAME) {
        return Err(ModelError::Definition(format!(
            "Invalid attribute name \"{label}\", must match: ^[a-z_][a-z_0-9]{{0,62}}$"
        )));
    }
    verify_shape(attr.attr_type, attr.item.as_ref(), attr.attributes.as_ref(), label)?;

    if let Some(values) = &attr.enum_values {
        if !attr.attr_type.is_scalar() {
            return Err(ModelError::Definition(format!(
                "Attribute \"{label}\" is not a scalar, so \"enum\" is not allowed"
            )));
        }
        if values.is_empty() {
            return Err(ModelError::Definition(format!(
                "Attribute \"{label}\" specified an empty \"enum\""
            )));
        }
        let mut bare = attr.clone();
        bare.enum_values = None;
        for v in values {
            check_attribute_value(&bare, v).map_err(|_| {
                ModelError::Definition(format!(
                    "Attribute \"{label}\" has an \"enum\" value ({v}) that is not a \"{}\"",
                    attr.attr_type
                ))
            })?;
        }
    }
    if let Some(default) = &attr.default {
        if !attr.attr_type.is_scalar() {
            return Err(ModelError::Definition(format!(
                "Attribute \"{label}\" is not a scalar, so \"default\" is not allowed"
            )));
        }
        check_attribute_value(attr, default).map_err(|e| {
            ModelError::Definition(format!("Attribute \"{label}\" has an invalid \"default\": {e}"))
        })?;
    }
    match (&attr.target, attr.attr_type) {
        (Some(t), AttrType::Relation) if !is_valid_target(t) => {
            return Err(ModelError::Definition(format!(
                "Attribute \"{label}\" has an invalid \"target\" value ({t})"
            )));
        }
        (None, AttrType::Relation) => {
            return Err(ModelError::Definition(format!(
                "Attribute \"{label}\" must have a \"target\" value"
            )));
        }
        (Some(_), t) if t != AttrType::Relation => {
            return Err(ModelError::Definition(format!(
                "Attribute \"{label}\" must not have a \"target\" value since it is not a relation"
            )));
        }
        _ => {}
    }
    Ok(())
}

fn verify_shape(
    attr_type: AttrType,
    item: Option<&Item>,
    members: Option<&AttributeSet>,
    label: &str,
) -> ModelResult<()> {
    if attr_type.needs_item() && item.is_none() {
        return Err(ModelError::Definition(format!(
            "Attribute \"{label}\" must have an \"item\" section"
        )));
    }
    if !attr_type.needs_item() && item.is_some() {
        return Err(ModelError::Definition(format!(
            "Attribute \"{label}\" must not have an \"item\" section"
        )));
    }
    if attr_type != AttrType::Object && members.is_some() {
        return Err(ModelError::Definition(format!(
            "Attribute \"{label}\" must not have an \"attributes\" section"
        )));
    }
    if let Some(members) = members {
        for m in members.iter() {
            verify_attr(m, &format!("{label}.{}", m.name))?;
        }
    }
    if let Some(item) = item {
        verify_shape(
            item.attr_type,
            item.item.as_deref(),
            item.attributes.as_ref(),
            &format!("{label}.item"),
        )?;
    }
    Ok(())
}

fn merge_attrs(live: &mut AttributeSet, incoming: &AttributeSet, level: &str) -> ModelResult<()> {
    for attr in incoming.iter() {
        if let Some(old) = live.get(&attr.name) {
            if old.attr_type != attr.attr_type {
                return Err(ModelError::Definition(format!(
                    "Attribute \"{}\"{} can't change type from \"{}\" to \"{}\"",
                    attr.name,
                    at(level),
                    old.attr_type,
                    attr.attr_type
                )));
            }
        }
        live.upsert(attr.clone());
    }
    Ok(())
}

/// Parse a model document (the shape `GET /model` returns).
///
/// System attributes in the document are accepted and dropped; they are
/// always synthesized.
pub fn parse_model(buf: &[u8]) -> ModelResult<Model> {
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(Model::new());
    }
    let raw: serde_json::Value =
        serde_json::from_slice(buf).map_err(|e| ModelError::Parse(e.to_string()))?;
    parse_model_value(raw)
}

fn parse_model_value(raw: serde_json::Value) -> ModelResult<Model> {
    if !raw.is_object() {
        return Err(ModelError::Parse("model must be a JSON object".into()));
    }
    let mut model: Model =
        serde_json::from_value(raw).map_err(|e| ModelError::Parse(e.to_string()))?;

    strip_system(&mut model.attributes, &system::registry_attributes());
    for (plural, gm) in model.groups.iter_mut() {
        if gm.plural.is_empty() {
            gm.plural = plural.clone();
        }
        strip_system(&mut gm.attributes, &system::group_attributes(&gm.singular));
        for (rplural, rm) in gm.resources.iter_mut() {
            if rm.plural.is_empty() {
                rm.plural = rplural.clone();
            }
            let mut sys = system::version_attributes(&rm.singular, rm.hasdocument);
            if rm.hasdocument {
                for attr in rm.document_attributes() {
                    sys.upsert(attr);
                }
            }
            strip_system(&mut rm.attributes, &sys);
            strip_system(&mut rm.metaattributes, &system::meta_attributes(&rm.singular));
        }
    }
    Ok(model)
}

fn strip_system(user: &mut AttributeSet, sys: &AttributeSet) {
    for attr in sys.iter() {
        user.remove(&attr.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dirs_files() -> Model {
        let mut model = Model::new();
        let gm = model.add_group_model("dirs", "dir").unwrap();
        gm.add_resource_model("files", "file", 0, true, true, true)
            .unwrap();
        model
    }

    // ---------------------------------------------------------------
    // Building
    // ---------------------------------------------------------------

    #[test]
    fn add_group_and_resource() {
        let model = dirs_files();
        model.verify().unwrap();
        let rm = model.find_resource_model("dirs", "files").unwrap();
        assert_eq!(rm.singular, "file");
        assert_eq!(rm.maxversions, 0);
        assert!(model.find_resource_model("dirs", "blobs").is_none());
    }

    #[test]
    fn duplicate_type_names_rejected() {
        let mut model = dirs_files();
        assert!(model.add_group_model("dirs", "x").is_err());
        assert!(model.add_group_model("dir", "dirx").is_err());
        let gm = model.find_group_model_mut("dirs").unwrap();
        assert!(gm.add_resource_model("file", "f", 0, true, true, true).is_err());
        assert!(model.add_group_model("Bad", "bad").is_err());
    }

    #[test]
    fn attribute_helpers() {
        let mut model = dirs_files();
        model.add_attr("regext", AttrType::String).unwrap();
        let gm = model.find_group_model_mut("dirs").unwrap();
        gm.add_attr_map("tags", Item::new(AttrType::String)).unwrap();
        let rm = gm.find_resource_model_mut("files").unwrap();
        rm.add_attr_array("list", Item::new(AttrType::Integer)).unwrap();
        rm.add_attr_obj("obj")
            .unwrap()
            .add_attr("inner", AttrType::Boolean)
            .unwrap();
        rm.add_meta_attr(WILDCARD, AttrType::Any).unwrap();
        model.verify().unwrap();

        let rm = model.find_resource_model("dirs", "files").unwrap();
        let vset = rm.version_attribute_set();
        assert!(vset.contains("fileid"));
        assert!(vset.contains("list"));
        assert!(vset.contains("file"));
        assert!(vset.contains("filebase64"));
        assert!(rm.meta_attribute_set().allows_extensions());
    }

    // ---------------------------------------------------------------
    // Verify
    // ---------------------------------------------------------------

    #[test]
    fn verify_rejects_shadowed_system_attrs() {
        let mut model = dirs_files();
        let rm = model
            .find_group_model_mut("dirs")
            .unwrap()
            .find_resource_model_mut("files")
            .unwrap();
        rm.add_attr("versionid", AttrType::Integer).unwrap();
        let err = model.verify().unwrap_err();
        assert!(err.to_string().contains("conflicts with a system attribute"));
    }

    #[test]
    fn verify_requires_items_and_targets() {
        let mut model = Model::new();
        model.add_attr("m", AttrType::Map).unwrap();
        assert!(model.verify().unwrap_err().to_string().contains("\"item\""));

        let mut model = Model::new();
        model.add_attr("r", AttrType::Relation).unwrap();
        assert!(model.verify().unwrap_err().to_string().contains("\"target\""));

        let mut model = Model::new();
        model.add_attr("r", AttrType::Relation).unwrap().target = Some("/dirs/files".into());
        model.verify().unwrap();
    }

    #[test]
    fn verify_checks_enum_and_default() {
        let mut model = Model::new();
        let a = model.add_attr("n", AttrType::Integer).unwrap();
        a.enum_values = Some(vec![Value::from(1i64), Value::from("two")]);
        assert!(model.verify().is_err());

        let mut model = Model::new();
        model.add_attr("b", AttrType::Boolean).unwrap().default = Some(Value::from("yes"));
        assert!(model.verify().is_err());

        let mut model = Model::new();
        model.add_attr("o", AttrType::Object).unwrap().default = Some(Value::from(1i64));
        assert!(model.verify().is_err());
    }

    #[test]
    fn verify_rejects_collection_name_clash() {
        let mut model = dirs_files();
        model
            .find_group_model_mut("dirs")
            .unwrap()
            .add_attr("filesurl", AttrType::String)
            .unwrap();
        assert!(model.verify().is_err());
    }

    // ---------------------------------------------------------------
    // ApplyNewModel
    // ---------------------------------------------------------------

    #[test]
    fn apply_merges_and_preserves() {
        let mut live = dirs_files();
        let mut incoming = Model::new();
        incoming
            .add_group_model("schemas", "schema")
            .unwrap()
            .add_resource_model("defs", "def", 3, true, true, false)
            .unwrap();
        incoming
            .add_group_model("dirs", "dir")
            .unwrap()
            .add_attr("owner", AttrType::String)
            .unwrap();
        live.apply_new_model(&incoming).unwrap();

        assert!(live.find_resource_model("dirs", "files").is_some());
        assert_eq!(live.find_resource_model("schemas", "defs").unwrap().maxversions, 3);
        assert!(live.find_group_model("dirs").unwrap().attributes.contains("owner"));
    }

    #[test]
    fn apply_rejects_incompatible_changes() {
        let mut live = dirs_files();
        live.add_attr("x", AttrType::String).unwrap();

        let mut incoming = Model::new();
        incoming.add_group_model("dirs", "folder").unwrap();
        assert!(live.apply_new_model(&incoming).is_err());

        let mut incoming = Model::new();
        incoming.add_attr("x", AttrType::Integer).unwrap();
        let before = live.clone();
        let err = live.apply_new_model(&incoming).unwrap_err();
        assert!(err.to_string().contains("can't change type"));
        assert_eq!(live, before);
    }

    // ---------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------

    #[test]
    fn document_lists_system_attributes_first() {
        let mut model = dirs_files();
        model.add_attr("regext", AttrType::String).unwrap();
        let doc = model.to_document().unwrap();
        let names: Vec<&String> = doc["attributes"].as_object().unwrap().keys().collect();
        assert_eq!(names.first().unwrap().as_str(), "specversion");
        assert_eq!(names.last().unwrap().as_str(), "regext");
        let files = &doc["groups"]["dirs"]["resources"]["files"];
        assert_eq!(files["maxversions"], json!(0));
        assert_eq!(files["hasdocument"], json!(true));
        assert!(files["metaattributes"]["defaultversionsticky"].is_object());
    }

    #[test]
    fn parse_round_trips_through_document() {
        let mut model = dirs_files();
        model
            .find_group_model_mut("dirs")
            .unwrap()
            .find_resource_model_mut("files")
            .unwrap()
            .add_attr("size", AttrType::UInteger)
            .unwrap();
        let doc = serde_json::to_vec(&model.to_document().unwrap()).unwrap();
        let parsed = parse_model(&doc).unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn parse_fills_plural_and_defaults() {
        let parsed = parse_model(
            br#"{"groups": {"dirs": {"singular": "dir",
                "resources": {"files": {"singular": "file"}}}}}"#,
        )
        .unwrap();
        let rm = parsed.find_resource_model("dirs", "files").unwrap();
        assert_eq!(rm.plural, "files");
        assert!(rm.setversionid && rm.setdefaultversionsticky && rm.hasdocument);
        parsed.verify().unwrap();
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(parse_model(b"{bad"), Err(ModelError::Parse(_))));
        assert!(matches!(parse_model(b"[]"), Err(ModelError::Parse(_))));
        assert_eq!(parse_model(b"  ").unwrap(), Model::new());
    }

    #[test]
    fn stored_value_round_trip() {
        let model = dirs_files();
        assert_eq!(Model::from_value(&model.to_value().unwrap()).unwrap(), model);
    }
}
