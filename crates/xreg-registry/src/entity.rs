//! Entity handles and the helpers every entity level shares: epoch and
//! timestamp bookkeeping, id checks and attribute merging.

use std::fmt;

use xreg_model::is_generated;
use xreg_store::{is_hidden, EntityRow};
use xreg_types::{EntityKind, Object, Value};

use crate::error::{bad_request, RegistryResult};
use crate::registry::Registry;

/// How an incoming attribute bag is applied to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// The entity must not exist yet.
    Create,
    /// PUT: client attributes are replaced wholesale.
    Replace,
    /// PATCH: named attributes are updated, `null` deletes.
    Merge,
}

/// Identifies a Group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub plural: String,
    pub id: String,
}

impl GroupKey {
    pub fn new(plural: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            plural: plural.into(),
            id: id.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.plural, self.id)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path())
    }
}

/// Identifies a Resource (and, through it, its Meta).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub group: GroupKey,
    pub plural: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(group: GroupKey, plural: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            group,
            plural: plural.into(),
            id: id.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.group.path(), self.plural, self.id)
    }

    pub fn abstract_path(&self) -> String {
        format!("{}/{}", self.group.plural, self.plural)
    }

    pub fn meta_path(&self) -> String {
        format!("{}/meta", self.path())
    }

    pub fn versions_path(&self) -> String {
        format!("{}/versions", self.path())
    }

    pub fn version_path(&self, vid: &str) -> String {
        format!("{}/versions/{vid}", self.path())
    }

    pub fn version(&self, vid: impl Into<String>) -> VersionKey {
        VersionKey {
            resource: self.clone(),
            id: vid.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path())
    }
}

/// Identifies a Version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionKey {
    pub resource: ResourceKey,
    pub id: String,
}

impl VersionKey {
    pub fn path(&self) -> String {
        self.resource.version_path(&self.id)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path())
    }
}

const MAX_ID_LEN: usize = 128;

/// Entity ids: `[a-zA-Z0-9_][a-zA-Z0-9_.\-~@]{0,127}`.
pub fn check_id(id: &str) -> RegistryResult<()> {
    let mut chars = id.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || "_.-~@".contains(c));
    if !first_ok || !rest_ok || id.len() > MAX_ID_LEN {
        return Err(bad_request(format!(
            "Invalid ID \"{id}\", must match: ^[a-zA-Z0-9_][a-zA-Z0-9_.\\-~@]{{0,127}}$"
        )));
    }
    Ok(())
}

/// Reject a `<singular>id` (or `versionid`) that disagrees with the URL.
pub(crate) fn check_id_attr(obj: &Object, attr: &str, id: &str) -> RegistryResult<()> {
    match obj.get(attr) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(s)) if s == id => Ok(()),
        Some(other) => Err(bad_request(format!(
            "The \"{attr}\" attribute must be set to \"{id}\", not \"{other}\""
        ))),
    }
}

/// Drop server-generated attributes (and any `extra` names) from a client
/// attribute bag.
pub(crate) fn strip_generated(obj: &mut Object, extra: &[String]) {
    obj.retain(|k, _| !is_generated(k) && !extra.iter().any(|e| e == k));
}

/// Collection `<plural>url` / `<plural>count` names for `plurals`.
pub(crate) fn collection_names<'a>(plurals: impl Iterator<Item = &'a String>) -> Vec<String> {
    plurals
        .flat_map(|p| [format!("{p}url"), format!("{p}count")])
        .collect()
}

/// Take a nested collection (`{"id": {...}, ...}`) out of a client bag.
pub(crate) fn take_collection(
    obj: &mut Object,
    plural: &str,
    singular: &str,
) -> RegistryResult<Option<Object>> {
    match obj.remove(plural) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => {
            for (key, val) in &map {
                if val.as_object().is_none() {
                    return Err(bad_request(format!(
                        "Key \"{key}\" in attribute \"{plural}\" doesn't appear to be of type \"{singular}\""
                    )));
                }
            }
            Ok(Some(map))
        }
        Some(_) => Err(bad_request(format!(
            "Attribute \"{plural}\" doesn't appear to be of a map of \"{plural}\""
        ))),
    }
}

/// Names the server owns on every entity; never copied from client bags.
pub(crate) const SERVER_OWNED: &[&str] = &["epoch", "createdat", "modifiedat"];

/// Write a validated client bag onto `row`.
///
/// In [`WriteMode::Merge`] only the named attributes change (`null`
/// removes). Otherwise every visible attribute except `keep` and the
/// server-owned ones is replaced.
pub(crate) fn apply_attrs(row: &mut EntityRow, obj: Object, mode: WriteMode, keep: &[&str]) {
    if mode != WriteMode::Merge {
        row.props.retain(|k, _| {
            is_hidden(k) || keep.contains(&k.as_str()) || SERVER_OWNED.contains(&k.as_str())
        });
    }
    for (k, v) in obj {
        if SERVER_OWNED.contains(&k.as_str()) || keep.contains(&k.as_str()) {
            continue;
        }
        row.set(&k, v);
    }
}

impl Registry {
    /// A fresh row with creation bookkeeping. The row counts as touched
    /// for the rest of the transaction.
    pub(crate) fn new_row(
        &mut self,
        kind: EntityKind,
        path: String,
        uid: &str,
        abstract_path: String,
    ) -> EntityRow {
        let mut row = EntityRow::new(kind, path, uid, abstract_path);
        row.set("epoch", 1i64);
        row.set("createdat", self.now.clone());
        row.set("modifiedat", self.now.clone());
        self.touched.insert(row.path.clone());
        self.created.insert(row.path.clone());
        row
    }

    /// Bump `epoch` (at most once per transaction) and `modifiedat`.
    pub(crate) fn touch(&mut self, row: &mut EntityRow) {
        if self.touched.insert(row.path.clone()) {
            let epoch = row.get_i64("epoch").unwrap_or(0);
            row.set("epoch", epoch + 1);
        }
        row.set("modifiedat", self.now.clone());
    }

    /// Touch a stored row by path. Missing rows are ignored.
    pub(crate) fn touch_path(&mut self, path: &str) -> RegistryResult<()> {
        if let Some(mut row) = self.tx.get(path)? {
            self.touch(&mut row);
            self.tx.put(row);
        }
        Ok(())
    }

    /// Enforce an `epoch` supplied by the client, then drop it from `obj`.
    ///
    /// Entities created in this transaction accept any value.
    pub(crate) fn check_epoch(&self, row: &EntityRow, obj: &mut Object) -> RegistryResult<()> {
        let Some(given) = obj.remove("epoch") else {
            return Ok(());
        };
        if given.is_null() || self.created.contains(&row.path) {
            return Ok(());
        }
        let current = row.get_i64("epoch").unwrap_or(0);
        match given.as_i64() {
            Some(n) if n == current => Ok(()),
            Some(n) if n >= 0 => Err(bad_request(format!(
                "Attribute \"epoch\"({n}) doesn't match existing value ({current})"
            ))),
            _ => Err(bad_request("Attribute \"epoch\" must be a uinteger")),
        }
    }

    /// Validate an explicit epoch on a delete request.
    pub fn check_delete_epoch(&mut self, path: &str, epoch: Option<&str>) -> RegistryResult<()> {
        let Some(epoch) = epoch else {
            return Ok(());
        };
        let Some(row) = self.tx.get(path)? else {
            return Ok(());
        };
        let current = row.get_i64("epoch").unwrap_or(0);
        match epoch.parse::<i64>() {
            Ok(n) if n == current => Ok(()),
            Ok(n) if n >= 0 => Err(bad_request(format!(
                "Epoch value for \"{}\" must be {current} not {n}",
                row.uid
            ))),
            _ => Err(bad_request(format!("Epoch value \"{epoch}\" must be a UINTEGER"))),
        }
    }

    /// Ensure no sibling already uses `id` with different casing.
    pub(crate) fn check_id_case(
        &mut self,
        collection_path: &str,
        kind: EntityKind,
        id: &str,
        id_attr: &str,
        what: &str,
    ) -> RegistryResult<()> {
        let prefix = format!("{collection_path}/");
        for row in self.tx.scan(collection_path)? {
            if row.kind != kind || !row.path.starts_with(&prefix) || row.path[prefix.len()..].contains('/') {
                continue;
            }
            if row.uid != id && row.uid.eq_ignore_ascii_case(id) {
                return Err(bad_request(format!(
                    "Attempting to create a {what} with a \"{id_attr}\" of \"{id}\", when one already exists as \"{}\"",
                    row.uid
                )));
            }
        }
        Ok(())
    }
}
