//! Version lifecycle: creation, updates, default-version selection,
//! ancestry and deletion.

use tracing::debug;

use xreg_model::{check_attrs, validate_object, ResourceModel};
use xreg_store::EntityRow;
use xreg_types::{EntityKind, Object, Value};

use crate::entity::{apply_attrs, check_id, check_id_attr, strip_generated, ResourceKey, VersionKey, WriteMode};
use crate::error::{bad_request, not_found, RegistryError, RegistryResult};
use crate::registry::Registry;

/// Hidden creation sequence number of a Version.
pub(crate) const SEQ_PROP: &str = "#seq";
/// Hidden per-Resource sequence counter, kept on the Meta row.
pub(crate) const NEXT_SEQ_PROP: &str = "#nextseq";

const JSON_CONTENT_TYPE: &str = "application/json";

/// A Version body that passed validation, with its `ancestor` pulled out.
struct VersionBody {
    attrs: Object,
    ancestor: Option<String>,
    document: Option<String>,
}

fn prepare_version(
    rm: &ResourceModel,
    key: &ResourceKey,
    vid: &str,
    mut obj: Object,
) -> RegistryResult<VersionBody> {
    let id_attr = format!("{}id", rm.singular);
    check_id_attr(&obj, &id_attr, &key.id)?;
    check_id_attr(&obj, "versionid", vid)?;
    obj.remove(&id_attr);
    obj.remove("versionid");
    strip_generated(&mut obj, &[]);

    let ancestor = match obj.remove("ancestor") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => return Err(bad_request("Attribute \"ancestor\" must be a string")),
    };

    let doc_names = rm.document_attr_names();
    let present: Vec<&String> = doc_names
        .iter()
        .filter(|n| obj.get(n.as_str()).is_some_and(|v| !v.is_null()))
        .collect();
    if present.len() > 1 {
        let names: Vec<String> = present.iter().map(|n| format!("\"{n}\"")).collect();
        return Err(bad_request(format!(
            "Only one of {} may be present at a time",
            names.join(",")
        )));
    }
    let document = present.first().map(|n| n.to_string());

    check_attrs(&obj)?;
    validate_object(&rm.version_attribute_set(), &obj)?;
    Ok(VersionBody {
        attrs: obj,
        ancestor,
        document,
    })
}

/// Keep at most one of the document attributes and default the content
/// type of inline JSON.
fn apply_document(row: &mut EntityRow, rm: &ResourceModel, document: Option<&str>) {
    let Some(name) = document else {
        return;
    };
    for other in rm.document_attr_names() {
        if other != name {
            row.remove(&other);
        }
    }
    let inline_json = name == rm.singular && row.get(name).is_some_and(|v| v.as_str().is_none());
    if inline_json && row.get("contenttype").is_none() {
        row.set("contenttype", JSON_CONTENT_TYPE);
    }
}

impl Registry {
    /// Version rows of a Resource, ordered by path.
    pub fn version_rows(&mut self, key: &ResourceKey) -> RegistryResult<Vec<EntityRow>> {
        Ok(self
            .tx
            .scan(&key.versions_path())?
            .into_iter()
            .filter(|r| r.kind == EntityKind::Version)
            .collect())
    }

    /// Id of the most recently created Version.
    pub fn latest_version_id(&mut self, key: &ResourceKey) -> RegistryResult<Option<String>> {
        Ok(self
            .version_rows(key)?
            .into_iter()
            .max_by_key(|r| r.get_i64(SEQ_PROP).unwrap_or(0))
            .map(|r| r.uid))
    }

    /// First unused integer id, starting at `"1"`.
    pub fn next_version_id(&mut self, key: &ResourceKey) -> RegistryResult<String> {
        let mut n: u64 = 1;
        loop {
            let vid = n.to_string();
            if !self.tx.exists(&key.version_path(&vid))? {
                return Ok(vid);
            }
            n += 1;
        }
    }

    pub fn version_exists(&mut self, vkey: &VersionKey) -> RegistryResult<bool> {
        Ok(self.tx.exists(&vkey.path())?)
    }

    /// Version id picked from a client body, honoring `setversionid`.
    pub(crate) fn choose_version_id(
        &mut self,
        key: &ResourceKey,
        rm: &ResourceModel,
        given: Option<&Value>,
    ) -> RegistryResult<String> {
        match given {
            None | Some(Value::Null) => self.next_version_id(key),
            Some(_) if !rm.setversionid => Err(bad_request(format!(
                "Resource \"{}\" doesn't allow setting of \"versionid\"",
                rm.plural
            ))),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(bad_request("Attribute \"versionid\" must be a string")),
        }
    }

    // -----------------------------------------------------------------------
    // Create / update
    // -----------------------------------------------------------------------

    /// Add a new Version to an existing Resource.
    ///
    /// The new Version's `ancestor` defaults to the latest existing
    /// Version, or to itself when it is the first. A non-sticky Resource
    /// makes it the default.
    pub(crate) fn create_version(
        &mut self,
        key: &ResourceKey,
        rm: &ResourceModel,
        vid: &str,
        obj: Object,
    ) -> RegistryResult<()> {
        check_id(vid)?;
        let vkey = key.version(vid);
        if self.tx.exists(&vkey.path())? {
            return Err(bad_request(format!("Version \"{vid}\" already exists")));
        }
        let body = prepare_version(rm, key, vid, obj)?;
        let latest = self.latest_version_id(key)?;

        let mut meta = self.meta_row(key)?;
        let seq = meta.get_i64(NEXT_SEQ_PROP).unwrap_or(1);
        meta.set(NEXT_SEQ_PROP, seq + 1);

        let mut row = self.new_row(
            EntityKind::Version,
            vkey.path(),
            vid,
            format!("{}/versions", key.abstract_path()),
        );
        let mut attrs = body.attrs;
        attrs.remove("epoch");
        apply_attrs(&mut row, attrs, WriteMode::Replace, &[]);
        apply_document(&mut row, rm, body.document.as_deref());
        row.set(&format!("{}id", rm.singular), key.id.as_str());
        row.set("versionid", vid);
        row.set(SEQ_PROP, seq);
        let ancestor = body
            .ancestor
            .clone()
            .or(latest)
            .unwrap_or_else(|| vid.to_string());
        row.set("ancestor", ancestor);
        self.tx.put(row);

        if !meta.get_bool("defaultversionsticky").unwrap_or(false) {
            meta.set("defaultversionid", vid);
        }
        self.touch(&mut meta);
        self.tx.put(meta);
        debug!(resource = %key, version = %vid, seq, "created version");

        if body.ancestor.is_some() {
            self.verify_ancestor(&vkey)?;
        }
        self.enforce_max_versions(key, rm)
    }

    /// Update an existing Version's attributes.
    pub(crate) fn update_version(
        &mut self,
        vkey: &VersionKey,
        rm: &ResourceModel,
        obj: Object,
        mode: WriteMode,
    ) -> RegistryResult<()> {
        let mut row = self
            .tx
            .get(&vkey.path())?
            .ok_or_else(|| not_found(format!("Not found: {vkey}")))?;
        let body = prepare_version(rm, &vkey.resource, &vkey.id, obj)?;
        let mut attrs = body.attrs;
        self.check_epoch(&row, &mut attrs)?;
        let id_attr = format!("{}id", rm.singular);
        apply_attrs(
            &mut row,
            attrs,
            mode,
            &[id_attr.as_str(), "versionid", "ancestor"],
        );
        apply_document(&mut row, rm, body.document.as_deref());
        if let Some(ancestor) = &body.ancestor {
            row.set("ancestor", ancestor.as_str());
        }
        self.touch(&mut row);
        self.tx.put(row);
        debug!(version = %vkey, "updated version");

        if body.ancestor.is_some() {
            self.verify_ancestor(vkey)?;
        }
        Ok(())
    }

    /// Create or update one Version. A missing Resource is created along
    /// with it. Returns `true` if the Version was created.
    pub fn upsert_version(
        &mut self,
        vkey: &VersionKey,
        obj: Object,
        mode: WriteMode,
    ) -> RegistryResult<bool> {
        let key = &vkey.resource;
        let rm = self.resource_model(&key.group.plural, &key.plural)?;
        if !self.tx.exists(&key.path())? {
            if !rm.setversionid {
                return Err(bad_request(format!(
                    "Resource \"{}\" doesn't allow setting of \"versionid\"",
                    rm.plural
                )));
            }
            self.create_resource_shell(key, &rm)?;
            self.create_version(key, &rm, &vkey.id, obj)?;
            return Ok(true);
        }
        self.check_not_xref(key)?;
        if self.tx.exists(&vkey.path())? {
            if mode == WriteMode::Create {
                return Err(bad_request(format!("Version \"{}\" already exists", vkey.id)));
            }
            self.update_version(vkey, &rm, obj, mode)?;
            Ok(false)
        } else {
            if !rm.setversionid {
                return Err(bad_request(format!(
                    "Resource \"{}\" doesn't allow setting of \"versionid\"",
                    rm.plural
                )));
            }
            self.create_version(key, &rm, &vkey.id, obj)?;
            Ok(true)
        }
    }

    /// Create or update a batch of Versions (`{"v1": {...}, ...}`).
    ///
    /// Explicit `ancestor` values are checked once the whole batch is in
    /// place, so a batch may reference Versions it creates later.
    pub fn upsert_versions(
        &mut self,
        key: &ResourceKey,
        versions: Object,
        mode: WriteMode,
    ) -> RegistryResult<Vec<(String, bool)>> {
        let rm = self.resource_model(&key.group.plural, &key.plural)?;
        if !self.tx.exists(&key.path())? {
            self.create_resource_shell(key, &rm)?;
        } else {
            self.check_not_xref(key)?;
        }

        let mut results = Vec::new();
        let mut explicit = Vec::new();
        for (vid, body) in versions {
            let mut body = body
                .into_object()
                .ok_or_else(|| bad_request(format!("Version \"{vid}\" must be an object")))?;
            // Checked after the batch.
            let ancestor = match body.remove("ancestor") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s),
                Some(_) => return Err(bad_request("Attribute \"ancestor\" must be a string")),
            };
            let vkey = key.version(&vid);
            let created = if self.tx.exists(&vkey.path())? {
                self.update_version(&vkey, &rm, body, mode)?;
                false
            } else {
                if !rm.setversionid {
                    return Err(bad_request(format!(
                        "Resource \"{}\" doesn't allow setting of \"versionid\"",
                        rm.plural
                    )));
                }
                self.create_version(key, &rm, &vid, body)?;
                true
            };
            if let Some(a) = ancestor {
                if let Some(mut row) = self.tx.get(&vkey.path())? {
                    row.set("ancestor", a);
                    self.tx.put(row);
                    explicit.push(vkey);
                }
            }
            results.push((vid, created));
        }
        for vkey in &explicit {
            self.verify_ancestor(vkey)?;
        }
        Ok(results)
    }

    /// Check that a Version's `ancestor` names an existing Version.
    fn verify_ancestor(&mut self, vkey: &VersionKey) -> RegistryResult<()> {
        let Some(row) = self.tx.get(&vkey.path())? else {
            // Evicted by maxversions.
            return Ok(());
        };
        let ancestor = row.get_str("ancestor").unwrap_or(&vkey.id).to_string();
        if ancestor != vkey.id && !self.tx.exists(&vkey.resource.version_path(&ancestor))? {
            return Err(bad_request(format!(
                "Can't find Version \"{ancestor}\" referenced as the \"ancestor\" of \"{}\"",
                vkey.id
            )));
        }
        Ok(())
    }

    /// Drop the oldest non-default Versions until `maxversions` holds.
    fn enforce_max_versions(&mut self, key: &ResourceKey, rm: &ResourceModel) -> RegistryResult<()> {
        if rm.maxversions == 0 {
            return Ok(());
        }
        loop {
            let rows = self.version_rows(key)?;
            if rows.len() as u64 <= rm.maxversions {
                return Ok(());
            }
            let default = self.meta_row(key)?.get_str("defaultversionid").map(str::to_string);
            let oldest = rows
                .iter()
                .filter(|r| Some(&r.uid) != default.as_ref())
                .min_by_key(|r| r.get_i64(SEQ_PROP).unwrap_or(0))
                .map(|r| r.uid.clone());
            let Some(vid) = oldest else {
                return Ok(());
            };
            self.remove_version_row(key, &vid)?;
            debug!(resource = %key, version = %vid, max = rm.maxversions, "evicted version");
        }
    }

    // -----------------------------------------------------------------------
    // Default version
    // -----------------------------------------------------------------------

    /// Point the Resource's default at `vid`, or unstick it with `None`.
    ///
    /// Choosing a Version other than the latest makes the default sticky.
    pub fn set_default_version(&mut self, key: &ResourceKey, vid: Option<&str>) -> RegistryResult<()> {
        let rm = self.resource_model(&key.group.plural, &key.plural)?;
        let mut meta = self.meta_row(key)?;
        if meta.get("xref").is_some() {
            return Err(bad_request(
                "Can't update \"defaultversionid\" if \"xref\" is set",
            ));
        }
        let latest = self.latest_version_id(key)?;
        match vid {
            None => {
                meta.set("defaultversionsticky", false);
                meta.set("defaultversionid", latest.map(Value::from).unwrap_or(Value::Null));
            }
            Some(vid) => {
                if !self.tx.exists(&key.version_path(vid))? {
                    return Err(not_found(format!("Can't find version \"{vid}\"")));
                }
                let sticky = meta.get_bool("defaultversionsticky").unwrap_or(false);
                if sticky || latest.as_deref() != Some(vid) {
                    if !rm.setdefaultversionsticky {
                        return Err(bad_request(format!(
                            "Resource \"{}\" doesn't allow setting of \"defaultversionsticky\"",
                            rm.plural
                        )));
                    }
                    meta.set("defaultversionsticky", true);
                }
                meta.set("defaultversionid", vid);
            }
        }
        self.touch(&mut meta);
        debug!(
            resource = %key,
            default = meta.get_str("defaultversionid").unwrap_or(""),
            sticky = meta.get_bool("defaultversionsticky").unwrap_or(false),
            "default version changed"
        );
        self.tx.put(meta);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete a Version.
    ///
    /// `next` names the new default: `None` keeps the current one (or
    /// recomputes it if the deleted Version was the default), `"null"`
    /// unsticks, anything else must be an existing Version. Deleting the
    /// last Version deletes the Resource.
    pub fn delete_version(
        &mut self,
        vkey: &VersionKey,
        next: Option<&str>,
        epoch: Option<&str>,
    ) -> RegistryResult<()> {
        let key = &vkey.resource;
        self.resource_model(&key.group.plural, &key.plural)?;
        let mut meta = self
            .tx
            .get(&key.meta_path())?
            .ok_or_else(|| not_found(format!("Not found: {key}")))?;
        if meta.get("xref").is_some() {
            return Err(bad_request("Can't delete \"versions\" if \"xref\" is set"));
        }
        if meta.get_bool("readonly").unwrap_or(false) {
            return Err(bad_request(
                "Delete operations on read-only resources are not allowed",
            ));
        }
        if !self.tx.exists(&vkey.path())? {
            return Err(not_found(format!("Not found: {vkey}")));
        }
        self.check_delete_epoch(&vkey.path(), epoch)?;
        if next == Some(vkey.id.as_str()) {
            return Err(bad_request(
                "Can't set defaultversionid to Version being deleted",
            ));
        }
        if let Some(n) = next.filter(|n| *n != "null") {
            if !self.tx.exists(&key.version_path(n))? {
                return Err(bad_request(format!("Can't find next default Version \"{n}\"")));
            }
        }

        let was_default = meta.get_str("defaultversionid") == Some(vkey.id.as_str());
        self.remove_version_row(key, &vkey.id)?;
        debug!(version = %vkey, "deleted version");

        if self.version_rows(key)?.is_empty() {
            self.tx.delete_tree(&key.path())?;
            self.touch_path(&key.group.path())?;
            debug!(resource = %key, "deleted resource with its last version");
            return Ok(());
        }

        match next {
            Some("null") => self.set_default_version(key, None)?,
            Some(n) => self.set_default_version(key, Some(n))?,
            None if was_default => self.set_default_version(key, None)?,
            None => {
                meta = self.meta_row(key)?;
                self.touch(&mut meta);
                self.tx.put(meta);
            }
        }
        Ok(())
    }

    /// Delete several Versions of one Resource. `None` deletes all of them
    /// (and so the Resource); ids that do not exist are skipped.
    pub fn delete_versions(
        &mut self,
        key: &ResourceKey,
        ids: Option<Vec<(String, Option<String>)>>,
    ) -> RegistryResult<()> {
        let targets = match ids {
            Some(ids) => ids,
            None => self
                .version_rows(key)?
                .into_iter()
                .map(|r| (r.uid, None))
                .collect(),
        };
        for (vid, epoch) in targets {
            let vkey = key.version(&vid);
            if self.tx.exists(&vkey.path())? {
                self.delete_version(&vkey, None, epoch.as_deref())?;
            }
        }
        Ok(())
    }

    /// Remove one Version row, first promoting its children to roots.
    fn remove_version_row(&mut self, key: &ResourceKey, vid: &str) -> RegistryResult<()> {
        for mut child in self.version_rows(key)? {
            if child.uid != vid && child.get_str("ancestor") == Some(vid) {
                let own = child.uid.clone();
                child.set("ancestor", own);
                self.tx.put(child);
            }
        }
        self.tx.delete(&key.version_path(vid));
        Ok(())
    }

    /// Remove every Version without promotion or cascade. Used when a
    /// Resource is re-pointed with `xref`.
    pub(crate) fn just_delete_versions(&mut self, key: &ResourceKey) -> RegistryResult<usize> {
        let rows = self.version_rows(key)?;
        for row in &rows {
            self.tx.delete(&row.path);
        }
        Ok(rows.len())
    }

    pub(crate) fn meta_row(&mut self, key: &ResourceKey) -> RegistryResult<EntityRow> {
        self.tx
            .get(&key.meta_path())?
            .ok_or_else(|| RegistryError::Invariant(format!("meta for {key} missing")))
    }

    pub(crate) fn check_not_xref(&mut self, key: &ResourceKey) -> RegistryResult<()> {
        if self.meta_row(key)?.get("xref").is_some() {
            return Err(bad_request("Can't update \"versions\" if \"xref\" is set"));
        }
        Ok(())
    }
}
