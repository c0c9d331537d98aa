use tracing::debug;

use xreg_model::ResourceModel;
use xreg_store::EntityRow;
use xreg_types::{EntityKind, Object, Value};

use crate::entity::{check_id, check_id_attr, strip_generated, take_collection, GroupKey, ResourceKey, VersionKey, WriteMode};
use crate::error::{bad_request, not_found, RegistryResult};
use crate::registry::{nested_mode, Registry};

impl Registry {
    pub fn resource_exists(&mut self, key: &ResourceKey) -> RegistryResult<bool> {
        Ok(self.tx.exists(&key.path())?)
    }

    /// Ids of every Resource of one type in a Group, in id order.
    pub fn resource_ids(&mut self, group: &GroupKey, plural: &str) -> RegistryResult<Vec<String>> {
        let prefix = format!("{}/{plural}", group.path());
        Ok(self
            .tx
            .scan(&prefix)?
            .into_iter()
            .filter(|r| r.kind == EntityKind::Resource)
            .map(|r| r.uid)
            .collect())
    }

    /// Stage the Resource and Meta rows of a new Resource (no Versions
    /// yet), creating the Group if needed.
    pub(crate) fn create_resource_shell(
        &mut self,
        key: &ResourceKey,
        rm: &ResourceModel,
    ) -> RegistryResult<()> {
        check_id(&key.id)?;
        self.ensure_group(&key.group)?;
        let id_attr = format!("{}id", rm.singular);
        let collection = format!("{}/{}", key.group.path(), key.plural);
        self.check_id_case(&collection, EntityKind::Resource, &key.id, &id_attr, "Resource")?;

        let mut row = EntityRow::new(EntityKind::Resource, key.path(), &key.id, key.abstract_path());
        row.set(&id_attr, key.id.as_str());
        self.created.insert(row.path.clone());
        self.tx.put(row);
        let meta = self.new_meta_row(key, rm);
        self.tx.put(meta);
        self.touch_path(&key.group.path())?;
        debug!(resource = %key, "created resource");
        Ok(())
    }

    /// Create or update a Resource from a client body.
    ///
    /// The body's own attributes apply to the default Version. A nested
    /// `meta` object updates the Meta and a nested `versions` map upserts
    /// Versions, all in the same transaction. Returns `true` if the
    /// Resource was created.
    pub fn upsert_resource(
        &mut self,
        key: &ResourceKey,
        mut obj: Object,
        mode: WriteMode,
    ) -> RegistryResult<bool> {
        let rm = self.resource_model(&key.group.plural, &key.plural)?;
        check_id(&key.id)?;
        let id_attr = format!("{}id", rm.singular);
        check_id_attr(&obj, &id_attr, &key.id)?;
        obj.remove(&id_attr);

        let meta = match obj.remove("meta") {
            None | Some(Value::Null) => None,
            Some(Value::Object(m)) => Some(m),
            Some(_) => return Err(bad_request("Attribute \"meta\" must be an object")),
        };
        let versions = take_collection(&mut obj, "versions", "version")?.filter(|v| !v.is_empty());
        strip_generated(&mut obj, &[]);
        let nested = nested_mode(mode);

        if self.tx.exists(&key.path())? {
            if mode == WriteMode::Create {
                return Err(bad_request(format!(
                    "Resource \"{}\" of type \"{}\" already exists",
                    key.id, key.plural
                )));
            }
            self.update_existing_resource(key, &rm, obj, meta, versions, mode)?;
            debug!(resource = %key, "updated resource");
            return Ok(false);
        }

        self.create_resource_shell(key, &rm)?;
        match versions {
            Some(versions) if obj.is_empty() => {
                self.upsert_versions(key, versions, nested)?;
            }
            versions => {
                let vid = self.choose_version_id(key, &rm, obj.get("versionid"))?;
                self.create_version(key, &rm, &vid, obj)?;
                if let Some(versions) = versions {
                    self.upsert_versions(key, versions, nested)?;
                }
            }
        }
        if let Some(meta) = meta {
            self.upsert_meta(key, meta, nested)?;
        }
        Ok(true)
    }

    fn update_existing_resource(
        &mut self,
        key: &ResourceKey,
        rm: &ResourceModel,
        mut obj: Object,
        mut meta: Option<Object>,
        versions: Option<Object>,
        mode: WriteMode,
    ) -> RegistryResult<()> {
        let nested = nested_mode(mode);
        // An xref'd Resource can only be changed through its meta.
        if self.meta_row(key)?.get("xref").is_some() {
            if let Some(meta) = meta.take() {
                self.upsert_meta(key, meta, nested)?;
            }
            if self.meta_row(key)?.get("xref").is_some() {
                if versions.is_some() || !obj.is_empty() {
                    return Err(bad_request("Can't update \"versions\" if \"xref\" is set"));
                }
                return Ok(());
            }
        }

        let had_versions = versions.is_some();
        if let Some(versions) = versions {
            self.upsert_versions(key, versions, nested)?;
        }
        if let Some(meta) = meta {
            self.upsert_meta(key, meta, nested)?;
        }
        if had_versions && obj.is_empty() {
            return Ok(());
        }

        let default = self
            .meta_row(key)?
            .get_str("defaultversionid")
            .map(str::to_string)
            .ok_or_else(|| not_found(format!("Resource {key} has no default Version")))?;
        if let Some(given) = obj.get("versionid").filter(|v| !v.is_null()) {
            if given.as_str() != Some(default.as_str()) {
                return Err(bad_request(format!(
                    "When \"versionid\"({given}) is present it must match the \"defaultversionid\"({default})"
                )));
            }
        }
        obj.remove("versionid");
        self.update_version(&key.version(&default), rm, obj, nested)
    }

    /// Add a Version to a Resource from a POST body, creating the Resource
    /// if needed. An existing `versionid` updates that Version instead.
    /// Returns the Version and whether it was created.
    pub fn create_resource_version(
        &mut self,
        key: &ResourceKey,
        obj: Object,
    ) -> RegistryResult<(VersionKey, bool)> {
        let rm = self.resource_model(&key.group.plural, &key.plural)?;
        let vid = self.choose_version_id(key, &rm, obj.get("versionid"))?;
        let vkey = key.version(&vid);
        if !self.tx.exists(&key.path())? {
            self.create_resource_shell(key, &rm)?;
            self.create_version(key, &rm, &vid, obj)?;
            return Ok((vkey, true));
        }
        self.check_not_xref(key)?;
        if self.tx.exists(&vkey.path())? {
            self.update_version(&vkey, &rm, obj, WriteMode::Replace)?;
            Ok((vkey, false))
        } else {
            self.create_version(key, &rm, &vid, obj)?;
            Ok((vkey, true))
        }
    }

    /// Delete a Resource, its Meta and all of its Versions.
    pub fn delete_resource(&mut self, key: &ResourceKey, epoch: Option<&str>) -> RegistryResult<()> {
        self.resource_model(&key.group.plural, &key.plural)?;
        let meta = self
            .tx
            .get(&key.meta_path())?
            .ok_or_else(|| not_found(format!("Not found: {key}")))?;
        if meta.get_bool("readonly").unwrap_or(false) {
            return Err(bad_request(
                "Delete operations on read-only resources are not allowed",
            ));
        }
        if let Some(epoch) = epoch {
            let default = meta.get_str("defaultversionid").map(str::to_string);
            if let Some(vid) = default {
                self.check_delete_epoch(&key.version_path(&vid), Some(epoch))?;
            }
        }
        let removed = self.tx.delete_tree(&key.path())?;
        self.touch_path(&key.group.path())?;
        debug!(resource = %key, rows = removed, "deleted resource");
        Ok(())
    }

    /// Delete several Resources of one type. `None` deletes all of them;
    /// ids that do not exist are skipped.
    pub fn delete_resources(
        &mut self,
        group: &GroupKey,
        plural: &str,
        ids: Option<Vec<(String, Option<String>)>>,
    ) -> RegistryResult<()> {
        self.resource_model(&group.plural, plural)?;
        let targets = match ids {
            Some(ids) => ids,
            None => self
                .resource_ids(group, plural)?
                .into_iter()
                .map(|id| (id, None))
                .collect(),
        };
        for (id, epoch) in targets {
            let key = ResourceKey::new(group.clone(), plural, id);
            if self.tx.exists(&key.path())? {
                self.delete_resource(&key, epoch.as_deref())?;
            }
        }
        Ok(())
    }
}
