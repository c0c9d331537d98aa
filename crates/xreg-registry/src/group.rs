use tracing::debug;

use xreg_model::{check_attrs, validate_object, GroupModel, ResourceModel};
use xreg_types::{EntityKind, Object};

use crate::entity::{
    apply_attrs, check_id, check_id_attr, collection_names, strip_generated, take_collection,
    GroupKey, ResourceKey, WriteMode,
};
use crate::error::{bad_request, not_found, RegistryResult};
use crate::registry::{nested_mode, Registry};

impl Registry {
    /// The model of a Group type, or a 404 naming the unknown type.
    pub fn group_model(&self, plural: &str) -> RegistryResult<GroupModel> {
        self.model()
            .find_group_model(plural)
            .cloned()
            .ok_or_else(|| not_found(format!("Unknown Group type: {plural}")))
    }

    /// The model of a Resource type within a Group type.
    pub fn resource_model(&self, gplural: &str, rplural: &str) -> RegistryResult<ResourceModel> {
        let gm = self.group_model(gplural)?;
        gm.find_resource_model(rplural)
            .cloned()
            .ok_or_else(|| not_found(format!("Unknown Resource type: {rplural}")))
    }

    pub fn group_exists(&mut self, key: &GroupKey) -> RegistryResult<bool> {
        Ok(self.tx.exists(&key.path())?)
    }

    /// Ids of every Group of one type, in id order.
    pub fn group_ids(&mut self, plural: &str) -> RegistryResult<Vec<String>> {
        Ok(self
            .tx
            .scan(plural)?
            .into_iter()
            .filter(|r| r.kind == EntityKind::Group)
            .map(|r| r.uid)
            .collect())
    }

    /// Create or update a Group from a client body, including any nested
    /// Resource collections. Returns `true` if the Group was created.
    pub fn upsert_group(
        &mut self,
        key: &GroupKey,
        mut obj: Object,
        mode: WriteMode,
    ) -> RegistryResult<bool> {
        let gm = self.group_model(&key.plural)?;
        check_id(&key.id)?;
        let id_attr = format!("{}id", gm.singular);
        check_id_attr(&obj, &id_attr, &key.id)?;
        obj.remove(&id_attr);

        let mut collections = Vec::new();
        for rm in gm.resources.values() {
            if let Some(coll) = take_collection(&mut obj, &rm.plural, &rm.singular)? {
                collections.push((rm.plural.clone(), coll));
            }
        }
        strip_generated(&mut obj, &collection_names(gm.resources.keys()));

        let path = key.path();
        let existing = self.tx.get(&path)?;
        let created = existing.is_none();
        let mut row = match existing {
            Some(_) if mode == WriteMode::Create => {
                return Err(bad_request(format!(
                    "Group \"{}\" of type \"{}\" already exists",
                    key.id, key.plural
                )));
            }
            Some(row) => row,
            None => {
                self.check_id_case(&key.plural, EntityKind::Group, &key.id, &id_attr, "Group")?;
                let mut row = self.new_row(EntityKind::Group, path, &key.id, key.plural.clone());
                row.set(&id_attr, key.id.as_str());
                row
            }
        };

        self.check_epoch(&row, &mut obj)?;
        check_attrs(&obj)?;
        validate_object(&gm.attribute_set(), &obj)?;
        apply_attrs(&mut row, obj, mode, &[id_attr.as_str()]);
        self.touch(&mut row);
        self.tx.put(row);

        if created {
            self.touch_path("")?;
            debug!(group = %key, "created group");
        } else {
            debug!(group = %key, "updated group");
        }

        let nested = nested_mode(mode);
        for (rplural, coll) in collections {
            for (rid, body) in coll {
                let rkey = ResourceKey::new(key.clone(), rplural.clone(), rid);
                self.upsert_resource(&rkey, body.into_object().unwrap_or_default(), nested)?;
            }
        }
        Ok(created)
    }

    /// Make sure a Group exists, creating an empty one if needed.
    pub(crate) fn ensure_group(&mut self, key: &GroupKey) -> RegistryResult<()> {
        if !self.tx.exists(&key.path())? {
            self.upsert_group(key, Object::new(), WriteMode::Replace)?;
        }
        Ok(())
    }

    /// Delete a Group and everything in it.
    pub fn delete_group(&mut self, key: &GroupKey, epoch: Option<&str>) -> RegistryResult<()> {
        let path = key.path();
        if !self.tx.exists(&path)? {
            return Err(not_found(format!("Not found: {key}")));
        }
        self.check_delete_epoch(&path, epoch)?;
        let removed = self.tx.delete_tree(&path)?;
        self.touch_path("")?;
        debug!(group = %key, rows = removed, "deleted group");
        Ok(())
    }

    /// Delete several Groups of one type. `None` deletes all of them;
    /// ids that do not exist are skipped.
    pub fn delete_groups(
        &mut self,
        plural: &str,
        ids: Option<Vec<(String, Option<String>)>>,
    ) -> RegistryResult<()> {
        self.group_model(plural)?;
        let targets = match ids {
            Some(ids) => ids,
            None => self.group_ids(plural)?.into_iter().map(|id| (id, None)).collect(),
        };
        for (id, epoch) in targets {
            let key = GroupKey::new(plural, id);
            if self.tx.exists(&key.path())? {
                self.delete_group(&key, epoch.as_deref())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use xreg_model::{AttrHolder, AttrType};
    use xreg_store::InMemoryEntityStore;
    use xreg_types::Value;

    use super::*;

    fn registry() -> Registry {
        let mut reg = Registry::create(Arc::new(InMemoryEntityStore::new()), "r").unwrap();
        let gm = reg.model_mut().add_group_model("dirs", "dir").unwrap();
        gm.add_attr("color", AttrType::String).unwrap();
        gm.add_resource_model("files", "file", 0, true, true, false).unwrap();
        reg.save_model().unwrap();
        reg.commit().unwrap();
        reg
    }

    fn obj(v: serde_json::Value) -> Object {
        Value::from(v).into_object().unwrap()
    }

    #[test]
    fn create_touches_registry() {
        let mut reg = registry();
        let d1 = GroupKey::new("dirs", "d1");
        assert!(reg.upsert_group(&d1, obj(serde_json::json!({"color": "red"})), WriteMode::Replace).unwrap());
        let row = reg.get_row("dirs/d1").unwrap().unwrap();
        assert_eq!(row.get_i64("epoch"), Some(1));
        assert_eq!(row.get_str("dirid"), Some("d1"));
        assert_eq!(reg.registry_row().unwrap().get_i64("epoch"), Some(2));
        reg.commit().unwrap();

        assert!(!reg.upsert_group(&d1, Object::new(), WriteMode::Merge).unwrap());
        let row = reg.get_row("dirs/d1").unwrap().unwrap();
        assert_eq!(row.get_i64("epoch"), Some(2));
        assert_eq!(row.get_str("color"), Some("red"));
        // Updating a group leaves the registry alone.
        assert_eq!(reg.registry_row().unwrap().get_i64("epoch"), Some(2));
    }

    #[test]
    fn unknown_type_and_bad_ids() {
        let mut reg = registry();
        let err = reg
            .upsert_group(&GroupKey::new("bogus", "x"), Object::new(), WriteMode::Replace)
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "Unknown Group type: bogus");

        let err = reg
            .upsert_group(&GroupKey::new("dirs", "d1"), obj(serde_json::json!({"dirid": "d2"})), WriteMode::Replace)
            .unwrap_err();
        assert_eq!(err.to_string(), "The \"dirid\" attribute must be set to \"d1\", not \"d2\"");

        assert!(reg
            .upsert_group(&GroupKey::new("dirs", "bad id"), Object::new(), WriteMode::Replace)
            .is_err());
    }

    #[test]
    fn case_insensitive_collision() {
        let mut reg = registry();
        reg.upsert_group(&GroupKey::new("dirs", "d1"), Object::new(), WriteMode::Replace)
            .unwrap();
        let err = reg
            .upsert_group(&GroupKey::new("dirs", "D1"), Object::new(), WriteMode::Replace)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempting to create a Group with a \"dirid\" of \"D1\", when one already exists as \"d1\""
        );
    }

    #[test]
    fn nested_resources_are_created() {
        let mut reg = registry();
        let body = obj(serde_json::json!({
            "files": {"f1": {}, "f2": {"versionid": "v1"}},
            "filesurl": "x",
            "filescount": 2
        }));
        reg.upsert_group(&GroupKey::new("dirs", "d1"), body, WriteMode::Replace)
            .unwrap();
        assert!(reg.get_row("dirs/d1/files/f1/versions/1").unwrap().is_some());
        assert!(reg.get_row("dirs/d1/files/f2/versions/v1").unwrap().is_some());
        assert!(reg.get_row("dirs/d1/files/f2/meta").unwrap().is_some());
    }

    #[test]
    fn delete_cascades() {
        let mut reg = registry();
        let d1 = GroupKey::new("dirs", "d1");
        reg.upsert_group(&d1, obj(serde_json::json!({"files": {"f1": {}}})), WriteMode::Replace)
            .unwrap();
        reg.upsert_group(&GroupKey::new("dirs", "d2"), Object::new(), WriteMode::Replace)
            .unwrap();
        reg.commit().unwrap();

        let err = reg.delete_group(&d1, Some("9")).unwrap_err();
        assert_eq!(err.to_string(), "Epoch value for \"d1\" must be 1 not 9");
        reg.delete_group(&d1, None).unwrap();
        assert!(reg.scan("dirs/d1").unwrap().is_empty());
        assert_eq!(reg.group_ids("dirs").unwrap(), vec!["d2"]);

        reg.delete_groups("dirs", None).unwrap();
        assert!(reg.group_ids("dirs").unwrap().is_empty());
        assert_eq!(reg.delete_group(&d1, None).unwrap_err().status_code(), 404);
    }
}
