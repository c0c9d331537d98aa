use tracing::{debug, info};

use xreg_model::{check_attrs, validate_object, ResourceModel};
use xreg_store::EntityRow;
use xreg_types::{EntityKind, Object, Value, Xid};

use crate::entity::{apply_attrs, strip_generated, GroupKey, ResourceKey, WriteMode};
use crate::error::{bad_request, not_found, RegistryResult};
use crate::registry::Registry;
use crate::version::NEXT_SEQ_PROP;

/// Meta attributes the engine manages itself; a client bag never
/// overwrites them through the generic attribute path.
const META_MANAGED: &[&str] = &["readonly", "defaultversionid", "defaultversionsticky", "xref"];

impl Registry {
    /// A fresh Meta row: non-sticky, not read-only, no default yet.
    pub(crate) fn new_meta_row(&mut self, key: &ResourceKey, rm: &ResourceModel) -> EntityRow {
        let mut row = self.new_row(
            EntityKind::Meta,
            key.meta_path(),
            &key.id,
            format!("{}/meta", key.abstract_path()),
        );
        row.set(&format!("{}id", rm.singular), key.id.as_str());
        row.set("readonly", false);
        row.set("compatibility", "none");
        row.set("defaultversionsticky", false);
        row.set(NEXT_SEQ_PROP, 1i64);
        row
    }

    /// Create or update a Resource's Meta from a client body.
    ///
    /// A missing Resource is created first, with a single Version named
    /// after `defaultversionid` (or `"1"`). Returns `true` in that case.
    pub fn upsert_meta(
        &mut self,
        key: &ResourceKey,
        mut obj: Object,
        mode: WriteMode,
    ) -> RegistryResult<bool> {
        let rm = self.resource_model(&key.group.plural, &key.plural)?;
        let id_attr = format!("{}id", rm.singular);
        match obj.remove(&id_attr) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s == key.id => {}
            Some(other) => {
                return Err(bad_request(format!(
                    "meta.{id_attr} must be \"{}\", not \"{other}\"",
                    key.id
                )));
            }
        }
        strip_generated(&mut obj, &[]);
        // Server controlled; see `set_readonly`.
        obj.remove("readonly");

        let created = !self.tx.exists(&key.path())?;
        if created {
            let vid = match obj.get("defaultversionid") {
                Some(Value::String(s)) => s.clone(),
                _ => "1".to_string(),
            };
            self.create_resource_shell(key, &rm)?;
            self.create_version(key, &rm, &vid, Object::new())?;
        }

        let mut row = self.meta_row(key)?;
        self.check_epoch(&row, &mut obj)?;

        let current_xref = row.get_str("xref").map(str::to_string);
        let xref = match obj.remove("xref") {
            Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(bad_request("Attribute \"xref\" must be a string")),
            None if mode == WriteMode::Merge => current_xref.clone(),
            None => None,
        };

        if let Some(target) = xref {
            return self.set_xref(key, &rm, row, &target, obj).map(|_| created);
        }
        if current_xref.is_some() {
            row = self.clear_xref(key, &rm)?;
        }

        let sticky_given = match obj.remove("defaultversionsticky") {
            Some(Value::Null) => Some(false),
            Some(Value::Bool(b)) => Some(b),
            Some(_) => {
                return Err(bad_request(
                    "Attribute \"defaultversionsticky\" must be a boolean",
                ));
            }
            None if mode == WriteMode::Merge => None,
            None => Some(false),
        };
        let defid_given = match obj.remove("defaultversionid") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(bad_request("Attribute \"defaultversionid\" must be a string")),
        };
        if sticky_given == Some(true) && !rm.setdefaultversionsticky {
            return Err(bad_request(format!(
                "Resource \"{}\" doesn't allow setting of \"defaultversionsticky\"",
                rm.plural
            )));
        }

        check_attrs(&obj)?;
        validate_object(&rm.meta_attribute_set(), &obj)?;

        let sticky = sticky_given.unwrap_or_else(|| row.get_bool("defaultversionsticky").unwrap_or(false));
        let latest = self.latest_version_id(key)?;
        let defid = if sticky {
            match defid_given {
                Some(vid) => {
                    if !self.tx.exists(&key.version_path(&vid))? {
                        return Err(bad_request(format!("Can't find version \"{vid}\"")));
                    }
                    Some(vid)
                }
                None => row.get_str("defaultversionid").map(str::to_string).or(latest),
            }
        } else {
            if let (Some(given), Some(latest)) = (&defid_given, &latest) {
                if given != latest {
                    return Err(bad_request(format!(
                        "Attribute \"defaultversionid\" must be \"{latest}\" since \"defaultversionsticky\" is \"false\""
                    )));
                }
            }
            latest
        };

        let mut keep: Vec<&str> = META_MANAGED.to_vec();
        keep.push(id_attr.as_str());
        apply_attrs(&mut row, obj, mode, &keep);
        if row.get("compatibility").is_none() {
            row.set("compatibility", "none");
        }
        row.set("defaultversionsticky", sticky);
        row.set("defaultversionid", defid.map(Value::from).unwrap_or(Value::Null));
        self.touch(&mut row);
        debug!(
            resource = %key,
            default = row.get_str("defaultversionid").unwrap_or(""),
            sticky,
            "updated meta"
        );
        self.tx.put(row);
        Ok(created)
    }

    /// Point a Resource at another Resource's Versions.
    ///
    /// All of the Resource's own Versions are dropped and the Meta keeps
    /// only its id and `xref`.
    fn set_xref(
        &mut self,
        key: &ResourceKey,
        rm: &ResourceModel,
        mut row: EntityRow,
        target: &str,
        extra: Object,
    ) -> RegistryResult<()> {
        let parsed = Xid::parse(target)
            .ok()
            .filter(|x| x.kind() == EntityKind::Resource)
            .ok_or_else(|| bad_request(format!("'xref' \"{target}\" must be an xid of a Resource")))?;
        let same_type = parsed.group().map(|(g, _)| g) == Some(key.group.plural.as_str())
            && parsed.resource().map(|(r, _)| r) == Some(key.plural.as_str());
        if !same_type {
            return Err(bad_request(format!(
                "'xref' \"{target}\" must point to a Resource of type \"/{}/{}\"",
                key.group.plural, key.plural
            )));
        }
        if parsed.to_path() == key.path() {
            return Err(bad_request("'xref' can't point to itself"));
        }
        let extra: Vec<&String> = extra
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k)
            .collect();
        if !extra.is_empty() {
            let names: Vec<&str> = extra.iter().map(|s| s.as_str()).collect();
            return Err(bad_request(format!(
                "Extra attributes ({}) in \"meta\" not allowed when \"xref\" is set",
                names.join(",")
            )));
        }

        let removed = self.just_delete_versions(key)?;
        let id_attr = format!("{}id", rm.singular);
        row.props.retain(|k, _| *k == id_attr || k == NEXT_SEQ_PROP);
        row.set("xref", target);
        self.tx.put(row);
        info!(resource = %key, xref = %target, removed, "resource xref set");
        Ok(())
    }

    /// Turn an xref'd Resource back into a normal one with a fresh Meta and
    /// a single empty Version `"1"`.
    fn clear_xref(&mut self, key: &ResourceKey, rm: &ResourceModel) -> RegistryResult<EntityRow> {
        let mut row = self.new_meta_row(key, rm);
        if let Some(seq) = self.meta_row(key)?.get(NEXT_SEQ_PROP).cloned() {
            row.set(NEXT_SEQ_PROP, seq);
        }
        self.tx.put(row);
        self.create_version(key, rm, "1", Object::new())?;
        info!(resource = %key, "resource xref removed");
        self.meta_row(key)
    }

    /// Mark a Resource read-only (or writable again). Read-only Resources
    /// and their Versions can't be deleted.
    pub fn set_readonly(&mut self, key: &ResourceKey, readonly: bool) -> RegistryResult<()> {
        let mut row = self
            .tx
            .get(&key.meta_path())?
            .ok_or_else(|| not_found(format!("Not found: {key}")))?;
        row.set("readonly", readonly);
        self.touch(&mut row);
        self.tx.put(row);
        Ok(())
    }

    /// The Resource an xref'd Resource points at, if any.
    pub fn xref_target(&mut self, key: &ResourceKey) -> RegistryResult<Option<ResourceKey>> {
        let Some(meta) = self.tx.get(&key.meta_path())? else {
            return Ok(None);
        };
        let Some(xref) = meta.get_str("xref") else {
            return Ok(None);
        };
        let parsed = Xid::parse_kind(xref, EntityKind::Resource)?;
        match (parsed.group(), parsed.resource()) {
            (Some((g, gid)), Some((r, rid))) => {
                Ok(Some(ResourceKey::new(GroupKey::new(g, gid), r, rid)))
            }
            _ => Ok(None),
        }
    }
}
