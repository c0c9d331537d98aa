use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use xreg_model::{check_attrs, validate_object, Capabilities, Model};
use xreg_store::{EntityRow, EntityStore, Tx};
use xreg_types::{now_timestamp, EntityKind, Object, Value, Xid};

use crate::entity::{
    apply_attrs, check_id, check_id_attr, collection_names, strip_generated, take_collection,
    GroupKey, ResourceKey, VersionKey, WriteMode,
};
use crate::error::{bad_request, not_found, RegistryError, RegistryResult};

const MODEL_PROP: &str = "#model";
const CAPABILITIES_PROP: &str = "#capabilities";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A registry opened for one unit of work.
///
/// Every mutation is staged in the registry's [`Tx`]; nothing reaches the
/// store until [`Registry::commit`]. After a commit or rollback the same
/// handle can be reused for the next unit of work.
pub struct Registry {
    pub(crate) tx: Tx,
    id: String,
    pub(crate) model: Model,
    pub(crate) capabilities: Capabilities,
    /// Timestamp applied to every entity touched in the current transaction.
    pub(crate) now: String,
    /// Paths whose epoch was already bumped (or created) in this transaction.
    pub(crate) touched: HashSet<String>,
    pub(crate) created: HashSet<String>,
}

impl Registry {
    /// Create a new, empty registry and commit it.
    pub fn create(store: Arc<dyn EntityStore>, id: &str) -> RegistryResult<Self> {
        check_id(id)?;
        let mut tx = Tx::begin(store, id);
        if tx.exists("")? {
            return Err(bad_request(format!("A registry with ID \"{id}\" already exists")));
        }
        let mut reg = Self::with_tx(tx, id, Model::new(), Capabilities::default());
        let mut row = reg.new_row(EntityKind::Registry, String::new(), id, String::new());
        row.set("registryid", id);
        row.set(MODEL_PROP, reg.model.to_value()?);
        row.set(CAPABILITIES_PROP, capabilities_value(&reg.capabilities)?);
        reg.tx.put(row);
        reg.commit()?;
        info!(registry = %id, "created registry");
        Ok(reg)
    }

    /// Open an existing registry.
    pub fn open(store: Arc<dyn EntityStore>, id: &str) -> RegistryResult<Self> {
        let mut tx = Tx::begin(store, id);
        let row = tx
            .get("")?
            .ok_or_else(|| not_found(format!("Registry \"{id}\" not found")))?;
        let (model, capabilities) = load_settings(&row)?;
        debug!(registry = %id, groups = model.groups.len(), "opened registry");
        Ok(Self::with_tx(tx, id, model, capabilities))
    }

    pub fn open_or_create(store: Arc<dyn EntityStore>, id: &str) -> RegistryResult<Self> {
        if store.exists(id, "")? {
            Self::open(store, id)
        } else {
            Self::create(store, id)
        }
    }

    fn with_tx(tx: Tx, id: &str, model: Model, capabilities: Capabilities) -> Self {
        Self {
            tx,
            id: id.to_string(),
            model,
            capabilities,
            now: now_timestamp(),
            touched: HashSet::new(),
            created: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable access to the live model. Changes take effect for the rest
    /// of the transaction and are persisted by [`Registry::save_model`].
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// Verify the live model and stage it on the registry row.
    pub fn save_model(&mut self) -> RegistryResult<()> {
        self.model.verify()?;
        let mut row = self.registry_row()?;
        row.set(MODEL_PROP, self.model.to_value()?);
        self.tx.put(row);
        debug!(registry = %self.id, "model saved");
        Ok(())
    }

    /// Merge a client-supplied model into the live one and save it.
    pub fn apply_model(&mut self, incoming: &Model) -> RegistryResult<()> {
        self.model.apply_new_model(incoming)?;
        self.save_model()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Replace the capabilities document.
    pub fn set_capabilities(&mut self, mut caps: Capabilities) -> RegistryResult<()> {
        caps.validate()?;
        let mut row = self.registry_row()?;
        row.set(CAPABILITIES_PROP, capabilities_value(&caps)?);
        self.tx.put(row);
        self.capabilities = caps;
        Ok(())
    }

    /// Apply every staged write and start a fresh unit of work.
    pub fn commit(&mut self) -> RegistryResult<()> {
        self.tx.commit()?;
        self.reset();
        Ok(())
    }

    /// Discard every staged write, including model and capability changes.
    pub fn rollback(&mut self) -> RegistryResult<()> {
        self.tx.rollback();
        if let Some(row) = self.tx.get("")? {
            let (model, capabilities) = load_settings(&row)?;
            self.model = model;
            self.capabilities = capabilities;
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.touched.clear();
        self.created.clear();
        self.now = now_timestamp();
    }

    /// Pin the transaction timestamp.
    pub fn set_now(&mut self, now: impl Into<String>) {
        self.now = now.into();
    }

    pub(crate) fn registry_row(&mut self) -> RegistryResult<EntityRow> {
        self.tx
            .get("")?
            .ok_or_else(|| RegistryError::Invariant(format!("registry row for \"{}\" missing", self.id)))
    }

    /// Read any stored entity by path.
    pub fn get_row(&mut self, path: &str) -> RegistryResult<Option<EntityRow>> {
        Ok(self.tx.get(path)?)
    }

    /// Every row at or beneath `path`, in path order.
    pub fn scan(&mut self, path: &str) -> RegistryResult<Vec<EntityRow>> {
        Ok(self.tx.scan(path)?)
    }

    // -----------------------------------------------------------------------
    // Registry-level update
    // -----------------------------------------------------------------------

    /// Update the registry's own attributes from a client body.
    ///
    /// The body may also carry a `model` (merged into the live model),
    /// a `capabilities` document and nested Group collections, which are
    /// upserted in the same transaction.
    pub fn update(&mut self, mut obj: Object, mode: WriteMode) -> RegistryResult<()> {
        check_id_attr(&obj, "registryid", &self.id)?;
        obj.remove("registryid");

        if let Some(model) = obj.remove("model").filter(|v| !v.is_null()) {
            let incoming = Model::from_value(&model)?;
            self.apply_model(&incoming)?;
        }
        if let Some(caps) = obj.remove("capabilities").filter(|v| !v.is_null()) {
            let caps: Capabilities = serde_json::from_value(caps.to_json())
                .map_err(|e| bad_request(format!("Error parsing capabilities: {e}")))?;
            self.set_capabilities(caps)?;
        }

        let group_types: Vec<(String, String)> = self
            .model
            .groups
            .values()
            .map(|gm| (gm.plural.clone(), gm.singular.clone()))
            .collect();
        let mut collections = Vec::new();
        for (plural, singular) in &group_types {
            if let Some(coll) = take_collection(&mut obj, plural, singular)? {
                collections.push((plural.clone(), coll));
            }
        }
        strip_generated(&mut obj, &collection_names(group_types.iter().map(|(p, _)| p)));

        let mut row = self.registry_row()?;
        self.check_epoch(&row, &mut obj)?;
        check_attrs(&obj)?;
        validate_object(&self.model.registry_attribute_set(), &obj)?;
        apply_attrs(&mut row, obj, mode, &["registryid"]);
        self.touch(&mut row);
        self.tx.put(row);

        let nested = nested_mode(mode);
        for (plural, coll) in collections {
            for (gid, body) in coll {
                let body = body.into_object().unwrap_or_default();
                self.upsert_group(&GroupKey::new(plural.clone(), gid), body, nested)?;
            }
        }
        debug!(registry = %self.id, "updated registry");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // xid lookups
    // -----------------------------------------------------------------------

    /// Resolve a Group xid (`/dirs/d1`). `Ok(None)` if it does not exist.
    pub fn find_group_by_xid(&mut self, xid: &str) -> RegistryResult<Option<GroupKey>> {
        let parsed = parse_xid(xid, EntityKind::Group)?;
        let Some((plural, id)) = parsed.group() else {
            return Err(bad_request(format!("XID {xid:?} is missing a \"groupid\"")));
        };
        let key = GroupKey::new(plural, id);
        Ok(self.tx.exists(&key.path())?.then_some(key))
    }

    /// Resolve a Resource xid (`/dirs/d1/files/f1`).
    pub fn find_resource_by_xid(&mut self, xid: &str) -> RegistryResult<Option<ResourceKey>> {
        let parsed = parse_xid(xid, EntityKind::Resource)?;
        let key = resource_key_of(&parsed, xid)?;
        Ok(self.tx.exists(&key.path())?.then_some(key))
    }

    /// Resolve a Meta xid (`/dirs/d1/files/f1/meta`) to its Resource.
    pub fn find_meta_by_xid(&mut self, xid: &str) -> RegistryResult<Option<ResourceKey>> {
        let parsed = parse_xid(xid, EntityKind::Meta)?;
        let key = resource_key_of(&parsed, xid)?;
        Ok(self.tx.exists(&key.meta_path())?.then_some(key))
    }

    /// Resolve a Version xid (`/dirs/d1/files/f1/versions/v1`).
    pub fn find_version_by_xid(&mut self, xid: &str) -> RegistryResult<Option<VersionKey>> {
        let parsed = parse_xid(xid, EntityKind::Version)?;
        let resource = resource_key_of(&parsed, xid)?;
        let vid = parsed
            .version_id()
            .ok_or_else(|| bad_request(format!("XID {xid:?} is missing a \"versionid\"")))?;
        let key = resource.version(vid);
        Ok(self.tx.exists(&key.path())?.then_some(key))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("groups", &self.model.groups.len())
            .field("tx", &self.tx)
            .finish()
    }
}

/// Nested collections follow the outer write mode; creation semantics
/// only apply to the addressed entity.
pub(crate) fn nested_mode(mode: WriteMode) -> WriteMode {
    match mode {
        WriteMode::Create => WriteMode::Replace,
        other => other,
    }
}

fn parse_xid(xid: &str, kind: EntityKind) -> RegistryResult<Xid> {
    let parsed = Xid::parse(xid).map_err(|_| bad_request(format!("{xid:?} isn't an xid")))?;
    if parsed.kind() != kind {
        if parsed.segments().len() < 2 {
            return Err(bad_request(format!("XID {xid:?} is missing a \"groupid\"")));
        }
        return Err(bad_request(format!("{xid:?} isn't a {kind} xid")));
    }
    Ok(parsed)
}

fn resource_key_of(parsed: &Xid, xid: &str) -> RegistryResult<ResourceKey> {
    let (gplural, gid) = parsed
        .group()
        .ok_or_else(|| bad_request(format!("XID {xid:?} is missing a \"groupid\"")))?;
    let (rplural, rid) = parsed
        .resource()
        .ok_or_else(|| bad_request(format!("XID {xid:?} is missing a \"resourceid\"")))?;
    Ok(ResourceKey::new(GroupKey::new(gplural, gid), rplural, rid))
}

fn capabilities_value(caps: &Capabilities) -> RegistryResult<Value> {
    serde_json::to_value(caps)
        .map(Value::from)
        .map_err(|e| RegistryError::Invariant(format!("capabilities not serializable: {e}")))
}

fn load_settings(row: &EntityRow) -> RegistryResult<(Model, Capabilities)> {
    let model = match row.get(MODEL_PROP) {
        Some(v) => Model::from_value(v)?,
        None => Model::new(),
    };
    let capabilities = match row.get(CAPABILITIES_PROP) {
        Some(v) => serde_json::from_value(v.to_json())
            .map_err(|e| RegistryError::Invariant(format!("stored capabilities unreadable: {e}")))?,
        None => Capabilities::default(),
    };
    Ok((model, capabilities))
}
