//! An in-memory snapshot of one subtree, used by filtering and rendering.
//!
//! Resources that carry an `xref` get virtual Version nodes copied from the
//! Resource they point at, so everything downstream can treat them like
//! ordinary Versions.

use std::collections::BTreeMap;

use tracing::debug;

use xreg_model::Model;
use xreg_store::{is_under, parent_path, EntityRow, Tx};
use xreg_types::{EntityKind, Object, Value, Xid};

use crate::error::RegistryResult;

/// One entity in a [`TreeView`].
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub kind: EntityKind,
    pub path: String,
    pub abstract_path: String,
    pub id: String,
    /// Visible attributes as stored.
    pub props: Object,
    /// Resources only: the default Version's id, following an xref.
    pub default_version: Option<String>,
    /// Resources only: the xref target, when set.
    pub xref: Option<String>,
    /// Versions only: `true` when copied from an xref target.
    pub is_virtual: bool,
}

impl Node {
    fn from_row(row: &EntityRow) -> Self {
        Self {
            kind: row.kind,
            path: row.path.clone(),
            abstract_path: row.abstract_path.clone(),
            id: row.uid.clone(),
            props: row
                .visible_props()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            default_version: None,
            xref: None,
            is_virtual: false,
        }
    }

    pub fn parent_path(&self) -> Option<String> {
        parent_path(self.kind, &self.path)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.props.get(name).filter(|v| !v.is_null())
    }
}

/// Every entity at or beneath a scope path, keyed by path.
#[derive(Clone, Debug, Default)]
pub struct TreeView {
    nodes: BTreeMap<String, Node>,
}

impl TreeView {
    /// Load the subtree at `scope` through `tx`.
    pub fn load(tx: &mut Tx, model: &Model, scope: &str) -> RegistryResult<Self> {
        let mut nodes = BTreeMap::new();
        let mut xrefs = Vec::new();
        for row in tx.scan(scope)? {
            if row.kind == EntityKind::Meta {
                if let (Some(xref), Some(resource)) = (row.get_str("xref"), row.parent_path()) {
                    xrefs.push((resource, xref.to_string()));
                }
            }
            nodes.insert(row.path.clone(), Node::from_row(&row));
        }
        let mut view = Self { nodes };

        for (resource, xref) in xrefs {
            view.add_virtual_versions(tx, model, &resource, &xref)?;
        }
        let resources: Vec<String> = view
            .nodes
            .values()
            .filter(|n| n.kind == EntityKind::Resource && n.xref.is_none())
            .map(|n| n.path.clone())
            .collect();
        for path in resources {
            let default = view
                .nodes
                .get(&format!("{path}/meta"))
                .and_then(|m| m.get("defaultversionid"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(node) = view.nodes.get_mut(&path) {
                node.default_version = default;
            }
        }
        debug!(scope = %scope, nodes = view.nodes.len(), "loaded view");
        Ok(view)
    }

    /// Copy the target's Versions under `resource`, renamed to belong to it.
    fn add_virtual_versions(
        &mut self,
        tx: &mut Tx,
        model: &Model,
        resource: &str,
        xref: &str,
    ) -> RegistryResult<()> {
        let Some(node) = self.nodes.get_mut(resource) else {
            return Ok(());
        };
        node.xref = Some(xref.to_string());
        let own_id = node.id.clone();
        let Some(singular) = resource_singular(model, &node.abstract_path) else {
            return Ok(());
        };
        // A dangling or malformed xref simply has no Versions.
        let Ok(parsed) = Xid::parse_kind(xref, EntityKind::Resource) else {
            return Ok(());
        };
        let target = parsed.to_path();

        let default = tx
            .get(&format!("{target}/meta"))?
            .and_then(|m| m.get_str("defaultversionid").map(str::to_string));
        if let Some(node) = self.nodes.get_mut(resource) {
            node.default_version = default;
        }

        let id_attr = format!("{singular}id");
        for row in tx.scan(&format!("{target}/versions"))? {
            if row.kind != EntityKind::Version {
                continue;
            }
            let mut node = Node::from_row(&row);
            node.path = format!("{resource}/versions/{}", row.uid);
            node.props.insert(id_attr.clone(), Value::from(own_id.as_str()));
            node.is_virtual = true;
            self.nodes.insert(node.path.clone(), node);
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Direct members of the collection at `collection`, ordered by id.
    pub fn members(&self, collection: &str) -> Vec<&Node> {
        let prefix = format!("{collection}/");
        let mut out: Vec<&Node> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(_, n)| n)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Every node at or beneath `path`.
    pub fn subtree<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| is_under(path, &n.path))
    }

    pub fn meta_of(&self, resource: &str) -> Option<&Node> {
        self.nodes.get(&format!("{resource}/meta"))
    }

    pub fn default_version_of(&self, resource: &str) -> Option<&Node> {
        let node = self.nodes.get(resource)?;
        let vid = node.default_version.as_deref()?;
        self.nodes.get(&format!("{resource}/versions/{vid}"))
    }

    /// Attributes a filter sees on `node`.
    ///
    /// A Resource exposes its default Version's attributes; a Version gets
    /// its computed `isdefault`.
    pub fn filter_props(&self, node: &Node) -> Object {
        match node.kind {
            EntityKind::Resource => {
                let mut props = self
                    .default_version_of(&node.path)
                    .map(|v| v.props.clone())
                    .unwrap_or_default();
                props.extend(node.props.clone());
                props
            }
            EntityKind::Version => {
                let mut props = node.props.clone();
                props.insert("isdefault".into(), Value::Bool(self.is_default(node)));
                props
            }
            _ => node.props.clone(),
        }
    }

    pub fn is_default(&self, version: &Node) -> bool {
        version
            .parent_path()
            .and_then(|r| self.nodes.get(&r))
            .and_then(|r| r.default_version.as_deref())
            == Some(version.id.as_str())
    }
}

/// Singular name of the Resource type at abstract path `dirs/files`.
pub(crate) fn resource_singular(model: &Model, abstract_path: &str) -> Option<String> {
    let (g, r) = abstract_path.split_once('/')?;
    model.find_resource_model(g, r).map(|rm| rm.singular.clone())
}
