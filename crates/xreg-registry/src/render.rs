//! Projection of stored entities into response documents.
//!
//! Two URL styles are produced. The default view links everything with
//! absolute URLs. The doc view (`?doc`, and the export document) makes
//! `self` relative to the response root and links inlined collections
//! relatively, so the document can be read on its own.

use std::collections::BTreeSet;

use serde_json::{Map, Value as Json};
use tracing::debug;

use xreg_model::{system, AttributeSet, Model, ResourceModel};
use xreg_store::is_under;
use xreg_types::{EntityKind, Object, Value, SPECVERSION};

use crate::entity::VersionKey;
use crate::error::{bad_request, not_found, RegistryError, RegistryResult};
use crate::filter::Filters;
use crate::inline::Inline;
use crate::registry::Registry;
use crate::target::Target;
use crate::view::{Node, TreeView};

/// Meta attributes always rendered last, in this order.
const META_TAIL: &[&str] = &["defaultversionid", "defaultversionurl", "defaultversionsticky"];

/// How a response document is shaped.
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Server root, without a trailing slash (`http://localhost:8181`).
    pub base_url: String,
    pub doc: bool,
    pub inline: Inline,
    pub filters: Filters,
}

impl RenderOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_doc(mut self, doc: bool) -> Self {
        self.doc = doc;
        self
    }

    /// Parse raw `inline` and `filter` query values for `target`.
    pub fn with_query(
        mut self,
        model: &Model,
        target: &Target,
        inline: &[String],
        filters: &[String],
    ) -> RegistryResult<Self> {
        self.inline = Inline::parse(model, target, inline)?;
        self.filters = Filters::parse(model, &target.abstract_path(), filters)?;
        Ok(self)
    }

    /// The export document: doc view of the registry with every collection,
    /// the model and the capabilities inlined. An explicit `inline` list
    /// replaces the default.
    pub fn export(
        model: &Model,
        base_url: impl Into<String>,
        inline: &[String],
        filters: &[String],
    ) -> RegistryResult<Self> {
        let mut opts = Self::new(base_url)
            .with_doc(true)
            .with_query(model, &Target::Registry, inline, filters)?;
        if inline.is_empty() {
            opts.inline = Inline::all();
            opts.inline.model = true;
            opts.inline.capabilities = true;
        }
        Ok(opts)
    }
}

impl Registry {
    /// Render `target` as a JSON document.
    pub fn render(&mut self, target: &Target, opts: &RenderOptions) -> RegistryResult<Json> {
        self.check_render_target(target, opts.doc)?;
        let scope = match target.resource() {
            Some(r) => r.path(),
            None => target.path(),
        };
        let view = TreeView::load(&mut self.tx, &self.model, &scope)?;
        let capabilities = if opts.inline.capabilities {
            Some(serde_json::to_value(&self.capabilities).map_err(|e| {
                RegistryError::Invariant(format!("capabilities not serializable: {e}"))
            })?)
        } else {
            None
        };
        let model_doc = if opts.inline.model {
            Some(self.model.to_document()?)
        } else {
            None
        };
        let renderer = Renderer {
            model: &self.model,
            view: &view,
            selected: opts.filters.select(&view),
            opts,
            root: target.path(),
            capabilities,
            model_doc,
        };
        debug!(target = %target, nodes = view.len(), doc = opts.doc, "rendering");

        if target.is_collection() {
            let members = renderer.members(&target.path());
            return Ok(Json::Object(renderer.member_map(&members)));
        }
        let node = view
            .get(&target.path())
            .filter(|n| renderer.shown(&n.path))
            .ok_or_else(|| not_found("Not found"))?;
        Ok(renderer.entity(node))
    }

    /// Existence checks whose messages name the missing parent.
    fn check_render_target(&mut self, target: &Target, doc: bool) -> RegistryResult<()> {
        match target {
            Target::Resources { group, .. } if !self.tx.exists(&group.path())? => {
                Err(not_found(format!("\"{}\" not found", group.path())))
            }
            Target::Versions(r) | Target::Version(VersionKey { resource: r, .. }) => {
                if !self.tx.exists(&r.path())? {
                    return Err(match target {
                        Target::Versions(_) => not_found(format!("\"{}\" not found", r.path())),
                        _ => not_found("Not found"),
                    });
                }
                if doc && self.meta_row(r)?.get("xref").is_some() {
                    return Err(bad_request("'doc' flag not allowed on xref'd Versions"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct Renderer<'a> {
    model: &'a Model,
    view: &'a TreeView,
    /// `None` when no filters apply.
    selected: Option<BTreeSet<String>>,
    opts: &'a RenderOptions,
    /// Path the response document is rooted at.
    root: String,
    capabilities: Option<Json>,
    model_doc: Option<Json>,
}

impl Renderer<'_> {
    fn shown(&self, path: &str) -> bool {
        self.selected.as_ref().map_or(true, |s| s.contains(path))
    }

    fn abs_url(&self, path: &str) -> String {
        format!("{}/{path}", self.opts.base_url)
    }

    fn rel_url(&self, path: &str) -> String {
        let rel = match path.strip_prefix(self.root.as_str()) {
            Some(rest) if !self.root.is_empty() => rest.trim_start_matches('/'),
            _ => path,
        };
        format!("#/{rel}")
    }

    fn self_url(&self, path: &str) -> String {
        if self.opts.doc {
            self.rel_url(path)
        } else {
            self.abs_url(path)
        }
    }

    fn link_url(&self, path: &str, inlined: bool) -> String {
        if self.opts.doc && inlined {
            self.rel_url(path)
        } else {
            self.abs_url(path)
        }
    }

    fn members(&self, collection: &str) -> Vec<&Node> {
        self.view
            .members(collection)
            .into_iter()
            .filter(|n| self.shown(&n.path))
            .collect()
    }

    fn member_map(&self, members: &[&Node]) -> Map<String, Json> {
        members
            .iter()
            .map(|n| (n.id.clone(), self.entity(n)))
            .collect()
    }

    fn entity(&self, node: &Node) -> Json {
        let out = match node.kind {
            EntityKind::Registry => self.registry(node),
            EntityKind::Group => self.group(node),
            EntityKind::Resource => self.resource(node),
            EntityKind::Meta => self.meta(node),
            EntityKind::Version => self.version(node),
        };
        Json::Object(out)
    }

    fn with_links(&self, node: &Node) -> Object {
        let mut props = node.props.clone();
        props.insert("self".into(), Value::from(self.self_url(&node.path)));
        props.insert("xid".into(), Value::from(format!("/{}", node.path)));
        props
    }

    // -----------------------------------------------------------------------
    // Levels
    // -----------------------------------------------------------------------

    fn registry(&self, node: &Node) -> Map<String, Json> {
        let mut props = self.with_links(node);
        props.insert("specversion".into(), Value::from(SPECVERSION));
        let mut out = ordered(&system::registry_attributes(), props, &[]);
        if let Some(caps) = &self.capabilities {
            out.insert("capabilities".into(), caps.clone());
        }
        if let Some(doc) = &self.model_doc {
            out.insert("model".into(), doc.clone());
        }
        for plural in self.model.groups.keys() {
            self.collection(&mut out, plural, plural.clone(), plural);
        }
        out
    }

    fn group(&self, node: &Node) -> Map<String, Json> {
        let Some(gm) = self.model.find_group_model(&node.abstract_path) else {
            return Map::new();
        };
        let mut out = ordered(&system::group_attributes(&gm.singular), self.with_links(node), &[]);
        for plural in gm.resources.keys() {
            self.collection(
                &mut out,
                plural,
                format!("{}/{plural}", node.path),
                &format!("{}/{plural}", node.abstract_path),
            );
        }
        out
    }

    fn resource(&self, node: &Node) -> Map<String, Json> {
        let Some(rm) = self.resource_model(&node.abstract_path) else {
            return Map::new();
        };
        let mut out = if self.opts.doc {
            let mut head = Map::new();
            head.insert(format!("{}id", rm.singular), Json::from(node.id.clone()));
            head.insert("self".into(), Json::from(self.self_url(&node.path)));
            head.insert("xid".into(), Json::from(format!("/{}", node.path)));
            head
        } else {
            let default = self.view.default_version_of(&node.path);
            let mut props = default.map(|v| v.props.clone()).unwrap_or_default();
            props.extend(self.with_links(node));
            if default.is_some() {
                props.insert("isdefault".into(), Value::Bool(true));
            }
            ordered(&version_set(rm), props, &rm.document_attr_names())
        };

        let versions_level = format!("{}/versions", node.abstract_path);
        let meta_last = self.opts.inline.includes(&versions_level)
            && self.opts.filters.touches_level(&versions_level);
        let meta_inlined = self.opts.inline.includes(&format!("{}/meta", node.abstract_path));
        let meta_path = format!("{}/meta", node.path);
        out.insert("metaurl".into(), Json::from(self.link_url(&meta_path, meta_inlined)));
        if meta_inlined && !meta_last {
            self.meta_body(&mut out, &meta_path);
        }
        if !(self.opts.doc && node.xref.is_some()) {
            self.collection(
                &mut out,
                "versions",
                format!("{}/versions", node.path),
                &versions_level,
            );
        }
        if meta_inlined && meta_last {
            self.meta_body(&mut out, &meta_path);
        }
        out
    }

    fn meta_body(&self, out: &mut Map<String, Json>, path: &str) {
        if let Some(meta) = self.view.get(path).filter(|m| self.shown(&m.path)) {
            out.insert("meta".into(), self.entity(meta));
        }
    }

    fn meta(&self, node: &Node) -> Map<String, Json> {
        let resource_level = node.abstract_path.trim_end_matches("/meta");
        let Some(rm) = self.resource_model(resource_level) else {
            return Map::new();
        };
        let mut props = self.with_links(node);
        let id_attr = format!("{}id", rm.singular);

        if node.get("xref").is_some() {
            let mut out = Map::new();
            for name in [id_attr.as_str(), "self", "xid", "xref"] {
                if let Some(v) = props.remove(name) {
                    out.insert(name.to_string(), v.to_json());
                }
            }
            return out;
        }

        let resource = node.parent_path().unwrap_or_default();
        if let Some(vid) = node.get("defaultversionid").and_then(Value::as_str) {
            let vpath = format!("{resource}/versions/{vid}");
            let inline_rendered = self.opts.doc
                && is_under(&self.root, &vpath)
                && self.opts.inline.includes(&format!("{resource_level}/versions"))
                && self.view.contains(&vpath)
                && self.shown(&vpath);
            props.insert(
                "defaultversionurl".into(),
                Value::from(self.link_url(&vpath, inline_rendered)),
            );
        }
        let tail: Vec<String> = META_TAIL.iter().map(|s| s.to_string()).collect();
        ordered(&system::meta_attributes(&rm.singular), props, &tail)
    }

    fn version(&self, node: &Node) -> Map<String, Json> {
        let resource_level = node.abstract_path.trim_end_matches("/versions");
        let Some(rm) = self.resource_model(resource_level) else {
            return Map::new();
        };
        let mut props = self.with_links(node);
        props.insert("isdefault".into(), Value::Bool(self.view.is_default(node)));
        if self.opts.doc {
            props.remove("ancestor");
        }
        ordered(&version_set(rm), props, &rm.document_attr_names())
    }

    /// Emit `<plural>url`, the inlined members if asked for, and
    /// `<plural>count`.
    fn collection(&self, out: &mut Map<String, Json>, plural: &str, path: String, level: &str) {
        let inlined = self.opts.inline.includes(level);
        let members = self.members(&path);
        out.insert(format!("{plural}url"), Json::from(self.link_url(&path, inlined)));
        if inlined {
            out.insert(plural.to_string(), Json::Object(self.member_map(&members)));
        }
        out.insert(format!("{plural}count"), Json::from(members.len()));
    }

    fn resource_model(&self, abstract_path: &str) -> Option<&ResourceModel> {
        let (g, r) = abstract_path.split_once('/')?;
        self.model.find_resource_model(g, r)
    }
}

fn version_set(rm: &ResourceModel) -> AttributeSet {
    system::version_attributes(&rm.singular, rm.hasdocument)
}

/// Lay `values` out in `system` order, then every other attribute by name,
/// then the `tail` names.
fn ordered(system: &AttributeSet, mut values: Object, tail: &[String]) -> Map<String, Json> {
    let mut out = Map::new();
    for attr in system.iter().filter(|a| !tail.contains(&a.name)) {
        match values.remove(&attr.name) {
            Some(v) if !v.is_null() => {
                out.insert(attr.name.clone(), v.to_json());
            }
            _ => {}
        }
    }
    let tail_values: Vec<(String, Value)> = tail
        .iter()
        .filter_map(|name| values.remove(name).map(|v| (name.clone(), v)))
        .collect();
    for (name, v) in values.into_iter().chain(tail_values) {
        if !v.is_null() {
            out.insert(name, v.to_json());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use xreg_store::InMemoryEntityStore;

    use super::*;
    use crate::entity::{GroupKey, ResourceKey, WriteMode};

    const BASE: &str = "http://localhost:8181";

    fn registry() -> Registry {
        let mut reg = Registry::create(Arc::new(InMemoryEntityStore::new()), "r").unwrap();
        let gm = reg.model_mut().add_group_model("dirs", "dir").unwrap();
        gm.add_resource_model("files", "file", 0, true, true, true).unwrap();
        reg.save_model().unwrap();
        let obj = |v: serde_json::Value| Value::from(v).into_object().unwrap();
        let d1 = GroupKey::new("dirs", "d1");
        reg.upsert_versions(
            &ResourceKey::new(d1.clone(), "files", "f1"),
            obj(serde_json::json!({"v1": {"name": "one"}, "v2": {"name": "two"}})),
            WriteMode::Replace,
        )
        .unwrap();
        reg.upsert_meta(
            &ResourceKey::new(d1, "files", "fx"),
            obj(serde_json::json!({"xref": "/dirs/d1/files/f1"})),
            WriteMode::Replace,
        )
        .unwrap();
        reg.commit().unwrap();
        reg
    }

    fn render(reg: &mut Registry, path: &str, doc: bool, inline: &[&str], filters: &[&str]) -> RegistryResult<Json> {
        let target = Target::parse(reg.model(), path)?;
        let inline: Vec<String> = inline.iter().map(|s| s.to_string()).collect();
        let filters: Vec<String> = filters.iter().map(|s| s.to_string()).collect();
        let opts = RenderOptions::new(BASE)
            .with_doc(doc)
            .with_query(reg.model(), &target, &inline, &filters)?;
        reg.render(&target, &opts)
    }

    fn keys(doc: &Json) -> Vec<&str> {
        doc.as_object().unwrap().keys().map(String::as_str).collect()
    }

    // -----------------------------------------------------------------------
    // Default view
    // -----------------------------------------------------------------------

    #[test]
    fn resource_shows_default_version() {
        let mut reg = registry();
        let doc = render(&mut reg, "/dirs/d1/files/f1", false, &[], &[]).unwrap();
        assert_eq!(
            keys(&doc),
            vec![
                "fileid",
                "versionid",
                "self",
                "xid",
                "epoch",
                "name",
                "isdefault",
                "createdat",
                "modifiedat",
                "ancestor",
                "metaurl",
                "versionsurl",
                "versionscount"
            ]
        );
        assert_eq!(doc["versionid"], "v2");
        assert_eq!(doc["name"], "two");
        assert_eq!(doc["self"], "http://localhost:8181/dirs/d1/files/f1");
        assert_eq!(doc["xid"], "/dirs/d1/files/f1");
        assert_eq!(doc["metaurl"], "http://localhost:8181/dirs/d1/files/f1/meta");
        assert_eq!(doc["versionscount"], 2);
    }

    #[test]
    fn registry_and_group_links() {
        let mut reg = registry();
        let doc = render(&mut reg, "/", false, &[], &[]).unwrap();
        assert_eq!(doc["self"], "http://localhost:8181/");
        assert_eq!(doc["xid"], "/");
        assert_eq!(doc["specversion"], SPECVERSION);
        assert_eq!(doc["dirsurl"], "http://localhost:8181/dirs");
        assert_eq!(doc["dirscount"], 1);
        assert!(doc.get("dirs").is_none());
        assert_eq!(keys(&doc)[..3], ["specversion", "registryid", "self"]);

        let doc = render(&mut reg, "/dirs/d1", false, &["files"], &[]).unwrap();
        assert_eq!(doc["dirid"], "d1");
        assert_eq!(doc["filescount"], 2);
        assert_eq!(doc["files"]["f1"]["versionid"], "v2");
    }

    #[test]
    fn meta_fields_and_order() {
        let mut reg = registry();
        let doc = render(&mut reg, "/dirs/d1/files/f1/meta", false, &[], &[]).unwrap();
        let k = keys(&doc);
        assert_eq!(k[..3], ["fileid", "self", "xid"]);
        assert_eq!(
            k[k.len() - 3..],
            ["defaultversionid", "defaultversionurl", "defaultversionsticky"]
        );
        assert_eq!(
            doc["defaultversionurl"],
            "http://localhost:8181/dirs/d1/files/f1/versions/v2"
        );
        assert_eq!(doc["readonly"], false);
    }

    #[test]
    fn versions_collection() {
        let mut reg = registry();
        let doc = render(&mut reg, "/dirs/d1/files/f1/versions", false, &[], &[]).unwrap();
        assert_eq!(keys(&doc), vec!["v1", "v2"]);
        assert_eq!(doc["v1"]["isdefault"], false);
        assert_eq!(doc["v2"]["isdefault"], true);
        assert!(doc["v2"].get("ancestor").is_some());
    }

    // -----------------------------------------------------------------------
    // Doc view
    // -----------------------------------------------------------------------

    #[test]
    fn export_uses_relative_links() {
        let mut reg = registry();
        let opts = RenderOptions::export(reg.model(), BASE, &[], &[]).unwrap();
        let doc = reg.render(&Target::Registry, &opts).unwrap();
        assert_eq!(doc["self"], "#/");
        assert_eq!(doc["dirsurl"], "#/dirs");
        assert!(doc.get("model").is_some());
        assert!(doc.get("capabilities").is_some());

        let f1 = &doc["dirs"]["d1"]["files"]["f1"];
        assert_eq!(
            keys(f1),
            vec!["fileid", "self", "xid", "metaurl", "meta", "versionsurl", "versions", "versionscount"]
        );
        assert_eq!(f1["self"], "#/dirs/d1/files/f1");
        assert_eq!(f1["meta"]["defaultversionurl"], "#/dirs/d1/files/f1/versions/v2");
        assert!(f1["versions"]["v2"].get("ancestor").is_none());

        let same = render(&mut reg, "/", true, &["*", "capabilities", "model"], &[]).unwrap();
        assert_eq!(
            serde_json::to_string_pretty(&doc).unwrap(),
            serde_json::to_string_pretty(&same).unwrap()
        );
    }

    #[test]
    fn doc_collection_members_are_relative_to_root() {
        let mut reg = registry();
        let doc = render(&mut reg, "/dirs", true, &[], &[]).unwrap();
        assert_eq!(doc["d1"]["self"], "#/d1");
        assert_eq!(doc["d1"]["filesurl"], "http://localhost:8181/dirs/d1/files");

        let doc = render(&mut reg, "/dirs/d1/files/f1", true, &["meta"], &[]).unwrap();
        assert_eq!(doc["metaurl"], "#/meta");
        assert_eq!(
            doc["meta"]["defaultversionurl"],
            "http://localhost:8181/dirs/d1/files/f1/versions/v2"
        );
    }

    // -----------------------------------------------------------------------
    // xref
    // -----------------------------------------------------------------------

    #[test]
    fn xref_resource_views() {
        let mut reg = registry();
        let doc = render(&mut reg, "/dirs/d1/files/fx", false, &[], &[]).unwrap();
        assert_eq!(doc["fileid"], "fx");
        assert_eq!(doc["versionid"], "v2");
        assert_eq!(doc["self"], "http://localhost:8181/dirs/d1/files/fx");
        assert_eq!(doc["versionscount"], 2);

        let doc = render(&mut reg, "/dirs/d1/files/fx", true, &["meta"], &[]).unwrap();
        assert_eq!(keys(&doc), vec!["fileid", "self", "xid", "metaurl", "meta"]);
        assert_eq!(keys(&doc["meta"]), vec!["fileid", "self", "xid", "xref"]);

        let err = render(&mut reg, "/dirs/d1/files/fx/versions/v1", true, &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "'doc' flag not allowed on xref'd Versions");
        let v1 = render(&mut reg, "/dirs/d1/files/fx/versions/v1", false, &[], &[]).unwrap();
        assert_eq!(v1["fileid"], "fx");
    }

    // -----------------------------------------------------------------------
    // Filters and missing targets
    // -----------------------------------------------------------------------

    #[test]
    fn version_filter_moves_meta_after_versions() {
        let mut reg = registry();
        let doc = render(&mut reg, "/", false, &["*"], &["dirs.files.versions.versionid=v2"]).unwrap();
        let f1 = &doc["dirs"]["d1"]["files"]["f1"];
        assert_eq!(keys(&f1["versions"]), vec!["v2"]);
        assert_eq!(f1["versionscount"], 1);
        let k = keys(f1);
        let meta = k.iter().position(|n| *n == "meta").unwrap();
        let count = k.iter().position(|n| *n == "versionscount").unwrap();
        assert!(meta > count);

        let doc = render(
            &mut reg,
            "/dirs/d1/files/f1",
            true,
            &["*"],
            &["versions.versionid=v1"],
        )
        .unwrap();
        assert_eq!(
            keys(&doc),
            vec!["fileid", "self", "xid", "metaurl", "versionsurl", "versions", "versionscount", "meta"]
        );
        assert_eq!(keys(&doc["versions"]), vec!["v1"]);
    }

    #[test]
    fn meta_filter_renders_all_versions() {
        let mut reg = registry();
        let doc = render(&mut reg, "/", false, &["*"], &["dirs.files.meta.readonly=false"]).unwrap();
        let f1 = &doc["dirs"]["d1"]["files"]["f1"];
        assert_eq!(f1["versionscount"], 2);
        assert_eq!(keys(&f1["versions"]), vec!["v1", "v2"]);
    }

    #[test]
    fn filters_hide_unmatched() {
        let mut reg = registry();
        let doc = render(&mut reg, "/dirs/d1/files", false, &[], &["name=nope"]).unwrap();
        assert_eq!(doc, serde_json::json!({}));
        let err = render(&mut reg, "/", false, &[], &["dirs.files.versions.versionid=vx"]).unwrap_err();
        assert_eq!(err.to_string(), "Not found");
        let doc = render(&mut reg, "/dirs/d1/files", false, &[], &["versions.name=one"]).unwrap();
        assert_eq!(keys(&doc), vec!["f1", "fx"]);
        assert_eq!(doc["f1"]["versionscount"], 1);
    }

    #[test]
    fn missing_targets() {
        let mut reg = registry();
        let err = render(&mut reg, "/dirs/dx/files", false, &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "\"dirs/dx\" not found");
        let err = render(&mut reg, "/dirs/d1/files/fz/versions", false, &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "\"dirs/d1/files/fz\" not found");
        for path in ["/dirs/d2", "/dirs/d1/files/fz", "/dirs/d1/files/f1/versions/v9"] {
            let err = render(&mut reg, path, false, &[], &[]).unwrap_err();
            assert_eq!(err.status_code(), 404, "{path}");
        }
        let err = render(&mut reg, "/", false, &["bogus"], &[]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid 'inline' value: bogus");
    }
}
