//! The stored form of a registry entity.

use serde::{Deserialize, Serialize};

use xreg_types::{EntityKind, Object, Value};

/// One entity in the flattened registry tree.
///
/// `path` is the xid without its leading slash (`""` for the registry
/// itself). `abstract_path` is the same path with the ids removed, e.g.
/// `dirs/files/versions`, and is what filters match against.
///
/// Attribute names starting with `#` are bookkeeping values owned by the
/// registry engine; they are persisted but never rendered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub kind: EntityKind,
    pub path: String,
    pub uid: String,
    pub abstract_path: String,
    #[serde(default)]
    pub props: Object,
}

impl EntityRow {
    pub fn new(
        kind: EntityKind,
        path: impl Into<String>,
        uid: impl Into<String>,
        abstract_path: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            uid: uid.into(),
            abstract_path: abstract_path.into(),
            props: Object::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.props.get(name).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Set an attribute. Setting `Null` removes it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if value.is_null() {
            self.props.remove(name);
        } else {
            self.props.insert(name.to_string(), value);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.props.remove(name)
    }

    /// Path of the containing entity, `None` for the registry.
    pub fn parent_path(&self) -> Option<String> {
        parent_path(self.kind, &self.path)
    }

    /// Iterate over attributes visible to clients (no `#` bookkeeping).
    pub fn visible_props(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.props.iter().filter(|(k, _)| !is_hidden(k))
    }
}

/// Returns `true` for registry-internal attribute names.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('#')
}

/// Containing entity path for an entity of `kind` at `path`.
pub fn parent_path(kind: EntityKind, path: &str) -> Option<String> {
    let strip = match kind {
        EntityKind::Registry => return None,
        EntityKind::Group => return Some(String::new()),
        EntityKind::Meta => 1,
        EntityKind::Resource | EntityKind::Version => 2,
    };
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < strip {
        return None;
    }
    Some(parts[..parts.len() - strip].join("/"))
}

/// Returns `true` when `path` is `prefix` itself or lies beneath it.
pub fn is_under(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}
