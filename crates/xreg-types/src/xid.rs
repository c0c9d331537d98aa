//! Entity kinds and absolute xid identifiers.
//!
//! An xid is the slash-delimited absolute address of an entity:
//!
//! | Kind     | Shape                                   | Segments |
//! |----------|-----------------------------------------|----------|
//! | Registry | `/`                                     | 0        |
//! | Group    | `/dirs/d1`                              | 2        |
//! | Resource | `/dirs/d1/files/f1`                     | 4        |
//! | Meta     | `/dirs/d1/files/f1/meta`                | 5        |
//! | Version  | `/dirs/d1/files/f1/versions/v1`         | 6        |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The five kinds of entity in a registry tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Registry,
    Group,
    Resource,
    Meta,
    Version,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Group => "group",
            Self::Resource => "resource",
            Self::Meta => "meta",
            Self::Version => "version",
        }
    }

    /// Number of xid segments an entity of this kind has.
    pub fn segment_count(&self) -> usize {
        match self {
            Self::Registry => 0,
            Self::Group => 2,
            Self::Resource => 4,
            Self::Meta => 5,
            Self::Version => 6,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, absolute entity identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Xid {
    segments: Vec<String>,
    kind: EntityKind,
}

impl Xid {
    /// Parse an absolute xid. The segment count decides the entity kind.
    pub fn parse(src: &str) -> Result<Self, TypeError> {
        let trimmed = src.trim();
        let bad = || TypeError::InvalidXid(src.to_string());

        let rest = trimmed.strip_prefix('/').ok_or_else(bad)?;
        if rest.is_empty() {
            return Ok(Self {
                segments: Vec::new(),
                kind: EntityKind::Registry,
            });
        }

        let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(bad());
        }

        let kind = match segments.len() {
            2 => EntityKind::Group,
            4 => EntityKind::Resource,
            5 if segments[4] == "meta" => EntityKind::Meta,
            6 if segments[4] == "versions" => EntityKind::Version,
            _ => return Err(bad()),
        };

        Ok(Self { segments, kind })
    }

    /// Parse and require a specific kind.
    pub fn parse_kind(src: &str, kind: EntityKind) -> Result<Self, TypeError> {
        let xid = Self::parse(src)?;
        if xid.kind != kind {
            return Err(TypeError::InvalidXid(src.to_string()));
        }
        Ok(xid)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Group plural and id, for anything below the registry.
    pub fn group(&self) -> Option<(&str, &str)> {
        match self.segments.as_slice() {
            [g, gid, ..] => Some((g.as_str(), gid.as_str())),
            _ => None,
        }
    }

    /// Resource plural and id, for resources, metas and versions.
    pub fn resource(&self) -> Option<(&str, &str)> {
        match self.segments.as_slice() {
            [_, _, r, rid, ..] => Some((r.as_str(), rid.as_str())),
            _ => None,
        }
    }

    pub fn version_id(&self) -> Option<&str> {
        match (self.kind, self.segments.as_slice()) {
            (EntityKind::Version, [.., vid]) => Some(vid.as_str()),
            _ => None,
        }
    }

    /// The storage path form: the xid without its leading slash.
    pub fn to_path(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Generate a fresh time-ordered identifier (UUID v7).
pub fn new_uuid() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_by_segment_count() {
        assert_eq!(Xid::parse("/").unwrap().kind(), EntityKind::Registry);
        assert_eq!(Xid::parse("/dirs/d1").unwrap().kind(), EntityKind::Group);
        assert_eq!(Xid::parse("/dirs/d1/files/f1").unwrap().kind(), EntityKind::Resource);
        assert_eq!(Xid::parse("/dirs/d1/files/f1/meta").unwrap().kind(), EntityKind::Meta);
        let v = Xid::parse("/dirs/d1/files/f1/versions/v1").unwrap();
        assert_eq!(v.kind(), EntityKind::Version);
        assert_eq!(v.version_id(), Some("v1"));
        assert_eq!(v.resource(), Some(("files", "f1")));
        assert_eq!(v.to_path(), "dirs/d1/files/f1/versions/v1");
        assert_eq!(v.to_string(), "/dirs/d1/files/f1/versions/v1");
    }

    #[test]
    fn malformed_xids_are_errors() {
        for bad in [
            "",
            "dirs/d1",
            "/dirs",
            "/dirs/d1/files",
            "/dirs//files/f1",
            "/dirs/d1/files/f1/versions",
            "/dirs/d1/files/f1/meta/x",
            "/dirs/d1/files/f1/vers/v1",
            "/dirs/d1/files/f1/versions/v1/extra",
        ] {
            assert!(Xid::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn parse_kind_checks_shape() {
        assert!(Xid::parse_kind("/dirs/d1/files/f1", EntityKind::Resource).is_ok());
        assert_eq!(
            Xid::parse_kind("/dirs/d1", EntityKind::Resource),
            Err(TypeError::InvalidXid("/dirs/d1".into()))
        );
    }

    #[test]
    fn uuids_are_unique() {
        assert_ne!(new_uuid(), new_uuid());
    }
}
