//! Request targets: what a URL path addresses.

use std::fmt;

use xreg_model::Model;
use xreg_types::EntityKind;

use crate::entity::{GroupKey, ResourceKey, VersionKey};
use crate::error::{not_found, RegistryResult};

/// Suffix clients may append to a Resource or Version path to ask for its
/// metadata. Bodies are always metadata here, so it is simply dropped.
pub const DETAILS_SUFFIX: &str = "$details";

/// The entity or collection a request path addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Registry,
    Groups { plural: String },
    Group(GroupKey),
    Resources { group: GroupKey, plural: String },
    Resource(ResourceKey),
    Meta(ResourceKey),
    Versions(ResourceKey),
    Version(VersionKey),
}

impl Target {
    /// Parse a request path against the model.
    ///
    /// Only the shape and the type names are checked here; whether the
    /// addressed entities exist is up to the caller.
    pub fn parse(model: &Model, path: &str) -> RegistryResult<Self> {
        let trimmed = path.trim_matches('/');
        let trimmed = trimmed.strip_suffix(DETAILS_SUFFIX).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::Registry);
        }
        let segs: Vec<&str> = trimmed.split('/').collect();
        let too_long = segs.len() > 6 || (segs.len() == 6 && segs[4] == "meta");
        if too_long {
            return Err(not_found("URL is too long"));
        }
        if segs.iter().any(|s| s.is_empty()) {
            return Err(not_found("Not found"));
        }

        let gm = model
            .find_group_model(segs[0])
            .ok_or_else(|| not_found(format!("Unknown Group type: {}", segs[0])))?;
        if segs.len() == 1 {
            return Ok(Self::Groups {
                plural: segs[0].to_string(),
            });
        }
        let group = GroupKey::new(segs[0], segs[1]);
        if segs.len() == 2 {
            return Ok(Self::Group(group));
        }

        if gm.find_resource_model(segs[2]).is_none() {
            return Err(not_found(format!("Unknown Resource type: {}", segs[2])));
        }
        if segs.len() == 3 {
            return Ok(Self::Resources {
                group,
                plural: segs[2].to_string(),
            });
        }
        let resource = ResourceKey::new(group, segs[2], segs[3]);
        match (segs.len(), segs.get(4).copied()) {
            (4, _) => Ok(Self::Resource(resource)),
            (5, Some("meta")) => Ok(Self::Meta(resource)),
            (5, Some("versions")) => Ok(Self::Versions(resource)),
            (6, Some("versions")) => Ok(Self::Version(resource.version(segs[5]))),
            (_, other) => Err(not_found(format!(
                "Expected \"versions\" or \"meta\", got: {}",
                other.unwrap_or_default()
            ))),
        }
    }

    /// Store path of the addressed entity or collection.
    pub fn path(&self) -> String {
        match self {
            Self::Registry => String::new(),
            Self::Groups { plural } => plural.clone(),
            Self::Group(g) => g.path(),
            Self::Resources { group, plural } => format!("{}/{plural}", group.path()),
            Self::Resource(r) => r.path(),
            Self::Meta(r) => r.meta_path(),
            Self::Versions(r) => r.versions_path(),
            Self::Version(v) => v.path(),
        }
    }

    /// Kind of the addressed entity, or of the members for a collection.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Registry => EntityKind::Registry,
            Self::Groups { .. } | Self::Group(_) => EntityKind::Group,
            Self::Resources { .. } | Self::Resource(_) => EntityKind::Resource,
            Self::Meta(_) => EntityKind::Meta,
            Self::Versions(_) | Self::Version(_) => EntityKind::Version,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Self::Groups { .. } | Self::Resources { .. } | Self::Versions(_)
        )
    }

    /// Abstract (type-level) path of the addressed entity, or of the
    /// members for a collection: `dirs/files/versions`.
    pub fn abstract_path(&self) -> String {
        match self {
            Self::Registry => String::new(),
            Self::Groups { plural } => plural.clone(),
            Self::Group(g) => g.plural.clone(),
            Self::Resources { group, plural } => format!("{}/{plural}", group.plural),
            Self::Resource(r) => r.abstract_path(),
            Self::Meta(r) => format!("{}/meta", r.abstract_path()),
            Self::Versions(r) | Self::Version(VersionKey { resource: r, .. }) => {
                format!("{}/versions", r.abstract_path())
            }
        }
    }

    /// The Resource this target sits in, if any.
    pub fn resource(&self) -> Option<&ResourceKey> {
        match self {
            Self::Resource(r) | Self::Meta(r) | Self::Versions(r) => Some(r),
            Self::Version(v) => Some(&v.resource),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path())
    }
}
