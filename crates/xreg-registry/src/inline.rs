//! `?inline=` directives.

use std::collections::BTreeSet;

use xreg_model::Model;

use crate::error::{bad_request, RegistryResult};
use crate::filter::{child_levels, join};
use crate::target::Target;

/// Which collections (and registry documents) to embed in a response.
///
/// Collections are named by abstract path, e.g. `dirs/files/versions`;
/// the Resource's `meta` counts as a collection here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inline {
    all: bool,
    paths: BTreeSet<String>,
    subtrees: BTreeSet<String>,
    pub model: bool,
    pub capabilities: bool,
}

impl Inline {
    /// Inline every collection.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    /// Parse raw `inline` parameter values for a request on `target`.
    ///
    /// A bare `inline` (empty value) and `*` inline everything below the
    /// target. Dotted paths are relative to the addressed entity (or to a
    /// member of the addressed collection) and inline every collection
    /// along the way; a trailing `.*` inlines the whole subtree.
    pub fn parse(model: &Model, target: &Target, raw: &[String]) -> RegistryResult<Self> {
        let base = target.abstract_path();
        let mut out = Self::default();
        for value in raw.iter().flat_map(|p| p.split(',')) {
            match value {
                "" | "*" => out.all = true,
                "model" | "capabilities" if *target == Target::Registry => {
                    if value == "model" {
                        out.model = true;
                    } else {
                        out.capabilities = true;
                    }
                }
                path => out.add_path(model, &base, path)?,
            }
        }
        Ok(out)
    }

    fn add_path(&mut self, model: &Model, base: &str, src: &str) -> RegistryResult<()> {
        let invalid = || bad_request(format!("Invalid 'inline' value: {src}"));
        let mut level = base.to_string();
        let segs: Vec<&str> = src.split('.').collect();
        for (i, seg) in segs.iter().enumerate() {
            if *seg == "*" && i == segs.len() - 1 && i > 0 {
                self.subtrees.insert(level.clone());
                return Ok(());
            }
            if !child_levels(model, &level).iter().any(|c| c == seg) {
                return Err(invalid());
            }
            level = join(&level, seg);
            self.paths.insert(level.clone());
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.paths.is_empty() && self.subtrees.is_empty() && !self.model && !self.capabilities
    }

    /// Whether the collection at abstract path `collection` is inlined.
    pub fn includes(&self, collection: &str) -> bool {
        self.all
            || self.paths.contains(collection)
            || self
                .subtrees
                .iter()
                .any(|s| collection.starts_with(&format!("{s}/")))
    }
}
