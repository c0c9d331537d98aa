//! The xRegistry engine: entity lifecycle and document projection.
//!
//! A [`Registry`] wraps one store transaction. Writes go through the
//! `upsert_*` / `delete_*` methods, which validate against the live model,
//! keep epochs and timestamps current and maintain each Resource's default
//! Version. Reads go through [`Registry::render`], which turns a request
//! [`Target`] plus [`RenderOptions`] into a JSON document.
//!
//! # Key Types
//!
//! - [`Registry`]: one unit of work against a stored registry
//! - [`GroupKey`] / [`ResourceKey`] / [`VersionKey`]: entity addresses
//! - [`Target`]: what a request path addresses
//! - [`Filters`] / [`Inline`]: `?filter=` and `?inline=` directives
//! - [`TreeView`]: an in-memory snapshot of a subtree, xrefs resolved
//!
//! # Design Rules
//!
//! 1. Nothing is persisted before [`Registry::commit`]; callers roll back on error.
//! 2. An entity's epoch moves at most once per transaction.
//! 3. A non-sticky Resource's default Version is always its newest one.

pub mod entity;
pub mod error;
pub mod filter;
pub mod group;
pub mod inline;
pub mod meta;
pub mod registry;
pub mod render;
pub mod resource;
pub mod target;
pub mod version;
pub mod view;

pub use entity::{check_id, GroupKey, ResourceKey, VersionKey, WriteMode};
pub use error::{RegistryError, RegistryResult};
pub use filter::{FilterExpr, FilterOp, Filters};
pub use inline::Inline;
pub use registry::Registry;
pub use render::RenderOptions;
pub use target::{Target, DETAILS_SUFFIX};
pub use view::{Node, TreeView};
