//! Transactional entity storage for the xRegistry server.
//!
//! A registry is stored as a flat set of [`EntityRow`]s keyed by path
//! (`dirs/d1/files/f1/versions/v1`). The registry engine never talks to a
//! backend directly; it works through a [`Tx`], which gives it
//! read-your-writes, a per-transaction row cache and all-or-nothing commits.
//!
//! # Storage Backends
//!
//! All backends implement the [`EntityStore`] trait:
//!
//! - [`InMemoryEntityStore`] -- `BTreeMap`-based store, optionally mirrored
//!   to a JSON snapshot file
//!
//! # Design Rules
//!
//! 1. Nothing staged in a `Tx` is visible to other transactions before commit.
//! 2. A failed or dropped transaction leaves no persisted side effect.
//! 3. The store never interprets attribute values.

pub mod error;
pub mod memory;
pub mod row;
pub mod traits;
pub mod tx;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryEntityStore;
pub use row::{is_hidden, is_under, parent_path, EntityRow};
pub use traits::{EntityStore, WriteOp};
pub use tx::Tx;
