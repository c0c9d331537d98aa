use crate::error::StoreResult;
use crate::row::EntityRow;

/// A single staged mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Put(EntityRow),
    Delete(String),
}

/// Row store holding the flattened entity tree of one or more registries.
///
/// All implementations must satisfy these invariants:
/// - Rows are keyed by `(registry id, path)`; a path holds at most one row.
/// - `scan` returns rows ordered by path.
/// - `apply` is atomic: either every op in the batch is visible to later
///   reads, or none is.
/// - The store never interprets attribute values.
pub trait EntityStore: Send + Sync {
    /// Read one row. Returns `Ok(None)` if it does not exist.
    fn get(&self, registry: &str, path: &str) -> StoreResult<Option<EntityRow>>;

    /// All rows at `prefix` or beneath it, ordered by path.
    ///
    /// An empty prefix returns the whole registry.
    fn scan(&self, registry: &str, prefix: &str) -> StoreResult<Vec<EntityRow>>;

    /// Apply a batch of puts and deletes, in order, atomically.
    fn apply(&self, registry: &str, ops: &[WriteOp]) -> StoreResult<()>;

    /// Ids of every registry with at least one row.
    fn registry_ids(&self) -> StoreResult<Vec<String>>;

    /// Drop every row of a registry. Returns `true` if it existed.
    fn remove_registry(&self, registry: &str) -> StoreResult<bool>;

    /// Check whether a row exists.
    ///
    /// Default implementation calls `get()`.
    fn exists(&self, registry: &str, path: &str) -> StoreResult<bool> {
        Ok(self.get(registry, path)?.is_some())
    }
}
