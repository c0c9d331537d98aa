//! Transactions over an [`EntityStore`].
//!
//! A [`Tx`] stages every write in memory and only hands the batch to the
//! store on [`Tx::commit`]. Reads go through a per-transaction cache, so:
//!
//! - each path is fetched from the store at most once per transaction;
//! - a read after a write in the same transaction sees the write;
//! - dropping a `Tx` (or calling [`Tx::rollback`]) leaves the store untouched.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::StoreResult;
use crate::row::{is_under, EntityRow};
use crate::traits::{EntityStore, WriteOp};

/// A unit of atomic work against one registry.
pub struct Tx {
    store: Arc<dyn EntityStore>,
    registry: String,
    /// `None` records a known-absent (or deleted) path.
    cache: HashMap<String, Option<EntityRow>>,
    ops: Vec<WriteOp>,
    fetches: usize,
}

impl Tx {
    /// Start a transaction on `registry`.
    pub fn begin(store: Arc<dyn EntityStore>, registry: impl Into<String>) -> Self {
        Self {
            store,
            registry: registry.into(),
            cache: HashMap::new(),
            ops: Vec::new(),
            fetches: 0,
        }
    }

    pub fn registry_id(&self) -> &str {
        &self.registry
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<dyn EntityStore> {
        Arc::clone(&self.store)
    }

    /// Read one row, through the cache.
    pub fn get(&mut self, path: &str) -> StoreResult<Option<EntityRow>> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }
        self.fetches += 1;
        let row = self.store.get(&self.registry, path)?;
        self.cache.insert(path.to_string(), row.clone());
        Ok(row)
    }

    /// Returns `true` if the row exists (including staged writes).
    pub fn exists(&mut self, path: &str) -> StoreResult<bool> {
        Ok(self.get(path)?.is_some())
    }

    /// All rows at or under `prefix`, with staged writes applied, ordered
    /// by path.
    pub fn scan(&mut self, prefix: &str) -> StoreResult<Vec<EntityRow>> {
        for row in self.store.scan(&self.registry, prefix)? {
            self.cache.entry(row.path.clone()).or_insert(Some(row));
        }
        let mut rows: Vec<EntityRow> = self
            .cache
            .iter()
            .filter(|(path, _)| is_under(prefix, path))
            .filter_map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(rows)
    }

    /// Stage an insert or replacement.
    pub fn put(&mut self, row: EntityRow) {
        self.cache.insert(row.path.clone(), Some(row.clone()));
        self.ops.push(WriteOp::Put(row));
    }

    /// Stage a delete of exactly one row.
    pub fn delete(&mut self, path: &str) {
        self.cache.insert(path.to_string(), None);
        self.ops.push(WriteOp::Delete(path.to_string()));
    }

    /// Stage a delete of a row and everything beneath it.
    pub fn delete_tree(&mut self, path: &str) -> StoreResult<usize> {
        let rows = self.scan(path)?;
        for row in &rows {
            self.delete(&row.path);
        }
        Ok(rows.len())
    }

    /// Returns `true` if writes are staged.
    pub fn is_dirty(&self) -> bool {
        !self.ops.is_empty()
    }

    /// Number of store round-trips made by [`Tx::get`].
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Apply all staged writes atomically, then start afresh.
    pub fn commit(&mut self) -> StoreResult<()> {
        if !self.ops.is_empty() {
            self.store.apply(&self.registry, &self.ops)?;
            debug!(registry = %self.registry, ops = self.ops.len(), "transaction committed");
        }
        self.reset();
        Ok(())
    }

    /// Discard all staged writes.
    pub fn rollback(&mut self) {
        if !self.ops.is_empty() {
            debug!(registry = %self.registry, ops = self.ops.len(), "transaction rolled back");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.ops.clear();
        self.cache.clear();
        self.fetches = 0;
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("registry", &self.registry)
            .field("cached", &self.cache.len())
            .field("staged_ops", &self.ops.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEntityStore;
    use xreg_types::EntityKind;

    fn setup() -> (Arc<InMemoryEntityStore>, Tx) {
        let store = Arc::new(InMemoryEntityStore::new());
        let tx = Tx::begin(store.clone(), "r");
        (store, tx)
    }

    fn group(id: &str) -> EntityRow {
        EntityRow::new(EntityKind::Group, format!("dirs/{id}"), id, "dirs")
    }

    #[test]
    fn writes_invisible_until_commit() {
        let (store, mut tx) = setup();
        tx.put(group("d1"));
        assert!(tx.exists("dirs/d1").unwrap());
        assert!(!store.exists("r", "dirs/d1").unwrap());
        tx.commit().unwrap();
        assert!(store.exists("r", "dirs/d1").unwrap());
    }

    #[test]
    fn rollback_discards() {
        let (store, mut tx) = setup();
        tx.put(group("d1"));
        tx.rollback();
        assert!(!tx.exists("dirs/d1").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn drop_discards() {
        let (store, mut tx) = setup();
        tx.put(group("d1"));
        drop(tx);
        assert!(store.is_empty());
    }

    #[test]
    fn at_most_one_fetch_per_path() {
        let (store, mut tx) = setup();
        store.apply("r", &[WriteOp::Put(group("d1"))]).unwrap();
        for _ in 0..5 {
            assert!(tx.get("dirs/d1").unwrap().is_some());
            assert!(tx.get("dirs/d2").unwrap().is_none());
        }
        assert_eq!(tx.fetch_count(), 2);
    }

    #[test]
    fn scan_merges_staged_writes() {
        let (store, mut tx) = setup();
        store
            .apply("r", &[WriteOp::Put(group("d1")), WriteOp::Put(group("d2"))])
            .unwrap();
        tx.delete("dirs/d1");
        tx.put(group("d3"));
        let paths: Vec<_> = tx.scan("").unwrap().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["dirs/d2", "dirs/d3"]);
    }

    #[test]
    fn read_your_writes_after_scan() {
        let (store, mut tx) = setup();
        store.apply("r", &[WriteOp::Put(group("d1"))]).unwrap();
        let mut row = tx.get("dirs/d1").unwrap().unwrap();
        row.set("name", "changed");
        tx.put(row);
        // A later scan must not clobber the staged version with store data.
        let rows = tx.scan("dirs").unwrap();
        assert_eq!(rows[0].get_str("name"), Some("changed"));
    }

    #[test]
    fn delete_tree_removes_descendants() {
        let (_store, mut tx) = setup();
        tx.put(group("d1"));
        tx.put(EntityRow::new(EntityKind::Resource, "dirs/d1/files/f1", "f1", "dirs/files"));
        tx.put(group("d10"));
        assert_eq!(tx.delete_tree("dirs/d1").unwrap(), 2);
        let paths: Vec<_> = tx.scan("").unwrap().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["dirs/d10"]);
    }
}
