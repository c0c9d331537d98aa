use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::row::{is_under, EntityRow};
use crate::traits::{EntityStore, WriteOp};

type RegistryRows = BTreeMap<String, EntityRow>;

const SNAPSHOT_FORMAT: u32 = 1;

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    registries: BTreeMap<String, Vec<EntityRow>>,
}

/// In-memory, BTreeMap-based entity store.
///
/// Rows are held per registry in path order behind a `RwLock`. When built
/// with [`InMemoryEntityStore::with_snapshot`], every applied batch is also
/// written to a JSON snapshot file, and the file is loaded on startup.
pub struct InMemoryEntityStore {
    registries: RwLock<BTreeMap<String, RegistryRows>>,
    snapshot: Option<PathBuf>,
}

impl InMemoryEntityStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            registries: RwLock::new(BTreeMap::new()),
            snapshot: None,
        }
    }

    /// Create a store backed by a snapshot file.
    ///
    /// A missing file starts an empty store; the file is created on the
    /// first applied batch.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let registries = if path.exists() {
            read_snapshot(&path)?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), registries = registries.len(), "opened snapshot store");
        Ok(Self {
            registries: RwLock::new(registries),
            snapshot: Some(path),
        })
    }

    /// Total number of rows across all registries.
    pub fn len(&self) -> usize {
        self.registries
            .read()
            .expect("lock poisoned")
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns `true` if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registry.
    pub fn clear(&self) {
        self.registries.write().expect("lock poisoned").clear();
    }

    /// Write the full contents to `path` as a JSON snapshot.
    pub fn save_to(&self, path: &Path) -> StoreResult<()> {
        let map = self.registries.read().expect("lock poisoned");
        write_snapshot(path, &map)
    }

    /// Build a plain in-memory store from a snapshot file.
    pub fn load_from(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            registries: RwLock::new(read_snapshot(path)?),
            snapshot: None,
        })
    }
}

fn read_snapshot(path: &Path) -> StoreResult<BTreeMap<String, RegistryRows>> {
    let buf = fs::read(path)?;
    let snap: Snapshot = serde_json::from_slice(&buf).map_err(|e| StoreError::CorruptSnapshot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if snap.format != SNAPSHOT_FORMAT {
        return Err(StoreError::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: format!("unsupported format {}", snap.format),
        });
    }
    Ok(snap
        .registries
        .into_iter()
        .map(|(id, rows)| {
            let rows = rows.into_iter().map(|r| (r.path.clone(), r)).collect();
            (id, rows)
        })
        .collect())
}

fn write_snapshot(path: &Path, map: &BTreeMap<String, RegistryRows>) -> StoreResult<()> {
    let snap = Snapshot {
        format: SNAPSHOT_FORMAT,
        registries: map
            .iter()
            .map(|(id, rows)| (id.clone(), rows.values().cloned().collect()))
            .collect(),
    };
    let buf = serde_json::to_vec_pretty(&snap)?;

    // Write-then-rename: readers never observe a partial snapshot.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn get(&self, registry: &str, path: &str) -> StoreResult<Option<EntityRow>> {
        let map = self.registries.read().expect("lock poisoned");
        Ok(map.get(registry).and_then(|rows| rows.get(path)).cloned())
    }

    fn scan(&self, registry: &str, prefix: &str) -> StoreResult<Vec<EntityRow>> {
        let map = self.registries.read().expect("lock poisoned");
        let Some(rows) = map.get(registry) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .filter(|(path, _)| is_under(prefix, path))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn apply(&self, registry: &str, ops: &[WriteOp]) -> StoreResult<()> {
        let mut map = self.registries.write().expect("lock poisoned");
        let rows = map.entry(registry.to_string()).or_default();
        for op in ops {
            match op {
                WriteOp::Put(row) => {
                    rows.insert(row.path.clone(), row.clone());
                }
                WriteOp::Delete(path) => {
                    rows.remove(path);
                }
            }
        }
        if rows.is_empty() {
            map.remove(registry);
        }
        if let Some(path) = &self.snapshot {
            write_snapshot(path, &map)?;
        }
        Ok(())
    }

    fn registry_ids(&self) -> StoreResult<Vec<String>> {
        let map = self.registries.read().expect("lock poisoned");
        Ok(map.keys().cloned().collect())
    }

    fn remove_registry(&self, registry: &str) -> StoreResult<bool> {
        let mut map = self.registries.write().expect("lock poisoned");
        let existed = map.remove(registry).is_some();
        if existed {
            if let Some(path) = &self.snapshot {
                write_snapshot(path, &map)?;
            }
        }
        Ok(existed)
    }
}

impl std::fmt::Debug for InMemoryEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEntityStore")
            .field("row_count", &self.len())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}
