use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use xreg_model::parse_model;
use xreg_registry::Registry;
use xreg_store::{EntityStore, InMemoryEntityStore};
use xreg_types::now_timestamp;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Shared handler state.
pub type SharedState = Arc<AppState>;

/// The registry being served, plus the configuration it was opened with.
///
/// Requests take turns on the single [`Registry`] handle; each one runs as
/// its own transaction through [`AppState::run`].
pub struct AppState {
    registry: Mutex<Registry>,
    pub config: ServerConfig,
}

impl AppState {
    /// Open (or create) the configured registry in `store`, applying the
    /// configured model file if there is one.
    pub fn new(config: ServerConfig, store: Arc<dyn EntityStore>) -> ServerResult<Self> {
        let mut registry = Registry::open_or_create(store, &config.registry_id)?;
        if let Some(path) = &config.model_file {
            let buf = std::fs::read(path)?;
            let model = parse_model(&buf)?;
            registry.apply_model(&model)?;
            registry.commit()?;
            info!(path = %path.display(), "applied model file");
        }
        Ok(Self {
            registry: Mutex::new(registry),
            config,
        })
    }

    /// Build the store named by the configuration: snapshot-backed when
    /// `data_file` is set, purely in memory otherwise.
    pub fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let store: Arc<dyn EntityStore> = match &config.data_file {
            Some(path) => Arc::new(InMemoryEntityStore::with_snapshot(path)?),
            None => Arc::new(InMemoryEntityStore::new()),
        };
        Self::new(config, store)
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Run `f` as one transaction: commit on success, roll back on error.
    pub fn run<T>(&self, f: impl FnOnce(&mut Registry) -> ServerResult<T>) -> ServerResult<T> {
        let mut reg = self.registry.lock().unwrap_or_else(|poisoned| {
            warn!("a previous request panicked; discarding its staged writes");
            self.registry.clear_poison();
            let mut reg = poisoned.into_inner();
            if let Err(rb) = reg.rollback() {
                error!(error = %rb, "rollback failed");
            }
            reg
        });
        reg.set_now(now_timestamp());
        match f(&mut reg) {
            Ok(value) => {
                reg.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = reg.rollback() {
                    error!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Run `f` on a blocking thread inside one transaction.
pub async fn blocking<T, F>(state: SharedState, f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Registry, &ServerConfig) -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || state.run(|reg| f(reg, &state.config)))
        .await
        .map_err(|e| ServerError::Internal(format!("request task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use xreg_registry::{GroupKey, WriteMode};
    use xreg_types::Object;

    fn state() -> AppState {
        AppState::new(ServerConfig::default(), Arc::new(InMemoryEntityStore::new())).unwrap()
    }

    #[test]
    fn failed_request_leaves_no_trace() {
        let st = state();
        st.run(|reg| {
            reg.model_mut().add_group_model("dirs", "dir")?;
            reg.save_model()?;
            Ok(())
        })
        .unwrap();

        let err = st
            .run(|reg| {
                reg.upsert_group(&GroupKey::new("dirs", "d1"), Object::new(), WriteMode::Replace)?;
                Err::<(), _>(ServerError::bad_request("boom"))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        let exists = st.run(|reg| Ok(reg.group_exists(&GroupKey::new("dirs", "d1"))?)).unwrap();
        assert!(!exists);
    }

    #[test]
    fn panicked_request_does_not_wedge_the_registry() {
        let st = Arc::new(state());
        st.run(|reg| {
            reg.model_mut().add_group_model("dirs", "dir")?;
            reg.save_model()?;
            Ok(())
        })
        .unwrap();

        let inner = Arc::clone(&st);
        let joined = std::thread::spawn(move || {
            inner.run(|reg| -> ServerResult<()> {
                reg.upsert_group(&GroupKey::new("dirs", "d1"), Object::new(), WriteMode::Replace)?;
                panic!("handler bug");
            })
        })
        .join();
        assert!(joined.is_err());

        let exists = st.run(|reg| Ok(reg.group_exists(&GroupKey::new("dirs", "d1"))?)).unwrap();
        assert!(!exists);
        st.run(|reg| {
            reg.upsert_group(&GroupKey::new("dirs", "d2"), Object::new(), WriteMode::Replace)?;
            Ok(())
        })
        .unwrap();
        let exists = st.run(|reg| Ok(reg.group_exists(&GroupKey::new("dirs", "d2"))?)).unwrap();
        assert!(exists);
    }

    #[test]
    fn model_file_applied_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        std::fs::write(
            &model,
            r#"{"groups": {"dirs": {"singular": "dir", "resources": {"files": {"singular": "file"}}}}}"#,
        )
        .unwrap();
        let config = ServerConfig {
            model_file: Some(model),
            data_file: Some(dir.path().join("data.json")),
            ..ServerConfig::default()
        };
        let st = AppState::from_config(config.clone()).unwrap();
        let found = st
            .run(|reg| Ok(reg.model().find_resource_model("dirs", "files").is_some()))
            .unwrap();
        assert!(found);
        drop(st);

        // The snapshot carries the model into the next start.
        let reopened = AppState::from_config(ServerConfig {
            model_file: None,
            ..config
        })
        .unwrap();
        let found = reopened
            .run(|reg| Ok(reg.model().find_group_model("dirs").is_some()))
            .unwrap();
        assert!(found);
    }
}
