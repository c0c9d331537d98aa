use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Public root used in `self` and `*url` attributes.
    pub base_url: String,
    pub registry_id: String,
    /// JSON snapshot loaded at start and rewritten after every commit.
    pub data_file: Option<PathBuf>,
    /// Model document applied at start.
    pub model_file: Option<PathBuf>,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8181)),
            base_url: "http://localhost:8181".into(),
            registry_id: "xregistry".into(),
            data_file: None,
            model_file: None,
            cors: false,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(src: &str) -> ServerResult<Self> {
        toml::from_str(src).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> ServerResult<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }
}
