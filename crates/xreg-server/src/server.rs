use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// xRegistry HTTP server.
pub struct XregServer {
    state: SharedState,
}

impl XregServer {
    /// Open the configured registry.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let state = AppState::from_config(config)?.shared();
        Ok(Self { state })
    }

    pub fn with_state(state: SharedState) -> Self {
        Self { state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let addr = self.state.config.bind_addr;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            registry = %self.state.config.registry_id,
            base_url = %self.state.config.base_url,
            "xRegistry server listening on {addr}"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
