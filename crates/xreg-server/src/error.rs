use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use xreg_model::ModelError;
use xreg_registry::RegistryError;
use xreg_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A request the core never sees: malformed body, disallowed verb.
    #[error("{message}")]
    Request { status: u16, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Request {
            status: 400,
            message: message.into(),
        }
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::Request {
            status: 405,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        let code = match self {
            Self::Registry(e) => e.status_code(),
            Self::Model(ModelError::Serialize(_)) => 500,
            Self::Model(_) => 400,
            Self::Request { status, .. } => *status,
            Self::Store(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => 500,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Errors go out as a single plain-text line.
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        let mut body = self.to_string();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let e: ServerError = RegistryError::NotFound("Not found".into()).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        assert_eq!(e.to_string(), "Not found");
        assert_eq!(ServerError::not_allowed("x").status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ServerError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        let e: ServerError = RegistryError::Invariant("oops".into()).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn body_is_one_line() {
        let resp = ServerError::bad_request("bad thing").into_response();
        assert_eq!(resp.status(), 400);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"bad thing\n");
    }
}
