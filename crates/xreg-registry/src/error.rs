use thiserror::Error;

use xreg_model::ModelError;
use xreg_store::StoreError;
use xreg_types::TypeError;

/// Errors from registry operations.
///
/// The first three variants carry the exact client-facing message. Wrapped
/// model and type errors are client errors as well; store errors and
/// [`RegistryError::Invariant`] are server faults.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// An internal consistency check failed. Never caused by client input.
    #[error("internal error: {0}")]
    Invariant(String),
}

impl RegistryError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Model(ModelError::Serialize(_)) => 500,
            Self::BadRequest(_) | Self::Model(_) | Self::Type(_) => 400,
            Self::NotFound(_) => 404,
            Self::MethodNotAllowed(_) => 405,
            Self::Store(_) | Self::Invariant(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

pub(crate) fn bad_request(msg: impl Into<String>) -> RegistryError {
    RegistryError::BadRequest(msg.into())
}

pub(crate) fn not_found(msg: impl Into<String>) -> RegistryError {
    RegistryError::NotFound(msg.into())
}
