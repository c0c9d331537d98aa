use thiserror::Error;

/// Errors from model definition and attribute validation.
///
/// Every variant but `Serialize` is caused by user input (a bad model
/// document or a bad attribute value).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Attribute names not defined by the model and no `*` wildcard.
    #[error("Invalid extension(s): {}", .0.join(","))]
    InvalidExtensions(Vec<String>),

    /// A value that does not conform to its attribute definition.
    #[error("{0}")]
    InvalidValue(String),

    /// A model definition problem (duplicate names, bad types, ...).
    #[error("{0}")]
    Definition(String),

    /// A model document that cannot be parsed at all.
    #[error("Error parsing model: {0}")]
    Parse(String),

    /// A capabilities document that is not acceptable.
    #[error("{0}")]
    Capability(String),

    /// The model could not be turned into JSON.
    #[error("model not serializable: {0}")]
    Serialize(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
