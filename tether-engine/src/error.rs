//! Error types for the engine.

use thiserror::Error;

/// Errors returned by the remote control-plane API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists or is still referenced.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was rejected as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The remote API cannot perform this operation at all.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Network failure, throttling or a 5xx response.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Any other non-success response.
    #[error("unexpected response {status}: {message}")]
    Unexpected { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The surrounding invocation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }
}

/// Result type for remote API calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors from the project and secret stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem error.
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Document exists but cannot be parsed.
    #[error("malformed document {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to resolve a named field inside a secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret '{namespace}/{name}' not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret '{namespace}/{name}' doesn't contain '{field}' parameter")]
    MissingField {
        namespace: String,
        name: String,
        field: String,
    },

    #[error("secret '{namespace}/{name}' contains an empty value for '{field}' parameter")]
    EmptyField {
        namespace: String,
        name: String,
        field: String,
    },

    #[error("failed to read secret '{namespace}/{name}': {message}")]
    Store {
        namespace: String,
        name: String,
        message: String,
    },
}

/// The recorded ownership snapshot could not be parsed.
#[derive(Debug, Error)]
#[error("malformed ownership snapshot in annotation {annotation}: {source}")]
pub struct SnapshotError {
    pub annotation: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Errors that abort a whole reconciliation cycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("reconciliation cancelled")]
    Cancelled,
}
