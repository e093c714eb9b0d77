//! Error types for the seafile_client crate.

use thiserror::Error;

/// Errors that can occur when interacting with a Seafile server.
#[derive(Error, Debug)]
pub enum SeafileError {
    #[error("authentication rejected by server ({method} {path})")]
    Auth { method: String, path: String },

    #[error("resource not found ({method} {path})")]
    NotFound { method: String, path: String },

    #[error("rate limited by server ({method} {path})")]
    Throttled { method: String, path: String },

    #[error("internal server error ({method} {path})")]
    InternalServer { method: String, path: String },

    #[error("operation failed on server ({method} {path})")]
    OperationFailed { method: String, path: String },

    #[error("unexpected status {status} ({method} {path})")]
    UnexpectedStatus {
        status: u16,
        method: String,
        path: String,
    },

    #[error("could not find library '{0}'")]
    LibraryNotFound(String),

    #[error("no valid cached token and no password configured")]
    NoCredentials,

    #[error("server did not answer the reachability probe: {0}")]
    Unreachable(String),

    #[error("malformed token blob: {0}")]
    Format(&'static str),

    #[error("token encryption failed")]
    Encrypt,

    #[error("token decryption failed")]
    Decrypt,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for SeafileError.
pub type Result<T> = std::result::Result<T, SeafileError>;
