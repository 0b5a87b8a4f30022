//! Error types for the quire-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Every failure coming out of SQLite is wrapped rather than flattened so
//! the original cause stays reachable through [`std::error::Error::source`].

use std::path::PathBuf;

use thiserror::Error;

use crate::value::ValueType;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- Container open -----------------------------------------------------
    /// The container's directory (or, when creation is not allowed, the
    /// container file itself) does not exist.
    #[error("path does not exist: {}", path.display())]
    PathNotFound { path: PathBuf },

    /// The process lacks permission to open or write the container.
    #[error("access denied: {}: {reason}", path.display())]
    AccessDenied { path: PathBuf, reason: String },

    /// The container is already open through this manager.
    #[error("container already open: {}", path.display())]
    AlreadyOpen { path: PathBuf },

    /// Exclusive creation was requested but the container file exists.
    #[error("container already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// The container has been closed and can no longer serve requests.
    #[error("container `{alias}` is closed")]
    Closed { alias: String },

    // -- Registry -----------------------------------------------------------
    /// No operation with this name has been registered.
    #[error("unknown query operation: {name}")]
    UnknownOperation { name: String },

    /// An operation with this name is already registered.
    #[error("query operation already registered: {name}")]
    DuplicateOperation { name: String },

    /// The template and its declared variables disagree.
    #[error("invalid template for `{name}`: {reason}")]
    InvalidTemplate { name: String, reason: String },

    // -- Prepared queries ---------------------------------------------------
    /// The store refused to compile a query template.
    #[error("failed to compile `{operation}`: {reason}")]
    Compile { operation: String, reason: String },

    /// A required variable was not bound.
    #[error("`{operation}` requires a binding for ${variable}")]
    MissingBinding { operation: String, variable: String },

    /// A binding was supplied for a variable the operation does not declare.
    #[error("`{operation}` does not declare ${variable}")]
    UnexpectedBinding { operation: String, variable: String },

    /// A binding's value does not match the declared variable type.
    #[error("`{operation}` expects ${variable} as {expected}, got {actual}")]
    BindingType {
        operation: String,
        variable: String,
        expected: ValueType,
        actual: &'static str,
    },

    // -- Documents ----------------------------------------------------------
    /// A document with this name already exists in the container.
    #[error("document already exists in `{alias}`: {name}")]
    DuplicateDocument { alias: String, name: String },

    /// The document to update does not exist.
    #[error("document not found in `{alias}`: {name}")]
    DocumentNotFound { alias: String, name: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Wrapped causes -----------------------------------------------------
    /// The store failed while executing a statement.
    #[error("store execution failed: {0}")]
    Execution(#[from] rusqlite::Error),

    /// JSON serialization or deserialization of a document failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading the configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed or is inconsistent.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// A thread panicked while holding one of the store's locks.
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            reason: err.to_string(),
        }
    }
}

impl StoreError {
    /// `true` for errors caused by the caller supplying the wrong bindings.
    pub fn is_binding_error(&self) -> bool {
        matches!(
            self,
            Self::MissingBinding { .. } | Self::UnexpectedBinding { .. } | Self::BindingType { .. }
        )
    }
}
