//! Error types for the quire-providers crate.

use quire_store::StoreError;
use thiserror::Error;

use crate::membership::CreateUserStatus;

/// Alias for `Result<T, ProviderError>`.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by the application-service stores.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The underlying document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("user not found: {username}")]
    UserNotFound { username: String },

    #[error("role not found: {role}")]
    RoleNotFound { role: String },

    #[error("role already exists: {role}")]
    RoleExists { role: String },

    /// The role still has members and deletion was asked to refuse that.
    #[error("role has members: {role}")]
    RolePopulated { role: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A supplied password or password answer did not match.
    #[error("password does not match for user {username}")]
    PasswordMismatch { username: String },

    #[error("user could not be created: {0}")]
    CreateUser(CreateUserStatus),

    #[error("password reset is disabled")]
    PasswordResetDisabled,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
