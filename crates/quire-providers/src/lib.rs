//! # quire-providers
//!
//! Application-service stores built on `quire-store` containers:
//!
//! - [`MembershipStore`]: user accounts, password hashing, lockout.
//! - [`RoleStore`]: roles and their members.
//! - [`ProfileStore`]: per-user property bags with inactivity queries.
//! - [`EventStore`]: an append-only log of web events.
//!
//! Every store keeps its documents in its own namespace and registers its
//! named operations with the manager's registry when opened. Public methods
//! are async; the container work runs on the blocking thread pool.

use std::sync::Arc;

use quire_store::{Container, ResultSequence};

pub mod error;
pub mod events;
pub mod membership;
pub mod password;
pub mod profiles;
pub mod roles;

pub use error::{ProviderError, ProviderResult};
pub use events::{EventStore, WebEvent};
pub use membership::{CreateUserStatus, MembershipSettings, MembershipStore, MembershipUser, NewUser, UserPage};
pub use password::PasswordHasher;
pub use profiles::{AuthenticationOption, Profile, ProfilePage, ProfileStore};
pub use roles::RoleStore;

/// Run `f` against `container` on the blocking pool.
pub(crate) async fn blocking<F, T>(container: &Arc<Container>, f: F) -> ProviderResult<T>
where
    F: FnOnce(&Container) -> ProviderResult<T> + Send + 'static,
    T: Send + 'static,
{
    let container = Arc::clone(container);
    tokio::task::spawn_blocking(move || f(&container)).await?
}

/// Run `f` on the blocking pool as one unit of work on `container`,
/// syncing afterwards. Other callers wait until it has finished.
pub(crate) async fn unit<F, T>(container: &Arc<Container>, f: F) -> ProviderResult<T>
where
    F: FnOnce(&Container) -> ProviderResult<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(container, move |c| c.with_sync(f)).await
}

/// The integer a `count(*)` operation produced; zero for a gated empty result.
pub(crate) fn total(seq: ResultSequence) -> u64 {
    seq.first_value()
        .and_then(|v| v.as_i64())
        .map_or(0, |n| u64::try_from(n).unwrap_or(0))
}
