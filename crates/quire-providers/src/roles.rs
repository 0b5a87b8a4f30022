//! Role store.
//!
//! One document per role, named after the role, holding the sorted list of
//! member user names. Membership queries walk that list with `json_each`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use quire_store::{Bindings, Container, Document, Manager, QueryOperation, StoreError, ValueType};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::{blocking, total, unit};

pub const ALIAS: &str = "roles";
pub const NAMESPACE: &str = "urn:quire:roles";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleDoc {
    name: String,
    application: String,
    #[serde(default)]
    users: BTreeSet<String>,
}

const MEMBERS: &str = "FROM roles.documents AS d, json_each(d.content, '$.users') AS u \
                       WHERE d.namespace = $ns";

fn operations() -> Vec<QueryOperation> {
    let op = |name: &str, template: String| {
        QueryOperation::builder(name, template).namespace("", NAMESPACE)
    };
    vec![
        op(
            "GetAllRoles",
            "SELECT name FROM roles.documents WHERE namespace = $ns ORDER BY name".to_string(),
        )
        .count_gated()
        .build(),
        op(
            "GetRolesForUser",
            format!("SELECT d.name {MEMBERS} AND u.value = $user ORDER BY d.name"),
        )
        .variable("user", ValueType::String)
        .count_gated()
        .build(),
        op(
            "GetUsersInRole",
            format!("SELECT u.value {MEMBERS} AND d.name = $role ORDER BY u.value"),
        )
        .variable("role", ValueType::String)
        .count_gated()
        .build(),
        op(
            "FindUsersInRole",
            format!(
                "SELECT u.value {MEMBERS} AND d.name = $role AND u.value LIKE $pattern ORDER BY u.value"
            ),
        )
        .variable("role", ValueType::String)
        .variable("pattern", ValueType::String)
        .count_gated()
        .build(),
        op(
            "IsUserInRole",
            format!("SELECT count(*) {MEMBERS} AND d.name = $role AND u.value = $user"),
        )
        .variable("role", ValueType::String)
        .variable("user", ValueType::String)
        .count_gated()
        .build(),
        op(
            "CountRoleMembers",
            "SELECT coalesce(sum(json_array_length(content, '$.users')), 0) \
             FROM roles.documents WHERE namespace = $ns AND name = $role"
                .to_string(),
        )
        .variable("role", ValueType::String)
        .count_gated()
        .build(),
    ]
}

/// Roles and the users assigned to them.
#[derive(Clone)]
pub struct RoleStore {
    container: Arc<Container>,
    application: Arc<str>,
}

impl RoleStore {
    pub fn open(manager: &Manager, path: impl AsRef<Path>, application: &str) -> ProviderResult<Self> {
        let container = manager.open_container(path, ALIAS)?;
        Self::from_container(container, application)
    }

    /// Wrap an already open container. Its alias must be [`ALIAS`].
    pub fn from_container(container: Container, application: &str) -> ProviderResult<Self> {
        if container.alias() != ALIAS {
            return Err(ProviderError::InvalidArgument(format!(
                "role container must use alias `{ALIAS}`, not `{}`",
                container.alias()
            )));
        }
        container.registry().ensure_all(operations())?;
        Ok(Self {
            container: Arc::new(container),
            application: Arc::from(application),
        })
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    #[instrument(skip(self))]
    pub async fn create_role(&self, role: &str) -> ProviderResult<()> {
        check_name("role", role)?;
        let doc = RoleDoc {
            name: role.to_string(),
            application: self.application.to_string(),
            users: BTreeSet::new(),
        };
        unit(&self.container, move |c| {
            if c.get_document(&doc.name)?.is_some() {
                return Err(ProviderError::RoleExists { role: doc.name });
            }
            let document = Document::from_serializable(&doc.name, &doc)?.in_namespace(NAMESPACE);
            c.put_document(&document).map_err(|e| match e {
                StoreError::DuplicateDocument { name, .. } => ProviderError::RoleExists { role: name },
                other => other.into(),
            })
        })
        .await?;
        info!(role, "role created");
        Ok(())
    }

    pub async fn role_exists(&self, role: &str) -> ProviderResult<bool> {
        let role = role.to_string();
        blocking(&self.container, move |c| Ok(c.get_document(&role)?.is_some())).await
    }

    /// Delete `role`. With `throw_on_populated`, a role that still has
    /// members is left alone and `RolePopulated` is returned.
    #[instrument(skip(self))]
    pub async fn delete_role(&self, role: &str, throw_on_populated: bool) -> ProviderResult<bool> {
        let role = role.to_string();
        unit(&self.container, move |c| {
            let doc = load(c, &role)?;
            if throw_on_populated && !doc.users.is_empty() {
                return Err(ProviderError::RolePopulated { role });
            }
            Ok(c.delete_document(&role)?)
        })
        .await
    }

    /// Add every user to every role. All roles must exist; nothing is
    /// written otherwise. Existing memberships are left as they are.
    #[instrument(skip(self))]
    pub async fn add_users_to_roles(&self, users: &[&str], roles: &[&str]) -> ProviderResult<()> {
        for user in users {
            check_name("user", user)?;
        }
        let users = owned(users);
        let roles = owned(roles);
        unit(&self.container, move |c| {
            let mut docs = roles.iter().map(|r| load(c, r)).collect::<ProviderResult<Vec<_>>>()?;
            for doc in &mut docs {
                doc.users.extend(users.iter().cloned());
            }
            store_all(c, &docs)
        })
        .await
    }

    /// Remove every user from every role. All roles must exist.
    #[instrument(skip(self))]
    pub async fn remove_users_from_roles(&self, users: &[&str], roles: &[&str]) -> ProviderResult<()> {
        let users = owned(users);
        let roles = owned(roles);
        unit(&self.container, move |c| {
            let mut docs = roles.iter().map(|r| load(c, r)).collect::<ProviderResult<Vec<_>>>()?;
            for doc in &mut docs {
                doc.users.retain(|u| !users.contains(u));
            }
            store_all(c, &docs)
        })
        .await
    }

    pub async fn is_user_in_role(&self, user: &str, role: &str) -> ProviderResult<bool> {
        let bindings = Bindings::new().bind("role", role).bind("user", user);
        blocking(&self.container, move |c| {
            Ok(total(c.execute("IsUserInRole", &bindings)?) > 0)
        })
        .await
    }

    pub async fn get_roles_for_user(&self, user: &str) -> ProviderResult<Vec<String>> {
        self.names("GetRolesForUser", Bindings::new().bind("user", user)).await
    }

    pub async fn get_users_in_role(&self, role: &str) -> ProviderResult<Vec<String>> {
        self.require(role).await?;
        self.names("GetUsersInRole", Bindings::new().bind("role", role)).await
    }

    /// Members of `role` whose name matches the SQL `LIKE` pattern.
    pub async fn find_users_in_role(&self, role: &str, pattern: &str) -> ProviderResult<Vec<String>> {
        if pattern.is_empty() {
            return Err(ProviderError::InvalidArgument("user name pattern must not be empty".into()));
        }
        self.require(role).await?;
        self.names(
            "FindUsersInRole",
            Bindings::new().bind("role", role).bind("pattern", pattern),
        )
        .await
    }

    pub async fn get_all_roles(&self) -> ProviderResult<Vec<String>> {
        self.names("GetAllRoles", Bindings::new()).await
    }

    pub async fn role_has_members(&self, role: &str) -> ProviderResult<bool> {
        let bindings = Bindings::new().bind("role", role);
        blocking(&self.container, move |c| {
            Ok(total(c.execute("CountRoleMembers", &bindings)?) > 0)
        })
        .await
    }

    pub async fn close(&self) -> ProviderResult<()> {
        blocking(&self.container, |c| Ok(c.close()?)).await
    }

    async fn require(&self, role: &str) -> ProviderResult<()> {
        let role = role.to_string();
        blocking(&self.container, move |c| load(c, &role).map(drop)).await
    }

    async fn names(&self, operation: &'static str, bindings: Bindings) -> ProviderResult<Vec<String>> {
        blocking(&self.container, move |c| {
            Ok(c.execute(operation, &bindings)?
                .values()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect())
        })
        .await
    }
}

fn check_name(kind: &str, name: &str) -> ProviderResult<()> {
    if name.trim().is_empty() || name.contains(',') {
        return Err(ProviderError::InvalidArgument(format!("invalid {kind} name `{name}`")));
    }
    Ok(())
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

fn load(c: &Container, role: &str) -> ProviderResult<RoleDoc> {
    c.get_document(role)?
        .ok_or_else(|| ProviderError::RoleNotFound {
            role: role.to_string(),
        })?
        .deserialize()
        .map_err(Into::into)
}

/// Write every loaded role back. Callers load and store inside one [`unit`].
fn store_all(c: &Container, docs: &[RoleDoc]) -> ProviderResult<()> {
    for doc in docs {
        let document = Document::from_serializable(&doc.name, doc)?.in_namespace(NAMESPACE);
        c.update_document(&document)?;
    }
    Ok(())
}
