//! Profile store: per-user property bags.
//!
//! A profile document is named after its user and carries the anonymous
//! flag, activity stamps and a map of JSON property values. Listing
//! queries filter on the anonymous flag through two boolean bindings so
//! one template serves every [`AuthenticationOption`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quire_store::{Bindings, Container, Document, Manager, PageWindow, QueryOperation, ValueType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::{blocking, total, unit};

pub const ALIAS: &str = "profiles";
pub const NAMESPACE: &str = "urn:quire:profiles";

/// Which profiles a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationOption {
    #[default]
    All,
    Anonymous,
    Authenticated,
}

impl AuthenticationOption {
    fn bind(self, bindings: Bindings) -> Bindings {
        bindings
            .bind("match_all", self == Self::All)
            .bind("anonymous", self == Self::Anonymous)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub is_anonymous: bool,
    pub last_activity_date: DateTime<Utc>,
    pub last_updated_date: DateTime<Utc>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePage {
    pub profiles: Vec<Profile>,
    pub total_records: u64,
}

const SELECT: &str = "SELECT name, content FROM profiles.documents WHERE namespace = $ns";
const COUNT: &str = "SELECT count(*) FROM profiles.documents WHERE namespace = $ns";
const AUTH: &str = "AND ($match_all OR json_extract(content, '$.is_anonymous') = $anonymous)";
const BY_NAME: &str = "AND name LIKE $pattern";
const INACTIVE: &str =
    "AND julianday(json_extract(content, '$.last_activity_date')) <= julianday($since)";
const PAGE: &str = "ORDER BY name LIMIT $end - $start + 1 OFFSET $start - 1";

fn operations() -> Vec<QueryOperation> {
    let op = |name: &str, template: String| {
        QueryOperation::builder(name, template)
            .namespace("", NAMESPACE)
            .variable("match_all", ValueType::Boolean)
            .variable("anonymous", ValueType::Boolean)
            .count_gated()
    };
    let paged = |b: quire_store::QueryOperationBuilder| {
        b.variable("start", ValueType::Integer)
            .variable("end", ValueType::Integer)
    };
    vec![
        paged(op("GetAllProfiles", format!("{SELECT} {AUTH} {PAGE}"))).build(),
        op("CountProfiles", format!("{COUNT} {AUTH}")).build(),
        paged(op("FindProfilesByUserName", format!("{SELECT} {AUTH} {BY_NAME} {PAGE}")))
            .variable("pattern", ValueType::String)
            .build(),
        op("CountProfilesByUserName", format!("{COUNT} {AUTH} {BY_NAME}"))
            .variable("pattern", ValueType::String)
            .build(),
        paged(op("FindInactiveProfiles", format!("{SELECT} {AUTH} {INACTIVE} {PAGE}")))
            .variable("since", ValueType::DateTime)
            .build(),
        op("CountInactiveProfiles", format!("{COUNT} {AUTH} {INACTIVE}"))
            .variable("since", ValueType::DateTime)
            .build(),
        op(
            "InactiveProfileNames",
            format!(
                "SELECT name FROM profiles.documents WHERE namespace = $ns {AUTH} {INACTIVE} ORDER BY name"
            ),
        )
        .variable("since", ValueType::DateTime)
        .build(),
    ]
}

/// Per-user property storage.
#[derive(Clone)]
pub struct ProfileStore {
    container: Arc<Container>,
}

impl ProfileStore {
    pub fn open(manager: &Manager, path: impl AsRef<Path>) -> ProviderResult<Self> {
        let config = manager.default_config().clone().with_index("$.last_activity_date");
        let container = manager.open_container_with(path, ALIAS, config)?;
        Self::from_container(container)
    }

    /// Wrap an already open container. Its alias must be [`ALIAS`].
    pub fn from_container(container: Container) -> ProviderResult<Self> {
        if container.alias() != ALIAS {
            return Err(ProviderError::InvalidArgument(format!(
                "profile container must use alias `{ALIAS}`, not `{}`",
                container.alias()
            )));
        }
        container.registry().ensure_all(operations())?;
        Ok(Self {
            container: Arc::new(container),
        })
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Merge `properties` into the user's profile, creating it if needed.
    #[instrument(skip(self, properties), fields(count = properties.len()))]
    pub async fn set_properties(
        &self,
        username: &str,
        is_anonymous: bool,
        properties: BTreeMap<String, serde_json::Value>,
    ) -> ProviderResult<()> {
        if username.trim().is_empty() {
            return Err(ProviderError::InvalidArgument("user name must not be empty".into()));
        }
        let username = username.to_string();
        unit(&self.container, move |c| {
            let now = Utc::now();
            let existing = load(c, &username)?;
            let created = existing.is_none();
            let mut profile = existing.unwrap_or_else(|| Profile {
                username: username.clone(),
                is_anonymous,
                last_activity_date: now,
                last_updated_date: now,
                properties: BTreeMap::new(),
            });
            profile.properties.extend(properties);
            profile.last_activity_date = now;
            profile.last_updated_date = now;

            let doc = Document::from_serializable(&username, &profile)?.in_namespace(NAMESPACE);
            if created {
                c.put_document(&doc)?;
            } else {
                c.update_document(&doc)?;
            }
            debug!(username = %username, created, "profile saved");
            Ok(())
        })
        .await
    }

    /// Values of the named properties. Properties never set are absent.
    pub async fn get_properties(
        &self,
        username: &str,
        names: &[&str],
    ) -> ProviderResult<BTreeMap<String, serde_json::Value>> {
        let Some(mut profile) = self.get_profile(username).await? else {
            return Ok(BTreeMap::new());
        };
        profile.properties.retain(|k, _| names.contains(&k.as_str()));
        Ok(profile.properties)
    }

    pub async fn get_profile(&self, username: &str) -> ProviderResult<Option<Profile>> {
        let username = username.to_string();
        blocking(&self.container, move |c| load(c, &username)).await
    }

    #[instrument(skip(self))]
    pub async fn get_all_profiles(
        &self,
        option: AuthenticationOption,
        page_index: i64,
        page_size: i64,
    ) -> ProviderResult<ProfilePage> {
        self.page("GetAllProfiles", "CountProfiles", option.bind(Bindings::new()), page_index, page_size)
            .await
    }

    /// Profiles whose user name matches the SQL `LIKE` pattern.
    #[instrument(skip(self))]
    pub async fn find_profiles_by_user_name(
        &self,
        option: AuthenticationOption,
        pattern: &str,
        page_index: i64,
        page_size: i64,
    ) -> ProviderResult<ProfilePage> {
        let bindings = option.bind(Bindings::new().bind("pattern", pattern));
        self.page(
            "FindProfilesByUserName",
            "CountProfilesByUserName",
            bindings,
            page_index,
            page_size,
        )
        .await
    }

    /// Profiles whose last activity is at or before `since`.
    #[instrument(skip(self))]
    pub async fn find_inactive_profiles(
        &self,
        option: AuthenticationOption,
        since: DateTime<Utc>,
        page_index: i64,
        page_size: i64,
    ) -> ProviderResult<ProfilePage> {
        let bindings = option.bind(Bindings::new().bind("since", since));
        self.page(
            "FindInactiveProfiles",
            "CountInactiveProfiles",
            bindings,
            page_index,
            page_size,
        )
        .await
    }

    pub async fn number_of_inactive_profiles(
        &self,
        option: AuthenticationOption,
        since: DateTime<Utc>,
    ) -> ProviderResult<u64> {
        let bindings = option.bind(Bindings::new().bind("since", since));
        blocking(&self.container, move |c| {
            Ok(total(c.execute("CountInactiveProfiles", &bindings)?))
        })
        .await
    }

    /// Delete the named profiles; returns how many existed.
    #[instrument(skip(self))]
    pub async fn delete_profiles(&self, usernames: &[&str]) -> ProviderResult<u64> {
        let names: Vec<String> = usernames.iter().map(|s| (*s).to_string()).collect();
        unit(&self.container, move |c| delete_all(c, &names)).await
    }

    /// Delete every profile inactive since `since`; returns the count.
    #[instrument(skip(self))]
    pub async fn delete_inactive_profiles(
        &self,
        option: AuthenticationOption,
        since: DateTime<Utc>,
    ) -> ProviderResult<u64> {
        let bindings = option.bind(Bindings::new().bind("since", since));
        let deleted = unit(&self.container, move |c| {
            let names: Vec<String> = c
                .execute("InactiveProfileNames", &bindings)?
                .values()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect();
            delete_all(c, &names)
        })
        .await?;
        info!(deleted, "inactive profiles deleted");
        Ok(deleted)
    }

    pub async fn close(&self) -> ProviderResult<()> {
        blocking(&self.container, |c| Ok(c.close()?)).await
    }

    async fn page(
        &self,
        query: &'static str,
        count: &'static str,
        bindings: Bindings,
        page_index: i64,
        page_size: i64,
    ) -> ProviderResult<ProfilePage> {
        let window = PageWindow::new(page_index, page_size);
        blocking(&self.container, move |c| {
            let total_records = total(c.execute(count, &bindings)?);
            let profiles = c
                .execute(query, &window.bind(bindings))?
                .documents()
                .map(|d| d.deserialize::<Profile>())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ProfilePage {
                profiles,
                total_records,
            })
        })
        .await
    }
}

fn load(c: &Container, username: &str) -> ProviderResult<Option<Profile>> {
    Ok(c
        .get_document(username)?
        .map(|d| d.deserialize::<Profile>())
        .transpose()?)
}

fn delete_all(c: &Container, names: &[String]) -> ProviderResult<u64> {
    let mut deleted = 0;
    for name in names {
        if c.delete_document(name)? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn store(dir: &Path) -> ProfileStore {
        ProfileStore::open(&Manager::new(dir), "profiles.db").unwrap()
    }

    fn props(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn properties_merge_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());

        s.set_properties("ann", false, props(&[("theme", json!("dark"))])).await.unwrap();
        s.set_properties("ann", false, props(&[("zip", json!(12345))])).await.unwrap();

        let got = s.get_properties("ann", &["theme", "zip", "missing"]).await.unwrap();
        assert_eq!(got, props(&[("theme", json!("dark")), ("zip", json!(12345))]));
        assert!(s.get_properties("nobody", &["theme"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listings_respect_authentication_option() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.set_properties("ann", false, BTreeMap::new()).await.unwrap();
        s.set_properties("guest-1", true, BTreeMap::new()).await.unwrap();
        s.set_properties("guest-2", true, BTreeMap::new()).await.unwrap();

        let all = s.get_all_profiles(AuthenticationOption::All, 1, 10).await.unwrap();
        assert_eq!(all.total_records, 3);
        let anon = s.get_all_profiles(AuthenticationOption::Anonymous, 1, 10).await.unwrap();
        assert_eq!(anon.total_records, 2);
        let auth = s.get_all_profiles(AuthenticationOption::Authenticated, 1, 10).await.unwrap();
        assert_eq!(auth.profiles.len(), 1);
        assert_eq!(auth.profiles[0].username, "ann");

        let found = s
            .find_profiles_by_user_name(AuthenticationOption::All, "guest%", 2, 1)
            .await
            .unwrap();
        assert_eq!(found.total_records, 2);
        assert_eq!(found.profiles.len(), 1);
        assert_eq!(found.profiles[0].username, "guest-2");
    }

    #[tokio::test]
    async fn inactive_profiles_are_found_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.set_properties("ann", false, BTreeMap::new()).await.unwrap();
        s.set_properties("bob", true, BTreeMap::new()).await.unwrap();

        let past = Utc::now() - Duration::hours(1);
        let future = Utc::now() + Duration::hours(1);
        assert_eq!(s.number_of_inactive_profiles(AuthenticationOption::All, past).await.unwrap(), 0);
        assert_eq!(s.number_of_inactive_profiles(AuthenticationOption::All, future).await.unwrap(), 2);

        let page = s
            .find_inactive_profiles(AuthenticationOption::Anonymous, future, 1, 10)
            .await
            .unwrap();
        assert_eq!(page.profiles.len(), 1);

        let deleted = s
            .delete_inactive_profiles(AuthenticationOption::Anonymous, future)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(s.get_profile("bob").await.unwrap().is_none());
        assert!(s.get_profile("ann").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_profiles_counts_existing() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.set_properties("ann", false, BTreeMap::new()).await.unwrap();
        assert_eq!(s.delete_profiles(&["ann", "ghost"]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let page = s.get_all_profiles(AuthenticationOption::All, 1, 10).await.unwrap();
        assert!(page.profiles.is_empty());
        assert_eq!(page.total_records, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_writes_merge() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());

        let writes: Vec<_> = (0..8)
            .map(|i| {
                let s = s.clone();
                tokio::spawn(async move {
                    let key = format!("p{i}");
                    s.set_properties("new", false, props(&[(key.as_str(), json!(i))])).await
                })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        let profile = s.get_profile("new").await.unwrap().unwrap();
        assert_eq!(profile.properties.len(), 8);
        assert_eq!(profile.properties["p3"], json!(3));
    }
}
