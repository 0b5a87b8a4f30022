//! Integration tests for the application-service stores.
//!
//! All four stores share one manager, and therefore one query registry,
//! the way a host application wires them.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, Utc};
use quire_providers::{
    AuthenticationOption, CreateUserStatus, EventStore, MembershipSettings, MembershipStore,
    NewUser, ProfileStore, ProviderError, RoleStore, WebEvent,
};
use quire_store::Manager;
use serde_json::json;

fn settings() -> MembershipSettings {
    MembershipSettings {
        password_hash_iterations: 1_000,
        max_invalid_password_attempts: 3,
        ..MembershipSettings::default()
    }
}

fn user(name: &str, password: &str) -> NewUser {
    NewUser {
        username: name.to_string(),
        password: password.to_string(),
        email: Some(format!("{name}@example.com")),
        is_approved: true,
        ..NewUser::default()
    }
}

fn open_membership(dir: &Path, settings: MembershipSettings) -> (Manager, MembershipStore) {
    let manager = Manager::new(dir);
    let store = MembershipStore::open(&manager, "membership.db", settings).unwrap();
    (manager, store)
}

// ═══════════════════════════════════════════════════════════════════════
//  Membership
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn validate_user_locks_after_repeated_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    s.create_user(user("ann", "s3cret!")).await.unwrap();

    assert!(s.validate_user("ann", "s3cret!").await.unwrap());
    for _ in 0..3 {
        assert!(!s.validate_user("ann", "wrong").await.unwrap());
    }
    let locked = s.get_user("ann", false).await.unwrap().unwrap();
    assert!(locked.is_locked_out);
    assert!(!s.validate_user("ann", "s3cret!").await.unwrap());

    assert!(s.unlock_user("ann").await.unwrap());
    assert!(s.validate_user("ann", "s3cret!").await.unwrap());
}

#[tokio::test]
async fn successful_validation_resets_failure_count() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    s.create_user(user("bob", "pw")).await.unwrap();

    for _ in 0..2 {
        assert!(!s.validate_user("bob", "nope").await.unwrap());
    }
    assert!(s.validate_user("bob", "pw").await.unwrap());
    for _ in 0..2 {
        assert!(!s.validate_user("bob", "nope").await.unwrap());
    }
    assert!(!s.get_user("bob", false).await.unwrap().unwrap().is_locked_out);
}

#[tokio::test]
async fn unapproved_and_unknown_users_never_validate() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    let mut pending = user("cat", "pw");
    pending.is_approved = false;
    s.create_user(pending).await.unwrap();

    assert!(!s.validate_user("cat", "pw").await.unwrap());
    assert!(!s.validate_user("ghost", "pw").await.unwrap());
    assert!(matches!(
        s.validate_user("", "pw").await,
        Err(ProviderError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn change_password_requires_the_old_one() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    s.create_user(user("dan", "first")).await.unwrap();

    assert!(matches!(
        s.change_password("dan", "guess", "second").await,
        Err(ProviderError::PasswordMismatch { .. })
    ));
    s.change_password("dan", "first", "second").await.unwrap();
    assert!(s.validate_user("dan", "second").await.unwrap());
    assert!(!s.validate_user("dan", "first").await.unwrap());
    assert!(matches!(
        s.change_password("ghost", "a", "b").await,
        Err(ProviderError::UserNotFound { .. })
    ));
}

#[tokio::test]
async fn reset_password_checks_the_answer() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(
        dir.path(),
        MembershipSettings {
            requires_question_and_answer: true,
            min_non_alphanumeric: 2,
            ..settings()
        },
    );
    let mut new = user("eve", "old!!pw");
    new.password_question = Some("Favourite colour?".into());
    new.password_answer = Some("Blue".into());
    s.create_user(new).await.unwrap();

    assert!(matches!(
        s.reset_password("eve", Some("red")).await,
        Err(ProviderError::PasswordMismatch { .. })
    ));
    let fresh = s.reset_password("eve", Some("  blue ")).await.unwrap();
    assert!(fresh.len() >= 10);
    assert!(fresh.chars().filter(|c| !c.is_ascii_alphanumeric()).count() >= 2);
    assert!(s.validate_user("eve", &fresh).await.unwrap());

    s.change_password_question_and_answer("eve", &fresh, "Pet?", "Rex")
        .await
        .unwrap();
    assert!(s.reset_password("eve", Some("rex")).await.is_ok());
}

#[tokio::test]
async fn reset_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(
        dir.path(),
        MembershipSettings {
            enable_password_reset: false,
            ..settings()
        },
    );
    s.create_user(user("fay", "pw")).await.unwrap();
    assert!(matches!(
        s.reset_password("fay", None).await,
        Err(ProviderError::PasswordResetDisabled)
    ));
}

#[tokio::test]
async fn stored_passwords_are_hashed_not_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    s.create_user(user("gil", "plain-text-pw")).await.unwrap();

    let public = serde_json::to_value(s.get_user("gil", false).await.unwrap().unwrap()).unwrap();
    assert!(public.get("password_hash").is_none());

    let raw = s.container().get_document("gil").unwrap().unwrap();
    let hash = raw.content["password_hash"].as_str().unwrap();
    assert!(!hash.contains("plain-text-pw"));
    assert!(hash.contains(':'));
}

#[tokio::test]
async fn user_listings_page_with_totals() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());

    let empty = s.get_all_users(1, 10).await.unwrap();
    assert!(empty.users.is_empty());
    assert_eq!(empty.total_records, 0);

    for name in ["amy", "abe", "ben", "bea", "cal"] {
        s.create_user(user(name, "pw")).await.unwrap();
    }
    assert_eq!(s.number_of_users().await.unwrap(), 5);

    let page = s.get_all_users(2, 2).await.unwrap();
    assert_eq!(page.total_records, 5);
    let names: Vec<_> = page.users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["bea", "ben"]);

    assert_eq!(s.get_all_users(0, 2).await.unwrap(), s.get_all_users(1, 2).await.unwrap());

    let a = s.get_users_by_name("a%", 1, 10).await.unwrap();
    assert_eq!(a.total_records, 2);
    let by_email = s.get_users_by_email("c%@example.com", 1, 10).await.unwrap();
    assert_eq!(by_email.users.len(), 1);
    assert_eq!(s.get_user_name_by_email("BEN@example.com").await.unwrap().as_deref(), Some("ben"));
}

#[tokio::test]
async fn users_online_counts_recent_activity() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    s.create_user(user("hal", "pw")).await.unwrap();

    let before = Utc::now() - Duration::minutes(15);
    assert_eq!(s.number_of_users_online(before).await.unwrap(), 1);
    let after = Utc::now() + Duration::minutes(1);
    assert_eq!(s.number_of_users_online(after).await.unwrap(), 0);
}

#[tokio::test]
async fn accounts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (_m, s) = open_membership(dir.path(), settings());
        s.create_user(user("ivy", "pw")).await.unwrap();
        s.close().await.unwrap();
    }
    let (_m, s) = open_membership(dir.path(), settings());
    assert!(s.validate_user("ivy", "pw").await.unwrap());
}

#[tokio::test]
async fn duplicate_provider_key_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    let first = s.create_user(user("jo", "pw")).await.unwrap();

    let mut clash = user("jay", "pw");
    clash.user_key = Some(first.user_key);
    assert!(matches!(
        s.create_user(clash).await,
        Err(ProviderError::CreateUser(CreateUserStatus::DuplicateProviderUserKey))
    ));
}

#[tokio::test]
async fn concurrent_lookups_share_one_compile() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, s) = open_membership(dir.path(), settings());
    s.create_user(user("kim", "pw")).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let s = s.clone();
        tasks.push(tokio::spawn(async move {
            s.get_user("kim", false).await.unwrap().is_some()
        }));
    }
    for t in tasks {
        assert!(t.await.unwrap());
    }
    let stats = s.container().cache_stats();
    assert_eq!(stats.compiles(), s.container().prepared_count());
}

// ═══════════════════════════════════════════════════════════════════════
//  All stores on one manager
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn stores_share_a_manager_and_registry() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());

    let members = MembershipStore::open(&manager, "membership.db", settings()).unwrap();
    let roles = RoleStore::open(&manager, "roles.db", "/").unwrap();
    let profiles = ProfileStore::open(&manager, "profiles.db").unwrap();
    let events = EventStore::open(&manager, "events.db").unwrap();
    assert_eq!(manager.open_count(), 4);
    assert!(manager.registry().contains("GetUserByName"));
    assert!(manager.registry().contains("GetRolesForUser"));
    assert!(manager.registry().contains("GetAllProfiles"));
    assert!(manager.registry().contains("EventsSince"));

    members.create_user(user("lee", "pw")).await.unwrap();
    roles.create_role("admin").await.unwrap();
    roles.add_users_to_roles(&["lee"], &["admin"]).await.unwrap();
    profiles
        .set_properties("lee", false, BTreeMap::from([("theme".to_string(), json!("dark"))]))
        .await
        .unwrap();
    events
        .process_event(WebEvent::new("AuditSuccess", 4005, "lee logged in"))
        .await
        .unwrap();

    assert!(roles.is_user_in_role("lee", "admin").await.unwrap());
    let page = profiles.get_all_profiles(AuthenticationOption::Authenticated, 1, 5).await.unwrap();
    assert_eq!(page.profiles[0].properties["theme"], json!("dark"));
    assert_eq!(events.count().await.unwrap(), 1);

    // A second store on an open file is refused.
    assert!(matches!(
        RoleStore::open(&manager, "roles.db", "/"),
        Err(ProviderError::Store(quire_store::StoreError::AlreadyOpen { .. }))
    ));

    events.shutdown().await.unwrap();
    assert_eq!(manager.open_count(), 3);
}

#[tokio::test]
async fn wrong_alias_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let container = manager.open_container("x.db", "other").unwrap();
    assert!(matches!(
        EventStore::from_container(container),
        Err(ProviderError::InvalidArgument(_))
    ));
}
