//! Integration tests for the quire-store crate.
//!
//! These exercise the registry, the prepared query cache and the container
//! facade together against real container files on disk (via tempfile).

use std::sync::{Arc, Barrier};

use chrono::Utc;
use quire_store::{
    Bindings, Container, ContainerConfig, Document, Item, Manager, PageWindow, QueryOperation,
    StoreError, Value, ValueType,
};

const NS: &str = "urn:quire:test";

fn operations() -> Vec<QueryOperation> {
    vec![
        QueryOperation::builder(
            "GetUserByName",
            "SELECT name, content FROM users.documents
             WHERE namespace = $ns AND json_extract(content, '$.username') = $user",
        )
        .variable("user", ValueType::String)
        .namespace("", NS)
        .build(),
        QueryOperation::builder(
            "GetUsersByName",
            "SELECT name, content FROM users.documents
             WHERE namespace = $ns AND json_extract(content, '$.username') LIKE $pattern
             ORDER BY name LIMIT $end - $start + 1 OFFSET $start - 1",
        )
        .variable("pattern", ValueType::String)
        .variable("start", ValueType::Integer)
        .variable("end", ValueType::Integer)
        .namespace("", NS)
        .count_gated()
        .build(),
        QueryOperation::builder(
            "UpdateUserOnline",
            "UPDATE users.documents SET content = json_set(content, '$.last_activity', $at)
             WHERE json_extract(content, '$.username') = $user",
        )
        .variable("user", ValueType::String)
        .variable("at", ValueType::DateTime)
        .build(),
        QueryOperation::builder(
            "Broken",
            "SELECT name FROM users.no_such_table WHERE name = $user",
        )
        .variable("user", ValueType::String)
        .build(),
    ]
}

fn open_users(dir: &std::path::Path) -> (Manager, Container) {
    let manager = Manager::new(dir);
    manager.registry().ensure_all(operations()).unwrap();
    let users = manager.open_container("users.db", "users").unwrap();
    (manager, users)
}

fn user(name: &str) -> Document {
    Document::new(name, serde_json::json!({ "username": name })).in_namespace(NS)
}

fn seed(users: &Container, names: &[&str]) {
    users
        .with_sync(|c| {
            for name in names {
                c.put_document(&user(name))?;
            }
            Ok::<_, StoreError>(())
        })
        .unwrap();
}

fn online(users: &Container, name: &str) -> bool {
    users
        .get_document(name)
        .unwrap()
        .map(|d| d.content.get("last_activity").is_some())
        .unwrap_or(false)
}

// ═══════════════════════════════════════════════════════════════════════
//  Prepared query cache
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn get_user_by_name_returns_exactly_one_result() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["alice", "bob"]);

    let results: Vec<Item> = users
        .execute("GetUserByName", &Bindings::new().bind("user", "alice"))
        .unwrap()
        .collect();

    assert_eq!(results.len(), 1);
    match &results[0] {
        Item::Document(doc) => assert_eq!(doc.name, "alice"),
        other => panic!("expected a document, got {other:?}"),
    }
}

#[test]
fn prepare_twice_returns_the_same_handle() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());

    let first = users.prepare("GetUserByName").unwrap();
    let second = users.prepare("GetUserByName").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(users.cache_stats().compiles(), 1);
    assert_eq!(users.prepared_count(), 1);
}

#[test]
fn concurrent_first_use_compiles_once() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    let barrier = Barrier::new(8);

    let handles: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    users.prepare("GetUserByName").unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(users.cache_stats().compiles(), 1);
}

#[test]
fn missing_binding_fails_before_any_store_call() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());

    // `Broken` would fail to compile; the binding check must come first.
    let err = users.execute("Broken", &Bindings::new()).unwrap_err();
    assert!(matches!(err, StoreError::MissingBinding { .. }), "{err}");
    assert_eq!(users.cache_stats().compiles(), 0);
    assert_eq!(users.cache_stats().misses(), 0);
}

#[test]
fn unexpected_and_mistyped_bindings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());

    let err = users
        .execute(
            "GetUserByName",
            &Bindings::new().bind("user", "alice").bind("email", "a@b"),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::UnexpectedBinding { .. }));

    let err = users
        .execute(
            "UpdateUserOnline",
            &Bindings::new().bind("user", "alice").bind("at", "yesterday"),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::BindingType { .. }));
}

#[test]
fn valid_bindings_never_produce_binding_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["alice"]);

    for name in ["alice", "nobody", "", "o'brien", "%"] {
        let result = users.execute("GetUserByName", &Bindings::new().bind("user", name));
        match result {
            Ok(_) => {}
            Err(e) => assert!(!e.is_binding_error(), "{name}: {e}"),
        }
    }
}

#[test]
fn compile_errors_are_retried_on_every_call() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());

    for _ in 0..3 {
        let err = users
            .execute("Broken", &Bindings::new().bind("user", "x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Compile { .. }), "{err}");
    }
    assert_eq!(users.cache_stats().misses(), 3);
    assert_eq!(users.prepared_count(), 0);
}

#[test]
fn unknown_operation_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    let err = users.execute("Nope", &Bindings::new()).unwrap_err();
    assert!(matches!(err, StoreError::UnknownOperation { .. }));
}

#[test]
fn repeated_reads_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["alice", "alina", "bob"]);

    let bindings = PageWindow::new(1, 10).bind(Bindings::new().bind("pattern", "al%"));
    let first: Vec<Item> = users.execute("GetUsersByName", &bindings).unwrap().collect();
    let second: Vec<Item> = users.execute("GetUsersByName", &bindings).unwrap().collect();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(users.prepare("GetUsersByName").unwrap().executions(), 2);
}

#[test]
fn count_gated_operation_on_empty_container_skips_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());

    let bindings = PageWindow::new(1, 10).bind(Bindings::new().bind("pattern", "%"));
    let seq = users.execute("GetUsersByName", &bindings).unwrap();

    assert_eq!(seq.count(), 0);
    assert_eq!(users.count_documents().unwrap(), 0);
    assert_eq!(users.cache_stats().compiles(), 0);
    assert_eq!(users.prepared_count(), 0);
}

#[test]
fn first_page_is_the_same_for_index_zero_and_one() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["u1", "u2", "u3", "u4", "u5"]);

    let page = |index| -> Vec<String> {
        let bindings = PageWindow::new(index, 2).bind(Bindings::new().bind("pattern", "u%"));
        users
            .execute("GetUsersByName", &bindings)
            .unwrap()
            .documents()
            .map(|d| d.name)
            .collect()
    };

    assert_eq!(page(0), page(1));
    assert_eq!(page(1), vec!["u1", "u2"]);
    assert_eq!(page(2), vec!["u3", "u4"]);
    assert_eq!(page(3), vec!["u5"]);
}

#[test]
fn namespaces_scope_results() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    users
        .with_sync(|c| {
            c.put_document(&user("alice"))?;
            c.put_document(
                &Document::new("alice-other", serde_json::json!({"username": "alice"}))
                    .in_namespace("urn:elsewhere"),
            )
        })
        .unwrap();

    let found = users
        .execute("GetUserByName", &Bindings::new().bind("user", "alice"))
        .unwrap()
        .count();
    assert_eq!(found, 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Binding serialization
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn unserialized_bind_then_run_loses_the_first_binding() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["bob", "carol"]);

    let handle = users.prepare("UpdateUserOnline").unwrap();
    let now = Utc::now();

    // Two callers bind the shared handle before either runs it.
    users
        .bind(&handle, &Bindings::new().bind("user", "bob").bind("at", now))
        .unwrap();
    users
        .bind(&handle, &Bindings::new().bind("user", "carol").bind("at", now))
        .unwrap();
    users.run_prepared(&handle).unwrap();
    users.run_prepared(&handle).unwrap();

    assert!(online(&users, "carol"));
    assert!(!online(&users, "bob"), "bob's binding was overwritten");
}

#[test]
fn interleaved_threads_corrupt_unserialized_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["bob", "carol"]);
    let handle = users.prepare("UpdateUserOnline").unwrap();
    let step = Barrier::new(2);
    let now = Utc::now();

    std::thread::scope(|s| {
        s.spawn(|| {
            users
                .bind(&handle, &Bindings::new().bind("user", "bob").bind("at", now))
                .unwrap();
            step.wait();
            step.wait();
            let seq = users.run_prepared(&handle).unwrap();
            assert_eq!(seq.affected(), 1);
        });
        s.spawn(|| {
            step.wait();
            users
                .bind(&handle, &Bindings::new().bind("user", "carol").bind("at", now))
                .unwrap();
            step.wait();
        });
    });

    assert!(online(&users, "carol"));
    assert!(!online(&users, "bob"));
}

#[test]
fn serialized_execute_keeps_each_callers_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    let names: Vec<String> = (0..8).map(|i| format!("user{i}")).collect();
    seed(&users, &names.iter().map(String::as_str).collect::<Vec<_>>());

    std::thread::scope(|s| {
        for name in &names {
            let users = &users;
            s.spawn(move || {
                for _ in 0..25 {
                    let found: Vec<String> = users
                        .execute("GetUserByName", &Bindings::new().bind("user", name.as_str()))
                        .unwrap()
                        .documents()
                        .map(|d| d.name)
                        .collect();
                    assert_eq!(found, vec![name.clone()]);
                }
                users
                    .execute(
                        "UpdateUserOnline",
                        &Bindings::new().bind("user", name.as_str()).bind("at", Utc::now()),
                    )
                    .unwrap();
            });
        }
    });

    for name in &names {
        assert!(online(&users, name), "{name} was not updated");
    }
    assert_eq!(users.cache_stats().compiles(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
//  Container lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn missing_parent_directory_fails_without_creating_anything() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let missing = dir.path().join("no").join("such");

    let err = manager
        .open_container(missing.join("users.db"), "users")
        .unwrap_err();

    assert!(matches!(err, StoreError::PathNotFound { .. }), "{err}");
    assert!(!missing.exists());
    assert_eq!(manager.open_count(), 0);
}

#[test]
fn missing_file_without_create_is_path_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    let config = ContainerConfig {
        allow_create: false,
        ..ContainerConfig::default()
    };
    let err = manager
        .open_container_with("absent.db", "absent", config)
        .unwrap_err();
    assert!(matches!(err, StoreError::PathNotFound { .. }));
    assert!(!dir.path().join("absent.db").exists());
}

#[test]
fn exclusive_create_rejects_existing_container() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(dir.path());
    manager.open_container("x.db", "x").unwrap().close().unwrap();

    let config = ContainerConfig {
        exclusive_create: true,
        ..ContainerConfig::default()
    };
    let err = manager.open_container_with("x.db", "x", config).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[test]
fn read_only_containers_refuse_writes() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, users) = open_users(dir.path());
    seed(&users, &["alice"]);
    users.close().unwrap();

    let ro = manager
        .open_container_with("users.db", "users", ContainerConfig::read_only())
        .unwrap();
    assert_eq!(ro.count_documents().unwrap(), 1);

    let err = ro.put_document(&user("bob")).unwrap_err();
    assert!(matches!(err, StoreError::AccessDenied { .. }), "{err}");

    let err = ro
        .execute(
            "UpdateUserOnline",
            &Bindings::new().bind("user", "alice").bind("at", Utc::now()),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::AccessDenied { .. }), "{err}");
}

#[test]
fn synced_writes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, users) = open_users(dir.path());
    seed(&users, &["alice"]);
    users
        .put_document(&user("bob"))
        .unwrap();
    // Closing syncs the pending write.
    users.close().unwrap();

    let reopened = manager.open_container("users.db", "users").unwrap();
    assert_eq!(reopened.count_documents().unwrap(), 2);
    assert!(reopened.get_document("bob").unwrap().is_some());
}

#[test]
fn dropped_container_syncs_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, users) = open_users(dir.path());
    users.put_document(&user("carol")).unwrap();
    drop(users);

    assert_eq!(manager.open_count(), 0);
    let reopened = manager.open_container("users.db", "users").unwrap();
    assert!(reopened.get_document("carol").unwrap().is_some());
}

#[test]
fn handles_do_not_cross_containers() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, users) = open_users(dir.path());
    let other = manager.open_container("other.db", "users2").unwrap();

    let handle = users.prepare("GetUserByName").unwrap();
    let err = other.run_prepared(&handle).unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn ad_hoc_and_metadata_paths() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    seed(&users, &["alice", "bob"]);

    users
        .with_sync(|c| c.set_metadata("bob", "type_name", serde_json::json!("User")))
        .unwrap();
    assert_eq!(
        users.get_metadata("bob", "type_name").unwrap(),
        Some(serde_json::json!("User"))
    );

    let total = users
        .query_ad_hoc("SELECT count(*) FROM users.documents", &Bindings::new())
        .unwrap()
        .first_value();
    assert_eq!(total, Some(Value::Integer(2)));

    let all = users.all_documents().unwrap();
    assert_eq!(
        all.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        vec!["alice", "bob"]
    );
}

#[tokio::test]
async fn blocking_calls_run_off_the_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let (_m, users) = open_users(dir.path());
    let users = Arc::new(users);

    users
        .call(|c| c.with_sync(|c| c.put_document(&user("dave"))))
        .await
        .unwrap();
    let count = users.call(|c| c.count_documents()).await.unwrap();
    assert_eq!(count, 1);
}
