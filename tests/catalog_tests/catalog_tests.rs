//! Tests for the database/table catalog
//!
//! These tests verify:
//! - Database create/delete/rename/list and their error kinds
//! - Table create/open/delete/rename/list
//! - Open table handles follow renames and fail after deletes
//! - Names that are not single path components are rejected

use std::sync::Arc;

use serde_json::json;
use tablekv::config::{Config, SyncStrategy};
use tablekv::table::TableOptions;
use tablekv::{Entity, Key, KeyType, Record, Store, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, Store) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .root_dir(temp.path().join("root"))
        .sync_strategy(SyncStrategy::EveryWrite)
        .build();
    let store = Store::open(config).unwrap();
    (temp, store)
}

fn person(id: i64, name: &str) -> Record {
    json!({"id": id, "name": name}).as_object().unwrap().clone()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

fn is_not_found(err: &StoreError, expected: Entity) -> bool {
    matches!(err, StoreError::NotFound { entity, .. } if *entity == expected)
}

fn is_already_exists(err: &StoreError, expected: Entity) -> bool {
    matches!(err, StoreError::AlreadyExists { entity, .. } if *entity == expected)
}

// =============================================================================
// Database Tests
// =============================================================================

#[test]
fn test_open_creates_root() {
    let (temp, store) = setup_store();
    assert!(temp.path().join("root").is_dir());
    assert_eq!(store.root(), temp.path().join("root"));
    assert!(store.list_databases().unwrap().is_empty());
}

#[test]
fn test_create_and_list_databases() {
    let (_temp, store) = setup_store();
    store.create_database("zeta").unwrap();
    store.create_database("alpha").unwrap();

    assert_eq!(store.list_databases().unwrap(), vec!["alpha", "zeta"]);
    assert!(store.database_exists("alpha"));
    assert!(!store.database_exists("beta"));
}

#[test]
fn test_create_database_twice() {
    let (_temp, store) = setup_store();
    store.create_database("app").unwrap();

    let err = store.create_database("app").unwrap_err();
    assert!(is_already_exists(&err, Entity::Database));
}

#[test]
fn test_delete_database_removes_tables() {
    let (temp, store) = setup_store();
    store.create_database("app").unwrap();
    store.create_table("app", "users", KeyType::Integer).unwrap();

    store.delete_database("app").unwrap();

    assert!(!temp.path().join("root").join("app").exists());
    assert!(store.list_databases().unwrap().is_empty());
    assert!(is_not_found(
        &store.delete_database("app").unwrap_err(),
        Entity::Database
    ));
}

#[test]
fn test_rename_database() {
    let (_temp, store) = setup_store();
    store.create_database("old").unwrap();
    store.create_database("taken").unwrap();
    let users = store.create_table("old", "users", KeyType::Integer).unwrap();
    users.insert(&Key::Int(1), person(1, "John")).unwrap();

    assert!(is_already_exists(
        &store.rename_database("old", "taken").unwrap_err(),
        Entity::Database
    ));
    assert!(is_not_found(
        &store.rename_database("missing", "x").unwrap_err(),
        Entity::Database
    ));

    store.rename_database("old", "new").unwrap();

    assert_eq!(store.list_databases().unwrap(), vec!["new", "taken"]);
    assert!(is_not_found(
        &store.open_table("old", "users").unwrap_err(),
        Entity::Database
    ));

    // The handle opened before the rename keeps working, at the new location
    users.insert(&Key::Int(2), person(2, "Ann")).unwrap();
    let reopened = store.open_table("new", "users").unwrap();
    assert!(Arc::ptr_eq(&users, &reopened));
    assert_eq!(reopened.len(), 2);
    assert!(users.dir().ends_with("new/users"));
}

#[test]
fn test_renamed_database_reopens_from_disk() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    {
        let store = Store::open_path(&root).unwrap();
        store.create_database("a").unwrap();
        let t = store.create_table("a", "t", KeyType::String).unwrap();
        t.insert(&Key::from("k"), json!({"v": 1}).as_object().unwrap().clone())
            .unwrap();
        store.rename_database("a", "b").unwrap();
        t.insert(&Key::from("k2"), json!({"v": 2}).as_object().unwrap().clone())
            .unwrap();
    }

    let store = Store::open_path(&root).unwrap();
    let t = store.open_table("b", "t").unwrap();
    assert_eq!(t.len(), 2);
    assert_eq!(t.get(&Key::from("k2")).unwrap()["v"], json!(2));
}

// =============================================================================
// Table Tests
// =============================================================================

#[test]
fn test_create_table_requires_database() {
    let (_temp, store) = setup_store();
    let err = store
        .create_table("nope", "users", KeyType::Integer)
        .unwrap_err();
    assert!(is_not_found(&err, Entity::Database));
}

#[test]
fn test_create_table_twice() {
    let (_temp, store) = setup_store();
    store.create_database("app").unwrap();
    store.create_table("app", "users", KeyType::Integer).unwrap();

    let err = store
        .create_table("app", "users", KeyType::String)
        .unwrap_err();
    assert!(is_already_exists(&err, Entity::Table));
}

#[test]
fn test_list_tables() {
    let (_temp, store) = setup_store();
    store.create_database("app").unwrap();
    store.create_table("app", "users", KeyType::Integer).unwrap();
    store.create_table("app", "orders", KeyType::String).unwrap();

    // Enumeration order is platform-defined
    assert_eq!(
        sorted(store.list_tables("app").unwrap()),
        vec!["orders", "users"]
    );
    assert!(is_not_found(
        &store.list_tables("ghost").unwrap_err(),
        Entity::Database
    ));
}

#[test]
fn test_open_table_shares_handle() {
    let (_temp, store) = setup_store();
    store.create_database("app").unwrap();
    let created = store.create_table("app", "users", KeyType::Integer).unwrap();

    let a = store.open_table("app", "users").unwrap();
    let b = store.open_table("app", "users").unwrap();

    assert!(Arc::ptr_eq(&created, &a));
    assert!(Arc::ptr_eq(&a, &b));
    assert!(is_not_found(
        &store.open_table("app", "ghost").unwrap_err(),
        Entity::Table
    ));
}

#[test]
fn test_open_table_from_disk() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    {
        let store = Store::open_path(&root).unwrap();
        store.create_database("app").unwrap();
        let options = TableOptions::new(KeyType::String).key_field("code");
        let t = store.create_table_with("app", "items", options).unwrap();
        t.insert(&Key::from("A1"), json!({"qty": 3}).as_object().unwrap().clone())
            .unwrap();
    }

    let store = Store::open_path(&root).unwrap();
    let t = store.open_table("app", "items").unwrap();
    assert_eq!(t.key_type(), KeyType::String);
    assert_eq!(t.key_field(), "code");
    assert_eq!(t.get(&Key::from("A1")).unwrap()["code"], json!("A1"));
}

#[test]
fn test_delete_table_invalidates_handle() {
    let (temp, store) = setup_store();
    store.create_database("app").unwrap();
    let users = store.create_table("app", "users", KeyType::Integer).unwrap();
    users.insert(&Key::Int(1), person(1, "John")).unwrap();

    store.delete_table("app", "users").unwrap();

    assert!(!temp.path().join("root/app/users").exists());
    assert!(is_not_found(
        &users.get(&Key::Int(1)).unwrap_err(),
        Entity::Table
    ));
    assert!(is_not_found(
        &store.delete_table("app", "users").unwrap_err(),
        Entity::Table
    ));

    // The name is free again
    let fresh = store.create_table("app", "users", KeyType::Integer).unwrap();
    assert!(fresh.is_empty());
}

#[test]
fn test_rename_table() {
    let (_temp, store) = setup_store();
    store.create_database("app").unwrap();
    let users = store.create_table("app", "users", KeyType::Integer).unwrap();
    store.create_table("app", "taken", KeyType::Integer).unwrap();
    users.insert(&Key::Int(1), person(1, "John")).unwrap();

    assert!(is_already_exists(
        &store.rename_table("app", "users", "taken").unwrap_err(),
        Entity::Table
    ));

    store.rename_table("app", "users", "people").unwrap();

    assert_eq!(users.name(), "people");
    assert_eq!(
        sorted(store.list_tables("app").unwrap()),
        vec!["people", "taken"]
    );
    assert!(is_not_found(
        &store.open_table("app", "users").unwrap_err(),
        Entity::Table
    ));

    // Same in-memory index under the new name
    let people = store.open_table("app", "people").unwrap();
    assert!(Arc::ptr_eq(&users, &people));
    people.insert(&Key::Int(2), person(2, "Ann")).unwrap();
    assert_eq!(people.len(), 2);
}

#[test]
fn test_rename_unopened_table() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    {
        let store = Store::open_path(&root).unwrap();
        store.create_database("app").unwrap();
        let t = store.create_table("app", "a", KeyType::Integer).unwrap();
        t.insert(&Key::Int(1), person(1, "x")).unwrap();
    }

    let store = Store::open_path(&root).unwrap();
    store.rename_table("app", "a", "b").unwrap();
    let t = store.open_table("app", "b").unwrap();
    assert_eq!(t.name(), "b");
    assert_eq!(t.len(), 1);
}

#[test]
fn test_compaction_after_rename_writes_to_new_directory() {
    let (temp, store) = setup_store();
    store.create_database("app").unwrap();
    let t = store.create_table("app", "a", KeyType::Integer).unwrap();
    t.insert(&Key::Int(1), person(1, "x")).unwrap();
    t.update(&Key::Int(1), person(1, "y")).unwrap();

    store.rename_table("app", "a", "b").unwrap();
    t.compact().unwrap();

    let dir = temp.path().join("root/app/b");
    let logs = std::fs::read_dir(&dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .map_or(false, |x| x == "log")
        })
        .count();
    assert!(logs >= 1);
    assert_eq!(t.get(&Key::Int(1)).unwrap()["name"], "y");
}

// =============================================================================
// Name Validation Tests
// =============================================================================

#[test]
fn test_invalid_names_rejected() {
    let (_temp, store) = setup_store();

    for bad in ["", "..", "a/b"] {
        assert!(matches!(
            store.create_database(bad),
            Err(StoreError::InvalidName(_))
        ));
    }

    store.create_database("app").unwrap();
    assert!(matches!(
        store.create_table("app", "../escape", KeyType::Integer),
        Err(StoreError::InvalidName(_))
    ));
    assert!(matches!(
        store.rename_database("app", "x/y"),
        Err(StoreError::InvalidName(_))
    ));
}
