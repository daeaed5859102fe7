//! End-to-end checks of the SurrealDB gateway, alone and behind the reconciler.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]

use std::sync::Arc;
use std::time::Duration;

use userop_persistence::{StoreConfig, SurrealPersistence};
use userop_reconciler::{
    BackendId, InMemoryResourceStore, ManagedResource, NewUserRecord, PersistenceGateway,
    Reconciler, ReconcilerConfig, Requeue, ResourceKey, ResourceState, ResourceStatus, UserSpec,
};

fn mike() -> UserSpec {
    UserSpec {
        first_name: "Mike".to_string(),
        last_name: "Davidson".to_string(),
        age: 34,
        address: "Here St, 1234".to_string(),
        email: "mike@x.com".to_string(),
    }
}

fn record(owner: ResourceKey) -> NewUserRecord {
    NewUserRecord::from_resource(&ManagedResource::new(owner, mike()))
}

async fn owners(store: &SurrealPersistence) -> Vec<String> {
    store
        .db()
        .query("SELECT VALUE owner FROM users")
        .await
        .unwrap()
        .take(0)
        .unwrap()
}

/// Given a fresh database
/// When a user is created and read back
/// Then every field survives the roundtrip
#[tokio::test]
async fn create_then_get_roundtrips() {
    let store = SurrealPersistence::in_memory().await.unwrap();
    let owner = ResourceKey::new("team-a", "mike");

    let id = store.create(&record(owner.clone())).await.unwrap();
    let stored = store.get(&id).await.unwrap().expect("record should exist");

    assert_eq!(stored.id, id);
    assert_eq!(stored.owner, owner);
    assert_eq!(stored.first_name, "Mike");
    assert_eq!(stored.last_name, "Davidson");
    assert_eq!(stored.age, 34);
    assert_eq!(stored.address, "Here St, 1234");
    assert_eq!(stored.email, "mike@x.com");
}

/// Given an id the backend never issued
/// When it is looked up
/// Then the record is reported absent, not as an error
#[tokio::test]
async fn unknown_id_is_absent() {
    let store = SurrealPersistence::in_memory().await.unwrap();
    let found = store.get(&BackendId::from("doesnotexist")).await.unwrap();
    assert!(found.is_none());
}

/// Given a user already created for an owner
/// When create is repeated for the same owner
/// Then the existing id comes back and no second row is written
#[tokio::test]
async fn repeated_create_for_owner_returns_existing_id() {
    let store = SurrealPersistence::in_memory().await.unwrap();
    let owner = ResourceKey::named("mike");

    let first = store.create(&record(owner.clone())).await.unwrap();
    let second = store.create(&record(owner)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(owners(&store).await, vec!["default/mike".to_string()]);
}

/// Given two different owners
/// When both are created
/// Then each gets its own id
#[tokio::test]
async fn distinct_owners_get_distinct_ids() {
    let store = SurrealPersistence::in_memory().await.unwrap();

    let a = store.create(&record(ResourceKey::named("a"))).await.unwrap();
    let b = store.create(&record(ResourceKey::named("b"))).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(owners(&store).await.len(), 2);
}

/// Given an embedded on-disk database
/// When a user is created
/// Then it can be read back from the same store
#[tokio::test]
async fn rocksdb_store_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let store = SurrealPersistence::connect(StoreConfig::rocksdb(dir.path().join("users")))
        .await
        .unwrap();
    store.init_schema().await.unwrap();

    let id = store.create(&record(ResourceKey::named("mike"))).await.unwrap();
    let stored = store.get(&id).await.unwrap();
    assert_eq!(stored.map(|r| r.first_name), Some("Mike".to_string()));
}

/// Given a declared user and the SurrealDB backend
/// When the reconciler runs until it stops asking for an immediate requeue
/// Then the resource is ready with the backend's id and one row exists
#[tokio::test]
async fn reconciler_converges_against_surrealdb() {
    let key = ResourceKey::named("mike");
    let resources = Arc::new(InMemoryResourceStore::with_resources([ManagedResource::new(
        key.clone(),
        mike(),
    )]));
    let backend = Arc::new(SurrealPersistence::in_memory().await.unwrap());
    let reconciler = Reconciler::new(resources.clone(), backend.clone(), ReconcilerConfig::default());

    let mut outcome = reconciler.reconcile_once(&key).await.unwrap();
    for _ in 0..5 {
        if outcome != Requeue::Immediately {
            break;
        }
        outcome = reconciler.reconcile_once(&key).await.unwrap();
    }

    assert_eq!(outcome, Requeue::After(Duration::from_secs(15)));
    let status = resources.status(&key).await.unwrap();
    assert_eq!(status.state, ResourceState::Ready);
    let id = status.backend_id.unwrap();
    assert!(backend.get(&id).await.unwrap().is_some());

    for _ in 0..3 {
        reconciler.reconcile_once(&key).await.unwrap();
    }
    assert_eq!(owners(&backend).await.len(), 1);
}

/// Given a row created for a resource whose ready status write was lost
/// When the resource is reconciled again from CREATING without an id
/// Then the existing row is recorded instead of a duplicate
#[tokio::test]
async fn lost_status_write_does_not_duplicate() {
    let key = ResourceKey::named("mike");
    let backend = Arc::new(SurrealPersistence::in_memory().await.unwrap());
    let existing = backend.create(&record(key.clone())).await.unwrap();

    let resources = Arc::new(InMemoryResourceStore::with_resources([ManagedResource::new(
        key.clone(),
        mike(),
    )
    .with_status(ResourceStatus::new(ResourceState::Creating, None))]));
    let reconciler = Reconciler::new(resources.clone(), backend.clone(), ReconcilerConfig::default());

    reconciler.reconcile_once(&key).await.unwrap();

    let status = resources.status(&key).await.unwrap();
    assert_eq!(status.state, ResourceState::Ready);
    assert_eq!(status.backend_id, Some(existing));
    assert_eq!(owners(&backend).await.len(), 1);
}
