//! Multi-pass and multi-resource scenarios for the reconciler.
//!
//! These drive `reconcile_once` the way a scheduler would: redelivering
//! triggers, interleaving resources, and injecting crashes between the create
//! and the status write.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]

use std::sync::Arc;
use std::time::Duration;

use userop_reconciler::{
    BackendId, InMemoryPersistence, InMemoryResourceStore, ManagedResource, NewUserRecord,
    Reconciler, ReconcilerConfig, Requeue, ResourceKey, ResourceState, ResourceStatus, UserRecord,
    UserSpec,
};

fn spec(n: usize) -> UserSpec {
    UserSpec {
        first_name: format!("First{n}"),
        last_name: format!("Last{n}"),
        age: 20 + u32::try_from(n % 50).unwrap(),
        address: format!("{n} Main St"),
        email: format!("user{n}@example.com"),
    }
}

fn key(n: usize) -> ResourceKey {
    ResourceKey::new("team-a", format!("user-{n}"))
}

/// Run passes until the reconciler stops asking for an immediate requeue.
async fn converge(reconciler: &Reconciler, key: &ResourceKey) -> Requeue {
    for _ in 0..10 {
        match reconciler.reconcile_once(key).await {
            Ok(Requeue::Immediately) | Err(_) => continue,
            Ok(other) => return other,
        }
    }
    panic!("{key} did not converge within 10 passes");
}

/// Given many resources reconciled concurrently
/// When every resource converges
/// Then each owns exactly one backend record
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resources_each_get_one_record() {
    let count = 32;
    let store = Arc::new(InMemoryResourceStore::with_resources(
        (0..count).map(|n| ManagedResource::new(key(n), spec(n))),
    ));
    let backend = InMemoryPersistence::new_arc();
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        backend.clone(),
        ReconcilerConfig::default(),
    ));

    let handles: Vec<_> = (0..count)
        .map(|n| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { converge(&reconciler, &key(n)).await })
        })
        .collect();

    for handle in handles {
        assert!(matches!(handle.await.unwrap(), Requeue::After(_)));
    }

    assert_eq!(backend.len().await, count);
    for n in 0..count {
        assert_eq!(backend.count_owned_by(&key(n)).await, 1);
        let status = store.status(&key(n)).await.unwrap();
        assert_eq!(status.state, ResourceState::Ready);
    }
}

/// Given a converged resource
/// When the same trigger is redelivered many times
/// Then no further create happens
#[tokio::test]
async fn redelivered_triggers_do_not_duplicate() {
    let store = Arc::new(InMemoryResourceStore::with_resources([ManagedResource::new(
        key(1),
        spec(1),
    )]));
    let backend = InMemoryPersistence::new_arc();
    let reconciler = Reconciler::new(store.clone(), backend.clone(), ReconcilerConfig::default());

    converge(&reconciler, &key(1)).await;
    for _ in 0..20 {
        reconciler.reconcile_once(&key(1)).await.unwrap();
    }

    assert_eq!(backend.create_calls(), 1);
    assert_eq!(backend.len().await, 1);
}

/// Given a crash after the record was created and its id recorded, but
/// before the ready state was observed
/// When the trigger is redelivered
/// Then the recorded record is adopted instead of duplicated
#[tokio::test]
async fn crash_after_persist_is_recovered_by_probe() {
    let resource = ManagedResource::new(key(7), spec(7));
    let record = NewUserRecord::from_resource(&resource);
    let store = Arc::new(InMemoryResourceStore::with_resources([resource.with_status(
        ResourceStatus::new(ResourceState::Creating, Some(BackendId::from("abc"))),
    )]));
    let backend = InMemoryPersistence::new_arc();
    backend
        .seed(UserRecord::from_new(BackendId::from("abc"), record))
        .await;
    let reconciler = Reconciler::new(store.clone(), backend.clone(), ReconcilerConfig::default());

    let outcome = converge(&reconciler, &key(7)).await;

    assert_eq!(outcome, Requeue::After(Duration::from_secs(15)));
    assert_eq!(backend.create_calls(), 0);
    assert_eq!(backend.count_owned_by(&key(7)).await, 1);
}

/// Given a backend that fails several creates in a row
/// When the scheduler keeps retrying
/// Then the resource eventually becomes ready with a single record
#[tokio::test]
async fn retries_forever_until_backend_recovers() {
    let store = Arc::new(InMemoryResourceStore::with_resources([ManagedResource::new(
        key(3),
        spec(3),
    )]));
    let backend = InMemoryPersistence::new_arc();
    backend.fail_next_creates(3).await;
    let reconciler = Reconciler::new(store.clone(), backend.clone(), ReconcilerConfig::default());

    for _ in 0..3 {
        assert!(reconciler.reconcile_once(&key(3)).await.is_err());
        assert_eq!(
            store.status(&key(3)).await.map(|s| s.state),
            Some(ResourceState::Failed)
        );
    }

    converge(&reconciler, &key(3)).await;
    assert_eq!(backend.create_calls(), 4);
    assert_eq!(backend.len().await, 1);
}

/// Given a spec update racing with every status write for a while
/// When the scheduler honours immediate requeues
/// Then the resource still converges with one record
#[tokio::test]
async fn racing_writers_eventually_yield() {
    let store = Arc::new(InMemoryResourceStore::with_resources([ManagedResource::new(
        key(5),
        spec(5),
    )]));
    let backend = InMemoryPersistence::new_arc();
    store.conflict_next_updates(2).await;
    let reconciler = Reconciler::new(store.clone(), backend.clone(), ReconcilerConfig::default());

    converge(&reconciler, &key(5)).await;

    assert_eq!(backend.len().await, 1);
    assert_eq!(
        store.status(&key(5)).await.map(|s| s.state),
        Some(ResourceState::Ready)
    );
}
