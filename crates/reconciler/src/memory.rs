//! In-memory gateways for tests and local runs.
//!
//! Both stores count calls and accept injected faults so tests can replay
//! crashes, stale reads and backend outages deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::gateway::{PersistenceGateway, ResourceStore};
use crate::types::{
    BackendId, ManagedResource, NewUserRecord, ResourceKey, ResourceStatus, UserRecord,
};

#[derive(Debug, Default)]
struct PersistenceFaults {
    fail_creates: usize,
    fail_gets: usize,
    next_ids: VecDeque<BackendId>,
}

/// In-memory persistence backend.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    records: RwLock<HashMap<BackendId, UserRecord>>,
    faults: Mutex<PersistenceFaults>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl InMemoryPersistence {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Use `id` for the next successful create instead of a generated one.
    pub async fn queue_id(&self, id: impl Into<BackendId>) {
        self.faults.lock().await.next_ids.push_back(id.into());
    }

    /// Fail the next `count` creates.
    pub async fn fail_next_creates(&self, count: usize) {
        self.faults.lock().await.fail_creates = count;
    }

    /// Fail the next `count` gets.
    pub async fn fail_next_gets(&self, count: usize) {
        self.faults.lock().await.fail_gets = count;
    }

    /// Insert a record directly, bypassing create.
    pub async fn seed(&self, record: UserRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Remove a record out of band.
    pub async fn delete(&self, id: &BackendId) -> Option<UserRecord> {
        self.records.write().await.remove(id)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Number of stored records owned by `owner`.
    pub async fn count_owned_by(&self, owner: &ResourceKey) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| &r.owner == owner)
            .count()
    }

    /// Number of create calls, including failed ones.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of get calls, including failed ones.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPersistence {
    async fn create(&self, record: &NewUserRecord) -> Result<BackendId> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let id = {
            let mut faults = self.faults.lock().await;
            if faults.fail_creates > 0 {
                faults.fail_creates = faults.fail_creates.saturating_sub(1);
                return Err(Error::backend("create", "injected failure"));
            }
            faults
                .next_ids
                .pop_front()
                .unwrap_or_else(|| BackendId::new(Ulid::new().to_string().to_lowercase()))
        };

        let stored = UserRecord::from_new(id.clone(), record.clone());
        self.records.write().await.insert(id.clone(), stored);
        Ok(id)
    }

    async fn get(&self, id: &BackendId) -> Result<Option<UserRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut faults = self.faults.lock().await;
            if faults.fail_gets > 0 {
                faults.fail_gets = faults.fail_gets.saturating_sub(1);
                return Err(Error::backend("get", "injected failure"));
            }
        }

        Ok(self.records.read().await.get(id).cloned())
    }
}

#[derive(Debug, Default)]
struct StoreFaults {
    conflict_updates: usize,
    fail_gets: usize,
}

/// In-memory resource store with optimistic concurrency on status writes.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    resources: RwLock<BTreeMap<ResourceKey, ManagedResource>>,
    faults: Mutex<StoreFaults>,
    update_calls: AtomicUsize,
}

impl InMemoryResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create a store holding `resources`.
    pub fn with_resources(resources: impl IntoIterator<Item = ManagedResource>) -> Self {
        let map = resources
            .into_iter()
            .map(|r| (r.key.clone(), r))
            .collect();
        Self {
            resources: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Delete a resource.
    pub async fn remove(&self, key: &ResourceKey) -> Option<ManagedResource> {
        self.resources.write().await.remove(key)
    }

    /// Bump the version of a resource, as a concurrent writer would.
    pub async fn touch(&self, key: &ResourceKey) {
        if let Some(resource) = self.resources.write().await.get_mut(key) {
            resource.resource_version = resource.resource_version.saturating_add(1);
        }
    }

    /// Make the next `count` status writes lose a race with another writer.
    pub async fn conflict_next_updates(&self, count: usize) {
        self.faults.lock().await.conflict_updates = count;
    }

    /// Fail the next `count` gets.
    pub async fn fail_next_gets(&self, count: usize) {
        self.faults.lock().await.fail_gets = count;
    }

    /// Current status of a resource.
    pub async fn status(&self, key: &ResourceKey) -> Option<ResourceStatus> {
        self.resources
            .read()
            .await
            .get(key)
            .map(|r| r.status.clone())
    }

    /// All resources ordered by key.
    pub async fn snapshot(&self) -> Vec<ManagedResource> {
        self.resources.read().await.values().cloned().collect()
    }

    /// Number of status writes attempted, including rejected ones.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ManagedResource>> {
        {
            let mut faults = self.faults.lock().await;
            if faults.fail_gets > 0 {
                faults.fail_gets = faults.fail_gets.saturating_sub(1);
                return Err(Error::backend("get_resource", "injected failure"));
            }
        }

        Ok(self.resources.read().await.get(key).cloned())
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        expected_version: u64,
        status: ResourceStatus,
    ) -> Result<u64> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let inject_conflict = {
            let mut faults = self.faults.lock().await;
            let hit = faults.conflict_updates > 0;
            if hit {
                faults.conflict_updates = faults.conflict_updates.saturating_sub(1);
            }
            hit
        };

        let mut resources = self.resources.write().await;
        let resource = resources
            .get_mut(key)
            .ok_or_else(|| Error::resource_not_found(key.to_string()))?;

        if inject_conflict {
            resource.resource_version = resource.resource_version.saturating_add(1);
        }

        if resource.resource_version != expected_version {
            return Err(Error::version_conflict(
                key.to_string(),
                expected_version,
                resource.resource_version,
            ));
        }

        resource.status = status;
        resource.resource_version = resource.resource_version.saturating_add(1);
        Ok(resource.resource_version)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]
mod tests {
    use super::*;
    use crate::types::{ResourceState, UserSpec};

    fn record(owner: &str) -> NewUserRecord {
        NewUserRecord {
            owner: ResourceKey::named(owner),
            first_name: "Mike".to_string(),
            last_name: "Davidson".to_string(),
            age: 34,
            address: "Here St, 1234".to_string(),
            email: "mike@x.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let backend = InMemoryPersistence::new();
        let id = backend.create(&record("u1")).await.unwrap();

        let stored = backend.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.first_name, "Mike");
        assert_eq!(backend.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_queued_id_is_used_once() {
        let backend = InMemoryPersistence::new();
        backend.queue_id("abc").await;

        assert_eq!(backend.create(&record("u1")).await.unwrap(), BackendId::from("abc"));
        assert_ne!(backend.create(&record("u2")).await.unwrap(), BackendId::from("abc"));
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let backend = InMemoryPersistence::new();
        backend.fail_next_creates(1).await;

        assert!(backend.create(&record("u1")).await.is_err());
        assert!(backend.create(&record("u1")).await.is_ok());
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_id_is_absent() {
        let backend = InMemoryPersistence::new();
        assert!(backend.get(&BackendId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_bumps_version() {
        let key = ResourceKey::named("u1");
        let store = InMemoryResourceStore::with_resources([ManagedResource::new(
            key.clone(),
            UserSpec::default(),
        )]);

        let status = ResourceStatus::new(ResourceState::Creating, None);
        let version = store.update_status(&key, 0, status.clone()).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.status(&key).await, Some(status));
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let key = ResourceKey::named("u1");
        let store = InMemoryResourceStore::with_resources([ManagedResource::new(
            key.clone(),
            UserSpec::default(),
        )]);
        store.touch(&key).await;

        let result = store.update_status(&key, 0, ResourceStatus::unset()).await;
        assert!(matches!(
            result,
            Err(Error::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_update_on_deleted_resource() {
        let store = InMemoryResourceStore::new();
        let result = store
            .update_status(&ResourceKey::named("gone"), 0, ResourceStatus::unset())
            .await;
        assert!(matches!(result, Err(Error::ResourceNotFound { .. })));
    }
}
