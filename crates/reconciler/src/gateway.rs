//! Seams to the two external collaborators: the persistence backend and the
//! control plane's resource store.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BackendId, ManagedResource, NewUserRecord, ResourceKey, ResourceStatus, UserRecord};

/// Trait for persistence backends holding user records.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create a record and return the backend-generated id.
    async fn create(&self, record: &NewUserRecord) -> Result<BackendId>;

    /// Get a record by id, or `None` if the backend has no such record.
    async fn get(&self, id: &BackendId) -> Result<Option<UserRecord>>;
}

/// Trait for the control plane's resource store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a resource, or `None` if it no longer exists.
    async fn get(&self, key: &ResourceKey) -> Result<Option<ManagedResource>>;

    /// Replace the status if the stored version still equals `expected_version`.
    ///
    /// Returns the new resource version. Fails with
    /// [`Error::VersionConflict`](crate::Error::VersionConflict) on a stale
    /// version and [`Error::ResourceNotFound`](crate::Error::ResourceNotFound)
    /// if the resource was deleted.
    async fn update_status(
        &self,
        key: &ResourceKey,
        expected_version: u64,
        status: ResourceStatus,
    ) -> Result<u64>;
}
