//! Reconciler implementation.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ReadyProbePolicy, ReconcilerConfig};
use crate::decision::{self, Action, ProbeOutcome, Transition};
use crate::error::{Error, Result};
use crate::gateway::{PersistenceGateway, ResourceStore};
use crate::types::{
    BackendId, ManagedResource, NewUserRecord, Requeue, ResourceKey, ResourceState,
    ResourceStatus,
};

/// Outcome of an optimistic status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Committed(u64),
    Conflicted,
    Vanished,
}

impl Written {
    /// Directive for the scheduler, given what to do if the write committed.
    const fn requeue(self, on_commit: Requeue) -> Requeue {
        match self {
            Self::Committed(_) => on_commit,
            Self::Conflicted => Requeue::Immediately,
            Self::Vanished => Requeue::Never,
        }
    }
}

/// K8s-style reconciler for declared users.
///
/// Holds no per-resource state: every pass re-reads the resource and derives
/// its next step from the status and the backend alone, so passes for
/// different resources can run concurrently.
pub struct Reconciler {
    /// Control plane resource store.
    resources: Arc<dyn ResourceStore>,
    /// Persistence backend.
    persistence: Arc<dyn PersistenceGateway>,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        persistence: Arc<dyn PersistenceGateway>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            resources,
            persistence,
            config,
        }
    }

    /// Run one reconciliation pass for `key`.
    ///
    /// # Errors
    ///
    /// Returns transient backend errors (including timeouts) from fetching the
    /// resource, from writing its status, and from a failed create. The
    /// scheduler is expected to retry those with backoff.
    pub async fn reconcile_once(&self, key: &ResourceKey) -> Result<Requeue> {
        self.reconcile_at(key, Utc::now())
            .instrument(info_span!("reconcile", resource = %key))
            .await
    }

    async fn reconcile_at(&self, key: &ResourceKey, now: DateTime<Utc>) -> Result<Requeue> {
        let Some(resource) = self.bounded("get_resource", self.resources.get(key)).await? else {
            info!("Unable to fetch resource (might have been deleted)");
            return Ok(Requeue::Never);
        };

        let policy = self.config.ready_probe;
        let probe = match decision::probe_target(&resource.status, policy, now) {
            Some(id) => Some(self.probe(id).await),
            None => None,
        };

        let action = decision::decide(&resource.status, probe, policy);
        debug!(
            state = %resource.status.state,
            version = resource.resource_version,
            probe = ?probe,
            action = ?action,
            "Decided"
        );

        match action {
            Action::NoOp => {
                info!(
                    idle_secs = self.config.idle_interval.as_secs(),
                    "Nothing to reconcile"
                );
                Ok(self.idle())
            }
            Action::Adopt => {
                info!(
                    backend_id = ?resource.status.backend_id,
                    "Backend record already exists, marking ready"
                );
                let next = resource.status.apply(Transition::Adopted);
                let written = self
                    .commit(&resource.key, resource.resource_version, next)
                    .await?;
                Ok(written.requeue(Requeue::Immediately))
            }
            Action::Verify => {
                let next = resource.status.apply(Transition::Verified(now));
                let written = self
                    .commit(&resource.key, resource.resource_version, next)
                    .await?;
                Ok(written.requeue(self.idle()))
            }
            Action::Drifted => {
                warn!(
                    backend_id = ?resource.status.backend_id,
                    "Backend record of ready resource is gone, restarting creation"
                );
                let next = resource.status.apply(Transition::Drifted);
                let written = self
                    .commit(&resource.key, resource.resource_version, next)
                    .await?;
                Ok(written.requeue(Requeue::Immediately))
            }
            Action::Create => self.create(&resource).await,
        }
    }

    /// Persist a new backend record and record its id.
    async fn create(&self, resource: &ManagedResource) -> Result<Requeue> {
        let key = &resource.key;
        let mut status = resource.status.clone();
        let mut version = resource.resource_version;

        if status.state != ResourceState::Creating {
            let next = status.apply(Transition::BeginCreate);
            match self.commit(key, version, next.clone()).await? {
                Written::Committed(v) => {
                    version = v;
                    status = next;
                }
                other => return Ok(other.requeue(Requeue::Immediately)),
            }
        }

        info!(spec = ?resource.spec, "Reconciling user");
        let record = NewUserRecord::from_resource(resource);

        match self.bounded("create", self.persistence.create(&record)).await {
            Ok(id) => {
                info!(backend_id = %id, "User persisted");
                let written = self
                    .commit(key, version, status.apply(Transition::Persisted(id.clone())))
                    .await?;
                if written == Written::Conflicted {
                    warn!(
                        backend_id = %id,
                        "Persisted record was not recorded in status"
                    );
                }
                Ok(written.requeue(Requeue::Immediately))
            }
            Err(e) => {
                error!(error = %e, "Unable to add user in backend");
                // Best effort: the create error is what the caller retries on.
                if let Err(write_err) = self
                    .commit(key, version, status.apply(Transition::PersistFailed))
                    .await
                {
                    error!(error = %write_err, "Unable to record failed state");
                }
                Err(e)
            }
        }
    }

    /// Check whether the backend still holds `id`.
    async fn probe(&self, id: &BackendId) -> ProbeOutcome {
        match self.bounded("get", self.persistence.get(id)).await {
            Ok(Some(_)) => ProbeOutcome::Exists,
            Ok(None) => {
                info!(backend_id = %id, "Recorded backend record not found");
                ProbeOutcome::Absent
            }
            Err(e) => {
                warn!(
                    backend_id = %id,
                    error = %e,
                    "Unable to read user from backend, treating as absent"
                );
                ProbeOutcome::Ambiguous
            }
        }
    }

    /// Write a status with optimistic concurrency.
    ///
    /// Lost races and deletions are not errors: the caller drops its decision
    /// and lets the next pass re-read.
    async fn commit(
        &self,
        key: &ResourceKey,
        expected_version: u64,
        status: ResourceStatus,
    ) -> Result<Written> {
        let state = status.state;
        let result = self
            .bounded(
                "update_status",
                self.resources.update_status(key, expected_version, status),
            )
            .await;

        match result {
            Ok(version) => {
                debug!(state = %state, version, "Status written");
                Ok(Written::Committed(version))
            }
            Err(Error::VersionConflict {
                expected, actual, ..
            }) => {
                info!(expected, actual, "Status write lost a race, requeueing");
                Ok(Written::Conflicted)
            }
            Err(Error::ResourceNotFound { .. }) => {
                info!("Resource deleted during reconciliation");
                Ok(Written::Vanished)
            }
            Err(e) => {
                error!(error = %e, "Unable to update resource status");
                Err(e)
            }
        }
    }

    /// Bound a gateway call by the configured timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.config.call_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                Err(Error::timeout(operation, timeout_ms))
            }
        }
    }

    const fn idle(&self) -> Requeue {
        Requeue::After(self.config.idle_interval)
    }
}

/// Builder for Reconciler.
#[derive(Default)]
pub struct ReconcilerBuilder {
    resources: Option<Arc<dyn ResourceStore>>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource store.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn ResourceStore>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Set the persistence backend.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the ready re-probe policy.
    #[must_use]
    pub fn ready_probe(mut self, policy: ReadyProbePolicy) -> Self {
        self.config.ready_probe = policy;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a gateway is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let resources = self
            .resources
            .ok_or_else(|| Error::invalid_config("Resource store is required"))?;
        let persistence = self
            .persistence
            .ok_or_else(|| Error::invalid_config("Persistence gateway is required"))?;
        self.config.validate()?;

        Ok(Reconciler::new(resources, persistence, self.config))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::memory::{InMemoryPersistence, InMemoryResourceStore};
    use crate::types::{UserRecord, UserSpec};

    fn mike() -> UserSpec {
        UserSpec {
            first_name: "Mike".to_string(),
            last_name: "Davidson".to_string(),
            age: 34,
            address: "Here St, 1234".to_string(),
            email: "mike@x.com".to_string(),
        }
    }

    fn u1() -> ResourceKey {
        ResourceKey::named("u1")
    }

    fn setup(
        status: ResourceStatus,
        config: ReconcilerConfig,
    ) -> (Reconciler, Arc<InMemoryResourceStore>, Arc<InMemoryPersistence>) {
        let store = Arc::new(InMemoryResourceStore::with_resources([
            ManagedResource::new(u1(), mike()).with_status(status),
        ]));
        let backend = InMemoryPersistence::new_arc();
        let reconciler = Reconciler::new(store.clone(), backend.clone(), config);
        (reconciler, store, backend)
    }

    fn stored_record(id: &str) -> UserRecord {
        let resource = ManagedResource::new(u1(), mike());
        UserRecord::from_new(BackendId::from(id), NewUserRecord::from_resource(&resource))
    }

    /// Given the Mike Davidson resource with an unset status
    /// When two passes run
    /// Then the first creates "abc" and marks ready, the second does nothing
    #[tokio::test]
    async fn fresh_resource_is_created_then_left_alone() {
        let (reconciler, store, backend) =
            setup(ResourceStatus::unset(), ReconcilerConfig::default());
        backend.queue_id("abc").await;

        let first = reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(first, Requeue::Immediately);
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(
            store.status(&u1()).await,
            Some(ResourceStatus::new(
                ResourceState::Ready,
                Some(BackendId::from("abc"))
            ))
        );

        let stored = backend.get(&BackendId::from("abc")).await.unwrap().unwrap();
        assert_eq!(stored.first_name, "Mike");
        assert_eq!(stored.email, "mike@x.com");

        let second = reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(second, Requeue::After(Duration::from_secs(15)));
        assert_eq!(backend.create_calls(), 1);
    }

    /// Given a ready resource with an existing record
    /// When many passes run
    /// Then no second record is ever created
    #[tokio::test]
    async fn ready_resource_is_idempotent() {
        let status = ResourceStatus::new(ResourceState::Ready, Some(BackendId::from("abc")));
        let (reconciler, _, backend) = setup(status, ReconcilerConfig::default());
        backend.seed(stored_record("abc")).await;

        for _ in 0..5 {
            let requeue = reconciler.reconcile_once(&u1()).await.unwrap();
            assert!(matches!(requeue, Requeue::After(_)));
        }

        assert_eq!(backend.create_calls(), 0);
        assert_eq!(backend.len().await, 1);
    }

    /// Given a creating resource whose recorded record exists
    /// When a pass runs
    /// Then it becomes ready without calling create
    #[tokio::test]
    async fn interrupted_create_is_adopted() {
        let status = ResourceStatus::new(ResourceState::Creating, Some(BackendId::from("abc")));
        let (reconciler, store, backend) = setup(status, ReconcilerConfig::default());
        backend.seed(stored_record("abc")).await;

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Immediately);
        assert_eq!(backend.create_calls(), 0);
        assert_eq!(backend.get_calls(), 1);
        let status = store.status(&u1()).await.unwrap();
        assert_eq!(status.state, ResourceState::Ready);
        assert_eq!(status.backend_id, Some(BackendId::from("abc")));
    }

    /// Given a failed resource whose recorded record is gone
    /// When a pass runs
    /// Then a new record is created
    #[tokio::test]
    async fn missing_recorded_record_is_recreated() {
        let status = ResourceStatus::new(ResourceState::Failed, Some(BackendId::from("old")));
        let (reconciler, store, backend) = setup(status, ReconcilerConfig::default());
        backend.queue_id("new").await;

        reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(backend.create_calls(), 1);
        let status = store.status(&u1()).await.unwrap();
        assert_eq!(status.state, ResourceState::Ready);
        assert_eq!(status.backend_id, Some(BackendId::from("new")));
    }

    /// Given a creating resource with an id and a failing probe
    /// When a pass runs
    /// Then the ambiguous probe is treated as absent and create is called
    #[tokio::test]
    async fn ambiguous_probe_creates() {
        let status = ResourceStatus::new(ResourceState::Creating, Some(BackendId::from("abc")));
        let (reconciler, _, backend) = setup(status, ReconcilerConfig::default());
        backend.seed(stored_record("abc")).await;
        backend.fail_next_gets(1).await;

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Immediately);
        assert_eq!(backend.create_calls(), 1);
    }

    /// Given a backend that rejects the create
    /// When a pass runs
    /// Then the status is FAILED and the error is returned
    /// And the following pass retries the create
    #[tokio::test]
    async fn failing_create_is_contained_and_retried() {
        let (reconciler, store, backend) =
            setup(ResourceStatus::unset(), ReconcilerConfig::default());
        backend.fail_next_creates(1).await;

        let result = reconciler.reconcile_once(&u1()).await;
        assert!(matches!(result, Err(Error::Backend { .. })));
        assert_eq!(
            store.status(&u1()).await.map(|s| s.state),
            Some(ResourceState::Failed)
        );

        let retry = reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(retry, Requeue::Immediately);
        assert_eq!(backend.create_calls(), 2);
        assert_eq!(
            store.status(&u1()).await.map(|s| s.state),
            Some(ResourceState::Ready)
        );
    }

    /// Given a resource that was deleted
    /// When a pass runs
    /// Then no error and no requeue are returned
    #[tokio::test]
    async fn deleted_resource_is_not_requeued() {
        let (reconciler, store, backend) =
            setup(ResourceStatus::unset(), ReconcilerConfig::default());
        store.remove(&u1()).await;

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Never);
        assert_eq!(backend.create_calls(), 0);
    }

    /// Given a resource store that cannot be reached
    /// When a pass runs
    /// Then the fetch error propagates
    #[tokio::test]
    async fn fetch_failure_propagates() {
        let (reconciler, store, _) = setup(ResourceStatus::unset(), ReconcilerConfig::default());
        store.fail_next_gets(1).await;

        let result = reconciler.reconcile_once(&u1()).await;
        assert!(result.is_err_and(|e| e.is_transient()));
    }

    /// Given a concurrent writer that wins the intent write
    /// When a pass runs
    /// Then create is never called and an immediate requeue is returned
    #[tokio::test]
    async fn conflict_before_create_aborts_pass() {
        let (reconciler, store, backend) =
            setup(ResourceStatus::unset(), ReconcilerConfig::default());
        store.conflict_next_updates(1).await;

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Immediately);
        assert_eq!(backend.create_calls(), 0);
        assert_eq!(store.update_calls(), 1);
        assert_eq!(
            store.status(&u1()).await.map(|s| s.state),
            Some(ResourceState::Unset)
        );
    }

    /// Given a creating resource whose ready write loses a race
    /// When a pass runs
    /// Then the write is not retried blindly
    #[tokio::test]
    async fn conflict_after_create_requeues_immediately() {
        let status = ResourceStatus::new(ResourceState::Creating, None);
        let (reconciler, store, backend) = setup(status, ReconcilerConfig::default());
        store.conflict_next_updates(1).await;

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Immediately);
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(store.update_calls(), 1);
    }

    /// Given a converged resource under every-pass probing
    /// When its backend record is deleted out of band
    /// Then the next passes mark it creating, recreate the record, and settle
    #[tokio::test]
    async fn drift_is_detected_and_repaired() {
        let config = ReconcilerConfig::default().ready_probe(ReadyProbePolicy::EveryPass);
        let (reconciler, store, backend) = setup(ResourceStatus::unset(), config);

        assert_eq!(reconciler.reconcile_once(&u1()).await.unwrap(), Requeue::Immediately);
        assert_eq!(
            reconciler.reconcile_once(&u1()).await.unwrap(),
            Requeue::After(Duration::from_secs(15))
        );
        let old_id = store.status(&u1()).await.unwrap().backend_id.unwrap();

        assert!(backend.delete(&old_id).await.is_some());

        let detected = reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(detected, Requeue::Immediately);
        let status = store.status(&u1()).await.unwrap();
        assert_eq!(status.state, ResourceState::Creating);
        assert_eq!(status.backend_id.as_ref(), Some(&old_id));

        let recreated = reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(recreated, Requeue::Immediately);

        let settled = reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(settled, Requeue::After(Duration::from_secs(15)));

        let status = store.status(&u1()).await.unwrap();
        assert_eq!(status.state, ResourceState::Ready);
        assert_ne!(status.backend_id, Some(old_id));
        assert_eq!(backend.count_owned_by(&u1()).await, 1);
        assert_eq!(backend.create_calls(), 2);
    }

    /// Given a ready resource under periodic probing
    /// When a pass confirms the record
    /// Then the verification time is written and the next pass skips the probe
    #[tokio::test]
    async fn periodic_probe_records_verification() {
        let status = ResourceStatus::new(ResourceState::Ready, Some(BackendId::from("abc")));
        let config = ReconcilerConfig::default()
            .ready_probe(ReadyProbePolicy::Every(Duration::from_secs(3600)));
        let (reconciler, store, backend) = setup(status, config);
        backend.seed(stored_record("abc")).await;

        reconciler.reconcile_once(&u1()).await.unwrap();
        assert!(store.status(&u1()).await.unwrap().last_verified.is_some());
        assert_eq!(backend.get_calls(), 1);

        reconciler.reconcile_once(&u1()).await.unwrap();
        assert_eq!(backend.get_calls(), 1);
    }

    struct StalledBackend;

    #[async_trait]
    impl PersistenceGateway for StalledBackend {
        async fn create(&self, _record: &NewUserRecord) -> Result<BackendId> {
            std::future::pending().await
        }

        async fn get(&self, _id: &BackendId) -> Result<Option<UserRecord>> {
            std::future::pending().await
        }
    }

    /// Given a backend that never answers
    /// When a pass runs
    /// Then it fails with a timeout and marks the resource FAILED
    #[tokio::test]
    async fn stalled_backend_times_out() {
        let store = Arc::new(InMemoryResourceStore::with_resources([
            ManagedResource::new(u1(), mike()),
        ]));
        let config = ReconcilerConfig::default().call_timeout(Duration::from_millis(20));
        let reconciler = Reconciler::new(store.clone(), Arc::new(StalledBackend), config);

        let result = reconciler.reconcile_once(&u1()).await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(
            store.status(&u1()).await.map(|s| s.state),
            Some(ResourceState::Failed)
        );
    }

    /// Resource store whose resource disappears before any status write lands.
    struct VanishingStore {
        resource: ManagedResource,
    }

    #[async_trait]
    impl ResourceStore for VanishingStore {
        async fn get(&self, _key: &ResourceKey) -> Result<Option<ManagedResource>> {
            Ok(Some(self.resource.clone()))
        }

        async fn update_status(
            &self,
            key: &ResourceKey,
            _expected_version: u64,
            _status: ResourceStatus,
        ) -> Result<u64> {
            Err(Error::resource_not_found(key.to_string()))
        }
    }

    /// Given a resource deleted between the fetch and the intent write
    /// When a pass runs
    /// Then it stops without requeue and never calls create
    #[tokio::test]
    async fn resource_deleted_before_status_write_is_not_requeued() {
        let store = Arc::new(VanishingStore {
            resource: ManagedResource::new(u1(), mike()),
        });
        let backend = InMemoryPersistence::new_arc();
        let reconciler = Reconciler::new(store, backend.clone(), ReconcilerConfig::default());

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Never);
        assert_eq!(backend.create_calls(), 0);
    }

    /// Given a creating resource deleted while its record was being created
    /// When the ready write is rejected as not found
    /// Then the pass stops without requeue
    #[tokio::test]
    async fn resource_deleted_after_create_is_not_requeued() {
        let store = Arc::new(VanishingStore {
            resource: ManagedResource::new(u1(), mike())
                .with_status(ResourceStatus::new(ResourceState::Creating, None)),
        });
        let backend = InMemoryPersistence::new_arc();
        let reconciler = Reconciler::new(store, backend.clone(), ReconcilerConfig::default());

        let requeue = reconciler.reconcile_once(&u1()).await.unwrap();

        assert_eq!(requeue, Requeue::Never);
        assert_eq!(backend.create_calls(), 1);
    }

    #[test]
    fn test_builder() {
        let result = ReconcilerBuilder::new()
            .with_resources(InMemoryResourceStore::new_arc())
            .with_persistence(InMemoryPersistence::new_arc())
            .ready_probe(ReadyProbePolicy::EveryPass)
            .build();

        assert!(result.is_ok());
        assert_eq!(
            result.ok().map(|r| r.config.ready_probe),
            Some(ReadyProbePolicy::EveryPass)
        );
    }

    #[test]
    fn test_builder_requires_gateways() {
        let result = ReconcilerBuilder::new()
            .with_resources(InMemoryResourceStore::new_arc())
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
