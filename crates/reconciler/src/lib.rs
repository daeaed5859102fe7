//! K8s-style reconciliation of declared users against a persistence backend.
//!
//! A [`ManagedResource`] declares a user (the spec) and carries what the
//! reconciler last observed (the status). Every trigger runs one pass:
//!
//! 1. Fetch the resource from the [`ResourceStore`]
//! 2. Ask the [`decision`] engine what to do, probing the
//!    [`PersistenceGateway`] when a recorded backend id must be confirmed
//! 3. Create the backend record if needed
//! 4. Write the status back with optimistic concurrency
//! 5. Tell the scheduler when to come back ([`Requeue`])
//!
//! Passes are level-triggered and idempotent: a crash, a duplicate trigger or
//! a stale read never causes a second backend record for a resource whose
//! backend id was recorded.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use userop_reconciler::{
//!     InMemoryPersistence, InMemoryResourceStore, ManagedResource, ReconcilerBuilder,
//!     ResourceKey, UserSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> userop_reconciler::Result<()> {
//!     let key = ResourceKey::named("u1");
//!     let store = Arc::new(InMemoryResourceStore::with_resources([
//!         ManagedResource::new(key.clone(), UserSpec::default()),
//!     ]));
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_resources(store)
//!         .with_persistence(InMemoryPersistence::new_arc())
//!         .build()?;
//!
//!     let requeue = reconciler.reconcile_once(&key).await?;
//!     println!("next: {requeue}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod decision;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use config::{ReadyProbePolicy, ReconcilerConfig};
pub use decision::{Action, ProbeOutcome, Transition, decide, probe_target};
pub use error::{Error, Result};
pub use gateway::{PersistenceGateway, ResourceStore};
pub use memory::{InMemoryPersistence, InMemoryResourceStore};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use types::{
    BackendId, ManagedResource, NewUserRecord, Requeue, ResourceKey, ResourceState,
    ResourceStatus, UserRecord, UserSpec,
};
