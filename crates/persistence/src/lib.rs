//! SurrealDB persistence for the userop reconciler.
//!
//! [`SurrealPersistence`] stores one row per declared user in the `users`
//! table and implements [`userop_reconciler::PersistenceGateway`]. A unique
//! index on the owning resource key means a create repeated after a lost
//! status write returns the existing record instead of a duplicate.
//!
//! Any SurrealDB engine URL works: `mem://` for tests, `rocksdb://path` for an
//! embedded store, `ws://host:port` for a server.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod error;
pub mod gateway;

pub use client::{Credentials, StoreConfig, SurrealPersistence};
pub use error::{DbError, DbResult};
