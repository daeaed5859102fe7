//! SurrealDB connection management for the users table.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use tracing::{debug, info};

use crate::error::{DbError, DbResult, from_surrealdb_error};

/// Connection settings for the users database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL (e.g. "mem://", "rocksdb://data/users", "ws://localhost:8000")
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Optional root credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Root credentials for authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl StoreConfig {
    /// In-memory database, for tests and dry runs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "userop".to_string(),
            database: "users".to_string(),
            credentials: None,
        }
    }

    /// Embedded RocksDB database stored at `path`.
    #[must_use]
    pub fn rocksdb(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            url: format!("rocksdb://{}", path.as_ref().display()),
            ..Self::in_memory()
        }
    }

    /// Remote server over WebSocket.
    #[must_use]
    pub fn websocket(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
            ..Self::in_memory()
        }
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Persistence backend storing one `users` row per declared user.
///
/// Cheap to clone; clones share the connection.
#[derive(Debug, Clone)]
pub struct SurrealPersistence {
    db: Arc<Surreal<Any>>,
}

impl SurrealPersistence {
    /// Connect, authenticate if credentials are set, and select the
    /// namespace and database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or authentication fails.
    pub async fn connect(config: StoreConfig) -> DbResult<Self> {
        let db = Surreal::<Any>::init();

        db.connect(config.url.as_str())
            .await
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| DbError::connection_failed(e.to_string()))?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(from_surrealdb_error)?;

        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connected to users database"
        );

        Ok(Self { db: Arc::new(db) })
    }

    /// Connect to a fresh in-memory database with the schema applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema definition fails.
    pub async fn in_memory() -> DbResult<Self> {
        let store = Self::connect(StoreConfig::in_memory()).await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// Underlying database client.
    #[must_use]
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Define the `users` table, its fields and the unique owner index.
    ///
    /// Idempotent: every definition uses `IF NOT EXISTS`.
    ///
    /// # Errors
    ///
    /// Returns an error if any definition is rejected.
    pub async fn init_schema(&self) -> DbResult<()> {
        let schema = include_str!("schema.surql");

        self.db
            .query(schema)
            .await
            .map_err(|e| DbError::schema_failed(e.to_string()))?
            .check()
            .map_err(|e| DbError::schema_failed(e.to_string()))?;

        debug!("Users schema applied");
        Ok(())
    }

    /// Check that the database answers queries.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub async fn health_check(&self) -> DbResult<()> {
        self.db
            .query("INFO FOR DB")
            .await
            .map_err(from_surrealdb_error)?
            .check()
            .map_err(from_surrealdb_error)?;

        Ok(())
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

    #[test]
    fn test_store_config_in_memory() {
        let config = StoreConfig::in_memory();
        assert_eq!(config.url, "mem://");
        assert_eq!(config.namespace, "userop");
        assert_eq!(config.database, "users");
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_store_config_websocket() {
        let config = StoreConfig::websocket("localhost", 8000);
        assert_eq!(config.url, "ws://localhost:8000");
        assert_eq!(config.namespace, "userop");
    }

    #[test]
    fn test_store_config_with_credentials() {
        let config = StoreConfig::in_memory()
            .with_credentials("root", "secret")
            .with_namespace("ops")
            .with_database("prod");

        let creds = config.credentials.unwrap();
        assert_eq!(creds.username, "root");
        assert_eq!(creds.password, "secret");
        assert_eq!(config.namespace, "ops");
        assert_eq!(config.database, "prod");
    }

    #[test]
    fn test_store_config_partial_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"url": "ws://db:8000"}"#).unwrap();
        assert_eq!(config.url, "ws://db:8000");
        assert_eq!(config.namespace, "userop");
        assert_eq!(config.database, "users");
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let store = SurrealPersistence::connect(StoreConfig::in_memory()).await;
        assert!(store.is_ok(), "should connect to in-memory database");
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let store = SurrealPersistence::in_memory().await.unwrap();
        assert!(store.init_schema().await.is_ok());
        assert!(store.health_check().await.is_ok());
    }
}
