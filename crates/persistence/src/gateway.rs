//! `PersistenceGateway` over the SurrealDB `users` table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::{debug, info};

use userop_reconciler::{BackendId, NewUserRecord, PersistenceGateway, ResourceKey, UserRecord};

use crate::client::SurrealPersistence;
use crate::error::{DbError, DbResult, from_surrealdb_error};

const TABLE: &str = "users";

/// Row written on create.
#[derive(Debug, Clone, Serialize)]
struct UserRow {
    owner: String,
    first_name: String,
    last_name: String,
    age: i64,
    address: String,
    email: String,
}

impl From<&NewUserRecord> for UserRow {
    fn from(record: &NewUserRecord) -> Self {
        Self {
            owner: record.owner.to_string(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            age: i64::from(record.age),
            address: record.address.clone(),
            email: record.email.clone(),
        }
    }
}

/// Row read back, with the backend-assigned record id.
#[derive(Debug, Clone, Deserialize)]
struct StoredUser {
    id: Thing,
    owner: String,
    first_name: String,
    last_name: String,
    age: i64,
    address: String,
    email: String,
}

impl StoredUser {
    fn backend_id(&self) -> BackendId {
        BackendId::new(self.id.id.to_raw())
    }

    fn into_record(self) -> DbResult<UserRecord> {
        let id = self.backend_id();
        let age = u32::try_from(self.age)
            .map_err(|_| DbError::corrupt_record(id.as_str(), format!("age {}", self.age)))?;

        Ok(UserRecord {
            owner: parse_owner(&self.owner),
            first_name: self.first_name,
            last_name: self.last_name,
            age,
            address: self.address,
            email: self.email,
            id,
        })
    }
}

/// Parse the `namespace/name` form written by `ResourceKey`'s `Display`.
fn parse_owner(owner: &str) -> ResourceKey {
    owner
        .split_once('/')
        .map_or_else(|| ResourceKey::named(owner), |(ns, name)| ResourceKey::new(ns, name))
}

impl SurrealPersistence {
    /// Insert a row and return its backend id.
    ///
    /// A second create for the same owner trips the unique owner index; the
    /// already stored row's id is returned instead of a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or the fallback lookup fails.
    pub async fn insert_user(&self, record: &NewUserRecord) -> DbResult<BackendId> {
        let row = UserRow::from(record);
        // Index violations may surface on the response or on the statement.
        let created: DbResult<Option<StoredUser>> = match self
            .db()
            .query("CREATE type::table($table) CONTENT $record")
            .bind(("table", TABLE))
            .bind(("record", row))
            .await
        {
            Ok(mut response) => response.take(0),
            Err(e) => Err(e),
        }
        .map_err(from_surrealdb_error);

        match created {
            Ok(Some(stored)) => {
                let id = stored.backend_id();
                info!(owner = %record.owner, backend_id = %id, "Created user record");
                Ok(id)
            }
            Ok(None) => Err(DbError::query_failed("create returned no record")),
            Err(DbError::AlreadyExists { .. }) => {
                let existing = self
                    .find_by_owner(&record.owner)
                    .await?
                    .ok_or_else(|| DbError::query_failed("owner index hit without a row"))?;
                let id = existing.backend_id();
                info!(owner = %record.owner, backend_id = %id, "Reusing existing user record");
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a row by backend id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row cannot be mapped.
    pub async fn find_user(&self, id: &BackendId) -> DbResult<Option<UserRecord>> {
        let stored: Option<StoredUser> = self
            .db()
            .select((TABLE, id.as_str()))
            .await
            .map_err(from_surrealdb_error)?;

        debug!(backend_id = %id, found = stored.is_some(), "Looked up user record");
        stored.map(StoredUser::into_record).transpose()
    }

    async fn find_by_owner(&self, owner: &ResourceKey) -> DbResult<Option<StoredUser>> {
        let mut rows: Vec<StoredUser> = self
            .db()
            .query("SELECT * FROM type::table($table) WHERE owner = $owner LIMIT 1")
            .bind(("table", TABLE))
            .bind(("owner", owner.to_string()))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        Ok(rows.pop())
    }
}

#[async_trait]
impl PersistenceGateway for SurrealPersistence {
    async fn create(&self, record: &NewUserRecord) -> userop_reconciler::Result<BackendId> {
        self.insert_user(record)
            .await
            .map_err(|e| e.into_backend("create"))
    }

    async fn get(&self, id: &BackendId) -> userop_reconciler::Result<Option<UserRecord>> {
        self.find_user(id).await.map_err(|e| e.into_backend("get"))
    }
}
