//! Identity Store
//!
//! Canonical sensor identity in a relational store. This is the only store
//! that answers "does this sensor exist".

use crate::model::{Sensor, SensorId};
use crate::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

/// Relational store of sensor identities
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up by primary key
    async fn get(&self, id: SensorId) -> Result<Option<Sensor>, StorageError>;

    /// Look up by name. Names are not unique; the first match wins.
    async fn get_by_name(&self, name: &str) -> Result<Option<Sensor>, StorageError>;

    /// Paginated enumeration in id order
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Sensor>, StorageError>;

    /// Insert and commit a new row, returning it with its assigned id
    async fn create(&self, name: &str) -> Result<Sensor, StorageError>;

    /// Remove a row, returning its prior value. `NotFound` if absent.
    async fn delete(&self, id: SensorId) -> Result<Sensor, StorageError>;
}

/// sqlx-backed identity store
#[derive(Clone)]
pub struct SqlIdentityStore {
    pool: SqlitePool,
}

impl SqlIdentityStore {
    /// Connect a pool to `url` (e.g. `sqlite://sensors.db?mode=rwc`)
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!("Connecting identity store: {}", url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. One connection, since every SQLite
    /// memory connection opens its own database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sensors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_sensors_name ON sensors (name)")
            .execute(&self.pool)
            .await?;

        debug!("Identity schema ready");
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for SqlIdentityStore {
    async fn get(&self, id: SensorId) -> Result<Option<Sensor>, StorageError> {
        let sensor = sqlx::query_as::<_, Sensor>("SELECT id, name FROM sensors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sensor)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Sensor>, StorageError> {
        let sensor = sqlx::query_as::<_, Sensor>(
            "SELECT id, name FROM sensors WHERE name = ? ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sensor)
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Sensor>, StorageError> {
        let sensors = sqlx::query_as::<_, Sensor>(
            "SELECT id, name FROM sensors ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(sensors)
    }

    async fn create(&self, name: &str) -> Result<Sensor, StorageError> {
        // Autocommit: the row is durable once this returns
        let sensor = sqlx::query_as::<_, Sensor>(
            "INSERT INTO sensors (name) VALUES (?) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        debug!("Created identity {} ({})", sensor.id, sensor.name);
        Ok(sensor)
    }

    async fn delete(&self, id: SensorId) -> Result<Sensor, StorageError> {
        let sensor = sqlx::query_as::<_, Sensor>(
            "DELETE FROM sensors WHERE id = ? RETURNING id, name",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;

        debug!("Deleted identity {}", id);
        Ok(sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let store = SqlIdentityStore::in_memory().await.unwrap();

        let a = store.create("alpha").await.unwrap();
        let b = store.create("beta").await.unwrap();

        assert_eq!(a.name, "alpha");
        assert!(b.id > a.id);
        assert_eq!(store.get(a.id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = SqlIdentityStore::in_memory().await.unwrap();
        assert_eq!(store.get(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_by_name_returns_first() {
        let store = SqlIdentityStore::in_memory().await.unwrap();
        let first = store.create("dup").await.unwrap();
        store.create("dup").await.unwrap();

        assert_eq!(store.get_by_name("dup").await.unwrap(), Some(first));
        assert_eq!(store.get_by_name("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_pages() {
        let store = SqlIdentityStore::in_memory().await.unwrap();
        for i in 0..5 {
            store.create(&format!("s{}", i)).await.unwrap();
        }

        let page = store.list(1, 2).await.unwrap();
        let names: Vec<_> = page.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s1", "s2"]);
        assert!(store.list(10, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_prior_value() {
        let store = SqlIdentityStore::in_memory().await.unwrap();
        let sensor = store.create("gone").await.unwrap();

        let deleted = store.delete(sensor.id).await.unwrap();
        assert_eq!(deleted, sensor);
        assert_eq!(store.get(sensor.id).await.unwrap(), None);
        assert!(matches!(store.delete(sensor.id).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = SqlIdentityStore::in_memory().await.unwrap();
        store.create("kept").await.unwrap();
        store.migrate().await.unwrap();
        assert_eq!(store.list(0, 10).await.unwrap().len(), 1);
    }
}
