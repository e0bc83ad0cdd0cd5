//! Storage Layer
//!
//! Adapters for the three stores a sensor record is split across:
//! - Identity store (relational, sqlx): canonical id and name
//! - Device catalog (document store): descriptor and location, proximity queries
//! - Live reading cache (key-value): latest telemetry payload per sensor
//!
//! Adapters never call each other. Composition lives in the `coordinator` crate.

mod catalog;
mod geo;
mod identity;
mod live;
mod model;
mod mongo;
mod redis_cache;

pub use catalog::{DeviceCatalog, MemoryCatalog};
pub use geo::{haversine_distance_m, EARTH_RADIUS_M};
pub use identity::{IdentityStore, SqlIdentityStore};
pub use live::{reading_key, LiveCache, MemoryLiveCache};
pub use model::{CatalogEntry, DeviceDescriptor, GeoPoint, Reading, Sensor, SensorId};
pub use mongo::{MongoCatalog, DEFAULT_COLLECTION, DEFAULT_DATABASE};
pub use redis_cache::RedisLiveCache;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Store call timed out after {0}ms")]
    Timeout(u64),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}
