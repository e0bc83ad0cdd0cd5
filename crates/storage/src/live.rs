//! Live Reading Cache
//!
//! Latest telemetry payload per sensor under `sensor:{id}:data`.
//! Writes are last-write-wins; there is no versioning.

use crate::model::{Reading, SensorId};
use crate::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Key holding the live reading for `sensor_id`
pub fn reading_key(sensor_id: SensorId) -> String {
    format!("sensor:{}:data", sensor_id)
}

/// Serialize a reading to its stored form
pub(crate) fn encode(reading: &Reading) -> Result<String, StorageError> {
    serde_json::to_string(reading).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Parse a stored value. A value that is not a JSON object is corrupt.
pub(crate) fn decode(raw: &[u8]) -> Result<Reading, StorageError> {
    serde_json::from_slice(raw).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Key-value store of the most recent reading per sensor
#[async_trait]
pub trait LiveCache: Send + Sync {
    /// Overwrite the reading for `sensor_id`
    async fn set(&self, sensor_id: SensorId, reading: &Reading) -> Result<(), StorageError>;

    /// The last written reading, `None` if never written.
    /// An unparseable value is `StorageError::SerializationError`.
    async fn get(&self, sensor_id: SensorId) -> Result<Option<Reading>, StorageError>;

    /// Remove the reading. Succeeds when there is none.
    async fn delete(&self, sensor_id: SensorId) -> Result<(), StorageError>;
}

/// In-process cache holding serialized values, keyed like the real store
pub struct MemoryLiveCache {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryLiveCache {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Store a raw value under `key`, bypassing serialization
    pub fn insert_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Whether a value exists under `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.lock().map(|v| v.contains_key(key)).unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.values
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }
}

impl Default for MemoryLiveCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveCache for MemoryLiveCache {
    async fn set(&self, sensor_id: SensorId, reading: &Reading) -> Result<(), StorageError> {
        let value = encode(reading)?;
        self.lock()?.insert(reading_key(sensor_id), value);
        Ok(())
    }

    async fn get(&self, sensor_id: SensorId) -> Result<Option<Reading>, StorageError> {
        let raw = self.lock()?.get(&reading_key(sensor_id)).cloned();
        raw.map(|v| decode(v.as_bytes())).transpose()
    }

    async fn delete(&self, sensor_id: SensorId) -> Result<(), StorageError> {
        self.lock()?.remove(&reading_key(sensor_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn reading(value: serde_json::Value) -> Reading {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_key_shape() {
        assert_eq!(reading_key(1), "sensor:1:data");
        assert_eq!(reading_key(-4), "sensor:-4:data");
    }

    proptest! {
        #[test]
        fn prop_key_round_trips_id(id in any::<i64>()) {
            let key = reading_key(id);
            let inner = key.strip_prefix("sensor:").and_then(|k| k.strip_suffix(":data"));
            prop_assert_eq!(inner.and_then(|s| s.parse::<i64>().ok()), Some(id));
        }
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = MemoryLiveCache::new();
        cache.set(1, &reading(json!({"temperature": 20.5, "humidity": 40}))).await.unwrap();
        cache.set(1, &reading(json!({"temperature": 21.0}))).await.unwrap();

        let got = cache.get(1).await.unwrap().unwrap();
        assert_eq!(got, reading(json!({"temperature": 21.0})));
    }

    #[tokio::test]
    async fn test_absent_vs_corrupt() {
        let cache = MemoryLiveCache::new();
        assert!(cache.get(5).await.unwrap().is_none());

        cache.insert_raw(&reading_key(5), "{not json").unwrap();
        assert!(matches!(cache.get(5).await, Err(StorageError::SerializationError(_))));

        cache.insert_raw(&reading_key(5), "[1, 2]").unwrap();
        assert!(matches!(cache.get(5).await, Err(StorageError::SerializationError(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = MemoryLiveCache::new();
        cache.set(2, &reading(json!({"x": 1}))).await.unwrap();

        cache.delete(2).await.unwrap();
        cache.delete(2).await.unwrap();
        assert!(!cache.contains_key(&reading_key(2)));
    }
}
