//! Device Catalog
//!
//! Per-sensor descriptor and location documents with proximity search.

use crate::geo::haversine_distance_m;
use crate::model::{CatalogEntry, DeviceDescriptor, SensorId};
use crate::StorageError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Geospatial document store of device descriptors
#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    /// Store the entry for `sensor_id`, replacing any previous one.
    /// Location is written as `[longitude, latitude]`.
    async fn upsert_descriptor(
        &self,
        sensor_id: SensorId,
        descriptor: &DeviceDescriptor,
        longitude: f64,
        latitude: f64,
    ) -> Result<(), StorageError>;

    /// Idempotently create the spatial index on `location`
    async fn ensure_geo_index(&self) -> Result<(), StorageError>;

    /// Entries within `radius_m` meters of the point, nearest first
    async fn find_near(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> Result<Vec<CatalogEntry>, StorageError>;

    /// The entry for one sensor, if any
    async fn find_by_sensor_id(&self, sensor_id: SensorId) -> Result<Option<CatalogEntry>, StorageError>;

    /// Remove the entry for `sensor_id`. Succeeds when there is none.
    async fn delete_by_sensor_id(&self, sensor_id: SensorId) -> Result<(), StorageError>;
}

/// In-process catalog with spherical distance search
pub struct MemoryCatalog {
    entries: Mutex<Vec<CatalogEntry>>,
    index_calls: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            index_calls: AtomicUsize::new(0),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `ensure_geo_index` was called
    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<CatalogEntry>>, StorageError> {
        self.entries
            .lock()
            .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceCatalog for MemoryCatalog {
    async fn upsert_descriptor(
        &self,
        sensor_id: SensorId,
        descriptor: &DeviceDescriptor,
        longitude: f64,
        latitude: f64,
    ) -> Result<(), StorageError> {
        let entry = CatalogEntry::new(sensor_id, descriptor.clone(), longitude, latitude);
        let mut entries = self.lock()?;

        match entries.iter_mut().find(|e| e.id_sensor == sensor_id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn ensure_geo_index(&self) -> Result<(), StorageError> {
        self.index_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn find_near(
        &self,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> Result<Vec<CatalogEntry>, StorageError> {
        let entries = self.lock()?;

        let mut hits: Vec<(f64, CatalogEntry)> = entries
            .iter()
            .map(|e| {
                let d = haversine_distance_m(
                    (longitude, latitude),
                    (e.location.longitude(), e.location.latitude()),
                );
                (d, e)
            })
            .filter(|(d, _)| *d <= radius_m)
            .map(|(d, e)| (d, e.clone()))
            .collect();

        // Stable sort keeps insertion order between equidistant entries
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));

        debug!("Catalog proximity query matched {} of {}", hits.len(), entries.len());
        Ok(hits.into_iter().map(|(_, e)| e).collect())
    }

    async fn find_by_sensor_id(&self, sensor_id: SensorId) -> Result<Option<CatalogEntry>, StorageError> {
        let entries = self.lock()?;
        Ok(entries.iter().find(|e| e.id_sensor == sensor_id).cloned())
    }

    async fn delete_by_sensor_id(&self, sensor_id: SensorId) -> Result<(), StorageError> {
        let mut entries = self.lock()?;
        if let Some(pos) = entries.iter().position(|e| e.id_sensor == sensor_id) {
            entries.remove(pos);
        }
        Ok(())
    }
}
