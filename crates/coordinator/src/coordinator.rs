//! Coordinator Implementation

use crate::view::CompositeView;
use crate::{CoordinatorError, Result, Store};
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::{
    CatalogEntry, DeviceCatalog, DeviceDescriptor, IdentityStore, LiveCache, Reading, Sensor,
    SensorId, StorageError,
};
use tracing::{debug, info, warn};

/// Deadline applied to each adapter call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Proximity search result
#[derive(Debug, Clone, Default)]
pub struct NearbySensors {
    /// Joined views, nearest first
    pub sensors: Vec<CompositeView>,
    /// Catalog hits dropped for lack of an identity
    pub skipped: usize,
    /// Catalog hits dropped because the identity lookup failed
    pub failed_joins: usize,
}

/// Run an adapter call under a deadline
pub(crate) async fn with_deadline<T, F>(timeout: Duration, call: F) -> std::result::Result<T, StorageError>
where
    F: Future<Output = std::result::Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Orchestrates the three stores. Holds only shared client handles, so one
/// instance serves any number of concurrent requests.
#[derive(Clone)]
pub struct SensorCoordinator {
    identity: Arc<dyn IdentityStore>,
    catalog: Arc<dyn DeviceCatalog>,
    live: Arc<dyn LiveCache>,
    call_timeout: Duration,
}

impl SensorCoordinator {
    /// Create a coordinator over pre-connected stores
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        catalog: Arc<dyn DeviceCatalog>,
        live: Arc<dyn LiveCache>,
    ) -> Self {
        Self {
            identity,
            catalog,
            live,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub(crate) fn identity(&self) -> &Arc<dyn IdentityStore> {
        &self.identity
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn DeviceCatalog> {
        &self.catalog
    }

    pub(crate) fn live(&self) -> &Arc<dyn LiveCache> {
        &self.live
    }

    async fn call<T, F>(&self, call: F) -> std::result::Result<T, StorageError>
    where
        F: Future<Output = std::result::Result<T, StorageError>>,
    {
        with_deadline(self.call_timeout, call).await
    }

    /// Create a sensor: identity first (for the id), then the catalog entry.
    ///
    /// If the catalog write fails the identity is kept and returned inside
    /// `PartialWriteFailure`. Nothing is rolled back.
    pub async fn create_sensor(
        &self,
        name: &str,
        descriptor: &DeviceDescriptor,
        longitude: f64,
        latitude: f64,
    ) -> Result<Sensor> {
        let sensor = self
            .call(self.identity.create(name))
            .await
            .map_err(CoordinatorError::unavailable(Store::Identity, "create"))?;

        let catalog_write = self
            .call(self.catalog.upsert_descriptor(sensor.id, descriptor, longitude, latitude))
            .await;

        if let Err(source) = catalog_write {
            warn!("Sensor {} ({}) has no catalog entry: {}", sensor.id, sensor.name, source);
            counter!("sensor_partial_writes_total").increment(1);
            return Err(CoordinatorError::PartialWriteFailure { sensor, source });
        }

        counter!("sensor_created_total").increment(1);
        info!("Created sensor {} ({}) at [{}, {}]", sensor.id, sensor.name, longitude, latitude);
        Ok(sensor)
    }

    /// Store the latest reading. Does not check that the sensor exists.
    pub async fn record_data(&self, sensor_id: SensorId, reading: &Reading) -> Result<()> {
        self.call(self.live.set(sensor_id, reading))
            .await
            .map_err(CoordinatorError::unavailable(Store::Live, "set"))?;

        counter!("sensor_readings_recorded_total").increment(1);
        debug!("Recorded {} fields for sensor {}", reading.len(), sensor_id);
        Ok(())
    }

    /// Identity merged with the latest reading
    pub async fn get_data(&self, sensor_id: SensorId) -> Result<CompositeView> {
        let sensor = self.get_sensor(sensor_id).await?;

        match self.call(self.live.get(sensor_id)).await {
            Ok(Some(reading)) => Ok(CompositeView::merge(sensor, Some(reading))),
            Ok(None) => Err(CoordinatorError::NoReadingYet(sensor_id)),
            Err(StorageError::SerializationError(reason)) => {
                Err(CoordinatorError::CorruptReading { sensor_id, reason })
            }
            Err(source) => Err(CoordinatorError::StoreUnavailable {
                store: Store::Live,
                op: "get",
                source,
            }),
        }
    }

    /// Sensors within `radius_m` meters of the point, nearest first.
    ///
    /// Only the catalog calls can fail the search. A hit whose identity is
    /// missing or cannot be fetched is dropped and counted. A hit whose
    /// reading cannot be fetched is returned with identity fields only.
    pub async fn find_near(&self, longitude: f64, latitude: f64, radius_m: f64) -> Result<NearbySensors> {
        self.call(self.catalog.ensure_geo_index())
            .await
            .map_err(CoordinatorError::unavailable(Store::Catalog, "ensure_geo_index"))?;

        let entries = self
            .call(self.catalog.find_near(longitude, latitude, radius_m))
            .await
            .map_err(CoordinatorError::unavailable(Store::Catalog, "find_near"))?;

        let mut result = NearbySensors {
            sensors: Vec::with_capacity(entries.len()),
            ..Default::default()
        };

        for entry in entries {
            let sensor_id = entry.id_sensor;

            let sensor = match self.call(self.identity.get(sensor_id)).await {
                Ok(Some(sensor)) => sensor,
                Ok(None) => {
                    warn!("Skipping catalog entry for unknown sensor {}", sensor_id);
                    result.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Dropping sensor {} from proximity result: identity lookup failed: {}", sensor_id, e);
                    result.failed_joins += 1;
                    continue;
                }
            };

            let reading = match self.call(self.live.get(sensor_id)).await {
                Ok(reading) => reading,
                Err(StorageError::SerializationError(reason)) => {
                    warn!("Ignoring corrupt reading for sensor {}: {}", sensor_id, reason);
                    None
                }
                Err(e) => {
                    warn!("Reading for sensor {} unavailable: {}", sensor_id, e);
                    None
                }
            };

            result.sensors.push(CompositeView::merge(sensor, reading));
        }

        if result.skipped > 0 {
            counter!("sensor_near_orphans_skipped_total").increment(result.skipped as u64);
        }
        if result.failed_joins > 0 {
            counter!("sensor_near_failed_joins_total").increment(result.failed_joins as u64);
        }

        debug!(
            "Proximity search at [{}, {}] r={}m: {} sensors, {} skipped, {} failed joins",
            longitude,
            latitude,
            radius_m,
            result.sensors.len(),
            result.skipped,
            result.failed_joins
        );
        Ok(result)
    }

    /// Delete from all stores: live reading, catalog, then identity.
    ///
    /// The first two deletes run even for an unknown id, so stray entries are
    /// cleaned before `NotFound` is reported.
    pub async fn delete_sensor(&self, sensor_id: SensorId) -> Result<Sensor> {
        self.call(self.live.delete(sensor_id))
            .await
            .map_err(CoordinatorError::unavailable(Store::Live, "delete"))?;

        self.call(self.catalog.delete_by_sensor_id(sensor_id))
            .await
            .map_err(CoordinatorError::unavailable(Store::Catalog, "delete"))?;

        let sensor = match self.call(self.identity.delete(sensor_id)).await {
            Ok(sensor) => sensor,
            Err(StorageError::NotFound) => return Err(CoordinatorError::NotFound(sensor_id)),
            Err(source) => {
                return Err(CoordinatorError::StoreUnavailable {
                    store: Store::Identity,
                    op: "delete",
                    source,
                })
            }
        };

        counter!("sensor_deleted_total").increment(1);
        info!("Deleted sensor {} ({})", sensor.id, sensor.name);
        Ok(sensor)
    }

    /// Identity by id, `NotFound` if absent
    pub async fn get_sensor(&self, sensor_id: SensorId) -> Result<Sensor> {
        self.call(self.identity.get(sensor_id))
            .await
            .map_err(CoordinatorError::unavailable(Store::Identity, "get"))?
            .ok_or(CoordinatorError::NotFound(sensor_id))
    }

    /// First identity with this name
    pub async fn get_sensor_by_name(&self, name: &str) -> Result<Option<Sensor>> {
        self.call(self.identity.get_by_name(name))
            .await
            .map_err(CoordinatorError::unavailable(Store::Identity, "get_by_name"))
    }

    /// Page through identities
    pub async fn list_sensors(&self, offset: i64, limit: i64) -> Result<Vec<Sensor>> {
        self.call(self.identity.list(offset, limit))
            .await
            .map_err(CoordinatorError::unavailable(Store::Identity, "list"))
    }

    /// Raw catalog document for a sensor
    pub async fn catalog_entry(&self, sensor_id: SensorId) -> Result<Option<CatalogEntry>> {
        self.call(self.catalog.find_by_sensor_id(sensor_id))
            .await
            .map_err(CoordinatorError::unavailable(Store::Catalog, "find_by_sensor_id"))
    }
}
