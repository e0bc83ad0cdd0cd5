//! Records held by the three stores

use serde::{Deserialize, Serialize};

/// Store-assigned sensor identifier, the join key across all stores
pub type SensorId = i64;

/// Latest telemetry payload, shaped by the caller
pub type Reading = serde_json::Map<String, serde_json::Value>;

/// Canonical sensor identity (relational row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sensor {
    pub id: SensorId,
    pub name: String,
}

/// Descriptive device fields stored in the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub mac_address: String,
    pub manufacturer: String,
    pub model: String,
    pub serie_number: String,
    pub firmware_version: String,
}

/// GeoJSON point. Coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

/// One device catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id_sensor: SensorId,
    #[serde(flatten)]
    pub descriptor: DeviceDescriptor,
    pub location: GeoPoint,
}

impl CatalogEntry {
    pub fn new(id_sensor: SensorId, descriptor: DeviceDescriptor, longitude: f64, latitude: f64) -> Self {
        Self {
            id_sensor,
            descriptor,
            location: GeoPoint::new(longitude, latitude),
        }
    }
}
