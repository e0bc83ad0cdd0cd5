//! Sensor Routes

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use coordinator::CompositeView;
use serde::{Deserialize, Serialize};
use storage::{DeviceDescriptor, Reading, Sensor, SensorId};

use crate::error::ApiError;
use crate::SharedState;

/// Upper bound on a list page
const MAX_LIST_LIMIT: i64 = 1000;

/// Body for sensor creation
#[derive(Debug, Deserialize)]
pub struct SensorCreate {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: DeviceDescriptor,
    pub latitude: f64,
    pub longitude: f64,
}

impl SensorCreate {
    fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("name must not be empty".to_string()));
        }
        validate_point(self.longitude, self.latitude)
    }
}

fn validate_point(longitude: f64, latitude: f64) -> Result<(), ApiError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ApiError::Validation(format!(
            "latitude {} is out of range [-90, 90]",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ApiError::Validation(format!(
            "longitude {} is out of range [-180, 180]",
            longitude
        )));
    }
    Ok(())
}

/// Query parameters for listing sensors
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Query parameters for proximity search
#[derive(Debug, Deserialize)]
pub struct NearQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub radius: i64,
}

/// Response for a recorded reading
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordAck {
    pub sensor_id: SensorId,
    pub status: String,
}

/// Create a sensor
pub async fn create_sensor(
    State(state): State<SharedState>,
    body: Result<Json<SensorCreate>, JsonRejection>,
) -> Result<Json<Sensor>, ApiError> {
    let Json(body) = body?;
    body.validate()?;

    if state.coordinator.get_sensor_by_name(&body.name).await?.is_some() {
        return Err(ApiError::NameTaken);
    }

    let sensor = state
        .coordinator
        .create_sensor(&body.name, &body.descriptor, body.longitude, body.latitude)
        .await?;

    Ok(Json(sensor))
}

/// List sensor identities
pub async fn list_sensors(
    State(state): State<SharedState>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Sensor>>, ApiError> {
    let Query(params) = params?;
    if params.skip < 0 || params.limit < 0 {
        return Err(ApiError::Validation("skip and limit must not be negative".to_string()));
    }
    let limit = params.limit.min(MAX_LIST_LIMIT);

    let sensors = state.coordinator.list_sensors(params.skip, limit).await?;
    Ok(Json(sensors))
}

/// Sensors near a point, nearest first
pub async fn get_sensors_near(
    State(state): State<SharedState>,
    params: Result<Query<NearQuery>, QueryRejection>,
) -> Result<Json<Vec<CompositeView>>, ApiError> {
    let Query(params) = params?;
    validate_point(params.longitude, params.latitude)?;
    if params.radius <= 0 {
        return Err(ApiError::Validation("radius must be positive".to_string()));
    }

    let nearby = state
        .coordinator
        .find_near(params.longitude, params.latitude, params.radius as f64)
        .await?;

    Ok(Json(nearby.sensors))
}

/// Get one sensor identity
pub async fn get_sensor(
    State(state): State<SharedState>,
    sensor_id: Result<Path<SensorId>, PathRejection>,
) -> Result<Json<Sensor>, ApiError> {
    let Path(sensor_id) = sensor_id?;
    Ok(Json(state.coordinator.get_sensor(sensor_id).await?))
}

/// Record the latest reading for a sensor
pub async fn record_data(
    State(state): State<SharedState>,
    sensor_id: Result<Path<SensorId>, PathRejection>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<RecordAck>, ApiError> {
    let Path(sensor_id) = sensor_id?;
    let Json(body) = body?;
    let reading: Reading = match body {
        serde_json::Value::Object(map) => map,
        _ => return Err(ApiError::Validation("reading must be a JSON object".to_string())),
    };

    state.coordinator.record_data(sensor_id, &reading).await?;

    Ok(Json(RecordAck {
        sensor_id,
        status: "recorded".to_string(),
    }))
}

/// Identity merged with the latest reading
pub async fn get_data(
    State(state): State<SharedState>,
    sensor_id: Result<Path<SensorId>, PathRejection>,
) -> Result<Json<CompositeView>, ApiError> {
    let Path(sensor_id) = sensor_id?;
    Ok(Json(state.coordinator.get_data(sensor_id).await?))
}

/// Delete a sensor from every store
pub async fn delete_sensor(
    State(state): State<SharedState>,
    sensor_id: Result<Path<SensorId>, PathRejection>,
) -> Result<Json<Sensor>, ApiError> {
    let Path(sensor_id) = sensor_id?;
    Ok(Json(state.coordinator.delete_sensor(sensor_id).await?))
}
