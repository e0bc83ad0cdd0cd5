//! Sensor Hub API Server
//!
//! HTTP front end for the sensor coordinator: validates requests, maps
//! coordinator failures to status codes, exposes health and metrics.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod settings;
pub mod error;
pub mod rate_limit;
mod routes;

pub use settings::Settings;
pub use error::{ApiError, ErrorBody};
pub use rate_limit::RateLimitConfig;

use coordinator::{Reconciler, SensorCoordinator};
use storage::{MongoCatalog, RedisLiveCache, SqlIdentityStore};

/// Application state shared across handlers
pub struct AppState {
    /// Multi-store coordinator
    pub coordinator: SensorCoordinator,
    /// Prometheus render handle, if a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create new application state
    pub fn new(coordinator: SensorCoordinator) -> Self {
        Self {
            coordinator,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Create the application router. Pass a rate limit config to enable limiting;
/// the router must then be served with peer address info.
pub fn create_router(state: SharedState, limits: Option<&RateLimitConfig>) -> Router {
    let router = Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/v1/sensors",
            get(routes::sensors::list_sensors).post(routes::sensors::create_sensor),
        )
        .route("/api/v1/sensors/near", get(routes::sensors::get_sensors_near))
        .route(
            "/api/v1/sensors/:sensor_id",
            get(routes::sensors::get_sensor).delete(routes::sensors::delete_sensor),
        )
        .route(
            "/api/v1/sensors/:sensor_id/data",
            get(routes::sensors::get_data).post(routes::sensors::record_data),
        )
        .with_state(state);

    let router = match limits.and_then(rate_limit::create_governor_config) {
        Some(config) => router.layer(GovernorLayer { config }),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus scrape handler
async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Register descriptions for the coordinator's counters
pub fn describe_metrics() {
    metrics::describe_counter!("sensor_created_total", "Sensors created in both persistent stores");
    metrics::describe_counter!("sensor_deleted_total", "Sensors deleted");
    metrics::describe_counter!("sensor_readings_recorded_total", "Live readings written");
    metrics::describe_counter!(
        "sensor_partial_writes_total",
        "Creates that left an identity without a catalog entry"
    );
    metrics::describe_counter!(
        "sensor_near_orphans_skipped_total",
        "Proximity hits dropped for lack of an identity"
    );
    metrics::describe_counter!(
        "sensor_near_failed_joins_total",
        "Proximity hits dropped because the identity lookup failed"
    );
    metrics::describe_counter!(
        "sensor_reconcile_orphans_total",
        "Orphan identities seen by reconciliation sweeps"
    );
}

/// Initialize logging
pub fn init_logging(level: &str, json: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Connect all three stores and build the coordinator
pub async fn build_coordinator(settings: &Settings) -> Result<SensorCoordinator, storage::StorageError> {
    let identity = SqlIdentityStore::connect(&settings.database.url, settings.database.max_connections).await?;
    identity.migrate().await?;

    let catalog = MongoCatalog::connect(
        &settings.mongo.uri,
        &settings.mongo.database,
        &settings.mongo.collection,
    )
    .await?;

    let mut live = RedisLiveCache::connect(&settings.redis.url).await?;
    if let Some(ttl) = settings.redis.reading_ttl_secs {
        live = live.with_ttl(Duration::from_secs(ttl));
    }

    Ok(SensorCoordinator::new(Arc::new(identity), Arc::new(catalog), Arc::new(live))
        .with_call_timeout(settings.coordinator.call_timeout()))
}

/// Start the reconciliation sweep if a non-zero interval is configured
pub fn spawn_reconciler(coordinator: &SensorCoordinator, settings: &Settings) -> Option<tokio::task::JoinHandle<()>> {
    let every = match settings.reconcile.interval_secs? {
        0 => {
            warn!("reconcile.interval_secs is 0, reconciliation sweep disabled");
            return None;
        }
        secs => Duration::from_secs(secs),
    };
    info!(
        "Reconciliation sweep every {:?} with {:?} policy",
        every, settings.reconcile.policy
    );

    let reconciler = Reconciler::new(coordinator, settings.reconcile.policy)
        .with_page_size(settings.reconcile.page_size);
    Some(Arc::new(reconciler).spawn(every))
}

/// Serve the router until the process is stopped
pub async fn serve(addr: &str, app: Router) -> std::io::Result<()> {
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use coordinator::CompositeView;
    use serde_json::{json, Value};
    use storage::{MemoryCatalog, MemoryLiveCache, Sensor};
    use tower::ServiceExt;

    async fn memory_coordinator() -> SensorCoordinator {
        SensorCoordinator::new(
            Arc::new(SqlIdentityStore::in_memory().await.unwrap()),
            Arc::new(MemoryCatalog::new()),
            Arc::new(MemoryLiveCache::new()),
        )
    }

    async fn app() -> Router {
        create_router(Arc::new(AppState::new(memory_coordinator().await)), None)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn create_body(name: &str, longitude: f64, latitude: f64) -> Value {
        json!({
            "name": name,
            "type": "temperature",
            "mac_address": "00:1B:44:11:3A:B7",
            "manufacturer": "Acme",
            "model": "T-100",
            "serie_number": "SN-0001",
            "firmware_version": "1.2.3",
            "longitude": longitude,
            "latitude": latitude,
        })
    }

    async fn create(app: &Router, name: &str, longitude: f64, latitude: f64) -> Sensor {
        let (status, body) = send(app, Method::POST, "/api/v1/sensors", Some(create_body(name, longitude, latitude))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = send(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_sensor_lifecycle() {
        let app = app().await;
        let sensor = create(&app, "s1", 10.0, 20.0).await;

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{}/data", sensor.id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No data recorded for sensor");

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/v1/sensors/{}/data", sensor.id),
            Some(json!({"temperature": 22.5, "humidity": 40, "name": "ignored"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"sensor_id": sensor.id, "status": "recorded"}));

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{}/data", sensor.id), None).await;
        assert_eq!(status, StatusCode::OK);
        let view: CompositeView = serde_json::from_value(body).unwrap();
        assert_eq!(view.id, sensor.id);
        assert_eq!(view.name, "s1");
        assert_eq!(view.reading.get("temperature"), Some(&json!(22.5)));

        let (status, body) = send(&app, Method::DELETE, &format!("/api/v1/sensors/{}", sensor.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "s1");

        let (status, body) = send(&app, Method::DELETE, &format!("/api/v1/sensors/{}", sensor.id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Sensor not found");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let app = app().await;
        create(&app, "dup", 0.0, 0.0).await;

        let (status, body) = send(&app, Method::POST, "/api/v1/sensors", Some(create_body("dup", 1.0, 1.0))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Sensor with same name already registered");
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let app = app().await;

        let (status, _) = send(&app, Method::POST, "/api/v1/sensors", Some(create_body("bad", 0.0, 95.0))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, Method::POST, "/api/v1/sensors", Some(create_body("  ", 0.0, 0.0))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, Method::POST, "/api/v1/sensors/1/data", Some(json!([1, 2, 3]))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, Method::GET, "/api/v1/sensors/near?latitude=0&longitude=0&radius=0", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_near_orders_and_filters() {
        let app = app().await;
        let b = create(&app, "B", 0.0, 0.01).await;
        let a = create(&app, "A", 0.0, 0.0).await;

        let (status, body) = send(&app, Method::GET, "/api/v1/sensors/near?latitude=0&longitude=0&radius=2000", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<i64> = body.as_array().unwrap().iter().map(|v| v["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        let (_, body) = send(&app, Method::GET, "/api/v1/sensors/near?latitude=0&longitude=0&radius=500", None).await;
        let ids: Vec<i64> = body.as_array().unwrap().iter().map(|v| v["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![a.id]);

        let (status, body) = send(&app, Method::GET, "/api/v1/sensors/near?latitude=50&longitude=50&radius=500", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let app = app().await;
        let first = create(&app, "one", 0.0, 0.0).await;
        create(&app, "two", 0.0, 0.0).await;

        let (status, body) = send(&app, Method::GET, "/api/v1/sensors?skip=1&limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "two");

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{}", first.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "one");

        let (status, _) = send(&app, Method::GET, "/api/v1/sensors/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = app().await;
        let (status, _) = send(&app, Method::GET, "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_input_is_unprocessable_with_detail() {
        let app = app().await;

        for uri in [
            "/api/v1/sensors/near?latitude=0&longitude=0",
            "/api/v1/sensors/near?latitude=0&longitude=0&radius=1.5",
            "/api/v1/sensors/abc",
            "/api/v1/sensors/abc/data",
            "/api/v1/sensors?limit=ten",
        ] {
            let (status, body) = send(&app, Method::GET, uri, None).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
            assert!(body["detail"].is_string(), "{}: {}", uri, body);
        }

        let (status, body) = send(&app, Method::POST, "/api/v1/sensors", Some(json!({"name": "x"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());

        let (status, body) = send(&app, Method::DELETE, "/api/v1/sensors/abc", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_record_rejects_non_json_body() {
        let app = app().await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/sensors/1/data")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.detail.is_empty());
    }

    #[tokio::test]
    async fn test_zero_reconcile_interval_disables_sweep() {
        let coordinator = memory_coordinator().await;
        let mut settings = Settings::default();

        settings.reconcile.interval_secs = Some(0);
        assert!(spawn_reconciler(&coordinator, &settings).is_none());

        settings.reconcile.interval_secs = None;
        assert!(spawn_reconciler(&coordinator, &settings).is_none());

        settings.reconcile.interval_secs = Some(3600);
        let handle = spawn_reconciler(&coordinator, &settings).unwrap();
        assert!(!handle.is_finished());
        handle.abort();
    }
}
