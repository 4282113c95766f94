// HTTP surface
// GET / runs one load and reports the row count or the error.

use crate::config::LoaderConfig;
use crate::error::{LoadError, LoadResult};
use crate::loader::{run_load, LoadReport, Loader};
use crate::record::StateRecord;
use crate::warehouse::Warehouse;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Produces the configuration for each request, so a missing parameter is
/// reported per call instead of preventing startup
pub type ConfigResolver = Arc<dyn Fn() -> LoadResult<LoaderConfig> + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    resolve_config: ConfigResolver,
}

impl AppState {
    pub fn new(resolve_config: ConfigResolver) -> Self {
        AppState { resolve_config }
    }

    /// State that reads the process environment on every request
    pub fn from_env() -> Self {
        AppState::new(Arc::new(LoaderConfig::from_env))
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Serialize)]
pub struct ApiError {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failed(err: &LoadError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                kind: err.kind(),
                message: err.to_string(),
                line: err.line(),
            }),
        }
    }
}

pub fn status_for(err: &LoadError) -> StatusCode {
    match err {
        LoadError::SourceNotFound(_) => StatusCode::NOT_FOUND,
        LoadError::Parse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LoadError::Schema { .. } => StatusCode::CONFLICT,
        LoadError::ConfigurationMissing(_) | LoadError::ConfigurationInvalid { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        LoadError::TransientService(_) => StatusCode::BAD_GATEWAY,
    }
}

fn respond<T: Serialize>(result: LoadResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "request failed");
            (status_for(&e), Json(ApiResponse::failed(&e))).into_response()
        }
    }
}

/// Run blocking warehouse/storage work off the async runtime
async fn blocking<T, F>(work: F) -> LoadResult<T>
where
    F: FnOnce() -> LoadResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .unwrap_or_else(|e| Err(LoadError::TransientService(format!("load task failed: {}", e))))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET / - Perform the load
async fn load(State(state): State<AppState>) -> Response {
    let resolve = state.resolve_config.clone();
    let result: LoadResult<LoadReport> = blocking(move || {
        let config = resolve()?;
        run_load(&config)
    })
    .await;

    respond(result)
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/rows - Current contents of the destination table
async fn get_rows(State(state): State<AppState>) -> Response {
    let resolve = state.resolve_config.clone();
    let result: LoadResult<Vec<StateRecord>> = blocking(move || {
        let config = resolve()?;
        Loader::from_config(&config)
            .warehouse()
            .read_rows(&config.destination)
    })
    .await;

    respond(result)
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/rows", get(get_rows))
        .with_state(state.clone());

    Router::new()
        .route("/", get(load))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::storage::{LocalObjectStore, ObjectStore};
    use crate::warehouse::SqliteWarehouse;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn values(root: &std::path::Path) -> HashMap<String, String> {
        [
            (config::REGION, "us-central1".to_string()),
            (config::REGISTRY_NAME, "demo-registry".to_string()),
            (config::IMAGE_NAME, "state-loader".to_string()),
            (config::SERVICE_NAME, "state-loader-svc".to_string()),
            (config::PORT, "8080".to_string()),
            (config::PROJECT_ID, "demo-project".to_string()),
            (config::DATASET, "census".to_string()),
            (config::TABLE_NAME, "states".to_string()),
            (config::BUCKET_NAME, "demo-bucket".to_string()),
            (config::SOURCE_PATH, "us_states.csv".to_string()),
            (config::STORAGE_ROOT, root.join("objects").display().to_string()),
            (config::WAREHOUSE_ROOT, root.join("warehouse").display().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn state_for(values: HashMap<String, String>) -> AppState {
        AppState::new(Arc::new(move || LoaderConfig::from_map(&values)))
    }

    /// Stage the bundled CSV and an empty destination table
    fn provision(values: &HashMap<String, String>) {
        let config = LoaderConfig::from_map(values).unwrap();
        LocalObjectStore::new(&config.storage_root)
            .write_object(&config.source, include_bytes!("../data/us_states.csv"))
            .unwrap();
        SqliteWarehouse::new(&config.warehouse_root)
            .create_table(&config.destination)
            .unwrap();
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state_for(HashMap::new()));
        let (status, body) = get_json(app, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "OK");
    }

    #[tokio::test]
    async fn test_load_endpoint_reports_rows() {
        let dir = tempfile::tempdir().unwrap();
        let values = values(dir.path());
        provision(&values);
        let app = router(state_for(values));

        let (status, body) = get_json(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["rows_loaded"], 50);
        assert_eq!(body["data"]["table_rows"], 50);
        assert_eq!(body["data"]["write_disposition"], "append");

        let (_, body) = get_json(app.clone(), "/").await;
        assert_eq!(body["data"]["table_rows"], 100);

        let (status, body) = get_json(app, "/api/rows").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_missing_configuration_is_reported() {
        let app = router(state_for(HashMap::new()));
        let (status, body) = get_json(app, "/").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "ConfigurationMissing");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("GCS_BUCKET_NAME"));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state_for(values(dir.path())));

        let (status, body) = get_json(app, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "SourceNotFound");
    }

    #[tokio::test]
    async fn test_parse_error_carries_line() {
        let dir = tempfile::tempdir().unwrap();
        let values = values(dir.path());
        provision(&values);
        let config = LoaderConfig::from_map(&values).unwrap();
        LocalObjectStore::new(&config.storage_root)
            .write_object(
                &config.source,
                b"state,abbreviation,capital,population,area_sq_mi\nOhio,OH,Columbus,many,44826\n",
            )
            .unwrap();
        let app = router(state_for(values));

        let (status, body) = get_json(app, "/").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "ParseError");
        assert_eq!(body["error"]["line"], 2);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&LoadError::schema("p.d.t", "table does not exist")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&LoadError::TransientService("timeout".to_string())),
            StatusCode::BAD_GATEWAY
        );
    }
}
