use crate::config::ApiConfig;
use crate::persistence::{Backend, ImageId, ImageRecord};
use crate::service::{AddImageOutcome, DeleteOutcome, ImageService, ServiceError, Upload};
use crate::storage::content_type_for;
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: ImageService,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let (status, code) = match &err {
            ServiceError::BackendNotConfigured(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_NOT_CONFIGURED")
            }
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServiceError::Storage(_) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR"),
            ServiceError::Persistence(_) => (StatusCode::BAD_GATEWAY, "PERSISTENCE_ERROR"),
        };
        error_response(status, code, err.to_string())
    }
}

/// `?backend=` query parameter; mongo when absent
#[derive(Debug, Deserialize)]
pub struct BackendQuery {
    pub backend: Option<String>,
}

impl BackendQuery {
    fn resolve(&self) -> Result<Backend, ApiError> {
        match self.backend.as_deref() {
            None => Ok(Backend::default()),
            Some(value) => value.parse().map_err(|e: crate::persistence::UnknownBackend| {
                error_response(StatusCode::BAD_REQUEST, "INVALID_BACKEND", e.to_string())
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BucketResetResponse {
    pub deleted: usize,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/images", get(list_images))
        .route("/images/:id", get(get_image))
        .route("/add_image", post(add_image))
        .route("/delete_image/:id", delete(delete_image))
        .route("/storage", delete(reset_bucket))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "API Root. Welcome to the image API!",
    })
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-api"
    }))
}

/// Readiness check endpoint, pinging every configured backend
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut backends = serde_json::Map::new();
    let mut ready = true;

    for (backend, repository) in state.service.repositories().iter() {
        let status = match repository.ping().await {
            Ok(()) => "connected".to_string(),
            Err(e) => {
                ready = false;
                error!(backend = %backend, error = %e, "Readiness ping failed");
                format!("disconnected: {e}")
            }
        };
        backends.insert(backend.to_string(), status.into());
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "backends": backends,
        })),
    )
}

#[instrument(skip(state))]
async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<Vec<ImageRecord>>, ApiError> {
    let backend = query.resolve()?;
    let images = state.service.list_images(backend).await?;
    Ok(Json(images))
}

#[instrument(skip(state))]
async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<ImageRecord>, ApiError> {
    let backend = query.resolve()?;
    let image = state.service.get_image(backend, &ImageId::new(id)).await?;
    Ok(Json(image))
}

#[instrument(skip(state, multipart))]
async fn add_image(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<AddImageOutcome>), ApiError> {
    let backend = query.resolve()?;
    let upload = read_upload(multipart).await?;
    let outcome = state.service.add_image(backend, upload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[instrument(skip(state))]
async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
) -> Result<(StatusCode, Json<DeleteOutcome>), ApiError> {
    let backend = query.resolve()?;
    let outcome = state
        .service
        .delete_image(backend, &ImageId::new(id))
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[instrument(skip(state))]
async fn reset_bucket(State(state): State<AppState>) -> Result<Json<BucketResetResponse>, ApiError> {
    let deleted = state.service.delete_all_objects().await?;
    Ok(Json(BucketResetResponse { deleted }))
}

/// Pull the `file` field out of a multipart body
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "MISSING_FILE_NAME",
                "Uploaded file has no file name",
            ));
        }
        let content_type = content_type_for(&name, field.content_type());
        let body = field.bytes().await.map_err(multipart_error)?;

        return Ok(Upload {
            name,
            content_type,
            body,
        });
    }

    Err(error_response(
        StatusCode::BAD_REQUEST,
        "MISSING_FILE",
        "Expected a multipart field named 'file'",
    ))
}

/// Body-limit overruns surface as 413, everything else as 400
fn multipart_error(err: MultipartError) -> ApiError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "PAYLOAD_TOO_LARGE"
    } else {
        "INVALID_MULTIPART"
    };
    error_response(status, code, err.body_text())
}

/// Start the HTTP API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting image API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DetectedLabel;
    use crate::testing::{memory_service, StaticAnalyzer};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-IMAGE-API-BOUNDARY";

    fn router(analyzer: StaticAnalyzer) -> Router {
        let (service, _, _, _) = memory_service(analyzer);
        create_router(AppState { service }, &ApiConfig::default())
    }

    fn multipart_request(uri: &str, field: &str, file_name: &str) -> Request<Body> {
        multipart_request_with(uri, field, file_name, "fake-jpeg-bytes")
    }

    fn multipart_request_with(
        uri: &str,
        field: &str,
        file_name: &str,
        payload: &str,
    ) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             {payload}\r\n\
             --{BOUNDARY}--\r\n"
        );

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_liveness() {
        let response = router(StaticAnalyzer::default())
            .oneshot(empty_request("GET", "/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().contains("API Root"));
    }

    #[tokio::test]
    async fn test_invalid_backend_is_rejected() {
        let response = router(StaticAnalyzer::default())
            .oneshot(empty_request("GET", "/images?backend=invalid"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "INVALID_BACKEND");
        assert!(body.get("images").is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_backend() {
        let response = router(StaticAnalyzer::default())
            .oneshot(empty_request("GET", "/images?backend=postgres"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let router = router(StaticAnalyzer::labels(vec![
            DetectedLabel {
                name: "Cat".to_string(),
                confidence: 99.0,
            },
            DetectedLabel {
                name: "Insect".to_string(),
                confidence: 85.0,
            },
        ]));

        let response = router
            .clone()
            .oneshot(multipart_request("/add_image?backend=mongo", "file", "cat.jpg"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let added = json_body(response).await;
        assert_eq!(added["ai_labels"], serde_json::json!(["Cat", "Bug"]));
        assert!(added.get("moderation_warning").is_none());

        let response = router
            .oneshot(empty_request("GET", "/images"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let images = json_body(response).await;
        let images = images.as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["name"], "cat.jpg");
        assert_eq!(images[0]["url"], "https://gallery.s3.amazonaws.com/cat.jpg");
    }

    #[tokio::test]
    async fn test_add_flagged_image_echoes_warning() {
        let response = router(StaticAnalyzer::moderation(vec!["Suggestive"]))
            .oneshot(multipart_request("/add_image", "file", "beach.jpg"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert!(body["moderation_warning"].is_string());
    }

    #[tokio::test]
    async fn test_add_without_file_field() {
        let response = router(StaticAnalyzer::default())
            .oneshot(multipart_request("/add_image", "image", "cat.jpg"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "MISSING_FILE");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let (service, store, _, _) = memory_service(StaticAnalyzer::default());
        let config = ApiConfig {
            max_upload_bytes: 64,
            ..ApiConfig::default()
        };
        let router = create_router(AppState { service }, &config);

        let payload = "x".repeat(4096);
        let response = router
            .oneshot(multipart_request_with("/add_image", "file", "big.jpg", &payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_flow() {
        let router = router(StaticAnalyzer::default());

        let response = router
            .clone()
            .oneshot(multipart_request("/add_image", "file", "cat.jpg"))
            .await
            .unwrap();
        let id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(empty_request("DELETE", &format!("/delete_image/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["deleted_count"], 1);
        assert_eq!(body["storage_deleted"], true);

        let response = router
            .oneshot(empty_request("GET", &format!("/images/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ready_reports_backends() {
        let response = router(StaticAnalyzer::default())
            .oneshot(empty_request("GET", "/ready"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["backends"]["mongo"], "connected");
    }
}
