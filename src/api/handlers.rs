use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::manager::{TickerError, TickerManager};
use crate::models::TickerSpec;

use super::responses::*;

/// Shared application state
pub type AppState = TickerManager;

/// Errors surfaced by the control API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body was not a ticker definition
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ticker(#[from] TickerError),
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Ticker(TickerError::InvalidConfig(_)) => (StatusCode::BAD_REQUEST, "invalid_config"),
            ApiError::Ticker(TickerError::DuplicateId(_)) => (StatusCode::CONFLICT, "duplicate_id"),
            ApiError::Ticker(TickerError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Ticker(TickerError::Store(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            ApiError::Ticker(TickerError::Scheduler(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "scheduler_error")
            }
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(manager): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(manager.counts(), manager.config().managed))
}

/// Create and start a ticker
#[utoipa::path(
    post,
    path = "/ticker",
    tag = "Tickers",
    request_body = TickerSpec,
    responses(
        (status = 201, description = "Ticker created", body = CreateTickerResponse),
        (status = 400, description = "Malformed or invalid ticker", body = ErrorResponse),
        (status = 409, description = "Ticker id already exists", body = ErrorResponse),
        (status = 500, description = "Ticker could not be persisted", body = ErrorResponse)
    )
)]
pub async fn create_ticker(
    State(manager): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateTickerResponse>), ApiError> {
    // parsed by hand so malformed JSON is a 400 rather than axum's 422
    let spec: TickerSpec =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let id = manager.create(spec).await?;
    Ok((StatusCode::CREATED, Json(CreateTickerResponse { id })))
}

/// List every ticker, ordered by id
#[utoipa::path(
    get,
    path = "/ticker",
    tag = "Tickers",
    responses(
        (status = 200, description = "Ticker states", body = Vec<TickerStateResponse>)
    )
)]
pub async fn list_tickers(State(manager): State<AppState>) -> Json<Vec<TickerStateResponse>> {
    Json(manager.list().into_iter().map(TickerStateResponse::from).collect())
}

/// Get one ticker's state
#[utoipa::path(
    get,
    path = "/ticker/{id}",
    tag = "Tickers",
    params(
        ("id" = String, Path, description = "Ticker id")
    ),
    responses(
        (status = 200, description = "Ticker found", body = TickerStateResponse),
        (status = 404, description = "Ticker not found", body = ErrorResponse)
    )
)]
pub async fn get_ticker(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TickerStateResponse>, ApiError> {
    let state = manager.get(&id).await?;
    Ok(Json(state.into()))
}

/// Stop a ticker and forget it
#[utoipa::path(
    delete,
    path = "/ticker/{id}",
    tag = "Tickers",
    params(
        ("id" = String, Path, description = "Ticker id")
    ),
    responses(
        (status = 204, description = "Ticker deleted"),
        (status = 404, description = "Ticker not found", body = ErrorResponse),
        (status = 500, description = "Ticker record could not be removed", body = ErrorResponse)
    )
)]
pub async fn delete_ticker(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    manager.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Restart a ticker from its stored definition
#[utoipa::path(
    post,
    path = "/ticker/{id}/restart",
    tag = "Tickers",
    params(
        ("id" = String, Path, description = "Ticker id")
    ),
    responses(
        (status = 202, description = "Restart accepted"),
        (status = 404, description = "Ticker not found", body = ErrorResponse)
    )
)]
pub async fn restart_ticker(
    State(manager): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    manager.restart(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::config::ManagerConfig;
    use crate::store::MemoryStore;
    use crate::testing::{RecordingFactory, ScriptedSource};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = ManagerConfig {
            default_frequency: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(200),
            ..ManagerConfig::default()
        };
        let manager = TickerManager::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedSource::fixed(dec!(10))),
            Arc::new(RecordingFactory::new()),
        );
        create_router(manager)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    const BTC: &str = r#"{"id":"btc-1","symbol":"BTC","source":"crypto","bot_token":"secret-token"}"#;

    #[tokio::test]
    async fn test_create_list_delete() {
        let app = app();

        let (status, body) = send(&app, "POST", "/ticker", Some(BTC)).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: CreateTickerResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.id, "btc-1");

        let (status, body) = send(&app, "GET", "/ticker", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body.clone()).unwrap();
        assert!(!text.contains("secret-token"));
        let listed: Vec<TickerStateResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "btc-1");

        let (status, _) = send(&app, "GET", "/ticker/btc-1", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "DELETE", "/ticker/btc-1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (status, body) = send(&app, "DELETE", "/ticker/btc-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "not_found");

        let (_, body) = send(&app, "GET", "/ticker", None).await;
        let listed: Vec<TickerStateResponse> = serde_json::from_slice(&body).unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejections() {
        let app = app();

        let (status, body) = send(&app, "POST", "/ticker", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "bad_request");

        let (status, _) = send(
            &app,
            "POST",
            "/ticker",
            Some(r#"{"symbol":"BTC","source":"bond","bot_token":"t"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/ticker",
            Some(r#"{"symbol":"  ","source":"crypto","bot_token":"t"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "invalid_config");

        let (status, _) = send(&app, "POST", "/ticker", Some(BTC)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&app, "POST", "/ticker", Some(BTC)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "duplicate_id");
    }

    #[tokio::test]
    async fn test_encoded_path_ids_are_not_found() {
        let app = app();
        for (method, uri) in [
            ("DELETE", "/ticker/..%2Fvictim"),
            ("GET", "/ticker/..%2F..%2Fetc%2Fpasswd"),
            ("POST", "/ticker/..%2Fvictim/restart"),
        ] {
            let (status, body) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(error.error, "not_found");
        }
    }

    #[tokio::test]
    async fn test_restart_and_health() {
        let app = app();

        let (status, _) = send(&app, "POST", "/ticker/nope/restart", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&app, "POST", "/ticker", Some(BTC)).await;
        let (status, _) = send(&app, "POST", "/ticker/btc-1/restart", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.tickers, 1);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        assert!(!health.managed);
    }
}
