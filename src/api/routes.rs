use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::manager::TickerManager;

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the control API router with Swagger UI
pub fn create_router(manager: TickerManager) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/ticker", post(create_ticker).get(list_tickers))
        .route("/ticker/:id", get(get_ticker).delete(delete_ticker))
        .route("/ticker/:id/restart", post(restart_ticker))
        .with_state(manager)
}
