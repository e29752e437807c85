use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::models::{SourceKind, TickerSpec, TickerStatus};

/// OpenAPI specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ticker Manager API",
        version = "1.0.0",
        description = "Runs price tickers that publish live quotes as bot presence",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::create_ticker,
        handlers::list_tickers,
        handlers::get_ticker,
        handlers::delete_ticker,
        handlers::restart_ticker,
    ),
    components(
        schemas(
            TickerSpec,
            SourceKind,
            TickerStatus,
            TickerConfigView,
            TickerStateResponse,
            CreateTickerResponse,
            HealthResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Tickers", description = "Ticker lifecycle endpoints"),
    )
)]
pub struct ApiDoc;
