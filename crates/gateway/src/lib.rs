//! HTTP API gateway for Docent.
//!
//! Exposes the health check and the v1 API: streaming chat with
//! cancellation, document administration and tool listing.
//!
//! Built on Axum; chat responses are Server-Sent Events.

pub mod api_v1;

#[cfg(test)]
mod test_support;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, extract::State, response::Json, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use api_v1::{QUERY_ID_HEADER, SharedApiState};
use docent_config::GatewayConfig;

/// Inline documents travel in request bodies.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - CORS restricted to `cors_origins`
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(api_state: SharedApiState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&api_state))
        .nest("/v1", api_v1::v1_router(api_state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(QUERY_ID_HEADER)])
        .max_age(Duration::from_secs(3600))
}

/// Serve until Ctrl-C.
pub async fn start(config: &GatewayConfig, api_state: SharedApiState) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(api_state, &config.cors_origins);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Gateway shutting down");
}

// --- Handlers ---

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    active_queries: usize,
}

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_queries: state.active_queries(),
    })
}
