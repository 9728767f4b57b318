//! Axum router construction for the gateway API.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router for the gateway.
///
/// The router includes:
/// - `GET /health` -- liveness plus store connectivity
/// - `POST /api/calculate/stream` -- paced event stream of one calculation
/// - `POST /api/calculate` -- the same calculation, returned in one body
/// - `GET /api/calculations` -- recent calculations
/// - `GET /api/events` -- recent events across calculations
/// - `GET /api/events/{calculation_id}` -- the audit trail of one calculation
///
/// CORS allows any origin so a browser client on another port can
/// consume the stream.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Calculations
        .route("/api/calculate/stream", post(handlers::calculate_stream))
        .route("/api/calculate", post(handlers::calculate))
        .route("/api/calculations", get(handlers::list_calculations))
        // Audit trail
        .route("/api/events", get(handlers::list_events))
        .route(
            "/api/events/{calculation_id}",
            get(handlers::get_calculation_events),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
