//! HTTP endpoint handlers for the gateway.
//!
//! Request validation happens here, before any calculation record or
//! stream exists. Everything after that belongs to the [`Session`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness plus store connectivity |
//! | `POST` | `/api/calculate/stream` | Paced `text/event-stream` of one calculation |
//! | `POST` | `/api/calculate` | Unpaced calculation with per-step logs |
//! | `GET` | `/api/calculations` | Most recent calculations |
//! | `GET` | `/api/events` | Most recent events |
//! | `GET` | `/api/events/{calculation_id}` | Events of one calculation |

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::{self, Stream};
use growth_core::{GrowthParams, SessionConfig};
use growth_types::{
    CalculationId, CalculationRequest, InstantCalculationResponse, StepLog, StreamMessage,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::session::{Session, SessionOutcome};
use crate::sink::ChannelSink;
use crate::state::AppState;

/// Name reported by `GET /health`.
pub const SERVICE_NAME: &str = "growth-gateway";

/// Buffered messages between a session and its HTTP body.
const STREAM_BUFFER: usize = 1;

const DEFAULT_CALCULATIONS_LIMIT: u32 = 10;
const MAX_CALCULATIONS_LIMIT: u32 = 100;
const DEFAULT_EVENTS_LIMIT: u32 = 50;
const MAX_EVENTS_LIMIT: u32 = 500;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for the listing endpoints.
#[derive(Debug, Default, serde::Deserialize)]
pub struct LimitQuery {
    /// Maximum number of rows to return.
    pub limit: Option<u32>,
}

impl LimitQuery {
    fn resolve(&self, default: u32, max: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

fn validate(payload: Result<Json<CalculationRequest>, JsonRejection>) -> Result<GrowthParams, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    Ok(GrowthParams::new(request.base, request.exponent)?)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Report liveness and whether the store answers a ping.
///
/// Always `200`; a down store only changes the `database` field.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Health check could not reach the store");
            "disconnected"
        }
    };

    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "database": database,
        "timestamp": Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// POST /api/calculate/stream
// ---------------------------------------------------------------------------

/// Validate the request, create the calculation, and stream it.
///
/// The session runs on its own task. The response body drains the
/// session's channel; dropping the body closes the channel, which the
/// session observes as a client disconnect.
///
/// # Errors
///
/// `400` for an undecodable body or out-of-range values, `503` when the
/// calculation record cannot be created.
pub async fn calculate_stream(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CalculationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = validate(payload)?;

    let (sink, rx) = ChannelSink::channel(STREAM_BUFFER, state.session.idle_timeout());
    let session = Session::create(
        Arc::clone(&state.store),
        params,
        sink,
        state.session.clone(),
    )
    .await?;

    info!(calculation_id = %session.calculation_id(), "Streaming calculation");
    tokio::spawn(session.run());

    let headers = [
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(event_stream(rx)).keep_alive(KeepAlive::default())))
}

/// Adapt the session's receiver into SSE `data:` frames.
fn event_stream(
    rx: mpsc::Receiver<StreamMessage>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        let event = Event::default().json_data(&message).unwrap_or_else(|e| {
            warn!(error = %e, kind = message.kind(), "Cannot encode stream message");
            Event::default().comment("unencodable message")
        });
        Some((Ok(event), rx))
    })
}

// ---------------------------------------------------------------------------
// POST /api/calculate
// ---------------------------------------------------------------------------

/// Run a calculation without pacing and return every step at once.
///
/// # Errors
///
/// `400` and `503` as for the streaming endpoint; `500` with the engine's
/// message when the calculation fails.
pub async fn calculate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CalculationRequest>, JsonRejection>,
) -> Result<Json<InstantCalculationResponse>, ApiError> {
    let params = validate(payload)?;

    // Room for start, every step, and the terminal message.
    let capacity = usize::try_from(params.exponent())
        .unwrap_or(usize::MAX)
        .saturating_add(2);
    let (sink, mut rx) = ChannelSink::channel(capacity, state.session.idle_timeout());
    let config = SessionConfig {
        step_delay_ms: 0,
        ..state.session.clone()
    };
    let session = Session::create(Arc::clone(&state.store), params, sink, config).await?;
    let report = session.run().await;

    match report.outcome {
        SessionOutcome::Completed => {}
        SessionOutcome::Failed { message } => return Err(ApiError::Internal(message)),
        SessionOutcome::Disconnected { reason } => {
            return Err(ApiError::Internal(format!("calculation interrupted: {reason}")));
        }
    }

    let mut linear_logs = Vec::new();
    let mut exponential_logs = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let StreamMessage::Step {
            step,
            linear,
            exponential,
            timestamp,
        } = message
        {
            linear_logs.push(StepLog {
                step,
                operation: linear.operation,
                result: linear.result,
                timestamp,
            });
            exponential_logs.push(StepLog {
                step,
                operation: exponential.operation,
                result: exponential.result,
                timestamp,
            });
        }
    }

    let calculation = report.calculation;
    let (Some(linear_result), Some(exponential_result), Some(total_steps), Some(completed_at)) = (
        calculation.linear_result,
        calculation.exponential_result,
        calculation.total_steps,
        calculation.completed_at,
    ) else {
        return Err(ApiError::Internal(format!(
            "calculation {} completed without results",
            calculation.id
        )));
    };

    Ok(Json(InstantCalculationResponse {
        calculation_id: calculation.id,
        base: calculation.base,
        exponent: calculation.exponent,
        linear_result,
        exponential_result,
        linear_logs,
        exponential_logs,
        total_steps,
        started_at: calculation.started_at,
        completed_at,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/calculations
// ---------------------------------------------------------------------------

/// List the most recent calculations, newest first.
///
/// # Errors
///
/// `400` for a malformed `limit`, `503` when the store is unreachable.
pub async fn list_calculations(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidQuery(e.body_text()))?;
    let limit = query.resolve(DEFAULT_CALCULATIONS_LIMIT, MAX_CALCULATIONS_LIMIT);
    let calculations = state.store.recent_calculations(limit).await?;
    Ok(Json(json!({ "calculations": calculations })))
}

// ---------------------------------------------------------------------------
// GET /api/events
// ---------------------------------------------------------------------------

/// List the most recent events across all calculations, newest first.
///
/// # Errors
///
/// `400` for a malformed `limit`, `503` when the store is unreachable.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidQuery(e.body_text()))?;
    let limit = query.resolve(DEFAULT_EVENTS_LIMIT, MAX_EVENTS_LIMIT);
    let events = state.store.recent_events(limit).await?;
    Ok(Json(json!({ "count": events.len(), "events": events })))
}

// ---------------------------------------------------------------------------
// GET /api/events/{calculation_id}
// ---------------------------------------------------------------------------

/// All events of one calculation, oldest first.
///
/// An unknown id yields an empty list.
///
/// # Errors
///
/// `400` for an id that is not a UUID, `503` when the store is unreachable.
pub async fn get_calculation_events(
    State(state): State<Arc<AppState>>,
    Path(calculation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id: CalculationId = calculation_id
        .parse()
        .map_err(|e| ApiError::InvalidUuid(format!("{calculation_id}: {e}")))?;
    let events = state.store.events_for(id).await?;
    Ok(Json(json!({ "count": events.len(), "events": events })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_defaulted_and_clamped() {
        assert_eq!(LimitQuery::default().resolve(10, 100), 10);
        assert_eq!(LimitQuery { limit: Some(0) }.resolve(10, 100), 1);
        assert_eq!(LimitQuery { limit: Some(5000) }.resolve(50, 500), 500);
        assert_eq!(LimitQuery { limit: Some(25) }.resolve(10, 100), 25);
    }
}
