//! HTTP gateway for the Growth Pattern calculator.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Streaming endpoint** (`POST /api/calculate/stream`) that runs one
//!   calculation per request and pushes each step to the client as a
//!   server-sent event
//! - **Instant endpoint** (`POST /api/calculate`) returning the whole
//!   calculation in one JSON body
//! - **Query endpoints** for stored calculations and their audit events
//! - **Health endpoint** reporting store connectivity
//!
//! # Architecture
//!
//! Every streaming request owns a [`Session`] running on its own task.
//! The session computes a step, persists its events through the
//! [`EventEmitter`], and writes the client message into a
//! [`ChannelSink`] of capacity one, so a slow client slows production
//! and a departed client stops it.
//!
//! [`Session`]: session::Session
//! [`EventEmitter`]: emitter::EventEmitter
//! [`ChannelSink`]: sink::ChannelSink

pub mod emitter;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod session;
pub mod sink;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use session::{Session, SessionOutcome, SessionReport, SessionState};
pub use sink::{ChannelSink, SinkError, StreamSink};
pub use state::AppState;
