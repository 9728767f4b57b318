//! Shared application state for the gateway API server.
//!
//! [`AppState`] carries the calculation store and the session settings
//! every request handler needs. Sessions themselves are per request and
//! never stored here.

use std::sync::Arc;

use growth_core::SessionConfig;
use growth_db::CalculationStore;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Persistence for calculations and their events.
    pub store: Arc<dyn CalculationStore>,
    /// Pacing, timeout and disconnect settings for new sessions.
    pub session: SessionConfig,
}

impl AppState {
    /// Create application state over the given store.
    pub const fn new(store: Arc<dyn CalculationStore>, session: SessionConfig) -> Self {
        Self { store, session }
    }
}
