//! The [`CalculationStore`] seam.
//!
//! The gateway talks to persistence only through this trait so the
//! session controller can run against `PostgreSQL` in production and
//! against [`MemoryStore`](crate::MemoryStore) in tests. Operations are
//! keyed by calculation id; implementations must tolerate concurrent
//! sessions writing different calculations at the same time.

use async_trait::async_trait;
use growth_types::{Calculation, CalculationEvent, CalculationId, Finalization};

use crate::error::DbError;

/// Durable record of calculations and their events.
#[async_trait]
pub trait CalculationStore: Send + Sync {
    /// Insert a new calculation record.
    async fn create_calculation(&self, calculation: &Calculation) -> Result<(), DbError>;

    /// Move an `in_progress` calculation to its terminal state.
    ///
    /// Status, `completed_at` and (on success) the result fields are
    /// written in a single update.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] for an unknown id and
    /// [`DbError::Transition`] if the calculation is already terminal.
    async fn finalize_calculation(
        &self,
        id: CalculationId,
        finalization: &Finalization,
    ) -> Result<(), DbError>;

    /// Fetch one calculation.
    async fn get_calculation(&self, id: CalculationId) -> Result<Option<Calculation>, DbError>;

    /// The most recently started calculations, newest first.
    async fn recent_calculations(&self, limit: u32) -> Result<Vec<Calculation>, DbError>;

    /// Append an event. Events are never updated or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning calculation does not exist.
    async fn append_event(&self, event: &CalculationEvent) -> Result<(), DbError>;

    /// Every event of one calculation, oldest first. Events with equal
    /// timestamps keep insertion order.
    async fn events_for(&self, id: CalculationId) -> Result<Vec<CalculationEvent>, DbError>;

    /// The most recent events across all calculations, newest first.
    async fn recent_events(&self, limit: u32) -> Result<Vec<CalculationEvent>, DbError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), DbError>;

    /// Release connections at shutdown.
    async fn close(&self) {}
}
