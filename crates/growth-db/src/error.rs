//! Error types for the data layer.
//!
//! All store operations return [`DbError`], which wraps the underlying
//! [`sqlx`] errors and the domain errors a store can detect itself.

use growth_types::{CalculationId, TransitionError, UnknownLabel};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be turned back into a domain value.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The calculation does not exist.
    #[error("Calculation not found: {0}")]
    NotFound(CalculationId),

    /// The calculation is already in a terminal state.
    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    /// The store is not accepting operations.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<UnknownLabel> for DbError {
    fn from(err: UnknownLabel) -> Self {
        Self::Decode(err.to_string())
    }
}
