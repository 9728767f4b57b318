//! Calculation store for the Growth Pattern gateway.
//!
//! Every calculation gets a row in `calculations` and an append-only
//! trail in `calculation_events`. The gateway reaches both through the
//! [`CalculationStore`] trait.
//!
//! ```text
//! Session controller
//!     |
//!     +-- CalculationStore (trait)
//!         |-- PgCalculationStore  (PostgreSQL, production)
//!         +-- MemoryStore         (tests, local development)
//! ```
//!
//! # Modules
//!
//! - [`store`] -- The [`CalculationStore`] trait
//! - [`postgres`] -- `PostgreSQL` pool configuration and store
//! - [`memory`] -- In-memory store with fault injection
//! - [`error`] -- Shared error types

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use memory::MemoryStore;
pub use postgres::{CalculationRow, EventRow, PgCalculationStore, PostgresConfig};
pub use store::CalculationStore;
