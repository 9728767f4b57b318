//! Error types for the gateway binary.
//!
//! [`GatewayError`] is the top-level error type that wraps all possible
//! failure modes during startup and serving.

/// Top-level error for the gateway binary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: growth_core::ConfigError,
    },

    /// The calculation store could not be opened or migrated.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: growth_db::DbError,
    },

    /// The HTTP server failed to start or stopped with an error.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: growth_api::ServerError,
    },
}
