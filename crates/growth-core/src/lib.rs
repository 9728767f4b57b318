//! Growth engine and configuration for the Growth Pattern gateway.
//!
//! # Modules
//!
//! - [`engine`] -- Step-by-step linear and exponential growth sequences.
//! - [`config`] -- Configuration loading from `growth-config.yaml` into
//!   strongly-typed structs.

pub mod config;
pub mod engine;

pub use config::{
    ConfigError, DisconnectPolicy, GatewayConfig, LogFormat, LoggingConfig, ServerSection,
    SessionConfig, StoreBackend, StoreConfig,
};
pub use engine::{EngineError, GrowthEngine, GrowthParams, GrowthStep, Steps};
