//! Shared type definitions for the Growth Pattern gateway.
//!
//! Every crate in the workspace speaks in these types, and the wire types
//! flow to `TypeScript` via `ts-rs` for the browser client.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for calculations and events
//! - [`enums`] -- Calculation status and event type enumerations
//! - [`structs`] -- Persisted calculation and event records
//! - [`messages`] -- Request bodies and the event-stream protocol

pub mod enums;
pub mod ids;
pub mod messages;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{CalculationStatus, EventType, UnknownLabel};
pub use ids::{CalculationId, EventId};
pub use messages::{
    CalculationRequest, InstantCalculationResponse, Operation, StepLog, StreamMessage,
};
pub use structs::{Calculation, CalculationEvent, Finalization, TransitionError};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for the browser client.

    #[test]
    fn export_bindings() {
        // Files land in `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::CalculationId::export_all();
        let _ = crate::ids::EventId::export_all();

        let _ = crate::enums::CalculationStatus::export_all();
        let _ = crate::enums::EventType::export_all();

        let _ = crate::structs::Calculation::export_all();
        let _ = crate::structs::CalculationEvent::export_all();

        let _ = crate::messages::CalculationRequest::export_all();
        let _ = crate::messages::Operation::export_all();
        let _ = crate::messages::StreamMessage::export_all();
        let _ = crate::messages::StepLog::export_all();
        let _ = crate::messages::InstantCalculationResponse::export_all();
    }
}
