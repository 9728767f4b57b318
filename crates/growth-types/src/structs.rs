//! Persisted records: [`Calculation`] and [`CalculationEvent`].
//!
//! A [`Calculation`] owns its lifecycle through [`Calculation::complete`]
//! and [`Calculation::fail`]; both return the [`Finalization`] a store
//! needs to write the terminal state in a single update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{CalculationStatus, EventType};
use crate::ids::{CalculationId, EventId};

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

/// One user-initiated growth calculation.
///
/// `completed_at`, `linear_result`, `exponential_result` and
/// `total_steps` are written together on success. A failed calculation
/// gets a `completed_at` but never any result fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Calculation {
    /// Unique calculation identifier.
    pub id: CalculationId,
    /// The growth base (positive, finite).
    pub base: f64,
    /// Number of steps to compute (1 to 100).
    pub exponent: u32,
    /// Current lifecycle status.
    pub status: CalculationStatus,
    /// When the record was created.
    pub started_at: DateTime<Utc>,
    /// When the record reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Final linear value (`base * exponent`).
    pub linear_result: Option<f64>,
    /// Final exponential value (`base ^ exponent`).
    pub exponential_result: Option<f64>,
    /// Number of steps produced.
    pub total_steps: Option<u32>,
}

/// Error returned when a terminal calculation is asked to transition again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("calculation {id} is already {status}")]
pub struct TransitionError {
    /// The calculation that rejected the transition.
    pub id: CalculationId,
    /// Its current (terminal) status.
    pub status: CalculationStatus,
}

/// The terminal state written to a calculation record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finalization {
    /// All steps were produced.
    Completed {
        /// Completion time.
        completed_at: DateTime<Utc>,
        /// Final linear value.
        linear_result: f64,
        /// Final exponential value.
        exponential_result: f64,
        /// Number of steps produced.
        total_steps: u32,
    },
    /// The calculation stopped early.
    Failed {
        /// Failure time.
        completed_at: DateTime<Utc>,
    },
}

impl Finalization {
    /// The status this finalization moves a calculation to.
    pub const fn status(&self) -> CalculationStatus {
        match self {
            Self::Completed { .. } => CalculationStatus::Completed,
            Self::Failed { .. } => CalculationStatus::Failed,
        }
    }

    /// The terminal timestamp.
    pub const fn completed_at(&self) -> DateTime<Utc> {
        match self {
            Self::Completed { completed_at, .. } | Self::Failed { completed_at } => *completed_at,
        }
    }
}

impl Calculation {
    /// Create a fresh `in_progress` calculation.
    pub fn new(base: f64, exponent: u32) -> Self {
        Self::with_id(CalculationId::new(), base, exponent, Utc::now())
    }

    /// Create an `in_progress` calculation with an explicit id and start time.
    pub const fn with_id(
        id: CalculationId,
        base: f64,
        exponent: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            base,
            exponent,
            status: CalculationStatus::InProgress,
            started_at,
            completed_at: None,
            linear_result: None,
            exponential_result: None,
            total_steps: None,
        }
    }

    /// Mark the calculation as completed with its final results.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the calculation is already terminal.
    pub fn complete(
        &mut self,
        completed_at: DateTime<Utc>,
        linear_result: f64,
        exponential_result: f64,
        total_steps: u32,
    ) -> Result<Finalization, TransitionError> {
        let finalization = Finalization::Completed {
            completed_at,
            linear_result,
            exponential_result,
            total_steps,
        };
        self.apply(&finalization)?;
        Ok(finalization)
    }

    /// Mark the calculation as failed. Result fields stay empty.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the calculation is already terminal.
    pub fn fail(&mut self, completed_at: DateTime<Utc>) -> Result<Finalization, TransitionError> {
        let finalization = Finalization::Failed { completed_at };
        self.apply(&finalization)?;
        Ok(finalization)
    }

    /// Apply a finalization computed elsewhere (used by stores).
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the calculation is already terminal.
    pub const fn apply(&mut self, finalization: &Finalization) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                id: self.id,
                status: self.status,
            });
        }

        self.status = finalization.status();
        self.completed_at = Some(finalization.completed_at());
        if let Finalization::Completed {
            linear_result,
            exponential_result,
            total_steps,
            ..
        } = *finalization
        {
            self.linear_result = Some(linear_result);
            self.exponential_result = Some(exponential_result);
            self.total_steps = Some(total_steps);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CalculationEvent
// ---------------------------------------------------------------------------

/// An immutable audit record of something that happened to a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CalculationEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// The calculation this event belongs to.
    pub calculation_id: CalculationId,
    /// What happened.
    pub event_type: EventType,
    /// Human-readable description.
    pub message: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload (step number, result, error text).
    pub data: Option<serde_json::Value>,
}

impl CalculationEvent {
    /// Create a new event with a fresh id.
    pub fn new(
        calculation_id: CalculationId,
        event_type: EventType,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: EventId::new(),
            calculation_id,
            event_type,
            message: message.into(),
            timestamp,
            data,
        }
    }

    /// The `step` field of the payload, if present.
    pub fn step(&self) -> Option<u64> {
        self.data
            .as_ref()
            .and_then(|d| d.get("step"))
            .and_then(serde_json::Value::as_u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn new_calculation_is_in_progress_without_results() {
        let calc = Calculation::new(2.0, 10);
        assert_eq!(calc.status, CalculationStatus::InProgress);
        assert!(calc.completed_at.is_none());
        assert!(calc.linear_result.is_none());
        assert!(calc.exponential_result.is_none());
        assert!(calc.total_steps.is_none());
    }

    #[test]
    fn complete_sets_all_result_fields_together() {
        let mut calc = Calculation::new(2.0, 10);
        let now = Utc::now();
        let fin = calc.complete(now, 20.0, 1024.0, 10).unwrap();

        assert_eq!(fin.status(), CalculationStatus::Completed);
        assert_eq!(calc.status, CalculationStatus::Completed);
        assert_eq!(calc.completed_at, Some(now));
        assert_eq!(calc.linear_result, Some(20.0));
        assert_eq!(calc.exponential_result, Some(1024.0));
        assert_eq!(calc.total_steps, Some(10));
    }

    #[test]
    fn fail_leaves_results_empty() {
        let mut calc = Calculation::new(3.0, 5);
        let fin = calc.fail(Utc::now()).unwrap();

        assert_eq!(fin.status(), CalculationStatus::Failed);
        assert_eq!(calc.status, CalculationStatus::Failed);
        assert!(calc.completed_at.is_some());
        assert!(calc.linear_result.is_none());
        assert!(calc.exponential_result.is_none());
        assert!(calc.total_steps.is_none());
    }

    #[test]
    fn terminal_transition_happens_once() {
        let mut calc = Calculation::new(3.0, 5);
        calc.complete(Utc::now(), 15.0, 243.0, 5).unwrap();

        let err = calc.fail(Utc::now()).unwrap_err();
        assert_eq!(err.status, CalculationStatus::Completed);
        assert_eq!(calc.status, CalculationStatus::Completed);
        assert!(calc.complete(Utc::now(), 1.0, 1.0, 1).is_err());
        assert_eq!(calc.linear_result, Some(15.0));
    }

    #[test]
    fn event_step_reads_payload() {
        let id = CalculationId::new();
        let event = CalculationEvent::new(
            id,
            EventType::LinearStep,
            "Step 3",
            Utc::now(),
            Some(serde_json::json!({ "step": 3, "result": 6.0 })),
        );
        assert_eq!(event.step(), Some(3));

        let bare = CalculationEvent::new(id, EventType::CalculationStarted, "go", Utc::now(), None);
        assert_eq!(bare.step(), None);
    }
}
