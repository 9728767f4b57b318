//! Enumeration types for calculations and their events.
//!
//! The string forms of [`CalculationStatus`] and [`EventType`] are part
//! of the storage contract: they match the `PostgreSQL` enum labels in
//! the `growth-db` migrations and the JSON the query endpoints return.
//! Adding a variant is a schema change.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Error returned when a stored label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: {label}")]
pub struct UnknownLabel {
    /// Which enumeration was being parsed.
    pub kind: &'static str,
    /// The label that failed to parse.
    pub label: String,
}

// ---------------------------------------------------------------------------
// Calculation status
// ---------------------------------------------------------------------------

/// Lifecycle status of a calculation.
///
/// Starts as [`InProgress`](Self::InProgress) and moves exactly once to
/// one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CalculationStatus {
    /// Steps are still being produced.
    InProgress,
    /// Every step was produced and results were recorded.
    Completed,
    /// The calculation stopped on an error.
    Failed,
}

impl CalculationStatus {
    /// The storage label for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed from this status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownLabel {
                kind: "calculation status",
                label: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The kind of occurrence a [`CalculationEvent`](crate::CalculationEvent) records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventType {
    /// The calculation record was created.
    CalculationStarted,
    /// The linear sequence began.
    LinearStarted,
    /// One linear step was computed.
    LinearStep,
    /// The linear sequence produced its final value.
    LinearCompleted,
    /// The exponential sequence began.
    ExponentialStarted,
    /// One exponential step was computed.
    ExponentialStep,
    /// The exponential sequence produced its final value.
    ExponentialCompleted,
    /// The calculation finished successfully.
    CalculationCompleted,
    /// The calculation stopped on an error.
    CalculationError,
}

impl EventType {
    /// Every event type, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::CalculationStarted,
        Self::LinearStarted,
        Self::LinearStep,
        Self::LinearCompleted,
        Self::ExponentialStarted,
        Self::ExponentialStep,
        Self::ExponentialCompleted,
        Self::CalculationCompleted,
        Self::CalculationError,
    ];

    /// The storage label for this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CalculationStarted => "calculation_started",
            Self::LinearStarted => "linear_started",
            Self::LinearStep => "linear_step",
            Self::LinearCompleted => "linear_completed",
            Self::ExponentialStarted => "exponential_started",
            Self::ExponentialStep => "exponential_step",
            Self::ExponentialCompleted => "exponential_completed",
            Self::CalculationCompleted => "calculation_completed",
            Self::CalculationError => "calculation_error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|et| et.as_str() == s)
            .ok_or_else(|| UnknownLabel {
                kind: "event type",
                label: s.to_owned(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_match_serde() {
        for status in [
            CalculationStatus::InProgress,
            CalculationStatus::Completed,
            CalculationStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<CalculationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!CalculationStatus::InProgress.is_terminal());
        assert!(CalculationStatus::Completed.is_terminal());
        assert!(CalculationStatus::Failed.is_terminal());
    }

    #[test]
    fn event_type_labels_match_serde() {
        for et in EventType::ALL {
            let json = serde_json::to_string(&et).unwrap();
            assert_eq!(json, format!("\"{}\"", et.as_str()));
            assert_eq!(et.as_str().parse::<EventType>().unwrap(), et);
        }
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let err = "paused".parse::<CalculationStatus>().unwrap_err();
        assert_eq!(err.label, "paused");
        assert!("tick_start".parse::<EventType>().is_err());
    }
}
