//! Client-facing wire types.
//!
//! [`StreamMessage`] is the event-stream protocol: every streamed
//! calculation is one `start`, zero or more `step`s, then exactly one
//! `complete` or `error`. Each message is framed as `data: <json>` and
//! terminated by a blank line.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

use crate::ids::CalculationId;

/// Body of `POST /api/calculate` and `POST /api/calculate/stream`.
///
/// Ranges are not checked here; the engine validates them so that the
/// same rules apply to every entry point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CalculationRequest {
    /// The growth base.
    pub base: f64,
    /// Number of steps. Must be an integer; `4.0` is accepted as `4`.
    #[ts(type = "number")]
    #[serde(deserialize_with = "integral_exponent")]
    pub exponent: i64,
}

/// Largest magnitude below which every whole `f64` is an exact integer (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Accept JSON integers and whole-number floats; reject `2.5`.
fn integral_exponent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    struct IntegralVisitor;

    impl Visitor<'_> for IntegralVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            // Anything this large is out of range anyway.
            Ok(i64::try_from(v).unwrap_or(i64::MAX))
        }

        #[allow(clippy::cast_possible_truncation)]
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if !v.is_finite() || v.fract().abs() > 0.0 || v.abs() > MAX_EXACT_FLOAT {
                return Err(E::invalid_value(Unexpected::Float(v), &self));
            }
            Ok(v as i64)
        }
    }

    deserializer.deserialize_any(IntegralVisitor)
}

/// One side (linear or exponential) of a streamed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Operation {
    /// Human-readable operation, e.g. `2 × 3` or `2^3`.
    pub operation: String,
    /// The value it produced.
    pub result: f64,
}

/// A message on the calculation event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum StreamMessage {
    /// The calculation record exists and steps are about to begin.
    Start {
        /// Id of the new calculation.
        calculation_id: CalculationId,
        /// The requested base.
        base: f64,
        /// The requested number of steps.
        exponent: u32,
    },
    /// One step of both sequences.
    Step {
        /// 1-indexed step number.
        step: u32,
        /// Linear side of the step.
        linear: Operation,
        /// Exponential side of the step.
        exponential: Operation,
        /// When the step was produced.
        timestamp: DateTime<Utc>,
    },
    /// All steps finished.
    Complete {
        /// Id of the calculation.
        calculation_id: CalculationId,
        /// Final linear value.
        linear_result: f64,
        /// Final exponential value.
        exponential_result: f64,
        /// Number of steps produced.
        total_steps: u32,
        /// When the calculation started.
        started_at: DateTime<Utc>,
        /// When the calculation finished.
        completed_at: DateTime<Utc>,
    },
    /// The calculation failed. Replaces `complete`.
    Error {
        /// Description of the failure.
        message: String,
    },
}

impl StreamMessage {
    /// The `type` discriminator as it appears on the wire.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Step { .. } => "step",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this message ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// One entry of the per-sequence logs in an instant calculation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StepLog {
    /// 1-indexed step number.
    pub step: u32,
    /// Human-readable operation.
    pub operation: String,
    /// The value it produced.
    pub result: f64,
    /// When the step was produced.
    pub timestamp: DateTime<Utc>,
}

/// Body returned by `POST /api/calculate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct InstantCalculationResponse {
    /// Id of the calculation.
    pub calculation_id: CalculationId,
    /// The requested base.
    pub base: f64,
    /// The requested number of steps.
    pub exponent: u32,
    /// Final linear value.
    pub linear_result: f64,
    /// Final exponential value.
    pub exponential_result: f64,
    /// Every linear step.
    pub linear_logs: Vec<StepLog>,
    /// Every exponential step.
    pub exponential_logs: Vec<StepLog>,
    /// Number of steps produced.
    pub total_steps: u32,
    /// When the calculation started.
    pub started_at: DateTime<Utc>,
    /// When the calculation finished.
    pub completed_at: DateTime<Utc>,
}
