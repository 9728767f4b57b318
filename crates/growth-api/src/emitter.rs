//! Turns session occurrences into audit rows and client messages.
//!
//! Each emitter method first appends the matching
//! [`CalculationEvent`]s to the store and then returns the
//! [`StreamMessage`] the session should send, so the store is never
//! behind what the client has seen. A failed append is logged and
//! counted; it never stops the stream.
//!
//! Persisted rows per client message:
//!
//! | Message | Rows |
//! |---------|------|
//! | `start` | `calculation_started` |
//! | `step` | `linear_step`, `exponential_step` (step 1 adds `linear_started`, `exponential_started` first) |
//! | `complete` | `linear_completed`, `exponential_completed`, `calculation_completed` |
//! | `error` | `calculation_error` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use growth_core::GrowthStep;
use growth_db::CalculationStore;
use growth_types::{
    Calculation, CalculationEvent, CalculationId, EventType, Operation, StreamMessage,
};
use serde_json::json;
use tracing::warn;

/// Per-session event writer.
pub struct EventEmitter {
    calculation_id: CalculationId,
    store: Arc<dyn CalculationStore>,
    last_timestamp: Option<DateTime<Utc>>,
    written: u32,
    write_failures: u32,
}

impl EventEmitter {
    /// Create an emitter for one calculation.
    pub const fn new(calculation_id: CalculationId, store: Arc<dyn CalculationStore>) -> Self {
        Self {
            calculation_id,
            store,
            last_timestamp: None,
            written: 0,
            write_failures: 0,
        }
    }

    /// Rows successfully appended so far.
    pub const fn written(&self) -> u32 {
        self.written
    }

    /// Rows that could not be appended.
    pub const fn write_failures(&self) -> u32 {
        self.write_failures
    }

    /// `calculation_started`, then the `start` message.
    pub async fn started(&mut self, calculation: &Calculation) -> StreamMessage {
        self.record(
            EventType::CalculationStarted,
            format!(
                "Starting calculation: base={}, exponent={}",
                calculation.base, calculation.exponent
            ),
            Some(json!({ "base": calculation.base, "exponent": calculation.exponent })),
        )
        .await;

        StreamMessage::Start {
            calculation_id: calculation.id,
            base: calculation.base,
            exponent: calculation.exponent,
        }
    }

    /// Step rows, then the `step` message.
    pub async fn step(&mut self, step: &GrowthStep) -> StreamMessage {
        if step.step == 1 {
            self.record(
                EventType::LinearStarted,
                String::from("Linear sequence started"),
                Some(json!({ "type": "linear" })),
            )
            .await;
            self.record(
                EventType::ExponentialStarted,
                String::from("Exponential sequence started"),
                Some(json!({ "type": "exponential" })),
            )
            .await;
        }

        self.record(
            EventType::LinearStep,
            format!(
                "Step {}: {} = {}",
                step.step, step.linear_operation, step.linear_result
            ),
            Some(json!({
                "step": step.step,
                "operation": step.linear_operation,
                "result": step.linear_result,
                "type": "linear",
            })),
        )
        .await;
        let timestamp = self
            .record(
                EventType::ExponentialStep,
                format!(
                    "Step {}: {} = {}",
                    step.step, step.exponential_operation, step.exponential_result
                ),
                Some(json!({
                    "step": step.step,
                    "operation": step.exponential_operation,
                    "result": step.exponential_result,
                    "type": "exponential",
                })),
            )
            .await;

        StreamMessage::Step {
            step: step.step,
            linear: Operation {
                operation: step.linear_operation.clone(),
                result: step.linear_result,
            },
            exponential: Operation {
                operation: step.exponential_operation.clone(),
                result: step.exponential_result,
            },
            timestamp,
        }
    }

    /// Completion rows, then the `complete` message.
    ///
    /// Reads the finalized calculation; returns `None` if it carries no
    /// results (it was not completed).
    pub async fn completed(&mut self, calculation: &Calculation) -> Option<StreamMessage> {
        let linear_result = calculation.linear_result?;
        let exponential_result = calculation.exponential_result?;
        let total_steps = calculation.total_steps?;
        let completed_at = calculation.completed_at?;

        self.record(
            EventType::LinearCompleted,
            format!("Linear sequence completed: {linear_result}"),
            Some(json!({ "result": linear_result, "total_steps": total_steps })),
        )
        .await;
        self.record(
            EventType::ExponentialCompleted,
            format!("Exponential sequence completed: {exponential_result}"),
            Some(json!({ "result": exponential_result, "total_steps": total_steps })),
        )
        .await;
        self.record(
            EventType::CalculationCompleted,
            String::from("Calculation completed successfully"),
            Some(json!({
                "linear_result": linear_result,
                "exponential_result": exponential_result,
                "total_steps": total_steps,
            })),
        )
        .await;

        Some(StreamMessage::Complete {
            calculation_id: calculation.id,
            linear_result,
            exponential_result,
            total_steps,
            started_at: calculation.started_at,
            completed_at,
        })
    }

    /// `calculation_error`, then the `error` message.
    pub async fn failed(&mut self, message: &str) -> StreamMessage {
        self.record(
            EventType::CalculationError,
            format!("Error: {message}"),
            Some(json!({ "error": message })),
        )
        .await;

        StreamMessage::Error {
            message: message.to_owned(),
        }
    }

    /// Append one row and return its timestamp.
    async fn record(
        &mut self,
        event_type: EventType,
        message: String,
        data: Option<serde_json::Value>,
    ) -> DateTime<Utc> {
        let timestamp = self.next_timestamp();
        let event =
            CalculationEvent::new(self.calculation_id, event_type, message, timestamp, data);

        match self.store.append_event(&event).await {
            Ok(()) => self.written = self.written.saturating_add(1),
            Err(e) => {
                self.write_failures = self.write_failures.saturating_add(1);
                warn!(
                    calculation_id = %self.calculation_id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to persist calculation event"
                );
            }
        }
        timestamp
    }

    /// Wall-clock time, never earlier than the previous event's.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = self.last_timestamp.map_or(now, |last| last.max(now));
        self.last_timestamp = Some(ts);
        ts
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]
mod tests {
    use growth_core::{GrowthEngine, GrowthParams};
    use growth_db::MemoryStore;

    use super::*;

    async fn setup() -> (Arc<MemoryStore>, Calculation, EventEmitter) {
        let store = Arc::new(MemoryStore::new());
        let calc = Calculation::new(2.0, 3);
        store.create_calculation(&calc).await.unwrap();
        let emitter = EventEmitter::new(calc.id, Arc::clone(&store) as Arc<dyn CalculationStore>);
        (store, calc, emitter)
    }

    fn steps(base: f64, exponent: i64) -> Vec<GrowthStep> {
        GrowthEngine::new(GrowthParams::new(base, exponent).unwrap())
            .steps()
            .map(Result::unwrap)
            .collect()
    }

    #[tokio::test]
    async fn start_persists_before_returning() {
        let (store, calc, mut emitter) = setup().await;
        let msg = emitter.started(&calc).await;

        assert!(matches!(msg, StreamMessage::Start { calculation_id, .. } if calculation_id == calc.id));
        let events = store.events_for(calc.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::CalculationStarted);
        assert_eq!(emitter.written(), 1);
    }

    #[tokio::test]
    async fn first_step_opens_both_sequences() {
        let (store, calc, mut emitter) = setup().await;
        for step in steps(2.0, 3) {
            emitter.step(&step).await;
        }

        let kinds: Vec<_> = store
            .events_for(calc.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::LinearStarted,
                EventType::ExponentialStarted,
                EventType::LinearStep,
                EventType::ExponentialStep,
                EventType::LinearStep,
                EventType::ExponentialStep,
                EventType::LinearStep,
                EventType::ExponentialStep,
            ]
        );
    }

    #[tokio::test]
    async fn step_message_matches_persisted_step() {
        let (store, calc, mut emitter) = setup().await;
        let step = &steps(2.0, 3)[1];
        let msg = emitter.step(step).await;

        let StreamMessage::Step { step: n, exponential, timestamp, .. } = msg else {
            panic!("expected a step message");
        };
        assert_eq!(n, 2);
        assert_eq!(exponential.operation, "2^2");

        let events = store.events_for(calc.id).await.unwrap();
        let persisted = events.last().unwrap();
        assert_eq!(persisted.step(), Some(2));
        assert_eq!(persisted.timestamp, timestamp);
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let (store, calc, mut emitter) = setup().await;
        emitter.started(&calc).await;
        for step in steps(2.0, 3) {
            emitter.step(&step).await;
        }
        emitter.failed("boom").await;

        let events = store.events_for(calc.id).await.unwrap();
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn completed_requires_results() {
        let (store, mut calc, mut emitter) = setup().await;
        assert!(emitter.completed(&calc).await.is_none());
        assert!(store.events_for(calc.id).await.unwrap().is_empty());

        calc.complete(Utc::now(), 6.0, 8.0, 3).unwrap();
        let msg = emitter.completed(&calc).await.unwrap();
        assert!(matches!(msg, StreamMessage::Complete { total_steps: 3, .. }));

        let kinds: Vec<_> = store
            .events_for(calc.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::LinearCompleted,
                EventType::ExponentialCompleted,
                EventType::CalculationCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn failed_records_the_message() {
        let (store, calc, mut emitter) = setup().await;
        let msg = emitter.failed("arithmetic overflow").await;
        assert_eq!(
            msg,
            StreamMessage::Error {
                message: String::from("arithmetic overflow")
            }
        );

        let events = store.events_for(calc.id).await.unwrap();
        assert_eq!(events[0].event_type, EventType::CalculationError);
        assert_eq!(events[0].data.as_ref().unwrap()["error"], "arithmetic overflow");
    }

    #[tokio::test]
    async fn write_failures_do_not_stop_emission() {
        let (store, calc, mut emitter) = setup().await;
        store.set_event_writes_failing(true);

        let msg = emitter.started(&calc).await;
        assert_eq!(msg.kind(), "start");
        assert_eq!(emitter.written(), 0);
        assert_eq!(emitter.write_failures(), 1);
        assert!(store.events_for(calc.id).await.unwrap().is_empty());
    }
}
