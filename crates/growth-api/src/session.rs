//! The streaming session controller.
//!
//! One [`Session`] owns one calculation from creation to its terminal
//! state and writes every message for it into one [`StreamSink`].
//!
//! ```text
//! Created --run--> Running --all steps--> Completed
//!                     |
//!                     +--engine error---> Failed
//!                     |
//!                     +--client gone----> Disconnected (no error message)
//! ```
//!
//! Step production and delivery are strictly sequential: step `i + 1` is
//! not computed until step `i` was accepted by the sink. A session is
//! consumed by [`Session::run`], so it reaches a terminal state at most
//! once and its sink is closed exactly once, when `run` returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use growth_core::{DisconnectPolicy, GrowthEngine, GrowthParams, SessionConfig};
use growth_db::{CalculationStore, DbError};
use growth_types::{Calculation, CalculationId, Finalization, StreamMessage};
use tracing::{debug, error, info, warn};

use crate::emitter::EventEmitter;
use crate::sink::{SinkError, StreamSink};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The calculation record exists; nothing has been sent.
    Created,
    /// Steps are being produced.
    Running,
    /// Every step was delivered and `complete` was sent.
    Completed,
    /// The engine failed and `error` was sent.
    Failed,
    /// The client went away before the calculation finished.
    Disconnected,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// All steps produced.
    Completed,
    /// The calculation failed with this message.
    Failed {
        /// The message sent to the client.
        message: String,
    },
    /// The client stopped listening.
    Disconnected {
        /// What the sink reported.
        reason: SinkError,
    },
}

/// Summary returned by [`Session::run`].
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// The calculation as the session last saw it.
    pub calculation: Calculation,
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// `step` messages accepted by the sink.
    pub steps_sent: u32,
    /// Steps pulled from the engine, including one that failed.
    pub steps_computed: u32,
    /// Event rows that could not be persisted.
    pub event_write_failures: u32,
    /// Whether a terminal status was written to the store.
    pub finalized: bool,
}

/// Why the step loop stopped early.
enum Halt {
    Engine(growth_core::EngineError),
    Sink(SinkError),
}

/// Controller for one calculation and one output stream.
pub struct Session<S> {
    calculation: Calculation,
    engine: GrowthEngine,
    store: Arc<dyn CalculationStore>,
    emitter: EventEmitter,
    sink: S,
    config: SessionConfig,
    state: SessionState,
    steps_sent: u32,
    steps_computed: u32,
    finalized: bool,
}

impl<S: StreamSink> Session<S> {
    /// Persist a new `in_progress` calculation and return its session.
    ///
    /// # Errors
    ///
    /// Returns the store error if the calculation record cannot be
    /// created. Nothing has been sent to the sink in that case.
    pub async fn create(
        store: Arc<dyn CalculationStore>,
        params: GrowthParams,
        sink: S,
        config: SessionConfig,
    ) -> Result<Self, DbError> {
        let calculation = Calculation::new(params.base(), params.exponent());
        store.create_calculation(&calculation).await?;

        info!(
            calculation_id = %calculation.id,
            base = calculation.base,
            exponent = calculation.exponent,
            "Calculation created"
        );

        Ok(Self {
            emitter: EventEmitter::new(calculation.id, Arc::clone(&store)),
            calculation,
            engine: GrowthEngine::new(params),
            store,
            sink,
            config,
            state: SessionState::Created,
            steps_sent: 0,
            steps_computed: 0,
            finalized: false,
        })
    }

    /// Id of the calculation this session drives.
    pub const fn calculation_id(&self) -> CalculationId {
        self.calculation.id
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the calculation to a terminal state and close the sink.
    pub async fn run(mut self) -> SessionReport {
        self.state = SessionState::Running;

        let outcome = match self.drive().await {
            Ok(totals) => self.complete(totals).await,
            Err(Halt::Engine(err)) => self.fail(err.to_string()).await,
            Err(Halt::Sink(reason)) => self.disconnected(reason).await,
        };

        info!(
            calculation_id = %self.calculation.id,
            state = ?self.state,
            steps_sent = self.steps_sent,
            event_write_failures = self.emitter.write_failures(),
            finalized = self.finalized,
            "Session finished"
        );

        SessionReport {
            calculation: self.calculation,
            outcome,
            steps_sent: self.steps_sent,
            steps_computed: self.steps_computed,
            event_write_failures: self.emitter.write_failures(),
            finalized: self.finalized,
        }
    }

    /// Send `start` and every step. Returns the final linear and
    /// exponential values.
    async fn drive(&mut self) -> Result<(f64, f64), Halt> {
        let start = self.emitter.started(&self.calculation).await;
        self.sink.send(start).await.map_err(Halt::Sink)?;

        let exponent = self.calculation.exponent;
        let delay = self.config.step_delay();
        // Step 0: base * 0 and base ^ 0.
        let mut totals = (0.0, 1.0);

        let mut steps = self.engine.steps();
        loop {
            // Checked before pulling, so a departed client costs no extra step.
            if self.sink.is_closed() {
                return Err(Halt::Sink(SinkError::Disconnected));
            }
            let Some(item) = steps.next() else {
                break;
            };
            self.steps_computed = self.steps_computed.saturating_add(1);

            let step = item.map_err(Halt::Engine)?;
            let message = self.emitter.step(&step).await;
            self.sink.send(message).await.map_err(Halt::Sink)?;
            self.steps_sent = self.steps_sent.saturating_add(1);
            totals = (step.linear_result, step.exponential_result);

            debug!(
                calculation_id = %self.calculation.id,
                step = step.step,
                linear = step.linear_result,
                exponential = step.exponential_result,
                "Step sent"
            );

            if step.step < exponent && !delay.is_zero() {
                self.pace(delay).await?;
            }
        }

        Ok(totals)
    }

    /// Wait between steps, unless the client leaves first.
    async fn pace(&self, delay: Duration) -> Result<(), Halt> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = self.sink.closed() => Err(Halt::Sink(SinkError::Disconnected)),
        }
    }

    async fn complete(&mut self, (linear, exponential): (f64, f64)) -> SessionOutcome {
        let exponent = self.calculation.exponent;
        let finalization = match self
            .calculation
            .complete(Utc::now(), linear, exponential, exponent)
        {
            Ok(finalization) => finalization,
            Err(e) => {
                error!(calculation_id = %self.calculation.id, error = %e, "Cannot complete calculation");
                return self.fail(e.to_string()).await;
            }
        };
        self.persist_terminal(&finalization).await;
        self.state = SessionState::Completed;

        let Some(message) = self.emitter.completed(&self.calculation).await else {
            error!(calculation_id = %self.calculation.id, "Completed calculation has no results");
            return SessionOutcome::Completed;
        };
        if let Err(reason) = self.sink.send(message).await {
            debug!(calculation_id = %self.calculation.id, %reason, "Client left before completion message");
        }
        SessionOutcome::Completed
    }

    async fn fail(&mut self, message: String) -> SessionOutcome {
        warn!(calculation_id = %self.calculation.id, error = %message, "Calculation failed");

        match self.calculation.fail(Utc::now()) {
            Ok(finalization) => self.persist_terminal(&finalization).await,
            Err(e) => error!(calculation_id = %self.calculation.id, error = %e, "Cannot fail calculation"),
        }
        self.state = SessionState::Failed;

        let error_message: StreamMessage = self.emitter.failed(&message).await;
        if let Err(reason) = self.sink.send(error_message).await {
            debug!(calculation_id = %self.calculation.id, %reason, "Client left before error message");
        }
        SessionOutcome::Failed { message }
    }

    async fn disconnected(&mut self, reason: SinkError) -> SessionOutcome {
        info!(
            calculation_id = %self.calculation.id,
            %reason,
            steps_sent = self.steps_sent,
            policy = ?self.config.disconnect_policy,
            "Client disconnected mid-stream"
        );
        self.state = SessionState::Disconnected;

        if self.config.disconnect_policy == DisconnectPolicy::MarkFailed {
            match self.calculation.fail(Utc::now()) {
                Ok(finalization) => self.persist_terminal(&finalization).await,
                Err(e) => error!(calculation_id = %self.calculation.id, error = %e, "Cannot fail calculation"),
            }
        }
        SessionOutcome::Disconnected { reason }
    }

    /// Write the terminal status, retrying transient failures.
    async fn persist_terminal(&mut self, finalization: &Finalization) {
        let attempts = self.config.finalize_attempts.max(1);

        for attempt in 1..=attempts {
            match self
                .store
                .finalize_calculation(self.calculation.id, finalization)
                .await
            {
                Ok(()) => {
                    self.finalized = true;
                    return;
                }
                Err(e @ (DbError::Transition(_) | DbError::NotFound(_))) => {
                    error!(calculation_id = %self.calculation.id, error = %e, "Terminal status rejected");
                    return;
                }
                Err(e) => warn!(
                    calculation_id = %self.calculation.id,
                    attempt,
                    attempts,
                    error = %e,
                    "Failed to persist terminal status"
                ),
            }
        }

        error!(
            calculation_id = %self.calculation.id,
            status = %finalization.status(),
            "Giving up on terminal status write"
        );
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic,
    clippy::arithmetic_side_effects
)]
mod tests {
    use async_trait::async_trait;
    use growth_db::MemoryStore;
    use growth_types::{CalculationStatus, EventType};
    use tokio::sync::mpsc;

    use super::*;
    use crate::sink::ChannelSink;

    /// Delivers into an unbounded channel and reports a disconnect once
    /// `cutoff` step messages have gone through.
    struct CutoffSink {
        tx: mpsc::UnboundedSender<StreamMessage>,
        cutoff: Option<u32>,
        steps: u32,
    }

    impl CutoffSink {
        fn new(cutoff: Option<u32>) -> (Self, mpsc::UnboundedReceiver<StreamMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx, cutoff, steps: 0 }, rx)
        }
    }

    #[async_trait]
    impl StreamSink for CutoffSink {
        async fn send(&mut self, message: StreamMessage) -> Result<(), SinkError> {
            if self.is_closed() {
                return Err(SinkError::Disconnected);
            }
            if matches!(message, StreamMessage::Step { .. }) {
                self.steps += 1;
            }
            if self.tx.send(message).is_err() {
                return Err(SinkError::Disconnected);
            }
            Ok(())
        }

        async fn closed(&self) {
            if !self.is_closed() {
                std::future::pending::<()>().await;
            }
        }

        fn is_closed(&self) -> bool {
            self.cutoff.is_some_and(|c| self.steps >= c)
        }
    }

    fn instant() -> SessionConfig {
        SessionConfig {
            step_delay_ms: 0,
            ..SessionConfig::default()
        }
    }

    fn params(base: f64, exponent: i64) -> GrowthParams {
        GrowthParams::new(base, exponent).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamMessage>) -> Vec<StreamMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    async fn run_collecting(
        store: &Arc<MemoryStore>,
        base: f64,
        exponent: i64,
        config: SessionConfig,
    ) -> (SessionReport, Vec<StreamMessage>) {
        let (sink, mut rx) = CutoffSink::new(None);
        let session = Session::create(store.clone(), params(base, exponent), sink, config)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Created);
        let report = session.run().await;
        let messages = drain(&mut rx);
        (report, messages)
    }

    #[tokio::test]
    async fn scenario_a_streams_every_step_then_completes() {
        let store = Arc::new(MemoryStore::new());
        let (report, messages) = run_collecting(&store, 2.0, 10, instant()).await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.steps_sent, 10);
        assert_eq!(report.steps_computed, 10);
        assert!(report.finalized);
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[0].kind(), "start");
        assert!(messages[1..11].iter().all(|m| m.kind() == "step"));

        let StreamMessage::Complete {
            calculation_id,
            linear_result,
            exponential_result,
            total_steps,
            ..
        } = &messages[11]
        else {
            panic!("last message must be complete");
        };
        assert_eq!(*calculation_id, report.calculation.id);
        assert_eq!(*linear_result, 20.0);
        assert_eq!(*exponential_result, 1024.0);
        assert_eq!(*total_steps, 10);

        let stored = store.get_calculation(*calculation_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::Completed);
        assert_eq!(stored.linear_result, Some(20.0));
        assert_eq!(stored.exponential_result, Some(1024.0));
        assert_eq!(stored.total_steps, Some(10));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn scenario_b_three_to_the_fifth() {
        let store = Arc::new(MemoryStore::new());
        let (report, messages) = run_collecting(&store, 3.0, 5, instant()).await;

        assert_eq!(report.calculation.linear_result, Some(15.0));
        assert_eq!(report.calculation.exponential_result, Some(243.0));
        assert!(matches!(
            messages.last(),
            Some(StreamMessage::Complete { linear_result, exponential_result, .. })
                if *linear_result == 15.0 && *exponential_result == 243.0
        ));
    }

    #[tokio::test]
    async fn every_step_message_has_a_persisted_event() {
        let store = Arc::new(MemoryStore::new());
        let (report, messages) = run_collecting(&store, 1.5, 7, instant()).await;
        let events = store.events_for(report.calculation.id).await.unwrap();

        for message in &messages {
            if let StreamMessage::Step { step, .. } = message {
                let matching = events
                    .iter()
                    .filter(|e| e.step() == Some(u64::from(*step)))
                    .count();
                assert_eq!(matching, 2, "step {step}");
            }
        }

        assert_eq!(events.first().unwrap().event_type, EventType::CalculationStarted);
        assert_eq!(events.last().unwrap().event_type, EventType::CalculationCompleted);
        assert!(events.iter().all(|e| e.event_type != EventType::CalculationError));
    }

    #[tokio::test]
    async fn overflow_fails_with_a_single_error_message() {
        let store = Arc::new(MemoryStore::new());
        let (report, messages) = run_collecting(&store, 1e10, 100, instant()).await;

        assert!(matches!(report.outcome, SessionOutcome::Failed { .. }));
        assert_eq!(report.steps_sent, 30);
        assert_eq!(report.steps_computed, 31);
        assert_eq!(messages.len(), 32);
        assert_eq!(messages.last().unwrap().kind(), "error");
        assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);

        let stored = store.get_calculation(report.calculation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::Failed);
        assert!(stored.completed_at.is_some());
        assert!(stored.linear_result.is_none());
        assert!(stored.exponential_result.is_none());
        assert!(stored.total_steps.is_none());

        let events = store.events_for(report.calculation.id).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::CalculationError);
        assert!(last.message.contains("overflow"));
    }

    #[tokio::test]
    async fn scenario_d_disconnect_stops_production() {
        let store = Arc::new(MemoryStore::new());
        let (sink, mut rx) = CutoffSink::new(Some(3));
        let session = Session::create(store.clone(), params(2.0, 10), sink, instant())
            .await
            .unwrap();
        let report = session.run().await;
        let messages = drain(&mut rx);

        assert_eq!(
            report.outcome,
            SessionOutcome::Disconnected {
                reason: SinkError::Disconnected
            }
        );
        assert_eq!(report.steps_sent, 3);
        assert_eq!(report.steps_computed, 3);
        assert!(!report.finalized);
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| !m.is_terminal()));

        let events = store.events_for(report.calculation.id).await.unwrap();
        assert!(events.iter().filter_map(|e| e.step()).all(|s| s <= 3));
        assert!(events.iter().all(|e| e.event_type != EventType::CalculationError));

        let stored = store.get_calculation(report.calculation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::InProgress);
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn disconnect_can_mark_failed() {
        let store = Arc::new(MemoryStore::new());
        let (sink, _rx) = CutoffSink::new(Some(3));
        let config = SessionConfig {
            disconnect_policy: DisconnectPolicy::MarkFailed,
            ..instant()
        };
        let session = Session::create(store.clone(), params(2.0, 10), sink, config)
            .await
            .unwrap();
        let report = session.run().await;

        assert!(report.finalized);
        let stored = store.get_calculation(report.calculation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::Failed);
        assert!(stored.linear_result.is_none());

        let events = store.events_for(report.calculation.id).await.unwrap();
        assert!(events.iter().all(|e| e.event_type != EventType::CalculationError));
    }

    #[tokio::test]
    async fn event_write_failures_do_not_abort_the_stream() {
        let store = Arc::new(MemoryStore::new());
        let (sink, mut rx) = CutoffSink::new(None);
        let session = Session::create(store.clone(), params(2.0, 4), sink, instant())
            .await
            .unwrap();
        store.set_event_writes_failing(true);
        let report = session.run().await;
        let messages = drain(&mut rx);

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert!(report.event_write_failures > 0);
        assert_eq!(messages.last().unwrap().kind(), "complete");

        let stored = store.get_calculation(report.calculation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::Completed);
    }

    #[tokio::test]
    async fn terminal_write_is_retried_once() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_finalizations(1);
        let (report, _) = run_collecting(&store, 2.0, 3, instant()).await;

        assert!(report.finalized);
        assert_eq!(store.finalize_calls(), 2);
        let stored = store.get_calculation(report.calculation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::Completed);
    }

    #[tokio::test]
    async fn terminal_write_gives_up_without_failing_the_client() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_finalizations(5);
        let (report, messages) = run_collecting(&store, 2.0, 3, instant()).await;

        assert!(!report.finalized);
        assert_eq!(store.finalize_calls(), 2);
        assert_eq!(messages.last().unwrap().kind(), "complete");
    }

    #[tokio::test]
    async fn create_fails_when_store_is_down() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let (sink, mut rx) = CutoffSink::new(None);
        let result = Session::create(store.clone(), params(2.0, 3), sink, instant()).await;

        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn repeated_requests_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let (first, _) = run_collecting(&store, 3.0, 5, instant()).await;
        let (second, _) = run_collecting(&store, 3.0, 5, instant()).await;

        assert_ne!(first.calculation.id, second.calculation.id);
        assert_eq!(first.calculation.linear_result, second.calculation.linear_result);
        assert_eq!(
            first.calculation.exponential_result,
            second.calculation.exponential_result
        );
        assert_eq!(store.calculation_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn steps_are_paced() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig {
            step_delay_ms: 1000,
            ..SessionConfig::default()
        };
        let started = tokio::time::Instant::now();
        let (report, _) = run_collecting(&store, 2.0, 5, config).await;

        assert_eq!(report.outcome, SessionOutcome::Completed);
        // Four pauses between five steps, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_reader_interrupts_pacing() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig {
            step_delay_ms: 1000,
            ..SessionConfig::default()
        };
        let (sink, mut rx) = ChannelSink::channel(1, config.idle_timeout());
        let session = Session::create(store.clone(), params(2.0, 10), sink, config)
            .await
            .unwrap();
        let calculation_id = session.calculation_id();

        let reader = tokio::spawn(async move {
            let mut steps = 0;
            while let Some(message) = rx.recv().await {
                if matches!(message, StreamMessage::Step { .. }) {
                    steps += 1;
                    if steps == 3 {
                        break;
                    }
                }
            }
        });

        let report = session.run().await;
        reader.await.unwrap();

        assert_eq!(
            report.outcome,
            SessionOutcome::Disconnected {
                reason: SinkError::Disconnected
            }
        );
        assert_eq!(report.steps_sent, 3);
        let events = store.events_for(calculation_id).await.unwrap();
        assert!(events.iter().filter_map(|e| e.step()).all(|s| s <= 3));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reader_times_out() {
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig {
            step_delay_ms: 0,
            idle_timeout_secs: 5,
            ..SessionConfig::default()
        };
        let (sink, mut rx) = ChannelSink::channel(1, config.idle_timeout());
        let session = Session::create(store.clone(), params(2.0, 10), sink, config)
            .await
            .unwrap();
        let report = session.run().await;

        assert_eq!(
            report.outcome,
            SessionOutcome::Disconnected {
                reason: SinkError::Stalled {
                    waited: Duration::from_secs(5)
                }
            }
        );
        assert_eq!(report.steps_sent, 0);
        assert_eq!(report.steps_computed, 1);

        // Only `start` made it; the stream closes without a terminal message.
        assert_eq!(rx.recv().await.unwrap().kind(), "start");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn no_step_is_computed_after_the_client_leaves() {
        let store = Arc::new(MemoryStore::new());
        let (sink, _rx) = CutoffSink::new(Some(1));
        let session = Session::create(store.clone(), params(2.0, 100), sink, instant())
            .await
            .unwrap();
        let report = session.run().await;

        assert_eq!(report.steps_sent, 1);
        assert_eq!(report.steps_computed, 1);
        assert!(matches!(report.outcome, SessionOutcome::Disconnected { .. }));
    }
}
