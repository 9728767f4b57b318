//! In-process [`CalculationStore`] backed by a read-write lock.
//!
//! Used by the test suites and by `store.backend: memory` for local
//! development. Faults can be injected to exercise the gateway's
//! persistence-failure paths without a database.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use growth_types::{Calculation, CalculationEvent, CalculationId, Finalization};
use tokio::sync::RwLock;

use crate::error::DbError;
use crate::store::CalculationStore;

#[derive(Debug, Default)]
struct Tables {
    calculations: BTreeMap<CalculationId, Calculation>,
    events: Vec<CalculationEvent>,
}

/// Memory-backed calculation store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    failing_event_writes: AtomicBool,
    failing_finalizations: AtomicU32,
    finalize_calls: AtomicU32,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`DbError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make [`CalculationStore::append_event`] fail while set.
    pub fn set_event_writes_failing(&self, failing: bool) {
        self.failing_event_writes.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` finalization attempts fail.
    pub fn fail_next_finalizations(&self, count: u32) {
        self.failing_finalizations.store(count, Ordering::SeqCst);
    }

    /// How many times [`CalculationStore::finalize_calculation`] was called.
    pub fn finalize_calls(&self) -> u32 {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    /// Number of stored calculations.
    pub async fn calculation_count(&self) -> usize {
        self.tables.read().await.calculations.len()
    }

    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable(String::from("memory store offline")));
        }
        Ok(())
    }

    fn take_finalize_fault(&self) -> bool {
        self.failing_finalizations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn take_limit<T>(items: impl Iterator<Item = T>, limit: u32) -> Vec<T> {
    items
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect()
}

#[async_trait]
impl CalculationStore for MemoryStore {
    async fn create_calculation(&self, calculation: &Calculation) -> Result<(), DbError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        tables
            .calculations
            .insert(calculation.id, calculation.clone());
        Ok(())
    }

    async fn finalize_calculation(
        &self,
        id: CalculationId,
        finalization: &Finalization,
    ) -> Result<(), DbError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.take_finalize_fault() {
            return Err(DbError::Unavailable(String::from(
                "injected finalization failure",
            )));
        }

        let mut tables = self.tables.write().await;
        let calculation = tables
            .calculations
            .get_mut(&id)
            .ok_or(DbError::NotFound(id))?;
        calculation.apply(finalization)?;
        Ok(())
    }

    async fn get_calculation(&self, id: CalculationId) -> Result<Option<Calculation>, DbError> {
        self.check_available()?;
        Ok(self.tables.read().await.calculations.get(&id).cloned())
    }

    async fn recent_calculations(&self, limit: u32) -> Result<Vec<Calculation>, DbError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut all: Vec<&Calculation> = tables.calculations.values().collect();
        all.sort_by_key(|c| Reverse((c.started_at, c.id)));
        Ok(take_limit(all.into_iter().cloned(), limit))
    }

    async fn append_event(&self, event: &CalculationEvent) -> Result<(), DbError> {
        self.check_available()?;
        if self.failing_event_writes.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable(String::from("injected event write failure")));
        }

        let mut tables = self.tables.write().await;
        if !tables.calculations.contains_key(&event.calculation_id) {
            return Err(DbError::NotFound(event.calculation_id));
        }
        tables.events.push(event.clone());
        Ok(())
    }

    async fn events_for(&self, id: CalculationId) -> Result<Vec<CalculationEvent>, DbError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut events: Vec<CalculationEvent> = tables
            .events
            .iter()
            .filter(|e| e.calculation_id == id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<CalculationEvent>, DbError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut events: Vec<&CalculationEvent> = tables.events.iter().rev().collect();
        events.sort_by_key(|e| Reverse(e.timestamp));
        Ok(take_limit(events.into_iter().cloned(), limit))
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.check_available()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use chrono::{Duration, Utc};
    use growth_types::{CalculationStatus, EventType};

    use super::*;

    async fn seeded() -> (MemoryStore, Calculation) {
        let store = MemoryStore::new();
        let calc = Calculation::new(2.0, 10);
        store.create_calculation(&calc).await.unwrap();
        (store, calc)
    }

    #[tokio::test]
    async fn create_and_get() {
        let (store, calc) = seeded().await;
        let fetched = store.get_calculation(calc.id).await.unwrap().unwrap();
        assert_eq!(fetched, calc);
        assert_eq!(store.calculation_count().await, 1);
    }

    #[tokio::test]
    async fn finalize_completed_writes_results() {
        let (store, calc) = seeded().await;
        let fin = Finalization::Completed {
            completed_at: Utc::now(),
            linear_result: 20.0,
            exponential_result: 1024.0,
            total_steps: 10,
        };
        store.finalize_calculation(calc.id, &fin).await.unwrap();

        let fetched = store.get_calculation(calc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, CalculationStatus::Completed);
        assert_eq!(fetched.total_steps, Some(10));
    }

    #[tokio::test]
    async fn finalize_twice_is_rejected() {
        let (store, calc) = seeded().await;
        let failed = Finalization::Failed {
            completed_at: Utc::now(),
        };
        store.finalize_calculation(calc.id, &failed).await.unwrap();
        let err = store.finalize_calculation(calc.id, &failed).await.unwrap_err();
        assert!(matches!(err, DbError::Transition(_)));
    }

    #[tokio::test]
    async fn finalize_unknown_is_not_found() {
        let store = MemoryStore::new();
        let id = CalculationId::new();
        let err = store
            .finalize_calculation(id, &Finalization::Failed { completed_at: Utc::now() })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn events_require_a_calculation() {
        let store = MemoryStore::new();
        let orphan = CalculationEvent::new(
            CalculationId::new(),
            EventType::CalculationStarted,
            "orphan",
            Utc::now(),
            None,
        );
        assert!(store.append_event(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn events_keep_insertion_order_for_equal_timestamps() {
        let (store, calc) = seeded().await;
        let ts = Utc::now();
        for et in [EventType::LinearStep, EventType::ExponentialStep, EventType::LinearStep] {
            let event = CalculationEvent::new(calc.id, et, et.as_str(), ts, None);
            store.append_event(&event).await.unwrap();
        }
        let earlier =
            CalculationEvent::new(calc.id, EventType::CalculationStarted, "start", ts - Duration::seconds(1), None);
        store.append_event(&earlier).await.unwrap();

        let events = store.events_for(calc.id).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::CalculationStarted,
                EventType::LinearStep,
                EventType::ExponentialStep,
                EventType::LinearStep,
            ]
        );

        let recent = store.recent_events(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, events[3].id);
        assert_eq!(recent[1].id, events[2].id);
    }

    #[tokio::test]
    async fn recent_calculations_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = Calculation::with_id(CalculationId::new(), 2.0, 3, now - Duration::minutes(5));
        let new = Calculation::with_id(CalculationId::new(), 3.0, 3, now);
        store.create_calculation(&old).await.unwrap();
        store.create_calculation(&new).await.unwrap();

        let recent = store.recent_calculations(10).await.unwrap();
        assert_eq!(recent.iter().map(|c| c.id).collect::<Vec<_>>(), vec![new.id, old.id]);
        assert_eq!(store.recent_calculations(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_faults() {
        let (store, calc) = seeded().await;

        store.set_event_writes_failing(true);
        let event = CalculationEvent::new(calc.id, EventType::LinearStep, "x", Utc::now(), None);
        assert!(store.append_event(&event).await.is_err());
        store.set_event_writes_failing(false);
        assert!(store.append_event(&event).await.is_ok());

        store.fail_next_finalizations(1);
        let fin = Finalization::Failed { completed_at: Utc::now() };
        assert!(store.finalize_calculation(calc.id, &fin).await.is_err());
        assert!(store.finalize_calculation(calc.id, &fin).await.is_ok());
        assert_eq!(store.finalize_calls(), 2);

        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
        assert!(store.create_calculation(&Calculation::new(1.0, 1)).await.is_err());
    }
}
