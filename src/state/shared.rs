// src/state/shared.rs
//! The one place the snapshot is mutated.
//!
//! Every source worker goes through [`SharedState`]; each call takes the
//! lock, checks whether the calendar day rolled over, applies its change and
//! persists before releasing. A failed write is logged and counted but the
//! in-memory record stays authoritative until the next successful save.
//!
//! The calls block on file I/O. Source loops use the `*_offloaded` variants,
//! which run the same critical section on Tokio's blocking pool.

use chrono::{NaiveDate, NaiveDateTime};
use metrics::counter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Snapshot, SourceState, StateStore, Status};
use crate::classify::{self, ClassifyPolicy, Gate, SampleOutcome};
use crate::registry::ActiveWindow;

pub struct SharedState {
    store: StateStore,
    ids: Vec<String>,
    inner: Mutex<Snapshot>,
}

impl SharedState {
    /// Load today's snapshot, add records for sources it does not know yet
    /// and persist the normalized result right away.
    pub fn open(store: StateStore, ids: Vec<String>, today: NaiveDate) -> Self {
        let mut snap = store.load(today);
        snap.ensure_sources(ids.iter().cloned());
        tracing::info!(
            target: "state",
            day = %today,
            sources = snap.sources.len(),
            path = %store.path_for(today).display(),
            "snapshot opened"
        );
        let shared = Self {
            store,
            ids,
            inner: Mutex::new(snap),
        };
        {
            let guard = shared.lock();
            shared.persist(&guard);
        }
        shared
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, snap: &Snapshot) {
        if let Err(e) = self.store.save(snap) {
            counter!("monitor_state_save_errors_total").increment(1);
            tracing::warn!(target: "state", error = %format!("{e:#}"), "snapshot save failed, keeping in-memory state");
        }
    }

    /// Rotation only ever moves forward. A clock stepped back across
    /// midnight keeps writing to the active day; the earlier day's file was
    /// final the moment it was rotated past.
    fn rotate_locked(&self, snap: &mut Snapshot, today: NaiveDate) -> bool {
        if today <= snap.day {
            if today < snap.day {
                tracing::warn!(
                    target: "state",
                    active = %snap.day,
                    clock = %today,
                    "clock is behind the active snapshot day, not rotating"
                );
            }
            return false;
        }
        *snap = self.store.rotate(snap.day, today, self.ids.iter().cloned());
        counter!("monitor_day_rotations_total").increment(1);
        true
    }

    /// Switch to a fresh snapshot if `now` falls on a later day than the
    /// one held. Returns whether a rotation happened.
    pub fn rotate_if_new_day(&self, now: NaiveDateTime) -> bool {
        let mut snap = self.lock();
        self.rotate_locked(&mut snap, now.date())
    }

    /// Window gate for one cycle. Persists on the COMPLETED transition.
    pub fn gate(&self, id: &str, window: Option<&ActiveWindow>, now: NaiveDateTime) -> (Gate, SourceState) {
        let mut snap = self.lock();
        self.rotate_locked(&mut snap, now.date());
        let rec = snap.entry(id);
        let gate = classify::gate(window, rec, now);
        let copy = rec.clone();
        if matches!(gate, Gate::Completed { persist: true, .. }) {
            self.persist(&snap);
        }
        (gate, copy)
    }

    /// Classify one sample outcome and persist the updated record.
    pub fn apply(
        &self,
        id: &str,
        outcome: SampleOutcome,
        policy: &ClassifyPolicy,
        now: NaiveDateTime,
    ) -> (Option<Status>, SourceState) {
        let mut snap = self.lock();
        self.rotate_locked(&mut snap, now.date());
        let rec = snap.entry(id);
        let status = classify::apply_sample(policy, rec, outcome, now);
        let copy = rec.clone();
        self.persist(&snap);
        (status, copy)
    }

    /// [`gate`](Self::gate) on the blocking pool. `None` only if the
    /// runtime is shutting down and the task never ran.
    pub async fn gate_offloaded(
        self: Arc<Self>,
        id: String,
        window: Option<ActiveWindow>,
        now: NaiveDateTime,
    ) -> Option<(Gate, SourceState)> {
        offload(move || self.gate(&id, window.as_ref(), now)).await
    }

    /// [`apply`](Self::apply) on the blocking pool.
    pub async fn apply_offloaded(
        self: Arc<Self>,
        id: String,
        outcome: SampleOutcome,
        policy: ClassifyPolicy,
        now: NaiveDateTime,
    ) -> Option<(Option<Status>, SourceState)> {
        offload(move || self.apply(&id, outcome, &policy, now)).await
    }

    pub fn record(&self, id: &str) -> Option<SourceState> {
        self.lock().get(id).cloned()
    }

    pub fn day(&self) -> NaiveDate {
        self.lock().day
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }
}

async fn offload<T, F>(f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(v) => Some(v),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::warn!(target: "state", error = %e, "state update cancelled");
            None
        }
    }
}
