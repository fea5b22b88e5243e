//! # Status Classifier
//! Pure decision logic: `(prior state, sample, now)` → new state + status to
//! publish (or nothing). No I/O, suitable for unit and property tests.
//!
//! Evaluation order per cycle:
//! 1. before the window start → SKIPPED, no mutation;
//! 2. at/after the window end → COMPLETED once, then retired for the day;
//! 3. fetch failure → ERROR, empty extraction → INVALID (value untouched);
//! 4-6. first / changed / unchanged value, with the staleness checks.

use chrono::{Duration, NaiveDateTime};

use crate::config::MonitorConfig;
use crate::registry::ActiveWindow;
use crate::state::{SampleValue, SourceState, Status};
use crate::timestamp::parse_reported;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyPolicy {
    /// Unchanged samples needed to call a source STALE.
    pub stale_threshold: u32,
    /// Max tolerated gap between a reported time and the local clock.
    pub lag_threshold: Duration,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self {
            stale_threshold: 3,
            lag_threshold: Duration::minutes(3),
        }
    }
}

impl ClassifyPolicy {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            stale_threshold: cfg.stale_threshold,
            lag_threshold: Duration::minutes(cfg.lag_threshold_mins),
        }
    }

    /// True when `value` embeds a parseable time that trails `now` by more
    /// than the lag threshold. Unparseable values never lag.
    pub fn lags(&self, value: &SampleValue, now: NaiveDateTime) -> bool {
        value
            .as_text()
            .and_then(parse_reported)
            .is_some_and(|reported| now - reported > self.lag_threshold)
    }
}

/// What the window says about this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Before the window opens: no sampling, no state change.
    Skip,
    /// Inside the window: fetch and classify.
    Sample,
    /// Retired for the day. `publish` is true at most once per process run;
    /// `persist` only on the transition itself.
    Completed { publish: bool, persist: bool },
}

/// Result of one fetch + extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    Value(SampleValue),
    /// Page reachable, nothing extractable after retries.
    Empty,
    /// Navigation/fetch itself failed (or timed out).
    FetchFailed,
}

/// Window rules (1) and (2).
pub fn gate(window: Option<&ActiveWindow>, state: &mut SourceState, now: NaiveDateTime) -> Gate {
    let t = now.time();
    if window.is_some_and(|w| w.before_start(t)) {
        return Gate::Skip;
    }

    if state.completed {
        let publish = !state.emitted_completed;
        state.emitted_completed = true;
        return Gate::Completed {
            publish,
            persist: false,
        };
    }

    if window.is_some_and(|w| w.at_or_after_end(t)) {
        state.completed = true;
        state.status = Status::Completed;
        state.last_changed.get_or_insert(now);
        state.emitted_completed = true;
        return Gate::Completed {
            publish: true,
            persist: true,
        };
    }

    Gate::Sample
}

/// Rules (3)-(6). Returns the status to publish, if any.
pub fn apply_sample(
    policy: &ClassifyPolicy,
    state: &mut SourceState,
    outcome: SampleOutcome,
    now: NaiveDateTime,
) -> Option<Status> {
    let value = match outcome {
        SampleOutcome::FetchFailed => {
            state.status = Status::Error;
            return Some(Status::Error);
        }
        SampleOutcome::Empty => {
            state.status = Status::Invalid;
            return Some(Status::Invalid);
        }
        SampleOutcome::Value(v) => v,
    };

    let lagging = policy.lags(&value, now);
    let changed = state.last_value.as_ref() != Some(&value);

    if changed {
        state.last_value = Some(value);
        state.last_changed = Some(now);
        state.stale_count = 0;
        return Some(if lagging {
            mark_stale(state, now)
        } else {
            state.status = Status::Ok;
            Status::Ok
        });
    }

    state.stale_count = state.stale_count.saturating_add(1);
    if state.stale_count >= policy.stale_threshold || lagging {
        return Some(mark_stale(state, now));
    }

    // Quiet but under threshold: nothing to publish.
    state.status = Status::Ok;
    None
}

fn mark_stale(state: &mut SourceState, now: NaiveDateTime) -> Status {
    state.status = Status::Stale;
    state.stale_events.push(now);
    Status::Stale
}
