use std::future::Future;
use std::time::Duration;

/// Bounded retry: at most `max_attempts` tries with a fixed `delay` between
/// them. Used for empty extractions and for renderer recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it yields `Some`, or attempts run out.
    pub async fn retry_until_some<T, F, Fut>(&self, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(v) = op(attempt).await {
                return Some(v);
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        None
    }

    /// True once `consecutive_failures` has used up the budget.
    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_attempts
    }
}
