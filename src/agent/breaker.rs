//! Client-side circuit breaker guarding result submission.
//!
//! Two states are exercised: `Closed` (normal) and `Open` (short-circuit
//! for a cooldown window after repeated failures). `HalfOpen` is reserved;
//! once the cooldown elapses the next call passes through while the
//! breaker is still `Open`, and its success resets to `Closed`.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    #[allow(dead_code)]
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<BreakerInner>,
}

/// Returned instead of invoking the wrapped operation while the breaker
/// is open.
#[derive(Debug, thiserror::Error)]
#[error("circuit breaker open")]
pub struct CircuitOpen;

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Returns `Err(CircuitOpen)` while inside the open cooldown window.
    pub async fn check(&self) -> Result<(), CircuitOpen> {
        let inner = self.inner.read().await;
        if inner.state == BreakerState::Open {
            if let Some(last) = inner.last_failure {
                if last.elapsed() < OPEN_COOLDOWN {
                    return Err(CircuitOpen);
                }
            }
        }
        Ok(())
    }

    /// Record the outcome of a wrapped call.
    pub async fn record(&self, success: bool) {
        let mut inner = self.inner.write().await;
        if success {
            inner.failures = 0;
            inner.state = BreakerState::Closed;
        } else {
            inner.failures += 1;
            inner.last_failure = Some(Instant::now());
            if inner.failures >= FAILURE_THRESHOLD {
                if inner.state != BreakerState::Open {
                    tracing::warn!(failures = inner.failures, "circuit breaker opened");
                }
                inner.state = BreakerState::Open;
            }
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    #[cfg(test)]
    async fn force_last_failure(&self, ago: Duration) {
        let mut inner = self.inner.write().await;
        inner.last_failure = Some(Instant::now() - ago);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_closed_and_allows_calls() {
        let cb = CircuitBreaker::new();
        assert_eq!(cb.state().await, BreakerState::Closed);
        assert!(cb.check().await.is_ok());
    }

    #[tokio::test]
    async fn opens_after_five_consecutive_failures() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record(false).await;
        }
        assert_eq!(cb.state().await, BreakerState::Closed);
        assert!(cb.check().await.is_ok());

        cb.record(false).await;
        assert_eq!(cb.state().await, BreakerState::Open);
        assert!(cb.check().await.is_err());
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record(false).await;
        }
        cb.record(true).await;
        for _ in 0..4 {
            cb.record(false).await;
        }
        // Nine failures total, but never five in a row.
        assert_eq!(cb.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn calls_resume_after_the_cooldown() {
        let cb = CircuitBreaker::new();
        for _ in 0..5 {
            cb.record(false).await;
        }
        assert!(cb.check().await.is_err());

        cb.force_last_failure(OPEN_COOLDOWN + Duration::from_secs(1)).await;
        assert!(cb.check().await.is_ok());

        // A success after the window closes the breaker.
        cb.record(true).await;
        assert_eq!(cb.state().await, BreakerState::Closed);
    }
}
