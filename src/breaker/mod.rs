//! Circuit breaker set: one breaker per named downstream dependency.
//!
//! ```text
//! CLOSED    --(F consecutive failures)-->        OPEN
//! OPEN      --(elapsed since last failure >= R)--> HALF_OPEN
//! HALF_OPEN --(H consecutive successes)-->        CLOSED
//! HALF_OPEN --(any failure)-->                    OPEN
//! ```
//!
//! Breaker state is per-process and shared-nothing across replicas: faster
//! independent recovery, slightly higher blast radius during an incident.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clock::{Clock, ClockReading};
use crate::config::BreakerConfig;
use crate::domain::BreakerMode;
use crate::errors::CoreError;

struct Inner {
    mode: BreakerMode,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<ClockReading>,
    half_open_probe_count: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            mode: BreakerMode::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            half_open_probe_count: 0,
        }
    }
}

pub struct Breaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<Inner>,
}

impl Breaker {
    fn new(name: &str, config: BreakerConfig) -> Self {
        Self { name: name.to_string(), config, state: Mutex::new(Inner::new()) }
    }

    /// Call before attempting the dependency call. Transitions OPEN →
    /// HALF_OPEN when the recovery timeout has elapsed.
    fn admit(&self, now: ClockReading) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.mode == BreakerMode::Open {
            let recovery = Duration::from_secs(self.config.recovery_timeout_secs);
            let elapsed = state
                .last_failure
                .map(|last| now.duration_since(&last))
                .unwrap_or(Duration::ZERO);
            if elapsed >= recovery {
                state.mode = BreakerMode::HalfOpen;
                state.half_open_probe_count = 0;
                state.consecutive_successes = 0;
                tracing::info!(breaker = %self.name, "transitioning OPEN -> HALF_OPEN");
            } else {
                return Err(CoreError::BreakerOpen(self.name.clone()));
            }
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        match state.mode {
            BreakerMode::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.half_open_max_calls {
                    state.mode = BreakerMode::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    tracing::info!(breaker = %self.name, "transitioning HALF_OPEN -> CLOSED");
                }
            }
            BreakerMode::Closed => {
                state.consecutive_failures = 0;
            }
            BreakerMode::Open => {}
        }
    }

    fn record_failure(&self, now: ClockReading) {
        let mut state = self.state.lock();
        state.last_failure = Some(now);
        match state.mode {
            BreakerMode::HalfOpen => {
                state.mode = BreakerMode::Open;
                state.consecutive_successes = 0;
                tracing::info!(breaker = %self.name, "transitioning HALF_OPEN -> OPEN");
            }
            BreakerMode::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.mode = BreakerMode::Open;
                    tracing::info!(breaker = %self.name, "transitioning CLOSED -> OPEN");
                }
            }
            BreakerMode::Open => {}
        }
    }

    pub fn snapshot(&self) -> crate::domain::BreakerState {
        let state = self.state.lock();
        crate::domain::BreakerState {
            name: self.name.clone(),
            mode: state.mode,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_failure: state.last_failure,
            half_open_probe_count: state.half_open_probe_count,
        }
    }
}

/// Registry of breakers keyed by dependency name, created lazily on first
/// use so callers never have to pre-register every dependency.
pub struct BreakerSet {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<Breaker>>,
    clock: Arc<dyn Clock>,
}

impl BreakerSet {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, breakers: DashMap::new(), clock }
    }

    fn breaker_for(&self, name: &str) -> Arc<Breaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(name, self.config.clone())))
            .clone()
    }

    /// Only exceptions originating in the dependency count as failures;
    /// validation failures thrown before the call must not reach here.
    pub async fn call<F, Fut, T>(&self, dependency: &str, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let breaker = self.breaker_for(dependency);
        breaker.admit(self.clock.now())?;
        match f().await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                breaker.record_failure(self.clock.now());
                Err(err)
            }
        }
    }

    pub fn snapshot_all(&self) -> Vec<crate::domain::BreakerState> {
        self.breakers.iter().map(|entry| entry.value().snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Utc;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let config = BreakerConfig { failure_threshold: 3, recovery_timeout_secs: 5, half_open_max_calls: 2 };
        let set = BreakerSet::new(config, clock);

        for _ in 0..3 {
            let _ = set.call("dep", || async { Err::<(), _>(CoreError::Dependency("boom".into())) }).await;
        }

        let result = set.call("dep", || async { Ok::<_, CoreError>(()) }).await;
        assert!(matches!(result, Err(CoreError::BreakerOpen(_))));
    }

    #[tokio::test]
    async fn half_opens_after_recovery_then_closes() {
        let fixed = Arc::new(FixedClock::new(Utc::now()));
        let clock: Arc<dyn Clock> = fixed.clone();
        let config = BreakerConfig { failure_threshold: 1, recovery_timeout_secs: 5, half_open_max_calls: 1 };
        let set = BreakerSet::new(config, clock);

        let _ = set.call("dep", || async { Err::<(), _>(CoreError::Dependency("boom".into())) }).await;
        fixed.advance(Duration::from_secs(6));
        let result = set.call("dep", || async { Ok::<_, CoreError>(()) }).await;
        assert!(result.is_ok());
    }
}
