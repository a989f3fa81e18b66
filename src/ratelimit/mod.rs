//! Rate limiter: fixed-window counter keyed by (client identity, route
//! class, window index), using the same shared tier as the cache layer.
//!
//! Storage failure degrades to per-process counters (a documented
//! soft-failure mode, not surfaced to the caller as an error).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::collab::SharedKv;
use crate::config::RateLimitRule;
use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
}

impl Period {
    pub fn as_secs(&self) -> u64 {
        match self {
            Period::Second => 1,
            Period::Minute => 60,
            Period::Hour => 3600,
            Period::Day => 86_400,
        }
    }
}

pub struct RateLimiter {
    shared: Arc<dyn SharedKv>,
    default_rule: RateLimitRule,
    route_rules: RouteClassRules,
    local_fallback: DashMap<String, (u64, std::time::Instant)>,
    degraded: AtomicBool,
}

impl RateLimiter {
    pub fn new(default_rule: RateLimitRule, shared: Arc<dyn SharedKv>) -> Self {
        Self {
            shared,
            default_rule,
            route_rules: RouteClassRules::default(),
            local_fallback: DashMap::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Overrides the per-route-class rule table; route classes absent
    /// from it fall back to `default_rule`.
    pub fn with_route_rules(mut self, route_rules: RouteClassRules) -> Self {
        self.route_rules = route_rules;
        self
    }

    fn window_key(identity: &str, route_class: &str, period_secs: u64, window_index: u64) -> String {
        format!("ratelimit:{}:{}:{}:{}", identity, route_class, period_secs, window_index)
    }

    /// Checks and increments the counter for `(identity, route_class)` at
    /// `now`. Returns `Ok(())` when admitted, `Err(RateLimited)` with a
    /// retry-after hint equal to the window remainder otherwise.
    pub async fn check(&self, identity: &str, route_class: &str, now_unix_secs: u64) -> Result<(), CoreError> {
        let rule = self.route_rules.resolve(route_class, self.default_rule);
        self.check_with(identity, route_class, now_unix_secs, rule).await
    }

    pub async fn check_with(
        &self,
        identity: &str,
        route_class: &str,
        now_unix_secs: u64,
        rule: RateLimitRule,
    ) -> Result<(), CoreError> {
        let period = rule.period_secs.max(1);
        let window_index = now_unix_secs / period;
        let key = Self::window_key(identity, route_class, period, window_index);
        let window_remainder = period - (now_unix_secs % period);

        let count = match self.shared.incr(&key, Duration::from_secs(period)).await {
            Ok(n) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("shared rate-limit store reachable again, leaving per-process fallback");
                }
                n
            }
            Err(err) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %err, "shared rate-limit store unreachable, falling back to per-process counters");
                }
                self.local_incr(&key, period)
            }
        };

        if count > rule.limit {
            return Err(CoreError::RateLimited { retry_after_secs: window_remainder });
        }
        Ok(())
    }

    fn local_incr(&self, key: &str, period_secs: u64) -> u64 {
        let now = std::time::Instant::now();
        let mut entry = self
            .local_fallback
            .entry(key.to_string())
            .or_insert((0, now + Duration::from_secs(period_secs)));
        if entry.1 <= now {
            *entry = (0, now + Duration::from_secs(period_secs));
        }
        entry.0 += 1;
        entry.0
    }
}

/// Named route-class rules, consulted before falling back to the single
/// configured default (`rate_limit.default`).
#[derive(Default)]
pub struct RouteClassRules {
    rules: HashMap<String, RateLimitRule>,
}

impl RouteClassRules {
    pub fn with_rule(mut self, route_class: &str, rule: RateLimitRule) -> Self {
        self.rules.insert(route_class.to_string(), rule);
        self
    }

    pub fn resolve(&self, route_class: &str, default: RateLimitRule) -> RateLimitRule {
        self.rules.get(route_class).copied().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemorySharedKv;

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(
            RateLimitRule { limit: 2, period_secs: 60 },
            Arc::new(InMemorySharedKv::default()),
        );
        assert!(limiter.check("client-1", "default", 1_000).await.is_ok());
        assert!(limiter.check("client-1", "default", 1_000).await.is_ok());
        let result = limiter.check("client-1", "default", 1_000).await;
        assert!(matches!(result, Err(CoreError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn separate_windows_reset_the_counter() {
        let limiter = RateLimiter::new(
            RateLimitRule { limit: 1, period_secs: 60 },
            Arc::new(InMemorySharedKv::default()),
        );
        assert!(limiter.check("client-1", "default", 0).await.is_ok());
        assert!(limiter.check("client-1", "default", 61).await.is_ok());
    }
}
