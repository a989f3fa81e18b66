//! Telemetry: rolling per-endpoint latency/error histograms plus
//! threshold-based alerting.
//!
//! Each `(endpoint, outcome)` pair keeps its own [`LatencyHistogram`]
//! (default W=1024 samples folded into logarithmic buckets). An
//! alert fires when a threshold is sustained across two consecutive
//! evaluation intervals, and is then held under a per-rule cooldown to
//! prevent flapping.

pub mod histogram;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

pub use histogram::{HistogramSummary, LatencyHistogram};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub p95_latency_us: u64,
    pub error_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { p95_latency_us: 500_000, error_rate: 0.05 }
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub endpoint: String,
    pub reason: String,
}

struct EndpointMetrics {
    success: LatencyHistogram,
    error: LatencyHistogram,
    breaches: u32,
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self { success: LatencyHistogram::default(), error: LatencyHistogram::default(), breaches: 0 }
    }
}

pub struct Telemetry {
    endpoints: DashMap<String, EndpointMetrics>,
    thresholds: AlertThresholds,
    cooldowns: Mutex<HashMap<String, std::time::Instant>>,
    cooldown_period: Duration,
}

impl Telemetry {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            endpoints: DashMap::new(),
            thresholds,
            cooldowns: Mutex::new(HashMap::new()),
            cooldown_period: Duration::from_secs(300),
        }
    }

    pub fn record(&self, endpoint: &str, outcome: Outcome, latency_us: u64) {
        let mut metrics = self.endpoints.entry(endpoint.to_string()).or_default();
        match outcome {
            Outcome::Success => metrics.success.record(latency_us),
            Outcome::Error => metrics.error.record(latency_us),
        }
        drop(metrics);

        // Fed to the Prometheus exporter installed at startup; the JSON
        // `/api/v1/metrics` contract stays the source of truth callers parse,
        // this is for dashboards only.
        let endpoint = endpoint.to_string();
        let outcome_label = match outcome {
            Outcome::Success => "success",
            Outcome::Error => "error",
        };
        metrics::counter!("gateway_core_requests_total", "endpoint" => endpoint.clone(), "outcome" => outcome_label).increment(1);
        metrics::histogram!("gateway_core_request_latency_us", "endpoint" => endpoint, "outcome" => outcome_label)
            .record(latency_us as f64);
    }

    pub fn success_rate(&self, endpoint: &str) -> f64 {
        match self.endpoints.get(endpoint) {
            Some(metrics) => {
                let total = metrics.success.count() + metrics.error.count();
                if total == 0 {
                    1.0
                } else {
                    metrics.success.count() as f64 / total as f64
                }
            }
            None => 1.0,
        }
    }

    pub fn summary(&self, endpoint: &str) -> Option<(HistogramSummary, HistogramSummary)> {
        self.endpoints
            .get(endpoint)
            .map(|m| (m.success.summary(endpoint), m.error.summary(endpoint)))
    }

    /// Evaluates alert thresholds for one endpoint. Call this once per
    /// evaluation interval from a dedicated ticker; an alert only actually
    /// fires the second time a breach is observed in a row, and then only
    /// if the per-endpoint cooldown has expired.
    pub fn evaluate(&self, endpoint: &str) -> Option<Alert> {
        let mut metrics = self.endpoints.get_mut(endpoint)?;
        let total = metrics.success.count() + metrics.error.count();
        if total == 0 {
            metrics.breaches = 0;
            return None;
        }
        let error_rate = metrics.error.count() as f64 / total as f64;
        let p95 = metrics.success.p95();

        let breached = p95 > self.thresholds.p95_latency_us || error_rate > self.thresholds.error_rate;
        if !breached {
            metrics.breaches = 0;
            return None;
        }

        metrics.breaches += 1;
        if metrics.breaches < 2 {
            return None;
        }

        let mut cooldowns = self.cooldowns.lock();
        let now = std::time::Instant::now();
        if let Some(until) = cooldowns.get(endpoint) {
            if *until > now {
                return None;
            }
        }
        cooldowns.insert(endpoint.to_string(), now + self.cooldown_period);

        let reason = if p95 > self.thresholds.p95_latency_us {
            format!("p95 latency {}us exceeds threshold {}us", p95, self.thresholds.p95_latency_us)
        } else {
            format!("error rate {:.4} exceeds threshold {:.4}", error_rate, self.thresholds.error_rate)
        };
        Some(Alert { endpoint: endpoint.to_string(), reason })
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }
}

pub type SharedTelemetry = Arc<Telemetry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_requires_two_consecutive_breaches() {
        let telemetry = Telemetry::new(AlertThresholds { p95_latency_us: 100, error_rate: 1.1 });
        telemetry.record("ep", Outcome::Success, 1_000);
        assert!(telemetry.evaluate("ep").is_none());
        assert!(telemetry.evaluate("ep").is_some());
    }

    #[test]
    fn success_rate_defaults_to_one_when_unknown() {
        let telemetry = Telemetry::new(AlertThresholds::default());
        assert_eq!(telemetry.success_rate("unknown"), 1.0);
    }
}
