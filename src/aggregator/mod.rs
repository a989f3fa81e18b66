//! Sliding-window aggregator.
//!
//! A [`MetricWindow`] keeps a time-ordered deque of `(t, v)` samples and an
//! aggregation kind. On each slide tick, entries older than `duration` are
//! dropped and the aggregate is recomputed (O(1) for SUM/COUNT via running
//! counters, O(k) over the remainder otherwise); new samples append in
//! O(1). The exposed aggregate always reflects the window as of the last
//! tick, not continuously.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

struct Sample {
    t_millis: u64,
    value: f64,
}

pub struct MetricWindow {
    duration: Duration,
    slide: Duration,
    kind: AggregationKind,
    samples: Mutex<VecDeque<Sample>>,
    last_aggregate: Mutex<f64>,
    running_sum: Mutex<f64>,
}

impl MetricWindow {
    pub fn new(duration: Duration, slide: Duration, kind: AggregationKind) -> Self {
        Self {
            duration,
            slide,
            kind,
            samples: Mutex::new(VecDeque::new()),
            last_aggregate: Mutex::new(0.0),
            running_sum: Mutex::new(0.0),
        }
    }

    pub fn slide_interval(&self) -> Duration {
        self.slide
    }

    pub fn record(&self, now_millis: u64, value: f64) {
        self.samples.lock().push_back(Sample { t_millis: now_millis, value });
        *self.running_sum.lock() += value;
    }

    /// Drops stale samples and recomputes the aggregate. Must be called
    /// once per slide interval by a dedicated ticker task.
    pub fn tick(&self, now_millis: u64) -> f64 {
        let cutoff = now_millis.saturating_sub(self.duration.as_millis() as u64);
        let mut samples = self.samples.lock();
        while let Some(front) = samples.front() {
            if front.t_millis < cutoff {
                *self.running_sum.lock() -= front.value;
                samples.pop_front();
            } else {
                break;
            }
        }

        let aggregate = match self.kind {
            AggregationKind::Sum => *self.running_sum.lock(),
            AggregationKind::Count => samples.len() as f64,
            AggregationKind::Avg => {
                if samples.is_empty() {
                    0.0
                } else {
                    *self.running_sum.lock() / samples.len() as f64
                }
            }
            AggregationKind::Min => samples.iter().map(|s| s.value).fold(f64::INFINITY, f64::min),
            AggregationKind::Max => samples.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max),
        };
        let aggregate = if aggregate.is_finite() { aggregate } else { 0.0 };
        *self.last_aggregate.lock() = aggregate;
        aggregate
    }

    pub fn last_aggregate(&self) -> f64 {
        *self.last_aggregate.lock()
    }
}

/// Registry of the default metric windows, plus any ad-hoc window a
/// caller registers.
pub struct Aggregator {
    windows: DashMap<String, MetricWindow>,
}

impl Aggregator {
    pub fn new() -> Self {
        let windows = DashMap::new();
        windows.insert(
            "transaction_volume_1m".to_string(),
            MetricWindow::new(Duration::from_secs(60), Duration::from_secs(10), AggregationKind::Sum),
        );
        windows.insert(
            "transaction_count_1m".to_string(),
            MetricWindow::new(Duration::from_secs(60), Duration::from_secs(10), AggregationKind::Count),
        );
        windows.insert(
            "avg_transaction_amount_5m".to_string(),
            MetricWindow::new(Duration::from_secs(300), Duration::from_secs(30), AggregationKind::Avg),
        );
        windows.insert(
            "high_risk_ratio_5m".to_string(),
            MetricWindow::new(Duration::from_secs(300), Duration::from_secs(30), AggregationKind::Avg),
        );
        windows.insert(
            "response_time_1m".to_string(),
            MetricWindow::new(Duration::from_secs(60), Duration::from_secs(5), AggregationKind::Avg),
        );
        windows.insert(
            "error_rate_5m".to_string(),
            MetricWindow::new(Duration::from_secs(300), Duration::from_secs(30), AggregationKind::Avg),
        );
        Self { windows }
    }

    pub fn register(&self, name: &str, duration: Duration, slide: Duration, kind: AggregationKind) {
        self.windows.insert(name.to_string(), MetricWindow::new(duration, slide, kind));
    }

    pub fn record(&self, name: &str, now_millis: u64, value: f64) {
        if let Some(window) = self.windows.get(name) {
            window.record(now_millis, value);
        }
    }

    pub fn tick_all(&self, now_millis: u64) {
        for window in self.windows.iter() {
            window.tick(now_millis);
        }
    }

    pub fn snapshot(&self) -> Vec<(String, f64)> {
        self.windows.iter().map(|w| (w.key().clone(), w.last_aggregate())).collect()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_window_reflects_known_sequence() {
        let window = MetricWindow::new(Duration::from_secs(60), Duration::from_secs(10), AggregationKind::Sum);
        window.record(0, 10.0);
        window.record(1_000, 20.0);
        window.record(59_000, 5.0);
        assert_eq!(window.tick(60_000), 35.0);
        // cutoff = 1_500 evicts both t=0 and t=1_000, leaving only t=59_000
        assert_eq!(window.tick(61_500), 5.0);
    }

    #[test]
    fn count_window_counts_in_window_samples() {
        let window = MetricWindow::new(Duration::from_secs(10), Duration::from_secs(1), AggregationKind::Count);
        for t in [0, 2_000, 4_000, 12_000] {
            window.record(t, 1.0);
        }
        assert_eq!(window.tick(12_000), 3.0);
    }
}
