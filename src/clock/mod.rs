//! Clock and identifier source.
//!
//! Every timestamp in the core is a [`ClockReading`] obtained through the
//! [`Clock`] trait rather than a direct `Instant::now()`/`Utc::now()` call,
//! so tests can pin time with [`FixedClock`] / [`SteppedClock`] instead of
//! racing the wall clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A paired (wall, monotonic) timestamp. `monotonic_nanos` is only ever
/// compared to other readings from the same process; it is meaningless
/// across a restart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockReading {
    pub wall: DateTime<Utc>,
    pub monotonic_nanos: i64,
}

impl ClockReading {
    pub fn duration_since(&self, earlier: &ClockReading) -> Duration {
        let delta = self.monotonic_nanos.saturating_sub(earlier.monotonic_nanos);
        Duration::from_nanos(delta.max(0) as u64)
    }

    pub fn is_past(&self, now: &ClockReading) -> bool {
        now.monotonic_nanos >= self.monotonic_nanos
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> ClockReading;
}

/// Production clock. `monotonic_nanos` is tracked off a process-start
/// epoch via an internal atomic counter seeded from `Instant`, so readings
/// are cheap to compare without holding a `std::time::Instant` (which isn't
/// `Serialize`).
pub struct SystemClock {
    start: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockReading {
        ClockReading {
            wall: Utc::now(),
            monotonic_nanos: self.start.elapsed().as_nanos() as i64,
        }
    }
}

/// Test clock pinned to a fixed instant until advanced explicitly.
pub struct FixedClock {
    wall_epoch_millis: AtomicI64,
    monotonic_nanos: AtomicI64,
}

impl FixedClock {
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            wall_epoch_millis: AtomicI64::new(wall.timestamp_millis()),
            monotonic_nanos: AtomicI64::new(0),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.monotonic_nanos
            .fetch_add(delta.as_nanos() as i64, Ordering::SeqCst);
        self.wall_epoch_millis
            .fetch_add(delta.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> ClockReading {
        let millis = self.wall_epoch_millis.load(Ordering::SeqCst);
        ClockReading {
            wall: DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now),
            monotonic_nanos: self.monotonic_nanos.load(Ordering::SeqCst),
        }
    }
}

/// Identifier source. Wraps `Uuid::new_v4` behind a trait so fakes can
/// produce deterministic ids in tests.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Derives `Transaction.fingerprint` from (actor, amount minor units,
/// timestamp, channel). Not secret, just collision-resistant and stable.
pub fn fingerprint(actor_id: &str, amount_minor_units: i64, timestamp_nanos: i64, channel: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(actor_id.as_bytes());
    hasher.update(b"|");
    hasher.update(amount_minor_units.to_be_bytes());
    hasher.update(b"|");
    hasher.update(timestamp_nanos.to_be_bytes());
    hasher.update(b"|");
    hasher.update(channel.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_monotonically() {
        let clock = FixedClock::new(Utc::now());
        let t0 = clock.now();
        clock.advance(Duration::from_secs(5));
        let t1 = clock.now();
        assert_eq!(t1.duration_since(&t0), Duration::from_secs(5));
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint("actor-1", 1500, 42, "online");
        let b = fingerprint("actor-1", 1500, 42, "online");
        assert_eq!(a, b);
    }
}
