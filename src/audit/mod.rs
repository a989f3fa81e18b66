//! Audit log: append-only, hash-chained structured event log.
//!
//! `entry.hash = H(prev.hash ‖ canonical(entry.payload))`. A verifier can
//! walk the chain from the genesis entry and detect any alteration. The
//! storage interface itself is the [`crate::collab::DurableStore`]
//! collaborator; this module only derives hashes and assigns sequence
//! numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::collab::DurableStore;
use crate::domain::AuditEvent;
use crate::errors::CoreError;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn canonical_payload(payload: &serde_json::Value) -> String {
    serde_json::to_string(payload).unwrap_or_default()
}

fn chain_hash(prev_hash: &str, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical_payload(payload).as_bytes());
    hex::encode(hasher.finalize())
}

pub struct AuditLog {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    next_sequence: AtomicU64,
    last_hash: Mutex<String>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            next_sequence: AtomicU64::new(1),
            last_hash: Mutex::new(GENESIS_HASH.to_string()),
        }
    }

    pub async fn append(
        &self,
        event_class: &str,
        actor_id: &str,
        subject_id: &str,
        payload: serde_json::Value,
    ) -> Result<AuditEvent, CoreError> {
        let sequence_no = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let prev_hash = self.last_hash.lock().clone();
        let hash = chain_hash(&prev_hash, &payload);

        let event = AuditEvent {
            sequence_no,
            event_class: event_class.to_string(),
            actor_id: actor_id.to_string(),
            subject_id: subject_id.to_string(),
            timestamp: self.clock.now(),
            payload,
            hash: hash.clone(),
        };

        self.store
            .append_audit(event.clone())
            .await
            .map_err(|err| CoreError::Integrity(err.to_string()))?;

        *self.last_hash.lock() = hash;
        Ok(event)
    }
}

/// Walks a full chain (sequence-ordered) and reports the first mismatch,
/// if any. `entries` must already be ordered by `sequence_no`.
pub fn verify_chain(entries: &[AuditEvent]) -> Result<(), CoreError> {
    let mut prev_hash = GENESIS_HASH.to_string();
    for (expected_seq, entry) in (1u64..).zip(entries.iter()) {
        if entry.sequence_no != expected_seq {
            return Err(CoreError::Integrity(format!(
                "sequence gap: expected {}, found {}",
                expected_seq, entry.sequence_no
            )));
        }
        let expected_hash = chain_hash(&prev_hash, &entry.payload);
        if expected_hash != entry.hash {
            return Err(CoreError::Integrity(format!("hash mismatch at sequence {}", entry.sequence_no)));
        }
        prev_hash = entry.hash.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::collab::InMemoryDurableStore;
    use chrono::Utc;

    fn log() -> AuditLog {
        let store = Arc::new(InMemoryDurableStore::new(vec![]));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        AuditLog::new(store, clock)
    }

    #[tokio::test]
    async fn sequence_numbers_are_gap_free_and_increasing() {
        let log = log();
        let a = log.append("TRANSACTION", "actor-1", "fp-1", serde_json::json!({"x": 1})).await.unwrap();
        let b = log.append("TRANSACTION", "actor-1", "fp-2", serde_json::json!({"x": 2})).await.unwrap();
        assert_eq!(a.sequence_no, 1);
        assert_eq!(b.sequence_no, 2);
    }

    #[tokio::test]
    async fn tampering_is_detected_by_chain_walk() {
        let log = log();
        let a = log.append("TRANSACTION", "actor-1", "fp-1", serde_json::json!({"x": 1})).await.unwrap();
        let mut b = log.append("TRANSACTION", "actor-1", "fp-2", serde_json::json!({"x": 2})).await.unwrap();
        assert!(verify_chain(&[a.clone(), b.clone()]).is_ok());

        b.payload = serde_json::json!({"x": 999});
        assert!(verify_chain(&[a, b]).is_err());
    }
}

