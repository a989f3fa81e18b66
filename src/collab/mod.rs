//! Collaborator traits and their in-memory fake implementations.
//!
//! Production wiring and fake wiring both implement the same traits; the
//! composition root picks one at construction time, never via a runtime
//! mock-mode flag sprinkled through call sites.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{AuditEvent, RiskAssessment, Rule};

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn append_audit(&self, entry: AuditEvent) -> anyhow::Result<u64>;
    async fn load_rules(&self) -> anyhow::Result<Vec<Rule>>;
    async fn persist_decision(&self, assessment: RiskAssessment) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SharedKv: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;
    async fn incr(&self, key: &str, window: Duration) -> anyhow::Result<u64>;
    async fn invalidate_prefix(&self, prefix: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct ModelBlob {
    pub model_name: String,
    pub version: String,
    pub bytes: Vec<u8>,
}

/// Invoked by a [`ModelRepository`] whenever a newer blob is published for
/// the subscribed model name (the control-plane reload signal).
pub type ModelUpdateCallback = Arc<dyn Fn(ModelBlob) + Send + Sync>;

#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn latest(&self, model_name: &str) -> anyhow::Result<Option<ModelBlob>>;
    async fn subscribe(&self, model_name: &str, on_update: ModelUpdateCallback) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PartnerClient: Send + Sync {
    async fn call(&self, request: serde_json::Value, deadline: Duration) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
pub trait NotificationOutbox: Send + Sync {
    async fn enqueue(&self, channel: &str, template: &str, to: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// In-memory fake store, wired by the binary's `--mock-collaborators` dev
/// mode and by integration tests. Not durable past process lifetime.
#[derive(Default)]
pub struct InMemoryDurableStore {
    audit_log: Mutex<Vec<AuditEvent>>,
    rules: Mutex<Vec<Rule>>,
    decisions: Mutex<Vec<RiskAssessment>>,
}

impl InMemoryDurableStore {
    pub fn new(seed_rules: Vec<Rule>) -> Self {
        Self {
            audit_log: Mutex::new(Vec::new()),
            rules: Mutex::new(seed_rules),
            decisions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn append_audit(&self, entry: AuditEvent) -> anyhow::Result<u64> {
        let mut log = self.audit_log.lock();
        let seq = entry.sequence_no;
        log.push(entry);
        Ok(seq)
    }

    async fn load_rules(&self) -> anyhow::Result<Vec<Rule>> {
        Ok(self.rules.lock().clone())
    }

    async fn persist_decision(&self, assessment: RiskAssessment) -> anyhow::Result<()> {
        self.decisions.lock().push(assessment);
        Ok(())
    }
}

struct KvEntry {
    value: Vec<u8>,
    expires_at: std::time::Instant,
}

/// In-memory shared KV fake. Single-process only; stands in for a real
/// network-backed store (e.g. Redis) in tests and dev mode.
#[derive(Default)]
pub struct InMemorySharedKv {
    entries: Mutex<HashMap<String, KvEntry>>,
    counters: Mutex<HashMap<String, (u64, std::time::Instant)>>,
}

#[async_trait]
impl SharedKv for InMemorySharedKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > std::time::Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            KvEntry { value, expires_at: std::time::Instant::now() + ttl },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, window: Duration) -> anyhow::Result<u64> {
        let mut counters = self.counters.lock();
        let now = std::time::Instant::now();
        let entry = counters.entry(key.to_string()).or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn invalidate_prefix(&self, prefix: &str) -> anyhow::Result<()> {
        self.entries.lock().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryModelRepository {
    models: Mutex<HashMap<String, ModelBlob>>,
    subscribers: Mutex<HashMap<String, Vec<ModelUpdateCallback>>>,
}

impl InMemoryModelRepository {
    pub fn with_model(name: &str, version: &str, bytes: Vec<u8>) -> Self {
        let repo = Self::default();
        repo.models.lock().insert(
            name.to_string(),
            ModelBlob { model_name: name.to_string(), version: version.to_string(), bytes },
        );
        repo
    }

    /// Publishes a new blob for `model_name`, notifying every subscriber
    /// registered for it. Used by control-plane test/dev tooling to
    /// exercise the atomic reload path without a real model repository.
    pub fn publish(&self, blob: ModelBlob) {
        let subscribers = self.subscribers.lock();
        if let Some(callbacks) = subscribers.get(&blob.model_name) {
            for callback in callbacks {
                callback(blob.clone());
            }
        }
        drop(subscribers);
        self.models.lock().insert(blob.model_name.clone(), blob);
    }
}

#[async_trait]
impl ModelRepository for InMemoryModelRepository {
    async fn latest(&self, model_name: &str) -> anyhow::Result<Option<ModelBlob>> {
        let models = self.models.lock();
        Ok(models.get(model_name).map(|m| ModelBlob {
            model_name: m.model_name.clone(),
            version: m.version.clone(),
            bytes: m.bytes.clone(),
        }))
    }

    async fn subscribe(&self, model_name: &str, on_update: ModelUpdateCallback) -> anyhow::Result<()> {
        self.subscribers.lock().entry(model_name.to_string()).or_default().push(on_update);
        Ok(())
    }
}

pub struct NoopNotificationOutbox;

#[async_trait]
impl NotificationOutbox for NoopNotificationOutbox {
    async fn enqueue(&self, channel: &str, template: &str, to: &str, _payload: serde_json::Value) -> anyhow::Result<()> {
        tracing::info!(channel, template, to, "notification enqueued (noop outbox)");
        Ok(())
    }
}

pub struct EchoPartnerClient;

#[async_trait]
impl PartnerClient for EchoPartnerClient {
    async fn call(&self, request: serde_json::Value, _deadline: Duration) -> anyhow::Result<serde_json::Value> {
        Ok(request)
    }
}

/// Production partner-client adapter: posts to a fixed partner endpoint and
/// retries once with jitter while the caller's breaker is still closed.
/// A second failure is surfaced to the caller, which records it against
/// the breaker itself rather than retrying further here.
pub struct HttpPartnerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpPartnerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint: endpoint.into() }
    }

    async fn post_once(&self, request: &serde_json::Value, deadline: Duration) -> anyhow::Result<serde_json::Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .timeout(deadline)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PartnerClient for HttpPartnerClient {
    async fn call(&self, request: serde_json::Value, deadline: Duration) -> anyhow::Result<serde_json::Value> {
        match self.post_once(&request, deadline).await {
            Ok(value) => Ok(value),
            Err(first_err) => {
                let jitter_ms = rand::Rng::gen_range(&mut rand::thread_rng(), 10..=100);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                self.post_once(&request, deadline).await.map_err(|second_err| {
                    tracing::warn!(error = %first_err, retry_error = %second_err, "partner call failed after single jittered retry");
                    second_err
                })
            }
        }
    }
}
