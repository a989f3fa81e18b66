//! Composition root.
//!
//! `Core` owns one `Arc`-shared handle per component plus the collaborator
//! trait objects, constructed once from a validated [`Config`]. No
//! component is reachable through a global/static; every subsystem takes
//! the handles it needs through constructor parameters instead.

use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::Aggregator;
use crate::auth::{JwtHandler, SessionStore};
use crate::batcher::Batcher;
use crate::breaker::BreakerSet;
use crate::cache::CacheLayer;
use crate::clock::Clock;
use crate::collab::{DurableStore, ModelRepository, NotificationOutbox, PartnerClient, SharedKv};
use crate::config::{Config, RateLimitRule};
use crate::eventbus::EventBus;
use crate::ratelimit::{RateLimiter, RouteClassRules};
use crate::risk::{LinearModel, RiskScorer};
use crate::rules::RuleCatalog;
use crate::telemetry::{AlertThresholds, Telemetry};

pub struct Core {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub cache: Arc<CacheLayer>,
    pub breakers: Arc<BreakerSet>,
    pub rate_limiter: Arc<RateLimiter>,
    pub telemetry: Arc<Telemetry>,
    pub bus: Arc<EventBus>,
    pub aggregator: Arc<Aggregator>,
    pub batcher: Arc<Batcher<serde_json::Value, serde_json::Value>>,
    pub rule_catalog: Arc<RuleCatalog>,
    pub risk_scorer: Arc<RiskScorer>,
    pub sessions: Arc<SessionStore>,
    pub jwt: Arc<JwtHandler>,
    pub audit: Arc<crate::audit::AuditLog>,
    pub durable_store: Arc<dyn DurableStore>,
    pub model_repository: Arc<dyn ModelRepository>,
    pub notifications: Arc<dyn NotificationOutbox>,
    pub id_generator: Arc<dyn crate::clock::IdGenerator>,
}

pub struct Collaborators {
    pub durable_store: Arc<dyn DurableStore>,
    pub shared_kv: Arc<dyn SharedKv>,
    pub model_repository: Arc<dyn ModelRepository>,
    pub notifications: Arc<dyn NotificationOutbox>,
    pub clock: Arc<dyn Clock>,
    pub id_generator: Arc<dyn crate::clock::IdGenerator>,
}

impl Core {
    /// Builds every component from `config` and the collaborator adapters
    /// selected by the caller (production wiring, or in-memory fakes for
    /// dev/test — selected once, here, never via a runtime flag).
    pub async fn new(config: Config, collaborators: Collaborators) -> anyhow::Result<Self> {
        let rules = collaborators.durable_store.load_rules().await?;
        let rule_catalog = Arc::new(RuleCatalog::new(rules));

        let cache = Arc::new(CacheLayer::new(&config.cache, collaborators.shared_kv.clone()));
        let breakers = Arc::new(BreakerSet::new(config.breaker.clone(), collaborators.clock.clone()));
        // The authentication route class gets a tighter ceiling than the
        // configured default: it is the one class directly exploitable for
        // credential-stuffing, so it warrants its own (identity, class)
        // bucket rather than sharing the general-purpose limit.
        let route_rules = RouteClassRules::default().with_rule("auth", RateLimitRule { limit: 10, period_secs: 60 });
        let rate_limiter = Arc::new(
            RateLimiter::new(config.rate_limit_default, collaborators.shared_kv.clone()).with_route_rules(route_rules),
        );
        let telemetry = Arc::new(Telemetry::new(AlertThresholds::default()));
        let bus = Arc::new(EventBus::new(1024));
        let aggregator = Arc::new(Aggregator::new());
        let batcher = Arc::new(Batcher::new(
            config.batcher.batch_size,
            Duration::from_millis(config.batcher.batch_timeout_millis),
        ));
        let risk_scorer = Arc::new(RiskScorer::new(config.risk.anomaly_weight));
        wire_model_reload(&risk_scorer, &collaborators.model_repository).await;
        let sessions = Arc::new(SessionStore::new(config.session.clone(), collaborators.clock.clone()));
        let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
        let audit = Arc::new(crate::audit::AuditLog::new(collaborators.durable_store.clone(), collaborators.clock.clone()));

        Ok(Self {
            config,
            clock: collaborators.clock,
            cache,
            breakers,
            rate_limiter,
            telemetry,
            bus,
            aggregator,
            batcher,
            rule_catalog,
            risk_scorer,
            sessions,
            jwt,
            audit,
            durable_store: collaborators.durable_store,
            model_repository: collaborators.model_repository,
            notifications: collaborators.notifications,
            id_generator: collaborators.id_generator,
        })
    }

    /// Builds a `Core` wired entirely to in-memory fakes, for integration
    /// tests and the binary's `--mock-collaborators` dev mode.
    pub async fn new_with_fakes(config: Config) -> anyhow::Result<Self> {
        use crate::clock::{SystemClock, UuidGenerator};
        use crate::collab::{EchoPartnerClient, InMemoryDurableStore, InMemoryModelRepository, InMemorySharedKv, NoopNotificationOutbox};

        let _ = EchoPartnerClient; // Partner clients are wired per-integration; none are default-registered here.

        let collaborators = Collaborators {
            durable_store: Arc::new(InMemoryDurableStore::new(vec![crate::rules::structuring_block_rule()])),
            shared_kv: Arc::new(InMemorySharedKv::default()),
            model_repository: Arc::new(InMemoryModelRepository::default()),
            notifications: Arc::new(NoopNotificationOutbox),
            clock: Arc::new(SystemClock::new()),
            id_generator: Arc::new(UuidGenerator),
        };

        Self::new(config, collaborators).await
    }

    /// Coalesces identical-shape partner calls sharing `batch_key` into a
    /// single underlying request. `partner` receives one call
    /// carrying a JSON array of the batch's requests and must answer with
    /// a same-length JSON array; each caller gets back the element at its
    /// own request's position. A batch-level failure propagates to every
    /// caller in the batch.
    pub async fn call_partner_batched(
        &self,
        partner: Arc<dyn PartnerClient>,
        batch_key: &str,
        request: serde_json::Value,
        deadline: std::time::Duration,
    ) -> Result<serde_json::Value, crate::errors::CoreError> {
        self.batcher
            .submit(batch_key, request, move |requests| async move {
                let batch_request = serde_json::Value::Array(requests.clone());
                let response = partner
                    .call(batch_request, deadline)
                    .await
                    .map_err(|err| crate::errors::CoreError::Dependency(err.to_string()))?;
                let results = response.as_array().cloned().unwrap_or_default();
                if results.len() != requests.len() {
                    return Err(crate::errors::CoreError::Dependency(
                        "partner batch response length did not match request count".to_string(),
                    ));
                }
                Ok(results.into_iter().map(Ok).collect())
            })
            .await
    }
}

/// Loads the `anomaly` and `supervised` models from the repository at
/// startup and subscribes for the control-plane reload signal. Each model
/// name reloads independently; a missing or malformed blob simply leaves
/// that slot unseeded, which the scorer treats as `MODEL_UNAVAILABLE`
/// until a valid one arrives.
async fn wire_model_reload(risk_scorer: &Arc<RiskScorer>, model_repository: &Arc<dyn ModelRepository>) {
    if let Ok(Some(blob)) = model_repository.latest("anomaly").await {
        match LinearModel::from_blob(&blob) {
            Ok(model) => risk_scorer.reload_anomaly(Arc::new(model)),
            Err(err) => tracing::warn!(error = %err, "anomaly model blob failed to parse at startup"),
        }
    }
    if let Ok(Some(blob)) = model_repository.latest("supervised").await {
        match LinearModel::from_blob(&blob) {
            Ok(model) => risk_scorer.reload_supervised(Arc::new(model)),
            Err(err) => tracing::warn!(error = %err, "supervised model blob failed to parse at startup"),
        }
    }

    let anomaly_scorer = risk_scorer.clone();
    let _ = model_repository
        .subscribe(
            "anomaly",
            Arc::new(move |blob| match LinearModel::from_blob(&blob) {
                Ok(model) => anomaly_scorer.reload_anomaly(Arc::new(model)),
                Err(err) => tracing::warn!(error = %err, "anomaly model reload rejected, keeping previous version"),
            }),
        )
        .await;

    let supervised_scorer = risk_scorer.clone();
    let _ = model_repository
        .subscribe(
            "supervised",
            Arc::new(move |blob| match LinearModel::from_blob(&blob) {
                Ok(model) => supervised_scorer.reload_supervised(Arc::new(model)),
                Err(err) => tracing::warn!(error = %err, "supervised model reload rejected, keeping previous version"),
            }),
        )
        .await;
}

pub type AppState = Arc<Core>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::EchoPartnerClient;

    #[tokio::test]
    async fn batched_partner_calls_fire_together_and_split_by_position() {
        let mut config = Config::default();
        config.batcher.batch_timeout_millis = 10;
        let core = Core::new_with_fakes(config).await.unwrap();
        let partner: Arc<dyn PartnerClient> = Arc::new(EchoPartnerClient);

        let a = core.call_partner_batched(partner.clone(), "fx-rate", serde_json::json!({"pair": "EURUSD"}), Duration::from_secs(1));
        let b = core.call_partner_batched(partner, "fx-rate", serde_json::json!({"pair": "GBPUSD"}), Duration::from_secs(1));
        let (ra, rb) = tokio::join!(a, b);

        assert_eq!(ra.unwrap(), serde_json::json!({"pair": "EURUSD"}));
        assert_eq!(rb.unwrap(), serde_json::json!({"pair": "GBPUSD"}));
    }
}
