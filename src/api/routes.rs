//! HTTP surface: the stable `/api/v1` contract.

use std::time::Duration;

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::AppState;
use crate::auth::models::{AuthStatus, AuthenticateRequest, AuthenticateResponse};
use crate::auth::models::Claims;
use crate::auth::session::verify_password_placeholder;
use crate::cache::CacheKey;
use crate::compliance;
use crate::decision;
use crate::domain::{RiskAssessment, RiskLevel, Transaction};
use crate::errors::{CoreError, CoreResult};
use crate::features::{self, ActorHistoryView, DeviceView, LocationView};
use crate::rules::{self, WorkingRecord};
use crate::telemetry::Outcome;

const IDEMPOTENCY_TTL_SECS: u64 = 24 * 3600;

async fn idempotency_lookup(state: &AppState, key: &str) -> Option<Vec<u8>> {
    let cache_key = CacheKey::build("idempotency", &[("key", key)]);
    state.cache.get(&cache_key).await
}

async fn idempotency_store(state: &AppState, key: &str, body: &[u8]) {
    let cache_key = CacheKey::build("idempotency", &[("key", key)]);
    state.cache.put(&cache_key, body.to_vec()).await;
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("Idempotency-Key").and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

pub async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AuthenticateRequest>,
) -> CoreResult<Json<AuthenticateResponse>> {
    let started = std::time::Instant::now();
    let result = authenticate_inner(&state, headers, request).await;
    let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Error };
    state.telemetry.record("auth.authenticate", outcome, started.elapsed().as_micros() as u64);
    result
}

async fn authenticate_inner(
    state: &AppState,
    headers: HeaderMap,
    request: AuthenticateRequest,
) -> CoreResult<Json<AuthenticateResponse>> {
    let now_unix = state.clock.now().wall.timestamp().max(0) as u64;
    state.rate_limiter.check(&request.actor_id, "auth", now_unix).await?;

    if let Some(key) = idempotency_key(&headers) {
        if let Some(cached) = idempotency_lookup(state, &key).await {
            let response: AuthenticateResponse = serde_json::from_slice(&cached).map_err(CoreError::internal)?;
            return Ok(Json(response));
        }
    }

    if state.sessions.is_locked(&request.actor_id) {
        return Err(crate::auth::session::lockout_error());
    }

    let risk_score = crate::auth::session::assess_risk(&request.context);
    let required = crate::auth::session::required_methods(risk_score, request.totp_code.is_some());

    let password_ok = verify_password_placeholder(&request.password);
    if !password_ok {
        state.sessions.record_failure(&request.actor_id);
        return Ok(Json(AuthenticateResponse {
            status: AuthStatus::Failed,
            session_id: None,
            token: None,
            methods_used: vec![],
            risk_score,
            next_auth_methods: Some(required),
            expires_at: None,
        }));
    }

    let needs_totp = required.iter().any(|m| matches!(m, crate::auth::models::AuthMethod::Totp));
    if needs_totp && request.totp_code.is_none() {
        return Ok(Json(AuthenticateResponse {
            status: AuthStatus::Pending,
            session_id: None,
            token: None,
            methods_used: vec![crate::auth::models::AuthMethod::Password],
            risk_score,
            next_auth_methods: Some(required),
            expires_at: None,
        }));
    }

    state.sessions.record_success(&request.actor_id);
    let session_id = state.id_generator.new_id();
    let methods_used: Vec<String> = required.iter().map(|m| m.as_str().to_string()).collect();
    let session = state.sessions.issue_session(session_id.clone(), &request.actor_id, risk_score, methods_used.clone());

    let lifetime = session.expires_at.duration_since(&session.created_at).as_secs() as i64;
    let (token, _) = state.jwt.generate_token(&request.actor_id, &session_id, lifetime).map_err(CoreError::internal)?;

    state
        .audit
        .append("AUTH", &request.actor_id, &session_id, json!({"risk_score": risk_score, "methods": methods_used}))
        .await?;

    let response = AuthenticateResponse {
        status: AuthStatus::Success,
        session_id: Some(session_id),
        token: Some(token),
        methods_used: required,
        risk_score,
        next_auth_methods: None,
        expires_at: Some(session.expires_at.wall),
    };

    if let Some(key) = idempotency_key(&headers) {
        if let Ok(bytes) = serde_json::to_vec(&response) {
            idempotency_store(state, &key, &bytes).await;
        }
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct AssessRequest {
    pub transaction: Transaction,
    #[serde(default)]
    pub history: ActorHistoryView,
    #[serde(default)]
    pub device: DeviceView,
    #[serde(default)]
    pub location: LocationView,
    #[serde(default)]
    pub sca: compliance::ScaContext,
    #[serde(default)]
    pub suspicious: compliance::SuspiciousActivityContext,
}

pub async fn assess_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AssessRequest>,
) -> CoreResult<Json<RiskAssessment>> {
    let started = std::time::Instant::now();
    let result = assess_transaction_inner(&state, headers, request).await;
    let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Error };
    state.telemetry.record("transactions.assess", outcome, started.elapsed().as_micros() as u64);
    if result.is_err() {
        let now_millis = state.clock.now().wall.timestamp_millis().max(0) as u64;
        state.aggregator.record("error_rate_5m", now_millis, 1.0);
    }
    result
}

async fn assess_transaction_inner(
    state: &AppState,
    headers: HeaderMap,
    request: AssessRequest,
) -> CoreResult<Json<RiskAssessment>> {
    let now_unix = state.clock.now().wall.timestamp().max(0) as u64;
    state.rate_limiter.check(&request.transaction.actor_id, "transactions", now_unix).await?;

    if let Some(key) = idempotency_key(&headers) {
        if let Some(cached) = idempotency_lookup(state, &key).await {
            let assessment: RiskAssessment = serde_json::from_slice(&cached).map_err(CoreError::internal)?;
            return Ok(Json(assessment));
        }
    }

    // Same (actor, fingerprint) within 24h returns the cached prior
    // assessment.
    let dedup_key = CacheKey::build("risk_assessment", &[("fingerprint", &request.transaction.fingerprint)]);
    if let Some(cached) = state.cache.get(&dedup_key).await {
        let assessment: RiskAssessment = serde_json::from_slice(&cached).map_err(CoreError::internal)?;
        return Ok(Json(assessment));
    }

    let started = std::time::Instant::now();
    let vector = features::extract(&request.transaction, &request.history, &request.device, &request.location);
    let scored = state.risk_scorer.score(&vector);

    // Compliance signals are computed before rule evaluation so the rule
    // catalog can match on them directly: the 2-of-N `suspicious_activity`
    // floor (REVIEW) and a single strong indicator such as structuring are
    // different severities, and only a seeded rule keyed on the indicator
    // itself can escalate the latter to BLOCK.
    let sca = compliance::sca_requirement(request.transaction.amount, &state.config.compliance, request.sca);
    let suspicious = compliance::suspicious_activity(request.transaction.amount, &state.config.compliance, &request.suspicious);
    if suspicious.flagged {
        state.bus.publish(crate::eventbus::Event {
            class: crate::eventbus::EventClass::FraudSignal,
            timestamp: state.clock.now(),
            payload: json!({"fingerprint": request.transaction.fingerprint, "indicators": suspicious.indicators}),
        });
    }
    let floor = compliance::compliance_floor(sca, &suspicious);
    let ctr_reportable = compliance::ctr_reportable(request.transaction.amount, &state.config.compliance);

    let mut record = WorkingRecord::new();
    record.set("amount", crate::domain::Operand::Number(request.transaction.amount.major_units()));
    record.set("risk_score", crate::domain::Operand::Number(scored.risk_score));
    record.set("structuring_flag", crate::domain::Operand::Bool(suspicious.indicators.contains(&"potential_structuring")));

    let report = rules::evaluate(&state.rule_catalog, "fraud", &mut record, true, Duration::from_millis(50));

    let (risk_level, action) = decision::decide(scored.risk_score, &state.config.risk, &report, floor);

    let assessment = RiskAssessment {
        fingerprint: request.transaction.fingerprint.clone(),
        risk_score: scored.risk_score,
        anomaly_component: scored.anomaly_component,
        supervised_component: scored.supervised_component,
        risk_level,
        action,
        explanation: scored.explanation,
        model_version: scored.model_version,
        elapsed_ms: started.elapsed().as_millis() as u64,
        created_at: state.clock.now(),
    };

    let durable_store = state.durable_store.clone();
    let to_persist = assessment.clone();
    state
        .breakers
        .call("durable_store", || async move {
            durable_store.persist_decision(to_persist).await.map_err(CoreError::internal)
        })
        .await?;
    state
        .audit
        .append("TRANSACTION", &request.transaction.actor_id, &request.transaction.fingerprint, json!({"action": format!("{:?}", assessment.action)}))
        .await?;

    // Does not change the decisioned action; only records the
    // reportable event.
    if ctr_reportable {
        state
            .audit
            .append(
                "CTR",
                &request.transaction.actor_id,
                &request.transaction.fingerprint,
                json!({"amount_minor": request.transaction.amount.minor_units, "currency": request.transaction.amount.currency.as_str()}),
            )
            .await?;
    }

    if let Ok(bytes) = serde_json::to_vec(&assessment) {
        state.cache.put(&dedup_key, bytes.clone()).await;
        if let Some(key) = idempotency_key(&headers) {
            idempotency_store(state, &key, &bytes).await;
        }
    }

    let now_millis = state.clock.now().wall.timestamp_millis().max(0) as u64;
    let amount_major = request.transaction.amount.major_units();
    state.aggregator.record("transaction_volume_1m", now_millis, amount_major);
    state.aggregator.record("transaction_count_1m", now_millis, 1.0);
    state.aggregator.record("avg_transaction_amount_5m", now_millis, amount_major);
    state.aggregator.record(
        "high_risk_ratio_5m",
        now_millis,
        if matches!(risk_level, RiskLevel::High | RiskLevel::Critical) { 1.0 } else { 0.0 },
    );
    state.aggregator.record("response_time_1m", now_millis, assessment.elapsed_ms as f64);
    state.aggregator.record("error_rate_5m", now_millis, 0.0);

    Ok(Json(assessment))
}

#[derive(Debug, Deserialize)]
pub struct RuleTestRequest {
    pub category: String,
    pub fields: std::collections::HashMap<String, crate::domain::Operand>,
}

#[derive(Debug, Serialize)]
pub struct RuleTestResponse {
    pub would_fire: Vec<String>,
    pub actions: Vec<crate::domain::Action>,
}

pub async fn test_rules(State(state): State<AppState>, Json(request): Json<RuleTestRequest>) -> Json<RuleTestResponse> {
    let mut record = WorkingRecord::new();
    for (field, value) in request.fields {
        record.set(&field, value);
    }
    let report = rules::evaluate(&state.rule_catalog, &request.category, &mut record, false, Duration::from_millis(50));

    let would_fire: Vec<String> = report.outcomes.iter().filter(|o| o.fired).map(|o| o.rule_id.clone()).collect();
    let actions: Vec<crate::domain::Action> = report.outcomes.into_iter().filter(|o| o.fired).flat_map(|o| o.actions).collect();

    Json(RuleTestResponse { would_fire, actions })
}

pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "windows": state.aggregator.snapshot() }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: serde_json::Value,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let breakers = state.breakers.snapshot_all();
    let any_open = breakers.iter().any(|b| matches!(b.mode, crate::domain::BreakerMode::Open));
    let status = if any_open { "degraded" } else { "healthy" };

    Json(HealthResponse {
        status,
        components: json!({
            "cache": {
                "local_hits": state.cache.metrics.local_hits.load(std::sync::atomic::Ordering::Relaxed),
                "shared_degradations": state.cache.metrics.shared_degradations.load(std::sync::atomic::Ordering::Relaxed),
            },
            "breakers": breakers,
            "bus": "ok",
        }),
    })
}

pub fn current_actor(claims: Option<Extension<Claims>>) -> Option<String> {
    claims.map(|Extension(c)| c.sub)
}
