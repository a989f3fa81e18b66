//! Authentication & Session Core: risk-based MFA, session lifetime,
//! and lockout.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::models::{AuthMethod, AuthRiskContext};
use crate::clock::{Clock, ClockReading};
use crate::config::SessionConfig;
use crate::domain::Session;
use crate::errors::CoreError;

/// Assesses authentication risk from the named signals. A simple
/// weighted sum is sufficient here: each signal independently nudges risk
/// up, and the result is clamped to `[0,1]`.
pub fn assess_risk(context: &AuthRiskContext) -> f64 {
    let mut score: f64 = 0.0;
    if context.new_device {
        score += 0.25;
    }
    if context.new_location {
        score += 0.2;
    }
    if context.unusual_hour {
        score += 0.1;
    }
    if context.suspicious_ip {
        score += 0.35;
    }
    score += (context.recent_failed_attempts as f64 * 0.1).min(0.3);
    score.clamp(0.0, 1.0)
}

/// Required factors derived from the risk score.
pub fn required_methods(risk_score: f64, totp_enabled: bool) -> Vec<AuthMethod> {
    if risk_score >= 0.7 {
        vec![AuthMethod::Password, AuthMethod::Totp, AuthMethod::Sms]
    } else if risk_score >= 0.4 {
        vec![AuthMethod::Password, AuthMethod::Totp]
    } else if risk_score >= 0.2 && totp_enabled {
        vec![AuthMethod::Password, AuthMethod::Totp]
    } else {
        vec![AuthMethod::Password]
    }
}

/// Session lifetime inversely keyed to risk: low risk gets the full base
/// lifetime, high risk gets the shortest.
pub fn session_lifetime_secs(risk_score: f64, config: &SessionConfig) -> u64 {
    if risk_score >= 0.7 {
        1800
    } else if risk_score >= 0.4 {
        7200
    } else {
        config.base_lifetime_secs
    }
}

struct LockoutState {
    failures: Vec<ClockReading>,
    locked_until: Option<ClockReading>,
}

impl Default for LockoutState {
    fn default() -> Self {
        Self { failures: Vec::new(), locked_until: None }
    }
}

/// Tracks session lifecycle and per-actor lockout state. Sessions past
/// expiry are treated as non-existent and removed lazily on next
/// validation, never via a background sweep.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    lockouts: Mutex<HashMap<String, LockoutState>>,
    config: SessionConfig,
    clock: std::sync::Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(config: SessionConfig, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), lockouts: Mutex::new(HashMap::new()), config, clock }
    }

    pub fn is_locked(&self, actor_id: &str) -> bool {
        let now = self.clock.now();
        let mut lockouts = self.lockouts.lock();
        let Some(state) = lockouts.get_mut(actor_id) else { return false };
        match state.locked_until {
            Some(until) if until.monotonic_nanos > now.monotonic_nanos => true,
            Some(_) => {
                state.locked_until = None;
                state.failures.clear();
                false
            }
            None => false,
        }
    }

    /// Records a failed attempt; locks the actor for `lockout_duration`
    /// once `lockout_threshold` failures accumulate within the last hour.
    pub fn record_failure(&self, actor_id: &str) {
        let now = self.clock.now();
        let mut lockouts = self.lockouts.lock();
        let state = lockouts.entry(actor_id.to_string()).or_default();
        state.failures.retain(|t| now.duration_since(t) < Duration::from_secs(3600));
        state.failures.push(now);
        if state.failures.len() as u32 >= self.config.lockout_threshold {
            let lockout_secs = self.config.lockout_duration_secs as i64;
            state.locked_until = Some(ClockReading {
                wall: now.wall + chrono::Duration::seconds(lockout_secs),
                monotonic_nanos: now.monotonic_nanos + lockout_secs * 1_000_000_000,
            });
        }
    }

    pub fn record_success(&self, actor_id: &str) {
        if let Some(state) = self.lockouts.lock().get_mut(actor_id) {
            state.failures.clear();
            state.locked_until = None;
        }
    }

    pub fn issue_session(&self, id: String, actor_id: &str, risk_score: f64, methods: Vec<String>) -> Session {
        let now = self.clock.now();
        let lifetime = session_lifetime_secs(risk_score, &self.config);
        let expires_at = ClockReading {
            wall: now.wall + chrono::Duration::seconds(lifetime as i64),
            monotonic_nanos: now.monotonic_nanos + (lifetime as i64 * 1_000_000_000),
        };
        let session = Session {
            id: id.clone(),
            actor_id: actor_id.to_string(),
            created_at: now,
            expires_at,
            risk_score_at_creation: risk_score,
            methods_satisfied: methods,
            last_activity: now,
        };
        self.sessions.lock().insert(id, session.clone());
        session
    }

    /// Refreshes `last_activity`; returns `None` for a session past
    /// expiry, removing it lazily.
    pub fn validate(&self, session_id: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(session_id)?;
        if now.monotonic_nanos >= session.expires_at.monotonic_nanos {
            sessions.remove(session_id);
            return None;
        }
        session.last_activity = now;
        Some(session.clone())
    }
}

pub fn lockout_error() -> CoreError {
    CoreError::Auth("actor is locked out due to too many recent failures".to_string())
}

/// Verifies a password against the credential hash an identity-provider
/// collaborator would supply. Credential storage itself is out of
/// scope here; this bcrypt check is the seam a real identity-provider
/// adapter plugs into.
pub fn verify_password(password: &str, credential_hash: &str) -> bool {
    bcrypt::verify(password, credential_hash).unwrap_or(false)
}

/// Stand-in for the identity-provider collaborator's credential check,
/// used where the core has no stored hash to compare against (the CRUD
/// surface that owns credentials is an external collaborator). Real
/// wiring replaces this with a call to that collaborator and
/// [`verify_password`] against its returned hash.
pub fn verify_password_placeholder(password: &str) -> bool {
    !password.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Utc;

    #[test]
    fn risk_bands_map_to_expected_factor_sets() {
        assert_eq!(required_methods(0.1, false), vec![AuthMethod::Password]);
        assert_eq!(required_methods(0.75, false), vec![AuthMethod::Password, AuthMethod::Totp, AuthMethod::Sms]);
        assert_eq!(required_methods(0.5, false), vec![AuthMethod::Password, AuthMethod::Totp]);
    }

    #[test]
    fn locks_after_threshold_failures_in_window() {
        let clock: std::sync::Arc<dyn Clock> = std::sync::Arc::new(FixedClock::new(Utc::now()));
        let store = SessionStore::new(SessionConfig::default(), clock);
        for _ in 0..5 {
            store.record_failure("actor-1");
        }
        assert!(store.is_locked("actor-1"));
    }

    #[test]
    fn lockout_expires_deterministically_with_fixed_clock() {
        let fixed = std::sync::Arc::new(FixedClock::new(Utc::now()));
        let clock: std::sync::Arc<dyn Clock> = fixed.clone();
        let config = SessionConfig { lockout_threshold: 6, lockout_duration_secs: 1800, ..SessionConfig::default() };
        let store = SessionStore::new(config, clock);

        for _ in 0..6 {
            store.record_failure("actor-1");
        }
        assert!(store.is_locked("actor-1"));

        fixed.advance(Duration::from_secs(30 * 60));
        assert!(store.is_locked("actor-1"));

        fixed.advance(Duration::from_secs(60));
        assert!(!store.is_locked("actor-1"));
    }

    #[test]
    fn session_past_expiry_is_treated_as_absent() {
        let fixed = std::sync::Arc::new(FixedClock::new(Utc::now()));
        let clock: std::sync::Arc<dyn Clock> = fixed.clone();
        let store = SessionStore::new(SessionConfig { base_lifetime_secs: 10, ..SessionConfig::default() }, clock);
        let session = store.issue_session("s1".to_string(), "actor-1", 0.1, vec!["PASSWORD".to_string()]);
        assert!(store.validate(&session.id).is_some());
        fixed.advance(Duration::from_secs(20));
        assert!(store.validate(&session.id).is_none());
    }
}
