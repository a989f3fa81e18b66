//! Wire types for the Authentication & Session Core.

use serde::{Deserialize, Serialize};

/// JWT claims issued for a session. `exp` is risk-based, not fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub session_id: String,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMethod {
    Password,
    Totp,
    Sms,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "PASSWORD",
            AuthMethod::Totp => "TOTP",
            AuthMethod::Sms => "SMS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthStatus {
    Success,
    Pending,
    Failed,
    Locked,
}

/// Signals the risk assessor consults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthRiskContext {
    pub new_device: bool,
    pub new_location: bool,
    pub unusual_hour: bool,
    pub recent_failed_attempts: u32,
    pub suspicious_ip: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub actor_id: String,
    pub password: String,
    pub totp_code: Option<String>,
    pub sms_code: Option<String>,
    #[serde(default)]
    pub context: AuthRiskContext,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateResponse {
    pub status: AuthStatus,
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub methods_used: Vec<AuthMethod>,
    pub risk_score: f64,
    pub next_auth_methods: Option<Vec<AuthMethod>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}
