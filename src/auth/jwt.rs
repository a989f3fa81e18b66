//! JWT token handler: generates and validates session tokens.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::auth::models::Claims;

pub struct JwtHandler {
    secret: String,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Issues a token for `(actor_id, session_id)` with a risk-based
    /// lifetime (0.5h/2h/8h inversely keyed to risk).
    pub fn generate_token(&self, actor_id: &str, session_id: &str, lifetime_secs: i64) -> Result<(String, usize)> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::seconds(lifetime_secs))
            .context("invalid session lifetime")?
            .timestamp() as usize;

        let claims = Claims { sub: actor_id.to_string(), session_id: session_id.to_string(), exp: expiration };

        debug!(actor_id, session_id, lifetime_secs, "issuing session token");

        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .context("failed to encode JWT")?;

        Ok((token, lifetime_secs as usize))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &Validation::default())
            .context("invalid or expired token")?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_validates_round_trip() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let (token, lifetime) = handler.generate_token("actor-1", "session-1", 1800).unwrap();
        assert!(!token.is_empty());
        assert_eq!(lifetime, 1800);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "actor-1");
        assert_eq!(claims.session_id, "session-1");
    }

    #[test]
    fn rejects_token_from_different_secret() {
        let a = JwtHandler::new("secret-a".to_string());
        let b = JwtHandler::new("secret-b".to_string());
        let (token, _) = a.generate_token("actor-1", "session-1", 1800).unwrap();
        assert!(b.validate_token(&token).is_err());
    }

    #[test]
    fn rejects_malformed_token() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        assert!(handler.validate_token("not.a.token").is_err());
    }
}
