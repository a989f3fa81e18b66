//! Axum middleware that validates session bearer tokens and attaches the
//! decoded [`Claims`] to the request's extensions for handlers downstream.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::auth::{jwt::JwtHandler, models::Claims};

pub async fn auth_middleware(State(jwt_handler): State<Arc<JwtHandler>>, req: Request, next: Next) -> Result<Response, AuthError> {
    let (mut parts, body) = req.into_parts();
    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| AuthError::MissingToken)?;

    let claims = jwt_handler.validate_token(bearer.token()).map_err(|_| AuthError::InvalidToken)?;
    parts.extensions.insert(claims);
    let req = Request::from_parts(parts, body);
    Ok(next.run(req).await)
}

pub async fn optional_auth_middleware(State(jwt_handler): State<Arc<JwtHandler>>, req: Request, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();
    if let Ok(TypedHeader(Authorization(bearer))) = parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
        if let Ok(claims) = jwt_handler.validate_token(bearer.token()) {
            parts.extensions.insert(claims);
        }
    }
    let req = Request::from_parts(parts, body);
    next.run(req).await
}

pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid or expired token"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};

    #[test]
    fn auth_error_maps_to_unauthorized() {
        assert_eq!(AuthError::MissingToken.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn extract_claims_reads_from_extensions() {
        let mut req = HttpRequest::new(Body::empty());
        assert!(extract_claims(&req).is_none());

        let claims = Claims { sub: "actor-1".to_string(), session_id: "session-1".to_string(), exp: 1_234_567_890 };
        req.extensions_mut().insert(claims.clone());

        assert_eq!(extract_claims(&req).unwrap().sub, "actor-1");
    }
}
