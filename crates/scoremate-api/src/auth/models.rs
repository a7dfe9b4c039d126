use crate::error::ErrorResponse;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HS256 bearer token claims. Tokens are issued elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: Uuid, // user_id
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Authenticated caller, inserted into request extensions by the auth middleware
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl From<JwtClaims> for UserContext {
    fn from(claims: JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
        }
    }
}

impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .ok_or_else(|| {
                let mut body = ErrorResponse::new("Missing user context", "MISSING_USER_CONTEXT");
                body.suggested_action = Some("Check the authentication token".to_string());
                (StatusCode::UNAUTHORIZED, Json(body))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_claim_is_optional() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({
            "sub": Uuid::nil(),
            "exp": 2_000_000_000i64,
            "iat": 1_700_000_000i64,
        }))
        .unwrap();
        let ctx = UserContext::from(claims);
        assert_eq!(ctx.user_id, Uuid::nil());
        assert!(ctx.email.is_none());
    }
}
