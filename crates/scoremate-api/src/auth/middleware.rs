use crate::auth::models::{JwtClaims, UserContext};
use crate::error::HttpAppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use scoremate_core::AppError;
use scoremate_db::QuotaLedger;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthState {
    decoding_key: DecodingKey,
    validation: Validation,
    pub quota: Arc<dyn QuotaLedger>,
    /// Capacity given to users seen for the first time
    pub default_quota_mb: i64,
}

impl AuthState {
    pub fn new(jwt_secret: &str, quota: Arc<dyn QuotaLedger>, default_quota_mb: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            quota,
            default_quota_mb,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AppError> {
        decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT validation failed");
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        AppError::Unauthorized("Token has expired".to_string())
                    }
                    ErrorKind::InvalidSignature => {
                        AppError::Unauthorized("Invalid token signature".to_string())
                    }
                    _ => AppError::Unauthorized("Invalid or expired token".to_string()),
                }
            })
    }
}

fn bearer_token(request: &Request) -> Result<&str, AppError> {
    let header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(
                "Invalid authorization header format. Expected: Bearer <token>".to_string(),
            )
        })
}

/// Validates the bearer token, provisions the caller's quota row on first use
/// and stores a [`UserContext`] in the request extensions.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let claims = match bearer_token(&request).and_then(|token| auth_state.validate_token(token)) {
        Ok(claims) => claims,
        Err(err) => return HttpAppError(err).into_response(),
    };

    if let Err(e) = auth_state
        .quota
        .ensure_user(claims.sub, auth_state.default_quota_mb)
        .await
    {
        tracing::error!(error = %e, user_id = %claims.sub, "Failed to provision user quota");
        return HttpAppError(AppError::from(e)).into_response();
    }

    tracing::debug!(user_id = %claims.sub, "Request authenticated");
    request.extensions_mut().insert(UserContext::from(claims));
    next.run(request).await
}
