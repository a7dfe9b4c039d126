use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use scoremate_api::auth::models::JwtClaims;
use uuid::Uuid;

/// Shared HS256 secret (must match setup_test_app).
pub const TEST_JWT_SECRET: &str = "test-jwt-secret-at-least-32-characters-long";

/// A caller with a valid bearer token.
pub struct TestUser {
    pub user_id: Uuid,
    pub token: String,
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn token_for(user_id: Uuid, secret: &str) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user_id,
        iat: now.timestamp(),
        exp: (now + Duration::hours(1)).timestamp(),
        email: Some(format!("{}@example.com", user_id.simple())),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encodes")
}

pub fn test_user() -> TestUser {
    let user_id = Uuid::new_v4();
    TestUser {
        user_id,
        token: token_for(user_id, TEST_JWT_SECRET),
    }
}
