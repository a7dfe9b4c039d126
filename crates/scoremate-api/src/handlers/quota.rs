use crate::auth::models::UserContext;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{extract::State, Json};
use scoremate_core::models::{QuotaDetailsResponse, QuotaSummary, UserQuota};
use scoremate_core::AppError;
use scoremate_db::{QuotaLedger, ScoreStore};
use std::sync::Arc;
use uuid::Uuid;

async fn current_quota(state: &AppState, user_id: Uuid) -> Result<UserQuota, AppError> {
    Ok(state
        .db
        .repos
        .quota
        .ensure_user(user_id, state.upload.default_quota_mb)
        .await?)
}

#[utoipa::path(
    get,
    path = "/api/v0/quota",
    tag = "quota",
    responses(
        (status = 200, description = "Storage quota", body = QuotaSummary),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_quota(
    user: UserContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<QuotaSummary>, HttpAppError> {
    let quota = current_quota(&state, user.user_id).await?;
    Ok(Json(QuotaSummary::from(quota)))
}

/// Quota plus a size breakdown of the caller's scores and suggestions for
/// freeing space
#[utoipa::path(
    get,
    path = "/api/v0/quota/details",
    tag = "quota",
    responses(
        (status = 200, description = "Detailed storage usage", body = QuotaDetailsResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_quota_details(
    user: UserContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<QuotaDetailsResponse>, HttpAppError> {
    let quota = current_quota(&state, user.user_id).await?;
    let usage = state.db.repos.scores.usage(user.user_id).await?;
    Ok(Json(QuotaDetailsResponse::build(quota, &usage)))
}
