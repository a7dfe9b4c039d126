use crate::auth::models::UserContext;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use scoremate_core::models::{ProcessingStartedResponse, ScoreListQuery, ScoreResponse};
use std::sync::Arc;
use uuid::Uuid;

/// List the caller's scores, newest first
#[utoipa::path(
    get,
    path = "/api/v0/scores",
    tag = "scores",
    params(ScoreListQuery),
    responses(
        (status = 200, description = "Scores", body = Vec<ScoreResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state, query), fields(user_id = %user.user_id))]
pub async fn list_scores(
    user: UserContext,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScoreListQuery>,
) -> Result<Json<Vec<ScoreResponse>>, HttpAppError> {
    let scores = state.services.scores.list(user.user_id, &query).await?;
    Ok(Json(scores.into_iter().map(ScoreResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v0/scores/{id}",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Score ID")),
    responses(
        (status = 200, description = "Score", body = ScoreResponse),
        (status = 404, description = "Score not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id, score_id = %id))]
pub async fn get_score(
    user: UserContext,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScoreResponse>, HttpAppError> {
    let score = state.services.scores.get(user.user_id, id).await?;
    Ok(Json(ScoreResponse::from(score)))
}

/// Delete a score and release its quota
///
/// Stored objects are removed in the background; quota is released even if
/// that cleanup fails.
#[utoipa::path(
    delete,
    path = "/api/v0/scores/{id}",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Score ID")),
    responses(
        (status = 204, description = "Score deleted"),
        (status = 404, description = "Score not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id, score_id = %id, operation = "delete_score"))]
pub async fn delete_score(
    user: UserContext,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    state.services.scores.delete(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v0/scores/{id}/regenerate-thumbnail",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Score ID")),
    responses(
        (status = 202, description = "Cover thumbnail queued", body = ProcessingStartedResponse),
        (status = 404, description = "Score not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id, score_id = %id))]
pub async fn regenerate_thumbnail(
    user: UserContext,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let response = state
        .services
        .scores
        .regenerate_thumbnail(user.user_id, id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/api/v0/scores/{id}/refresh-info",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Score ID")),
    responses(
        (status = 202, description = "Page count and metadata extraction queued", body = ProcessingStartedResponse),
        (status = 404, description = "Score not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id, score_id = %id))]
pub async fn refresh_info(
    user: UserContext,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let response = state
        .services
        .scores
        .refresh_info(user.user_id, id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/api/v0/scores/{id}/generate-all-thumbnails",
    tag = "scores",
    params(("id" = Uuid, Path, description = "Score ID")),
    responses(
        (status = 202, description = "Thumbnails for every page queued", body = ProcessingStartedResponse),
        (status = 404, description = "Score not found", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip(state), fields(user_id = %user.user_id, score_id = %id))]
pub async fn generate_all_thumbnails(
    user: UserContext,
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpAppError> {
    let response = state
        .services
        .scores
        .generate_page_thumbnails(user.user_id, id)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
