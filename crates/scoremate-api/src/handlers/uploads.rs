use crate::auth::models::UserContext;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use scoremate_core::models::{
    DownloadUrlQuery, DownloadUrlResponse, UploadCancelRequest, UploadCancelResponse,
    UploadConfirmRequest, UploadConfirmResponse, UploadUrlRequest, UploadUrlResponse,
};
use std::sync::Arc;

/// Reserve an upload and get a signed URL to PUT the file to
///
/// Quota is checked here but only charged on confirm. The reservation
/// expires after the configured TTL.
#[utoipa::path(
    post,
    path = "/api/v0/files/upload-url",
    tag = "files",
    request_body = UploadUrlRequest,
    responses(
        (status = 201, description = "Upload reserved", body = UploadUrlResponse),
        (status = 400, description = "Invalid request, file type not allowed or file too large", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 413, description = "Storage quota exceeded", body = ErrorResponse),
        (status = 502, description = "Object storage unavailable", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state, request),
    fields(user_id = %user.user_id, mime_type = %request.mime_type, operation = "reserve_upload")
)]
pub async fn request_upload_url(
    user: UserContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<UploadUrlRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let response = state
        .services
        .uploads
        .reserve(user.user_id, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Confirm a finished upload and create the score
#[utoipa::path(
    post,
    path = "/api/v0/files/upload-confirm",
    tag = "files",
    request_body = UploadConfirmRequest,
    responses(
        (status = 200, description = "Score created and quota charged", body = UploadConfirmResponse),
        (status = 400, description = "Reservation missing, expired or already used", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state, request),
    fields(user_id = %user.user_id, upload_id = %request.upload_id, operation = "confirm_upload")
)]
pub async fn confirm_upload(
    user: UserContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<UploadConfirmRequest>,
) -> Result<Json<UploadConfirmResponse>, HttpAppError> {
    let response = state
        .services
        .uploads
        .confirm(user.user_id, &request)
        .await?;
    Ok(Json(response))
}

/// Cancel a pending upload. Always succeeds.
#[utoipa::path(
    post,
    path = "/api/v0/files/upload-cancel",
    tag = "files",
    request_body = UploadCancelRequest,
    responses(
        (status = 200, description = "Reservation removed (or already gone)", body = UploadCancelResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state, request),
    fields(user_id = %user.user_id, upload_id = %request.upload_id, operation = "cancel_upload")
)]
pub async fn cancel_upload(
    user: UserContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<UploadCancelRequest>,
) -> Result<Json<UploadCancelResponse>, HttpAppError> {
    let response = state
        .services
        .uploads
        .cancel(user.user_id, request.upload_id)
        .await?;
    Ok(Json(response))
}

/// Get a signed URL to download a score's original or one of its thumbnails
#[utoipa::path(
    get,
    path = "/api/v0/files/download-url",
    tag = "files",
    params(DownloadUrlQuery),
    responses(
        (status = 200, description = "Signed download URL", body = DownloadUrlResponse),
        (status = 400, description = "Invalid file_type/page combination", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Score not found", body = ErrorResponse),
        (status = 502, description = "Object storage unavailable", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state, query),
    fields(user_id = %user.user_id, score_id = %query.score_id, operation = "download_url")
)]
pub async fn download_url(
    user: UserContext,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadUrlQuery>,
) -> Result<Json<DownloadUrlResponse>, HttpAppError> {
    let response = state
        .services
        .scores
        .download_url(user.user_id, &query)
        .await?;
    Ok(Json(response))
}
