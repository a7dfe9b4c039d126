//! Serves signed URLs issued by the local filesystem backend.
//!
//! With S3 the client talks to the bucket directly; with local storage the
//! signed URLs point here and these routes check the HMAC before touching
//! the file.

use crate::error::HttpAppError;
use crate::state::StorageState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use scoremate_core::AppError;
use scoremate_storage::LocalStorage;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

fn local_backend(storage: &StorageState) -> Result<&Arc<LocalStorage>, AppError> {
    storage
        .local
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Local storage is not enabled".to_string()))
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[tracing::instrument(skip(storage, query), fields(key = %key))]
pub async fn get_object(
    State(storage): State<StorageState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, HttpAppError> {
    let local = local_backend(&storage)?;
    local.verify_signature("GET", &key, query.expires, &query.signature)?;

    let data = scoremate_storage::Storage::download(local.as_ref(), &key).await?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&key))],
        data,
    )
        .into_response())
}

#[tracing::instrument(skip(storage, query, headers, body), fields(key = %key, size_bytes = body.len()))]
pub async fn put_object(
    State(storage): State<StorageState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let local = local_backend(&storage)?;
    local.verify_signature("PUT", &key, query.expires, &query.signature)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    scoremate_storage::Storage::upload_with_key(
        local.as_ref(),
        &key,
        body.to_vec(),
        content_type,
        None,
    )
    .await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for("u/uploads/x/original.PDF"), "application/pdf");
        assert_eq!(content_type_for("u/scores/s/thumbs/cover.jpg"), "image/jpeg");
        assert_eq!(content_type_for("u/blob"), DEFAULT_CONTENT_TYPE);
    }
}
