//! OpenAPI documentation, served at `OPENAPI_JSON_PATH` with RapiDoc at `/docs`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error;
use crate::handlers;
use scoremate_core::models;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scoremate API",
        version = "0.1.0",
        description = "Sheet music storage (v0). Files go straight to object storage through signed URLs; the API reserves uploads against the caller's quota, confirms them into scores and signs downloads. All endpoints are versioned under /api/v0/."
    ),
    paths(
        // Files
        handlers::uploads::request_upload_url,
        handlers::uploads::confirm_upload,
        handlers::uploads::cancel_upload,
        handlers::uploads::download_url,
        // Scores
        handlers::scores::list_scores,
        handlers::scores::get_score,
        handlers::scores::delete_score,
        handlers::scores::regenerate_thumbnail,
        handlers::scores::refresh_info,
        handlers::scores::generate_all_thumbnails,
        // Quota
        handlers::quota::get_quota,
        handlers::quota::get_quota_details,
    ),
    components(
        schemas(
            models::UploadUrlRequest,
            models::UploadUrlResponse,
            models::UploadConfirmRequest,
            models::UploadConfirmResponse,
            models::UploadCancelRequest,
            models::UploadCancelResponse,
            models::DownloadFileType,
            models::DownloadUrlResponse,
            models::ScoreResponse,
            models::ProcessingStartedResponse,
            models::QuotaSummary,
            models::QuotaDetailsResponse,
            models::SizeBucket,
            models::QuotaRecommendation,
            error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "files", description = "Upload reservation, confirmation, cancellation and signed downloads"),
        (name = "scores", description = "Confirmed scores, deletion and reprocessing"),
        (name = "quota", description = "Per-user storage quota")
    )
)]
pub struct ApiDoc;
