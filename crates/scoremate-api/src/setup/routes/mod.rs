//! Route configuration and setup.
//!
//! Public routes (health, docs) and bearer-authenticated API routes share the
//! CORS, tracing, concurrency and rate limit layers.

mod health;

use crate::api_doc::ApiDoc;
use crate::auth::middleware::{auth_middleware, AuthState};
use crate::constants::{API_PREFIX, OPENAPI_JSON_PATH};
use crate::handlers::{quota, scores, uploads};
use crate::middleware::{rate_limit_middleware, RateLimitState, ShardedRateLimitStore};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use scoremate_core::config::RateLimitBackend;
use scoremate_core::Config;
use scoremate_db::{PostgresRateLimitStore, RateLimitStore};
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

const RATE_LIMIT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Build the application router.
pub async fn setup_routes(
    config: &Config,
    state: Arc<AppState>,
) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;
    let auth_state = Arc::new(AuthState::new(
        config.jwt_secret(),
        state.db.repos.quota.clone(),
        state.upload.default_quota_mb,
    ));
    let rate_limiter = setup_rate_limiter(config, &state);

    let api_routes = Router::new()
        .nest(API_PREFIX, protected_routes())
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_bytes()));

    let app = public_routes()
        .merge(api_routes)
        .merge(local_storage_routes(&state))
        .merge(utoipa_rapidoc::RapiDoc::new(OPENAPI_JSON_PATH).path("/docs"))
        .layer(ConcurrencyLimitLayer::new(
            config.http_concurrency_limit().max(1),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .with_state(state);

    tracing::info!(
        http_concurrency_limit = config.http_concurrency_limit(),
        max_request_body_bytes = config.max_request_body_bytes(),
        "Routes configured"
    );

    Ok(app)
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/health",
            get(|State(state): State<Arc<AppState>>| async move {
                health::health_check(state).await
            }),
        )
        .route("/live", get(health::liveness_check))
        .route(OPENAPI_JSON_PATH, get(|| async { Json(ApiDoc::openapi()) }))
}

fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files/upload-url", post(uploads::request_upload_url))
        .route("/files/upload-confirm", post(uploads::confirm_upload))
        .route("/files/upload-cancel", post(uploads::cancel_upload))
        .route("/files/download-url", get(uploads::download_url))
        .route("/scores", get(scores::list_scores))
        .route(
            "/scores/{id}",
            get(scores::get_score).delete(scores::delete_score),
        )
        .route(
            "/scores/{id}/regenerate-thumbnail",
            post(scores::regenerate_thumbnail),
        )
        .route("/scores/{id}/refresh-info", post(scores::refresh_info))
        .route(
            "/scores/{id}/generate-all-thumbnails",
            post(scores::generate_all_thumbnails),
        )
        .route("/quota", get(quota::get_quota))
        .route("/quota/details", get(quota::get_quota_details))
}

/// Targets of the local backend's signed URLs. Authorization is the URL
/// signature, so these sit outside the bearer auth layer.
#[cfg(feature = "storage-local")]
fn local_storage_routes(state: &AppState) -> Router<Arc<AppState>> {
    use crate::constants::LOCAL_STORAGE_ROUTE;
    use crate::handlers::local_files;
    use axum::extract::DefaultBodyLimit;

    if state.storage.local.is_none() {
        return Router::new();
    }

    let max_bytes = usize::try_from(state.upload.max_upload_size_bytes()).unwrap_or(usize::MAX);
    Router::new()
        .route(
            &format!("{}/{{*key}}", LOCAL_STORAGE_ROUTE),
            get(local_files::get_object).put(local_files::put_object),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_bytes))
}

#[cfg(not(feature = "storage-local"))]
fn local_storage_routes(_state: &AppState) -> Router<Arc<AppState>> {
    Router::new()
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}

/// Counter store for the HTTP rate limiter, plus a timer that drops expired
/// windows.
fn setup_rate_limiter(config: &Config, state: &AppState) -> Arc<RateLimitState> {
    let store: Arc<dyn RateLimitStore> = match (config.rate_limit_backend(), &state.db.pool) {
        (RateLimitBackend::Postgres, Some(pool)) => {
            tracing::info!("Using shared Postgres rate limit counters");
            Arc::new(PostgresRateLimitStore::new(pool.clone()))
        }
        (RateLimitBackend::Postgres, None) => {
            tracing::warn!(
                "RATE_LIMIT_BACKEND=postgres needs a database pool, using in-process counters"
            );
            Arc::new(ShardedRateLimitStore::default())
        }
        (RateLimitBackend::Memory, _) => Arc::new(ShardedRateLimitStore::default()),
    };

    let cleanup_store = store.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            match cleanup_store.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Expired rate limit windows removed"),
                Err(e) => tracing::warn!(error = %e, "Rate limit cleanup failed"),
            }
        }
    });

    Arc::new(RateLimitState {
        store,
        limit_per_minute: config.http_rate_limit_per_minute(),
    })
}
