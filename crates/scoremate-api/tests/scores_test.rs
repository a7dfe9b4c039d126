//! Score, download, quota and cross-cutting HTTP behavior.
//!
//! Run with: `cargo test -p scoremate-api --test scores_test`

mod helpers;

use helpers::auth::{bearer, test_user};
use helpers::{api_path, setup_test_app, setup_test_app_with};
use scoremate_core::models::{ScoreInfoUpdate, TaskType};
use scoremate_db::ScoreStore;
use serde_json::Value;
use uuid::Uuid;

const MB: i64 = 1024 * 1024;

#[tokio::test]
async fn test_list_and_get_only_show_own_scores() {
    let app = setup_test_app().await;
    let user = test_user();
    let other = test_user();
    let mine = app.upload_score(&user.token, MB).await;
    let theirs = app.upload_score(&other.token, MB).await;

    let response = app
        .client()
        .get(&api_path("/scores"))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 200);
    let scores: Vec<Value> = response.json();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0]["id"], mine.to_string());
    assert_eq!(scores[0]["title"], "Goldberg Variations");
    assert_eq!(scores[0]["tags"], serde_json::json!(["baroque", "keyboard"]));

    let response = app
        .client()
        .get(&api_path(&format!("/scores/{}", theirs)))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 404);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_list_honours_limit() {
    let app = setup_test_app().await;
    let user = test_user();
    for _ in 0..3 {
        app.upload_score(&user.token, MB).await;
    }

    let response = app
        .client()
        .get(&api_path("/scores"))
        .add_query_param("limit", 2)
        .add_header("Authorization", bearer(&user.token))
        .await;

    let scores: Vec<Value> = response.json();
    assert_eq!(scores.len(), 2);
}

#[tokio::test]
async fn test_download_urls_for_original_and_thumbnail() {
    let app = setup_test_app().await;
    let user = test_user();
    let score_id = app.upload_score(&user.token, MB).await;

    let response = app
        .client()
        .get(&api_path("/files/download-url"))
        .add_query_param("score_id", score_id)
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["file_type"], "original");
    assert!(body["s3_key"]
        .as_str()
        .unwrap()
        .ends_with("/original.pdf"));

    let response = app
        .client()
        .get(&api_path("/files/download-url"))
        .add_query_param("score_id", score_id)
        .add_query_param("file_type", "thumbnail")
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(
        body["s3_key"],
        format!("{}/scores/{}/thumbs/cover.jpg", user.user_id, score_id)
    );
}

#[tokio::test]
async fn test_page_download_needs_a_page_in_range() {
    let app = setup_test_app().await;
    let user = test_user();
    let score_id = app.upload_score(&user.token, MB).await;
    app.state
        .db
        .repos
        .scores
        .update_info(
            score_id,
            &ScoreInfoUpdate {
                pages: 3,
                title: None,
                composer: None,
            },
        )
        .await
        .unwrap();

    let response = app
        .client()
        .get(&api_path("/files/download-url"))
        .add_query_param("score_id", score_id)
        .add_query_param("file_type", "page")
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = app
        .client()
        .get(&api_path("/files/download-url"))
        .add_query_param("score_id", score_id)
        .add_query_param("file_type", "page")
        .add_query_param("page", 4)
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = app
        .client()
        .get(&api_path("/files/download-url"))
        .add_query_param("score_id", score_id)
        .add_query_param("file_type", "page")
        .add_query_param("page", 2)
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(
        body["s3_key"],
        format!("{}/scores/{}/thumbs/page-0002.jpg", user.user_id, score_id)
    );
}

#[tokio::test]
async fn test_download_of_foreign_score_is_not_found() {
    let app = setup_test_app().await;
    let owner = test_user();
    let stranger = test_user();
    let score_id = app.upload_score(&owner.token, MB).await;

    let response = app
        .client()
        .get(&api_path("/files/download-url"))
        .add_query_param("score_id", score_id)
        .add_header("Authorization", bearer(&stranger.token))
        .await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_delete_releases_quota_even_when_storage_fails() {
    let app = setup_test_app().await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 0);
    let score_id = app.upload_score(&user.token, 30 * MB).await;
    app.storage.set_fail_deletes(true);

    let response = app
        .client()
        .delete(&api_path(&format!("/scores/{}", score_id)))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 204);
    assert_eq!(app.quota(&user.token).await["used_mb"], 0);

    let cleanup = app
        .repo
        .tasks()
        .into_iter()
        .find(|t| t.task_type == TaskType::DeleteScoreFiles)
        .expect("cleanup task queued");
    assert_eq!(cleanup.payload["score_id"], score_id.to_string());

    let response = app
        .client()
        .delete(&api_path(&format!("/scores/{}", score_id)))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_reprocessing_endpoints_queue_tasks() {
    let app = setup_test_app().await;
    let user = test_user();
    let score_id = app.upload_score(&user.token, MB).await;
    let before = app.repo.tasks().len();

    for action in ["regenerate-thumbnail", "refresh-info", "generate-all-thumbnails"] {
        let response = app
            .client()
            .post(&api_path(&format!("/scores/{}/{}", score_id, action)))
            .add_header("Authorization", bearer(&user.token))
            .await;
        assert_eq!(response.status_code(), 202, "{}", action);
        let body: Value = response.json();
        assert_eq!(body["score_id"], score_id.to_string());
    }

    let tasks = app.repo.tasks();
    assert_eq!(tasks.len(), before + 3);
    assert!(tasks
        .iter()
        .any(|t| t.task_type == TaskType::GenerateAllPageThumbnails));

    let response = app
        .client()
        .post(&api_path(&format!("/scores/{}/refresh-info", Uuid::new_v4())))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_quota_details_break_down_usage() {
    let app = setup_test_app().await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 0);
    app.upload_score(&user.token, MB / 2).await;
    app.upload_score(&user.token, 25 * MB).await;

    let response = app
        .client()
        .get(&api_path("/quota/details"))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();

    assert_eq!(body["quota_summary"]["total_mb"], 200);
    let buckets = body["size_breakdown"].as_array().unwrap();
    assert_eq!(buckets.len(), 4);
    assert_eq!(buckets[0]["range"], "0-1MB");
    assert_eq!(buckets[0]["count"], 1);
    assert_eq!(buckets[3]["range"], "20MB+");
    assert_eq!(buckets[3]["count"], 1);

    let kinds: Vec<&str> = body["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["type"].as_str())
        .collect();
    assert!(kinds.contains(&"large_files"));
    assert!(kinds.contains(&"missing_thumbnails"));
}

#[tokio::test]
async fn test_new_caller_gets_default_quota() {
    let app = setup_test_app_with(|config| config.upload.default_quota_mb = 75).await;
    let user = test_user();

    let quota = app.quota(&user.token).await;
    assert_eq!(quota["total_mb"], 75);
    assert_eq!(quota["used_mb"], 0);
    assert_eq!(quota["available_mb"], 75);
}

#[tokio::test]
async fn test_rate_limit_headers_and_rejection() {
    let app = setup_test_app_with(|config| config.base.http_rate_limit_per_minute = 2).await;
    let user = test_user();

    let first = app
        .client()
        .get(&api_path("/quota"))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(first.status_code(), 200);
    assert_eq!(first.header("X-RateLimit-Limit"), "2");
    assert_eq!(first.header("X-RateLimit-Remaining"), "1");

    app.client()
        .get(&api_path("/quota"))
        .add_header("Authorization", bearer(&user.token))
        .await;

    let limited = app
        .client()
        .get(&api_path("/quota"))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(limited.status_code(), 429);
    assert!(limited.headers().contains_key("retry-after"));
    let body: Value = limited.json();
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_health_and_openapi_are_public() {
    let app = setup_test_app().await;

    let response = app.client().get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage_backend"], "memory");

    let response = app.client().get("/live").await;
    assert_eq!(response.status_code(), 200);

    let response = app.client().get("/api-docs/openapi.json").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert!(body["paths"]["/api/v0/files/upload-url"].is_object());
}
