//! Upload reservation, confirmation and cancellation through the HTTP API.
//!
//! Run with: `cargo test -p scoremate-api --test uploads_test`

mod helpers;

use helpers::auth::{bearer, test_user};
use helpers::{api_path, setup_test_app, setup_test_app_with};
use scoremate_core::models::TaskType;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

const MB: i64 = 1024 * 1024;

#[tokio::test]
async fn test_reserve_confirm_delete_keeps_quota_in_step() {
    let app = setup_test_app().await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 0);

    let upload_id = app.reserve(&user.token, 50 * MB).await;
    let quota = app.quota(&user.token).await;
    assert_eq!(quota["used_mb"], 0, "reserving does not charge quota");

    let response = app.confirm(&user.token, upload_id).await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["message"], "Upload confirmed");
    assert_eq!(body["quota_used_mb"], 50);
    assert_eq!(body["remaining_quota_mb"], 150);
    let score_id = body["score_id"].as_str().unwrap().to_string();

    let quota = app.quota(&user.token).await;
    assert_eq!(quota["used_mb"], 50);
    assert_eq!(quota["available_mb"], 150);

    let response = app
        .client()
        .delete(&api_path(&format!("/scores/{}", score_id)))
        .add_header("Authorization", bearer(&user.token))
        .await;
    assert_eq!(response.status_code(), 204);

    let quota = app.quota(&user.token).await;
    assert_eq!(quota["used_mb"], 0);
}

#[tokio::test]
async fn test_reserve_signs_a_put_url_for_the_original() {
    let app = setup_test_app().await;
    let user = test_user();

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({
            "filename": "Fugue.PDF",
            "size_bytes": 3 * MB,
            "mime_type": " Application/PDF "
        }))
        .await;

    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["headers"]["Content-Type"], "application/pdf");
    let upload_id = body["upload_id"].as_str().unwrap();
    assert_eq!(
        body["s3_key"],
        format!("{}/uploads/{}/original.pdf", user.user_id, upload_id)
    );
    assert_eq!(app.repo.reservation_count(), 1);
}

#[tokio::test]
async fn test_upload_url_does_not_outlive_the_reservation() {
    let app = setup_test_app_with(|config| {
        config.upload.presigned_url_expiry_secs = 3600;
        config.upload.reservation_ttl_secs = 300;
    })
    .await;
    let user = test_user();

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "size_bytes": MB, "mime_type": "application/pdf" }))
        .await;

    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["expires_in"], 300);
    assert!(body["upload_url"]
        .as_str()
        .unwrap()
        .contains("expires_in=300"));
}

#[tokio::test]
async fn test_reserve_over_quota_reports_figures() {
    let app = setup_test_app().await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 199);

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "size_bytes": 10 * MB, "mime_type": "application/pdf" }))
        .await;

    assert_eq!(response.status_code(), 413);
    let body: Value = response.json();
    assert_eq!(body["code"], "QUOTA_EXCEEDED");
    assert_eq!(body["details"]["required_mb"], 10);
    assert_eq!(body["details"]["available_mb"], 1);
    assert_eq!(body["details"]["used_mb"], 199);
    assert_eq!(body["details"]["total_mb"], 200);
    assert_eq!(app.repo.reservation_count(), 0);
}

#[tokio::test]
async fn test_reserve_rejects_disallowed_type_and_oversized_file() {
    let app = setup_test_app().await;
    let user = test_user();

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "size_bytes": MB, "mime_type": "image/png" }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "UNSUPPORTED_MEDIA_TYPE");

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "size_bytes": 101 * MB, "mime_type": "application/pdf" }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_reserve_requires_positive_size() {
    let app = setup_test_app().await;
    let user = test_user();

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "size_bytes": 0, "mime_type": "application/pdf" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_signing_failure_is_a_gateway_error() {
    let app = setup_test_app().await;
    let user = test_user();
    app.storage.set_fail_signing(true);

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "size_bytes": MB, "mime_type": "application/pdf" }))
        .await;

    assert_eq!(response.status_code(), 502);
    let body: Value = response.json();
    assert_eq!(body["code"], "STORAGE_GATEWAY_ERROR");
}

#[tokio::test]
async fn test_cancelled_reservation_cannot_be_confirmed() {
    let app = setup_test_app().await;
    let user = test_user();
    let upload_id = app.reserve(&user.token, MB).await;

    let response = app
        .client()
        .post(&api_path("/files/upload-cancel"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["message"], "Upload cancelled");

    let response = app.confirm(&user.token, upload_id).await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "RESERVATION_NOT_FOUND");
    assert_eq!(app.quota(&user.token).await["used_mb"], 0);
}

#[tokio::test]
async fn test_cancel_after_confirm_leaves_quota_alone() {
    let app = setup_test_app().await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 0);
    let upload_id = app.reserve(&user.token, 20 * MB).await;
    assert_eq!(app.confirm(&user.token, upload_id).await.status_code(), 200);

    let response = app
        .client()
        .post(&api_path("/files/upload-cancel"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "upload_id": upload_id }))
        .await;
    assert_eq!(response.status_code(), 200);

    let quota = app.quota(&user.token).await;
    assert_eq!(quota["used_mb"], 20);
    assert_eq!(quota["available_mb"], 180);

    let response = app
        .client()
        .get(&api_path("/scores"))
        .add_header("Authorization", bearer(&user.token))
        .await;
    let scores: Vec<Value> = response.json();
    assert_eq!(scores.len(), 1);
}

#[tokio::test]
async fn test_cancel_of_unknown_reservation_succeeds() {
    let app = setup_test_app().await;
    let user = test_user();

    let response = app
        .client()
        .post(&api_path("/files/upload-cancel"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "upload_id": Uuid::new_v4() }))
        .await;

    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_second_confirm_is_rejected_and_charges_once() {
    let app = setup_test_app().await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 0);
    let upload_id = app.reserve(&user.token, 20 * MB).await;

    assert_eq!(app.confirm(&user.token, upload_id).await.status_code(), 200);
    let response = app.confirm(&user.token, upload_id).await;
    assert_eq!(response.status_code(), 400);

    assert_eq!(app.quota(&user.token).await["used_mb"], 20);
}

#[tokio::test]
async fn test_expired_reservation_cannot_be_confirmed() {
    let app = setup_test_app_with(|config| config.upload.reservation_ttl_secs = 1).await;
    let user = test_user();
    let upload_id = app.reserve(&user.token, MB).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = app.confirm(&user.token, upload_id).await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "RESERVATION_NOT_FOUND");
}

#[tokio::test]
async fn test_reservation_of_another_user_cannot_be_confirmed() {
    let app = setup_test_app().await;
    let owner = test_user();
    let intruder = test_user();
    let upload_id = app.reserve(&owner.token, MB).await;

    let response = app.confirm(&intruder.token, upload_id).await;
    assert_eq!(response.status_code(), 400);

    // The owner's reservation is untouched.
    assert_eq!(app.confirm(&owner.token, upload_id).await.status_code(), 200);
}

#[tokio::test]
async fn test_concurrent_reservations_may_overcommit() {
    let app = setup_test_app_with(|config| config.upload.max_upload_size_mb = 500).await;
    let user = test_user();
    app.repo.provision_user(user.user_id, 200, 0);

    let first = app.reserve(&user.token, 150 * MB).await;
    let second = app.reserve(&user.token, 150 * MB).await;

    assert_eq!(app.confirm(&user.token, first).await.status_code(), 200);
    assert_eq!(app.confirm(&user.token, second).await.status_code(), 200);

    let quota = app.quota(&user.token).await;
    assert_eq!(quota["used_mb"], 300);
    assert_eq!(quota["available_mb"], 0);
}

#[tokio::test]
async fn test_confirm_rejects_blank_title() {
    let app = setup_test_app().await;
    let user = test_user();
    let upload_id = app.reserve(&user.token, MB).await;

    let response = app
        .client()
        .post(&api_path("/files/upload-confirm"))
        .add_header("Authorization", bearer(&user.token))
        .json(&json!({ "upload_id": upload_id, "title": "   " }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    // A rejected confirm leaves the reservation usable.
    assert_eq!(app.repo.reservation_count(), 1);
}

#[tokio::test]
async fn test_confirm_enqueues_processing() {
    let app = setup_test_app().await;
    let user = test_user();
    app.upload_score(&user.token, MB).await;

    let task_types: Vec<TaskType> = app.repo.tasks().iter().map(|t| t.task_type).collect();
    assert!(task_types.contains(&TaskType::ProcessPdfInfo));
    assert!(task_types.contains(&TaskType::GenerateThumbnail));
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post(&api_path("/files/upload-url"))
        .json(&json!({ "size_bytes": MB, "mime_type": "application/pdf" }))
        .await;
    assert_eq!(response.status_code(), 401);

    let response = app
        .client()
        .get(&api_path("/quota"))
        .add_header("Authorization", "Bearer not-a-jwt")
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_token_signed_with_another_secret_is_rejected() {
    let app = setup_test_app().await;
    let token = helpers::auth::token_for(
        Uuid::new_v4(),
        "some-other-secret-that-is-also-long-enough",
    );

    let response = app
        .client()
        .get(&api_path("/quota"))
        .add_header("Authorization", bearer(&token))
        .await;

    assert_eq!(response.status_code(), 401);
}
