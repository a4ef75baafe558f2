mod common;

use axum::http::{header, StatusCode};
use chrono::Duration;
use common::{body_bytes, jpeg, json_body, pdf, Login, MultipartForm, TestApp};
use serde_json::{json, Value};
use std::collections::BTreeSet;

async fn upload(app: &TestApp, login: &Login, slot: &str, content_type: &str, data: &[u8]) {
    let form = MultipartForm::new()
        .with_profile_fields()
        .file(slot, "upload.bin", content_type, data);
    let response = app.put_profile_multipart(login, form).await;
    assert_eq!(response.status(), StatusCode::OK, "upload of {} failed", slot);
}

fn keys(value: &Value) -> BTreeSet<String> {
    value.as_object().unwrap().keys().cloned().collect()
}

#[tokio::test]
async fn upload_delete_scenario_keeps_metadata_and_urls_in_step() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;

    upload(&app, &login, "photo", "image/jpeg", &jpeg(2048)).await;
    let metadata = app.metadata(&login).await;
    assert_eq!(keys(&metadata), BTreeSet::from(["photo".to_string()]));
    assert_eq!(metadata["photo"]["size"], 2048);
    assert_eq!(metadata["photo"]["owner_id"], login.owner_id.as_str());
    assert_eq!(metadata["photo"]["slot"], "photo");

    upload(&app, &login, "cv", "application/pdf", &pdf(50 * 1024)).await;
    let metadata = app.metadata(&login).await;
    assert_eq!(
        keys(&metadata),
        BTreeSet::from(["photo".to_string(), "cv".to_string()])
    );
    assert_eq!(metadata["cv"]["size"], 50 * 1024);

    let response = app.delete_file(&login, "photo").await;
    assert_eq!(response.status(), StatusCode::OK);

    let metadata = app.metadata(&login).await;
    assert_eq!(keys(&metadata), BTreeSet::from(["cv".to_string()]));
    let urls = app.urls(&login).await;
    assert_eq!(keys(&urls), BTreeSet::from(["cv".to_string()]));

    let profile = json_body(app.get("/profile", &login).await).await;
    assert_eq!(profile["documents"], json!(["cv"]));
}

#[tokio::test]
async fn urls_are_empty_object_without_documents() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;

    assert_eq!(app.urls(&login).await, json!({}));
    assert_eq!(app.metadata(&login).await, json!({}));
}

#[tokio::test]
async fn url_slots_match_metadata_slots() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;
    upload(&app, &login, "photo", "image/png", &jpeg(512)).await;
    upload(&app, &login, "bar_registration_certificate", "application/pdf", &pdf(900)).await;

    let metadata = app.metadata(&login).await;
    let urls = app.urls(&login).await;

    assert_eq!(keys(&metadata), keys(&urls));
    for (slot, url) in urls.as_object().unwrap() {
        let key = metadata[slot]["key"].as_str().unwrap();
        assert!(url.as_str().unwrap().contains(key), "{} not signed for {}", slot, key);
    }
}

#[tokio::test]
async fn deleting_an_empty_slot_is_not_found() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;

    let response = app.delete_file(&login, "cv").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_an_unknown_slot_is_a_bad_request() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;

    let response = app.delete_file(&login, "passport").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_requires_csrf_token() {
    let app = TestApp::spawn().await;
    let mut login = app.login("u1@example.com").await;
    upload(&app, &login, "photo", "image/jpeg", &jpeg(100)).await;

    login.csrf_token = "not-the-token".to_string();
    let response = app.delete_file(&login, "photo").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.metadata(&login).await.get("photo").is_some());
}

#[tokio::test]
async fn reupload_replaces_previous_object() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;
    let first = jpeg(1000);
    let second = jpeg(1200);

    upload(&app, &login, "photo", "image/jpeg", &first).await;
    let old_url = app.urls(&login).await["photo"].as_str().unwrap().to_string();
    upload(&app, &login, "photo", "image/jpeg", &second).await;

    let urls = app.urls(&login).await;
    let response = app.follow_url(urls["photo"].as_str().unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), second.as_slice());

    // The superseded object is gone even though its link has not expired.
    let response = app.follow_url(&old_url).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_reuploads_leave_one_consistent_object() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;
    let a = jpeg(1500);
    let mut b = jpeg(1500);
    b[100] = 0x01;

    let form_a = MultipartForm::new()
        .with_profile_fields()
        .file("photo", "a.jpg", "image/jpeg", &a);
    let form_b = MultipartForm::new()
        .with_profile_fields()
        .file("photo", "b.jpg", "image/jpeg", &b);
    let (ra, rb) = tokio::join!(
        app.put_profile_multipart(&login, form_a),
        app.put_profile_multipart(&login, form_b)
    );
    assert_eq!(ra.status(), StatusCode::OK);
    assert_eq!(rb.status(), StatusCode::OK);

    let metadata = app.metadata(&login).await;
    let urls = app.urls(&login).await;
    let response = app.follow_url(urls["photo"].as_str().unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let served = body_bytes(response).await;

    assert!(served.as_ref() == a.as_slice() || served.as_ref() == b.as_slice());
    assert_eq!(metadata["photo"]["size"], served.len());
}

#[tokio::test]
async fn owners_cannot_see_each_others_documents() {
    let app = TestApp::spawn().await;
    let owner = app.login("u1@example.com").await;
    let other = app.login("u2@example.com").await;
    upload(&app, &owner, "cv", "application/pdf", &pdf(300)).await;

    assert_eq!(app.metadata(&other).await, json!({}));
    assert_eq!(app.urls(&other).await, json!({}));
    assert_eq!(
        app.delete_file(&other, "cv").await.status(),
        StatusCode::NOT_FOUND
    );
    assert!(app.metadata(&owner).await.get("cv").is_some());
}

#[tokio::test]
async fn signed_download_serves_bytes_with_private_headers() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;
    let data = pdf(700);
    upload(&app, &login, "cv", "application/pdf", &data).await;

    let url = app.urls(&login).await["cv"].as_str().unwrap().to_string();
    let response = app.follow_url(&url).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(headers[header::CACHE_CONTROL], "private, no-store");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "inline; filename=\"cv.pdf\""
    );
    assert_eq!(body_bytes(response).await.as_ref(), data.as_slice());
}

#[tokio::test]
async fn tampered_or_expired_links_are_rejected() {
    let app = TestApp::spawn().await;
    let login = app.login("u1@example.com").await;
    upload(&app, &login, "photo", "image/jpeg", &jpeg(300)).await;
    let url = app.urls(&login).await["photo"].as_str().unwrap().to_string();

    let tampered = format!("{}0", url);
    assert_eq!(
        app.follow_url(&tampered).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let unsigned = url.split('?').next().unwrap().to_string();
    assert_eq!(
        app.follow_url(&unsigned).await.status(),
        StatusCode::UNAUTHORIZED
    );

    app.clock.advance(Duration::seconds(3601));
    assert_eq!(app.follow_url(&url).await.status(), StatusCode::UNAUTHORIZED);
}
