mod common;

use axum::{
    body::Body,
    http::{header, Method, StatusCode},
};
use common::{authed, body_bytes, jpeg, json_body, pdf, profile_fields, MultipartForm, TestApp};
use serde_json::Value;

fn business_fields(profile: &Value) -> Value {
    let mut fields = profile.clone();
    let map = fields.as_object_mut().unwrap();
    for key in ["owner_id", "created_at", "updated_at", "documents"] {
        map.remove(key);
    }
    fields
}

#[tokio::test]
async fn profile_is_not_found_before_first_update() {
    let app = TestApp::spawn().await;
    let login = app.login("new.lawyer@example.com").await;

    let response = app.get("/profile", &login).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn json_update_persists_normalized_fields_without_touching_storage() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;
    let calls_before = app.storage.call_count();

    let response = app.put_profile_json(&login, profile_fields()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.storage.call_count(), calls_before);

    let body = json_body(app.get("/profile", &login).await).await;
    assert_eq!(body["owner_id"], login.owner_id.as_str());
    assert_eq!(body["full_name"], "Asha Verma");
    assert_eq!(body["bar_number"], "DL/1234/2015");
    assert_eq!(body["fee_structure"], "fixed");
    assert_eq!(body["languages"], serde_json::json!(["English", "Hindi"]));
    assert_eq!(body["documents"], serde_json::json!([]));
}

#[tokio::test]
async fn json_and_multipart_updates_produce_identical_fields() {
    let app = TestApp::spawn().await;
    let json_user = app.login("json@example.com").await;
    let form_user = app.login("form@example.com").await;

    let json_response = app.put_profile_json(&json_user, profile_fields()).await;
    let form_response = app
        .put_profile_multipart(&form_user, MultipartForm::new().with_profile_fields())
        .await;

    assert_eq!(json_response.status(), StatusCode::OK);
    assert_eq!(form_response.status(), StatusCode::OK);
    let from_json = json_body(json_response).await;
    let from_form = json_body(form_response).await;
    assert_eq!(business_fields(&from_json), business_fields(&from_form));
}

#[tokio::test]
async fn missing_required_field_is_reported_by_name() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;
    let mut fields = profile_fields();
    fields.as_object_mut().unwrap().remove("full_name");

    let response = app.put_profile_json(&login, fields).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["field"], "full_name");
    assert_eq!(
        app.get("/profile", &login).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn non_numeric_multipart_value_is_a_field_error() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let form = MultipartForm::new()
        .text("full_name", "Asha Verma")
        .text("bar_number", "DL/1234/2015")
        .text("city", "New Delhi")
        .text("experience_years", "nine");
    let response = app.put_profile_multipart(&login, form).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["field"], "experience_years");
}

#[tokio::test]
async fn multipart_update_stores_documents_with_fields() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let form = MultipartForm::new()
        .with_profile_fields()
        .file("photo", "me.jpg", "image/jpeg", &jpeg(2048))
        .file("cv", "cv.pdf", "application/pdf", &pdf(4096));
    let response = app.put_profile_multipart(&login, form).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["documents"], serde_json::json!(["photo", "cv"]));

    let metadata = app.metadata(&login).await;
    assert_eq!(metadata["photo"]["size"], 2048);
    assert_eq!(metadata["photo"]["content_type"], "image/jpeg");
    assert_eq!(metadata["cv"]["size"], 4096);
    assert!(metadata.get("bar_registration_certificate").is_none());
}

#[tokio::test]
async fn untouched_file_inputs_are_ignored() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let form = MultipartForm::new()
        .with_profile_fields()
        .file("photo", "", "application/octet-stream", &[]);
    let response = app.put_profile_multipart(&login, form).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.storage.puts.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsupported_file_type_rejects_whole_update() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let form = MultipartForm::new()
        .with_profile_fields()
        .file("cv", "cv.pdf", "application/pdf", &pdf(1024))
        .file("photo", "me.pdf", "application/pdf", &pdf(1024));
    let response = app.put_profile_multipart(&login, form).await;

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(app.storage.puts.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(
        app.get("/profile", &login).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(app.metadata(&login).await, serde_json::json!({}));
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let form = MultipartForm::new()
        .with_profile_fields()
        .file("photo", "me.jpg", "image/jpeg", &jpeg(common::TEST_MAX_UPLOAD_BYTES + 1));
    let response = app.put_profile_multipart(&login, form).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.metadata(&login).await, serde_json::json!({}));
}

#[tokio::test]
async fn storage_outage_keeps_previous_document_and_fields() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;
    let original = jpeg(2048);

    let form = MultipartForm::new()
        .with_profile_fields()
        .file("photo", "me.jpg", "image/jpeg", &original);
    assert_eq!(
        app.put_profile_multipart(&login, form).await.status(),
        StatusCode::OK
    );
    let before = app.metadata(&login).await;

    app.storage.set_failing(true);
    let form = MultipartForm::new()
        .text("full_name", "Asha V. Sharma")
        .text("bar_number", "DL/1234/2015")
        .text("city", "Gurugram")
        .file("photo", "new.jpg", "image/jpeg", &jpeg(3000));
    let response = app.put_profile_multipart(&login, form).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    app.storage.set_failing(false);

    assert_eq!(app.metadata(&login).await, before);
    let profile = json_body(app.get("/profile", &login).await).await;
    assert_eq!(profile["full_name"], "Asha Verma");
    assert_eq!(profile["city"], "New Delhi");

    let urls = app.urls(&login).await;
    let response = app.follow_url(urls["photo"].as_str().unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.as_ref(), original.as_slice());
}

#[tokio::test]
async fn update_requires_known_content_type() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let response = app
        .send(
            authed(Method::PUT, "/profile", &login.session_id, Some(&login.csrf_token))
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("full_name=Asha"))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let response = app
        .send(
            authed(Method::PUT, "/profile", &login.session_id, Some(&login.csrf_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"full_name\": "))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn later_update_keeps_previously_uploaded_documents() {
    let app = TestApp::spawn().await;
    let login = app.login("asha@example.com").await;

    let form = MultipartForm::new()
        .with_profile_fields()
        .file("cv", "cv.pdf", "application/pdf", &pdf(1024));
    assert_eq!(
        app.put_profile_multipart(&login, form).await.status(),
        StatusCode::OK
    );

    let mut fields = profile_fields();
    fields["city"] = Value::from("Mumbai");
    let response = app.put_profile_json(&login, fields).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["city"], "Mumbai");
    assert_eq!(body["documents"], serde_json::json!(["cv"]));
}
