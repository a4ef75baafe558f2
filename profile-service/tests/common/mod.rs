//! In-process harness for profile-service integration tests.
//!
//! Every backend is in memory, time is driven by a [`ManualClock`] and OTP
//! codes are captured by a [`RecordingOtpSender`].

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use profile_service::config::ProfileConfig;
use profile_service::services::{
    BucketStorage, ManualClock, RecordingOtpSender, RetryPolicy, Storage, StorageError, UrlSigner,
};
use profile_service::{build_router, AppState, StateBuilder};
use secrecy::Secret;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub const TEST_MAX_UPLOAD_BYTES: usize = 64 * 1024;
pub const TEST_BASE_URL: &str = "http://profile.test";

/// Wraps the in-memory bucket, counting calls and failing on demand.
pub struct CountingStorage {
    inner: BucketStorage,
    pub puts: AtomicUsize,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl CountingStorage {
    fn new(inner: BucketStorage) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn enter(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("connection refused by test".into()))
        } else {
            Ok(())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for CountingStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.enter()?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.enter()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.enter()?;
        self.inner.delete(key).await
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.enter()?;
        self.inner.presign(key, ttl).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.enter()?;
        self.inner.health_check().await
    }
}

/// Credentials of a logged-in test user.
#[derive(Debug, Clone)]
pub struct Login {
    pub session_id: String,
    pub csrf_token: String,
    pub owner_id: String,
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<RecordingOtpSender>,
    pub storage: Arc<CountingStorage>,
}

pub fn test_config() -> ProfileConfig {
    let mut config = ProfileConfig::default();
    config.log_level = "error".to_string();
    config.documents.max_upload_bytes = TEST_MAX_UPLOAD_BYTES;
    config.documents.public_base_url = TEST_BASE_URL.to_string();
    config.documents.url_signing_secret = Secret::new("test-signing-secret".to_string());
    config.storage.retry_max_elapsed_ms = 50;
    config.storage.retry_max_attempts = 1;
    config
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut ProfileConfig)) -> Self {
        let mut config = test_config();
        configure(&mut config);

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let sender = Arc::new(RecordingOtpSender::new());
        let signer = UrlSigner::new(
            config.documents.public_base_url.clone(),
            config.documents.url_signing_secret.clone(),
        );
        let storage = Arc::new(CountingStorage::new(BucketStorage::in_memory(
            signer,
            RetryPolicy::from_config(&config.storage),
            clock.clone(),
        )));

        let state = StateBuilder::new(config)
            .with_clock(clock.clone())
            .with_otp_sender(sender.clone())
            .with_storage(storage.clone())
            .build()
            .await
            .expect("Failed to build test state");

        TestApp {
            router: build_router(state.clone()),
            state,
            clock,
            sender,
            storage,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed to respond")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn request_otp(&self, identifier: &str, role: &str) -> Response {
        self.post_json(
            "/auth/request-otp",
            serde_json::json!({ "identifier": identifier, "role": role }),
        )
        .await
    }

    pub async fn verify_otp(&self, identifier: &str, code: &str) -> Response {
        self.post_json(
            "/auth/verify-otp",
            serde_json::json!({ "identifier": identifier, "code": code }),
        )
        .await
    }

    /// Full OTP round trip followed by a CSRF token fetch.
    pub async fn login(&self, identifier: &str) -> Login {
        let response = self.request_otp(identifier, "lawyer").await;
        assert_eq!(response.status(), StatusCode::OK);

        let normalized = identifier.trim().to_lowercase();
        let code = self
            .sender
            .last_code_for(&normalized)
            .expect("No OTP captured for identifier");

        let response = self.verify_otp(identifier, &code).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = session_cookie(&response).expect("No session cookie set");
        let body = json_body(response).await;
        let owner_id = body["owner_id"].as_str().unwrap().to_string();

        let response = self
            .send(authed(Method::GET, "/auth/csrf-token", &session_id, None).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let csrf_token = json_body(response).await["csrfToken"]
            .as_str()
            .unwrap()
            .to_string();

        Login {
            session_id,
            csrf_token,
            owner_id,
        }
    }

    pub async fn get(&self, uri: &str, login: &Login) -> Response {
        self.send(
            authed(Method::GET, uri, &login.session_id, None)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn put_profile_json(&self, login: &Login, body: Value) -> Response {
        self.send(
            authed(Method::PUT, "/profile", &login.session_id, Some(&login.csrf_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn put_profile_multipart(&self, login: &Login, form: MultipartForm) -> Response {
        self.send(
            authed(Method::PUT, "/profile", &login.session_id, Some(&login.csrf_token))
                .header(header::CONTENT_TYPE, form.content_type())
                .body(Body::from(form.finish()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete_file(&self, login: &Login, slot: &str) -> Response {
        self.send(
            authed(
                Method::DELETE,
                &format!("/profile/files/{}", slot),
                &login.session_id,
                Some(&login.csrf_token),
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
    }

    pub async fn metadata(&self, login: &Login) -> Value {
        let response = self.get("/profile/files/metadata", login).await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    pub async fn urls(&self, login: &Login) -> Value {
        let response = self.get("/profile/files/urls", login).await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    /// Fetch a signed link through the router, as a browser would.
    pub async fn follow_url(&self, url: &str) -> Response {
        let path = url
            .strip_prefix(TEST_BASE_URL)
            .expect("URL not minted for the test base");
        self.send(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
    }
}

/// Request builder carrying the session cookie and, optionally, a CSRF header.
pub fn authed(
    method: Method,
    uri: &str,
    session_id: &str,
    csrf_token: Option<&str>,
) -> axum::http::request::Builder {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("profile_session={}", session_id));
    match csrf_token {
        Some(token) => builder.header("x-csrf-token", token),
        None => builder,
    }
}

pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("profile_session="))
        .map(|v| v.split(';').next().unwrap_or_default().to_string())
}

pub async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub fn profile_fields() -> Value {
    serde_json::json!({
        "full_name": "Asha Verma",
        "bar_number": "dl/1234/2015",
        "city": "New Delhi",
        "specializations": ["Family Law", "Property"],
        "experience_years": 9,
        "consultation_fee": 1500,
        "fee_structure": "fixed",
        "languages": ["English", "Hindi"]
    })
}

/// Minimal `multipart/form-data` encoder.
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: "profile-test-boundary-7MA4YWxkTrZu0gW".to_string(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// The standard profile fields as text parts.
    pub fn with_profile_fields(self) -> Self {
        self.text("full_name", "Asha Verma")
            .text("bar_number", "dl/1234/2015")
            .text("city", "New Delhi")
            .text("specializations", "Family Law, Property")
            .text("experience_years", "9")
            .text("consultation_fee", "1500")
            .text("fee_structure", "fixed")
            .text("languages[]", "English")
            .text("languages[]", "Hindi")
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}

/// Fake JPEG of `len` bytes.
pub fn jpeg(len: usize) -> Vec<u8> {
    let mut data = vec![0xAB; len];
    data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    data
}

/// Fake PDF of `len` bytes.
pub fn pdf(len: usize) -> Vec<u8> {
    let mut data = vec![b'x'; len];
    data[..5].copy_from_slice(b"%PDF-");
    data
}
