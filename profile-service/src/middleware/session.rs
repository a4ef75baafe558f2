use crate::models::Session;
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

pub const SESSION_COOKIE: &str = "profile_session";
pub const SESSION_HEADER: &str = "x-session-id";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Resolves the caller's session (cookie first, then `x-session-id`) and
/// enforces the CSRF token on state-changing requests. Runs before any
/// handler on protected routes.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();
    let jar = CookieJar::from_headers(headers);
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| header_value(headers, SESSION_HEADER));
    let csrf_token = header_value(headers, CSRF_HEADER);

    let session = state
        .guard
        .authorize(session_id.as_deref(), request.method(), csrf_token.as_deref())
        .await?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

fn header_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The session established by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or_else(|| {
                tracing::error!("Session extractor used on a route without require_session");
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            })
    }
}
