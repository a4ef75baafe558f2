use crate::dtos::{
    CsrfTokenResponse, MessageResponse, ProfileSummary, RequestOtpRequest, RequestOtpResponse,
    VerifyOtpRequest, VerifyOtpResponse,
};
use crate::middleware::{CurrentSession, SESSION_COOKIE};
use crate::services::ServiceError;
use crate::startup::AppState;
use axum::{extract::State, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;
use validator::Validate;

pub async fn request_otp(
    State(state): State<AppState>,
    Json(req): Json<RequestOtpRequest>,
) -> Result<Json<RequestOtpResponse>, AppError> {
    req.validate()?;

    let ticket = state.guard.request_otp(&req.identifier, req.role).await?;
    Ok(Json(ticket.into()))
}

/// Exchange a verification code for a session. The session id travels
/// back as an HttpOnly cookie.
pub async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<(CookieJar, Json<VerifyOtpResponse>), AppError> {
    req.validate()?;

    let session = state.guard.verify_otp(&req.identifier, &req.code).await?;

    let profile = match state.dispatcher.get_profile(&session.owner_id).await {
        Ok(record) => Some(ProfileSummary::from(&record)),
        Err(ServiceError::ProfileNotFound) => None,
        Err(e) => {
            tracing::warn!(owner_id = %session.owner_id, error = %e, "Profile lookup after login failed");
            None
        }
    };

    let cookie = Cookie::build((SESSION_COOKIE, session.id.clone()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(state.config.sessions.cookie_secure)
        .path("/");

    let body = VerifyOtpResponse {
        owner_id: session.owner_id,
        role: session.role,
        expires_at: session.expires_at,
        profile,
    };

    Ok((jar.add(cookie), Json(body)))
}

pub async fn csrf_token(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Json<CsrfTokenResponse> {
    Json(CsrfTokenResponse {
        csrf_token: state.guard.issue_csrf_token(&session),
    })
}

pub async fn rotate_csrf_token(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<CsrfTokenResponse>, AppError> {
    let csrf_token = state.guard.rotate_csrf_token(&session).await?;
    Ok(Json(CsrfTokenResponse { csrf_token }))
}

pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    state.guard.logout(&session).await?;

    Ok((
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    ))
}
