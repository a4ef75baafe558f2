use crate::dtos::ProfileResponse;
use crate::middleware::CurrentSession;
use crate::models::{DocumentSlot, ProfileFieldsInput};
use crate::services::{FilePart, ProfileUpdateRequest, ServiceError};
use crate::startup::AppState;
use axum::{
    async_trait,
    extract::{multipart::MultipartError, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    Json,
};
use service_core::error::AppError;

pub async fn get_profile(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<ProfileResponse>, AppError> {
    let record = state.dispatcher.get_profile(&session.owner_id).await?;
    Ok(Json(record.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    ProfileUpdate(update): ProfileUpdate,
) -> Result<Json<ProfileResponse>, AppError> {
    let record = state
        .dispatcher
        .update_profile(&session.owner_id, update)
        .await?;
    Ok(Json(record.into()))
}

/// Profile update body: JSON fields, or multipart fields plus document files.
pub struct ProfileUpdate(pub ProfileUpdateRequest);

#[async_trait]
impl FromRequest<AppState> for ProfileUpdate {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();

        if content_type.starts_with("application/json") {
            let Json(input) = Json::<ProfileFieldsInput>::from_request(req, state)
                .await
                .map_err(|e| AppError::from(ServiceError::MalformedBody(e.body_text())))?;
            return Ok(Self(ProfileUpdateRequest::Json(input)));
        }

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::from(ServiceError::MalformedBody(e.body_text())))?;
            return read_multipart(multipart).await.map(Self);
        }

        Err(AppError::UnsupportedMediaType(anyhow::anyhow!(
            "Expected application/json or multipart/form-data"
        )))
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<ProfileUpdateRequest, AppError> {
    let mut pairs = Vec::new();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.is_empty());

        match DocumentSlot::parse(&name) {
            Some(slot) => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                // Browsers submit untouched file inputs as empty, unnamed parts.
                if bytes.is_empty() && file_name.is_none() {
                    continue;
                }
                files.push(FilePart {
                    slot,
                    content_type,
                    bytes,
                    file_name,
                });
            }
            None if file_name.is_some() => {
                tracing::debug!(field = %name, "Ignoring file part with unknown slot");
            }
            None => {
                let value = field.text().await.map_err(multipart_error)?;
                pairs.push((name, value));
            }
        }
    }

    let fields = ProfileFieldsInput::from_form(pairs)?;
    Ok(ProfileUpdateRequest::Multipart { fields, files })
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(anyhow::anyhow!("Upload exceeds the request size limit"))
    } else {
        ServiceError::MalformedBody(e.body_text()).into()
    }
}
