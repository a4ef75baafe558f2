use crate::dtos::{DownloadParams, MessageResponse, MetadataResponse, UrlsResponse};
use crate::middleware::CurrentSession;
use crate::models::DocumentSlot;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use std::time::Duration;

pub async fn file_metadata(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<MetadataResponse>, AppError> {
    let metadata = state.registry.get_metadata(&session.owner_id).await?;
    Ok(Json(
        metadata
            .into_iter()
            .map(|(slot, descriptor)| (slot, descriptor.into()))
            .collect(),
    ))
}

pub async fn file_urls(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<UrlsResponse>, AppError> {
    let ttl = Duration::from_secs(state.config.documents.presign_ttl_seconds);
    let urls = state.registry.get_urls(&session.owner_id, ttl).await?;
    Ok(Json(urls))
}

pub async fn delete_file(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(slot): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let slot = DocumentSlot::parse(&slot)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown document slot: {}", slot)))?;

    state
        .dispatcher
        .remove_document(&session.owner_id, slot)
        .await?;

    Ok(Json(MessageResponse {
        message: format!("{} deleted", slot),
    }))
}

/// Serves a signed link minted by the local or in-memory backend.
pub async fn download_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(expires), Some(signature)) = (params.expires, params.signature) else {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid or expired link")));
    };

    let now = state.clock.now().timestamp();
    if !state.url_signer.verify(&key, expires, &signature, now) {
        tracing::warn!(key = %key, "Rejected download link");
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid or expired link")));
    }

    let (descriptor, bytes) = state
        .registry
        .open(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("File not found")))?;

    Ok((
        [
            (header::CONTENT_TYPE, descriptor.content_type.clone()),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", descriptor.file_name()),
            ),
        ],
        bytes,
    ))
}
