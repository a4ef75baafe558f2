use crate::models::{DocumentSlot, OtpTicket, ProfileRecord, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RequestOtpRequest {
    #[validate(length(min = 3, max = 254, message = "Identifier must be an email or phone number"))]
    pub identifier: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RequestOtpResponse {
    pub ticket_id: String,
    pub expires_at: String,
    pub expires_in: i64,
    pub message: String,
}

impl From<OtpTicket> for RequestOtpResponse {
    fn from(ticket: OtpTicket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            expires_at: ticket.expires_at.to_rfc3339(),
            expires_in: ticket.expires_in,
            message: "Verification code sent".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 3, max = 254, message = "Identifier must be an email or phone number"))]
    pub identifier: String,
    #[validate(length(min = 4, max = 10, message = "Code is required"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub owner_id: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileSummary>,
}

/// Short profile echo returned after login.
#[derive(Debug, Serialize)]
pub struct ProfileSummary {
    pub full_name: String,
    pub city: String,
    pub documents: Vec<DocumentSlot>,
}

impl From<&ProfileRecord> for ProfileSummary {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            full_name: record.fields.full_name.clone(),
            city: record.fields.city.clone(),
            documents: record.documents.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
