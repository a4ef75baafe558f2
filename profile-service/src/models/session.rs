//! Session, OTP and CSRF state owned by the session guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Lawyer,
    Client,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Lawyer => "lawyer",
            Role::Client => "client",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lawyer" => Ok(Role::Lawyer),
            "client" => Ok(Role::Client),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// An authenticated session created by a successful OTP verification.
///
/// The CSRF token lives inside the session so that a token is only ever
/// valid for the session it was issued to.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub otp_verified: bool,
    pub csrf_token: String,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("owner_id", &self.owner_id)
            .field("role", &self.role)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("otp_verified", &self.otp_verified)
            .finish_non_exhaustive()
    }
}

/// Outstanding one-time passcode for an identifier. Only the code hash is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRecord {
    pub ticket_id: String,
    pub identifier: String,
    pub role: Role,
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

impl OtpRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Acknowledgement returned when an OTP has been dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct OtpTicket {
    pub ticket_id: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
}

/// Result of checking a submitted code against the outstanding OTP.
#[derive(Debug, Clone)]
pub enum OtpCheck {
    Verified(OtpRecord),
    Missing,
    Expired,
    Mismatch { remaining: u32 },
    Locked,
}
