//! One-time-passcode login, sessions and per-session CSRF tokens.

use crate::config::SessionConfig;
use crate::models::{OtpCheck, OtpRecord, OtpTicket, Role, Session};
use crate::services::clock::Clock;
use crate::services::error::ServiceError;
use crate::services::otp_sender::{mask_identifier, OtpSender};
use crate::services::session_store::SessionStore;
use axum::http::Method;
use chrono::Duration;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use service_core::middleware::rate_limit::{
    check_keyed, create_keyed_rate_limiter, prune, KeyedRateLimiter,
};
use service_core::utils::signature::tokens_match;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

const OTP_DIGITS: u32 = 6;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub session_ttl: Duration,
    pub otp_ttl: Duration,
    pub max_attempts: u32,
}

impl SessionPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            session_ttl: Duration::minutes(config.session_ttl_minutes),
            otp_ttl: Duration::minutes(config.otp_ttl_minutes),
            max_attempts: config.otp_max_attempts.max(1),
        }
    }
}

/// Issues and checks sessions. Holds no business data.
#[derive(Clone)]
pub struct SessionGuard {
    store: Arc<dyn SessionStore>,
    sender: Arc<dyn OtpSender>,
    clock: Arc<dyn Clock>,
    request_limiter: KeyedRateLimiter,
    policy: SessionPolicy,
}

impl SessionGuard {
    pub fn new(
        store: Arc<dyn SessionStore>,
        sender: Arc<dyn OtpSender>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            sender,
            clock,
            request_limiter: create_keyed_rate_limiter(
                config.otp_request_limit,
                config.otp_request_window_seconds,
            ),
            policy: SessionPolicy::from_config(config),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    #[tracing::instrument(skip(self, identifier, role), fields(role = %role))]
    pub async fn request_otp(&self, identifier: &str, role: Role) -> Result<OtpTicket, ServiceError> {
        let identifier = normalize_identifier(identifier).ok_or(ServiceError::InvalidIdentifier)?;

        if let Err(retry_after) = check_keyed(&self.request_limiter, &identifier) {
            tracing::warn!(identifier = %mask_identifier(&identifier), "OTP request rate limited");
            metrics::counter!("otp_requests_total", "outcome" => "rate_limited").increment(1);
            return Err(ServiceError::RateLimited { retry_after });
        }

        let code = generate_code();
        let now = self.clock.now();
        let record = OtpRecord {
            ticket_id: Uuid::new_v4().to_string(),
            identifier: identifier.clone(),
            role,
            code_hash: hash_code(&identifier, &code),
            issued_at: now,
            expires_at: now + self.policy.otp_ttl,
            attempts: 0,
        };
        let ticket = OtpTicket {
            ticket_id: record.ticket_id.clone(),
            expires_at: record.expires_at,
            expires_in: self.policy.otp_ttl.num_seconds(),
        };

        self.store
            .put_otp(record)
            .await
            .map_err(ServiceError::Persistence)?;
        self.sender
            .send(&identifier, role, &code, ticket.expires_at)
            .await?;

        metrics::counter!("otp_requests_total", "outcome" => "sent").increment(1);
        tracing::info!(identifier = %mask_identifier(&identifier), "OTP issued");
        Ok(ticket)
    }

    #[tracing::instrument(skip(self, identifier, code))]
    pub async fn verify_otp(&self, identifier: &str, code: &str) -> Result<Session, ServiceError> {
        let identifier = normalize_identifier(identifier).ok_or(ServiceError::InvalidIdentifier)?;
        let now = self.clock.now();

        let check = self
            .store
            .check_otp(
                &identifier,
                &hash_code(&identifier, code.trim()),
                now,
                self.policy.max_attempts,
            )
            .await
            .map_err(ServiceError::Persistence)?;

        let (outcome, result) = match check {
            OtpCheck::Verified(record) => ("verified", Ok(record)),
            OtpCheck::Missing => ("missing", Err(ServiceError::CodeExpired)),
            OtpCheck::Expired => ("expired", Err(ServiceError::CodeExpired)),
            OtpCheck::Mismatch { remaining } => {
                tracing::warn!(
                    identifier = %mask_identifier(&identifier),
                    remaining,
                    "OTP mismatch"
                );
                ("mismatch", Err(ServiceError::CodeMismatch))
            }
            OtpCheck::Locked => ("locked", Err(ServiceError::TooManyAttempts)),
        };
        metrics::counter!("otp_verifications_total", "outcome" => outcome).increment(1);
        let record = result?;

        let session = Session {
            id: generate_token(),
            owner_id: owner_id_for(&record.identifier),
            role: record.role,
            issued_at: now,
            expires_at: now + self.policy.session_ttl,
            otp_verified: true,
            csrf_token: generate_token(),
        };
        self.store
            .put_session(session.clone())
            .await
            .map_err(ServiceError::Persistence)?;

        tracing::info!(owner_id = %session.owner_id, role = %session.role, "Session created");
        Ok(session)
    }

    /// The token bound to this session. Repeated calls return the same value
    /// until the token is rotated.
    pub fn issue_csrf_token(&self, session: &Session) -> String {
        session.csrf_token.clone()
    }

    /// Replace the session's token. Fails if the session ended or was
    /// rotated since `session` was read.
    pub async fn rotate_csrf_token(&self, session: &Session) -> Result<String, ServiceError> {
        let token = generate_token();
        let replaced = self
            .store
            .replace_csrf(&session.id, &session.csrf_token, &token)
            .await
            .map_err(ServiceError::Persistence)?;
        if !replaced {
            return Err(ServiceError::Unauthenticated(format!(
                "session for owner {} ended or rotated before rotation",
                session.owner_id
            )));
        }
        tracing::info!(owner_id = %session.owner_id, "CSRF token rotated");
        Ok(token)
    }

    /// Resolve the caller's session and, for state-changing methods, check
    /// the CSRF token against the one bound to that session.
    pub async fn authorize(
        &self,
        session_id: Option<&str>,
        method: &Method,
        csrf_token: Option<&str>,
    ) -> Result<Session, ServiceError> {
        let session_id = session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ServiceError::Unauthenticated("no session presented".into()))?;

        let session = self
            .store
            .get_session(session_id, self.clock.now())
            .await
            .map_err(ServiceError::Persistence)?
            .ok_or_else(|| ServiceError::Unauthenticated("unknown or expired session".into()))?;

        if !session.otp_verified {
            return Err(ServiceError::Unauthenticated("session not OTP verified".into()));
        }

        if is_state_changing(method) {
            match csrf_token {
                None => {
                    return Err(ServiceError::CsrfMismatch(format!(
                        "missing token for owner {}",
                        session.owner_id
                    )))
                }
                Some(presented) if !tokens_match(&session.csrf_token, presented) => {
                    return Err(ServiceError::CsrfMismatch(format!(
                        "stale or foreign token for owner {}",
                        session.owner_id
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(session)
    }

    pub async fn logout(&self, session: &Session) -> Result<(), ServiceError> {
        self.store
            .delete_session(&session.id)
            .await
            .map_err(ServiceError::Persistence)?;
        tracing::info!(owner_id = %session.owner_id, "Session logged out");
        Ok(())
    }

    /// Evict expired sessions and OTPs, and forget identifiers whose OTP
    /// request budget has refilled.
    pub async fn sweep(&self) -> Result<usize, ServiceError> {
        let tracked = prune(&self.request_limiter);
        tracing::trace!(tracked, "Pruned OTP request limiter");
        self.store
            .evict_expired(self.clock.now())
            .await
            .map_err(ServiceError::Persistence)
    }

    /// Identifiers currently holding OTP request budget.
    pub fn limited_identifiers(&self) -> usize {
        self.request_limiter.len()
    }
}

fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn generate_code() -> String {
    let max = 10u32.pow(OTP_DIGITS);
    format!("{:0width$}", OsRng.gen_range(0..max), width = OTP_DIGITS as usize)
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_code(identifier: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercased e-mail address or E.164 phone number.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.contains('@') {
        let email = raw.to_lowercase();
        return email.validate_email().then_some(email);
    }
    normalize_phone(raw)
}

/// Strips common separators and checks E.164 (`+` then 8 to 15 digits).
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let digits = compact.strip_prefix('+')?;
    let valid = (8..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0');
    valid.then_some(compact)
}

/// Stable owner id for a normalized identifier.
pub fn owner_id_for(identifier: &str) -> String {
    let digest = Sha256::digest(identifier.as_bytes());
    format!("usr_{}", &hex::encode(digest)[..24])
}
