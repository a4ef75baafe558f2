use crate::models::Role;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};

/// Delivers one-time passcodes to an email address or phone number.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(
        &self,
        identifier: &str,
        role: Role,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error>;
}

/// Development sender: records that a code went out without revealing it.
pub struct LogOtpSender;

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send(
        &self,
        identifier: &str,
        role: Role,
        _code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(
            identifier = %mask_identifier(identifier),
            role = %role,
            expires_at = %expires_at,
            "OTP dispatched"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentOtp {
    pub identifier: String,
    pub role: Role,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Keeps every code it is asked to send, for tests.
#[derive(Default)]
pub struct RecordingOtpSender {
    sent: Mutex<Vec<SentOtp>>,
}

impl RecordingOtpSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code_for(&self, identifier: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|sent| sent.identifier == identifier)
            .map(|sent| sent.code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl OtpSender for RecordingOtpSender {
    async fn send(
        &self,
        identifier: &str,
        role: Role,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Recording sender mutex poisoned: {}", e))?
            .push(SentOtp {
                identifier: identifier.to_string(),
                role,
                code: code.to_string(),
                expires_at,
            });
        Ok(())
    }
}

/// `asha@example.com` -> `a***@example.com`, `+919876543210` -> `+91******3210`.
pub fn mask_identifier(identifier: &str) -> String {
    if let Some((local, domain)) = identifier.split_once('@') {
        let first = local.chars().next().unwrap_or('*');
        return format!("{}***@{}", first, domain);
    }
    let chars: Vec<char> = identifier.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}
