//! Storage for outstanding OTPs and live sessions.
//!
//! Both implementations must make OTP consumption atomic: a code can be
//! verified at most once, and concurrent wrong guesses all count.

use crate::models::{OtpCheck, OtpRecord, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use service_core::utils::signature::tokens_match;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store an OTP, replacing any outstanding one for the same identifier.
    async fn put_otp(&self, record: OtpRecord) -> Result<(), anyhow::Error>;

    /// Compare `code_hash` with the outstanding OTP, counting the attempt.
    /// A verified record is removed so it cannot be used again.
    async fn check_otp(
        &self,
        identifier: &str,
        code_hash: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<OtpCheck, anyhow::Error>;

    async fn put_session(&self, session: Session) -> Result<(), anyhow::Error>;

    /// Swap the CSRF token of a live session, but only while it still holds
    /// `expected`. Returns false when the session is gone or was rotated by
    /// someone else. Never recreates a deleted session.
    async fn replace_csrf(
        &self,
        id: &str,
        expected: &str,
        token: &str,
    ) -> Result<bool, anyhow::Error>;

    /// Returns the session unless it is unknown or expired at `now`.
    async fn get_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, anyhow::Error>;

    async fn delete_session(&self, id: &str) -> Result<(), anyhow::Error>;

    /// Drop expired sessions and OTPs. Returns how many entries were removed.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    otps: DashMap<String, OtpRecord>,
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put_otp(&self, record: OtpRecord) -> Result<(), anyhow::Error> {
        self.otps.insert(record.identifier.clone(), record);
        Ok(())
    }

    async fn check_otp(
        &self,
        identifier: &str,
        code_hash: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<OtpCheck, anyhow::Error> {
        let check = match self.otps.entry(identifier.to_string()) {
            Entry::Vacant(_) => OtpCheck::Missing,
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    entry.remove();
                    OtpCheck::Expired
                } else if entry.get().attempts >= max_attempts {
                    OtpCheck::Locked
                } else if tokens_match(&entry.get().code_hash, code_hash) {
                    OtpCheck::Verified(entry.remove())
                } else {
                    let record = entry.get_mut();
                    record.attempts += 1;
                    OtpCheck::Mismatch {
                        remaining: max_attempts.saturating_sub(record.attempts),
                    }
                }
            }
        };
        Ok(check)
    }

    async fn put_session(&self, session: Session) -> Result<(), anyhow::Error> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn replace_csrf(
        &self,
        id: &str,
        expected: &str,
        token: &str,
    ) -> Result<bool, anyhow::Error> {
        Ok(match self.sessions.get_mut(id) {
            Some(mut session) if tokens_match(&session.csrf_token, expected) => {
                session.csrf_token = token.to_string();
                true
            }
            _ => false,
        })
    }

    async fn get_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, anyhow::Error> {
        let session = self.sessions.get(id).map(|s| s.value().clone());
        match session {
            Some(session) if session.is_expired(now) => {
                self.sessions.remove(id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn delete_session(&self, id: &str) -> Result<(), anyhow::Error> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        let before = self.sessions.len() + self.otps.len();
        self.sessions.retain(|_, s| !s.is_expired(now));
        self.otps.retain(|_, o| !o.is_expired(now));
        Ok(before.saturating_sub(self.sessions.len() + self.otps.len()))
    }
}

// KEYS[1] = otp hash; ARGV = code_hash, now (unix secs), max_attempts
const CHECK_OTP_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {'missing', ''}
end
local expires = tonumber(redis.call('HGET', KEYS[1], 'expires_ts'))
if tonumber(ARGV[2]) >= expires then
  redis.call('DEL', KEYS[1])
  return {'expired', ''}
end
local max = tonumber(ARGV[3])
local attempts = tonumber(redis.call('HGET', KEYS[1], 'attempts'))
if attempts >= max then
  return {'locked', ''}
end
if redis.call('HGET', KEYS[1], 'code_hash') == ARGV[1] then
  local record = redis.call('HGET', KEYS[1], 'record')
  redis.call('DEL', KEYS[1])
  return {'verified', record}
end
attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
return {'mismatch', tostring(math.max(max - attempts, 0))}
"#;

// KEYS[1] = session key; ARGV = expected token, new token
const REPLACE_CSRF_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 0
end
local session = cjson.decode(raw)
if session['csrf_token'] ~= ARGV[1] then
  return 0
end
session['csrf_token'] = ARGV[2]
redis.call('SET', KEYS[1], cjson.encode(session), 'KEEPTTL')
return 1
"#;

#[derive(Clone)]
pub struct RedisSessionStore {
    _client: Client,
    manager: ConnectionManager,
    check_script: Script,
    replace_csrf_script: Script,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self {
            _client: client,
            manager,
            check_script: Script::new(CHECK_OTP_SCRIPT),
            replace_csrf_script: Script::new(REPLACE_CSRF_SCRIPT),
        })
    }

    fn otp_key(identifier: &str) -> String {
        format!("otp:{}", identifier)
    }

    fn session_key(id: &str) -> String {
        format!("session:{}", id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put_otp(&self, record: OtpRecord) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = Self::otp_key(&record.identifier);
        let expires_ts = record.expires_at.timestamp();
        let json = serde_json::to_string(&record)?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg("record")
            .arg(json)
            .arg("code_hash")
            .arg(&record.code_hash)
            .arg("attempts")
            .arg(record.attempts)
            .arg("expires_ts")
            .arg(expires_ts)
            .ignore()
            .cmd("EXPIREAT")
            .arg(&key)
            .arg(expires_ts)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store OTP: {}", e))?;
        Ok(())
    }

    async fn check_otp(
        &self,
        identifier: &str,
        code_hash: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<OtpCheck, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Vec<String> = self
            .check_script
            .key(Self::otp_key(identifier))
            .arg(code_hash)
            .arg(now.timestamp())
            .arg(max_attempts)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check OTP: {}", e))?;

        let status = reply.first().map(String::as_str).unwrap_or("missing");
        let payload = reply.get(1).map(String::as_str).unwrap_or_default();
        let check = match status {
            "verified" => OtpCheck::Verified(serde_json::from_str(payload)?),
            "expired" => OtpCheck::Expired,
            "locked" => OtpCheck::Locked,
            "mismatch" => OtpCheck::Mismatch {
                remaining: payload.parse().unwrap_or(0),
            },
            _ => OtpCheck::Missing,
        };
        Ok(check)
    }

    async fn put_session(&self, session: Session) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(&session)?;

        let _: () = redis::cmd("SET")
            .arg(Self::session_key(&session.id))
            .arg(json)
            .arg("EXAT")
            .arg(session.expires_at.timestamp())
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store session: {}", e))?;
        Ok(())
    }

    async fn replace_csrf(
        &self,
        id: &str,
        expected: &str,
        token: &str,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let replaced: i64 = self
            .replace_csrf_script
            .key(Self::session_key(id))
            .arg(expected)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to rotate CSRF token: {}", e))?;
        Ok(replaced == 1)
    }

    async fn get_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::session_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load session: {}", e))?;

        match raw {
            Some(raw) => {
                let session: Session = serde_json::from_str(&raw)?;
                Ok((!session.is_expired(now)).then_some(session))
            }
            None => Ok(None),
        }
    }

    async fn delete_session(&self, id: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(Self::session_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete session: {}", e))?;
        Ok(())
    }

    async fn evict_expired(&self, _now: DateTime<Utc>) -> Result<usize, anyhow::Error> {
        // Keys carry their own expiry.
        Ok(0)
    }
}
