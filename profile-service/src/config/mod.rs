use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
    pub sessions: SessionConfig,
    pub documents: DocumentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_path: String,
    pub s3: Option<S3Config>,
    pub retry_max_elapsed_ms: u64,
    pub retry_max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO etc.)
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<Secret<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub backend: MetadataBackend,
    pub mongodb: Option<MongoConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    Memory,
    Mongo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    pub redis_url: Option<String>,
    pub session_ttl_minutes: i64,
    pub otp_ttl_minutes: i64,
    pub otp_max_attempts: u32,
    pub otp_request_limit: u32,
    pub otp_request_window_seconds: u64,
    pub cookie_secure: bool,
    pub auth_ip_limit: u32,
    pub auth_ip_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsConfig {
    pub max_upload_bytes: usize,
    pub presign_ttl_seconds: u64,
    /// Externally reachable base URL used when minting signed download links.
    pub public_base_url: String,
    pub url_signing_secret: Secret<String>,
}

impl Default for ProfileConfig {
    /// Development defaults: every backend in memory.
    fn default() -> Self {
        ProfileConfig {
            common: core_config::Config {
                port: 8080,
                environment: "dev".to_string(),
            },
            service_name: "profile-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                local_path: "storage".to_string(),
                s3: None,
                retry_max_elapsed_ms: 2_000,
                retry_max_attempts: 3,
            },
            metadata: MetadataConfig {
                backend: MetadataBackend::Memory,
                mongodb: None,
            },
            sessions: SessionConfig {
                backend: SessionBackend::Memory,
                redis_url: None,
                session_ttl_minutes: 720,
                otp_ttl_minutes: 10,
                otp_max_attempts: 5,
                otp_request_limit: 3,
                otp_request_window_seconds: 900,
                cookie_secure: false,
                auth_ip_limit: 60,
                auth_ip_window_seconds: 60,
            },
            documents: DocumentsConfig {
                max_upload_bytes: 10 * 1024 * 1024,
                presign_ttl_seconds: 3600,
                public_base_url: "http://localhost:8080".to_string(),
                url_signing_secret: Secret::new("dev-url-signing-secret".to_string()),
            },
        }
    }
}

impl ProfileConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;
        let is_prod = common_config.is_prod()
            || env::var("ENVIRONMENT").map(|e| e == "prod").unwrap_or(false);
        let defaults = ProfileConfig::default();

        let storage_backend: StorageBackend = get_env_parsed("STORAGE_BACKEND", Some("local"), is_prod)?;
        let s3 = if storage_backend == StorageBackend::S3 {
            Some(S3Config {
                bucket: get_env("STORAGE_S3_BUCKET", None, is_prod)?,
                region: get_env("STORAGE_S3_REGION", Some("us-east-1"), is_prod)?,
                endpoint: env::var("STORAGE_S3_ENDPOINT").ok(),
                access_key: env::var("STORAGE_S3_ACCESS_KEY").ok(),
                secret_key: env::var("STORAGE_S3_SECRET_KEY").ok().map(Secret::new),
            })
        } else {
            None
        };

        let metadata_backend: MetadataBackend =
            get_env_parsed("METADATA_BACKEND", Some("memory"), is_prod)?;
        let mongodb = if metadata_backend == MetadataBackend::Mongo {
            Some(MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("profile_db"), is_prod)?,
            })
        } else {
            None
        };

        let session_backend: SessionBackend =
            get_env_parsed("SESSION_BACKEND", Some("memory"), is_prod)?;
        let redis_url = if session_backend == SessionBackend::Redis {
            Some(get_env("REDIS_URL", None, is_prod)?)
        } else {
            None
        };

        let port = common_config.port;

        Ok(ProfileConfig {
            common: common_config,
            service_name: get_env("SERVICE_NAME", Some("profile-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            storage: StorageConfig {
                backend: storage_backend,
                local_path: get_env("STORAGE_LOCAL_PATH", Some("storage"), false)?,
                s3,
                retry_max_elapsed_ms: get_env_parsed(
                    "STORAGE_RETRY_MAX_ELAPSED_MS",
                    Some("2000"),
                    false,
                )?,
                retry_max_attempts: get_env_parsed("STORAGE_RETRY_MAX_ATTEMPTS", Some("3"), false)?,
            },
            metadata: MetadataConfig {
                backend: metadata_backend,
                mongodb,
            },
            sessions: SessionConfig {
                backend: session_backend,
                redis_url,
                session_ttl_minutes: get_env_parsed("SESSION_TTL_MINUTES", Some("720"), false)?,
                otp_ttl_minutes: get_env_parsed("OTP_TTL_MINUTES", Some("10"), false)?,
                otp_max_attempts: get_env_parsed("OTP_MAX_ATTEMPTS", Some("5"), false)?,
                otp_request_limit: get_env_parsed("OTP_REQUEST_LIMIT", Some("3"), false)?,
                otp_request_window_seconds: get_env_parsed(
                    "OTP_REQUEST_WINDOW_SECONDS",
                    Some("900"),
                    false,
                )?,
                cookie_secure: get_env_parsed(
                    "SESSION_COOKIE_SECURE",
                    Some(if is_prod { "true" } else { "false" }),
                    false,
                )?,
                auth_ip_limit: defaults.sessions.auth_ip_limit,
                auth_ip_window_seconds: defaults.sessions.auth_ip_window_seconds,
            },
            documents: DocumentsConfig {
                max_upload_bytes: get_env_parsed("UPLOAD_MAX_BYTES", Some("10485760"), false)?,
                presign_ttl_seconds: get_env_parsed("PRESIGN_TTL_SECONDS", Some("3600"), false)?,
                public_base_url: get_env(
                    "PUBLIC_BASE_URL",
                    Some(&format!("http://localhost:{}", port)),
                    is_prod,
                )?,
                url_signing_secret: Secret::new(get_env(
                    "URL_SIGNING_SECRET",
                    Some("dev-url-signing-secret"),
                    is_prod,
                )?),
            },
        })
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "local" => Ok(StorageBackend::Local),
            "s3" => Ok(StorageBackend::S3),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

impl FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(MetadataBackend::Memory),
            "mongo" | "mongodb" => Ok(MetadataBackend::Mongo),
            _ => Err(format!("Invalid metadata backend: {}", s)),
        }
    }
}

impl FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(SessionBackend::Memory),
            "redis" => Ok(SessionBackend::Redis),
            _ => Err(format!("Invalid session backend: {}", s)),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_env_parsed<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.trim().parse::<T>().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
    })
}
