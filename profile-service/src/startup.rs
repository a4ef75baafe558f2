use crate::config::{MetadataBackend, ProfileConfig, SessionBackend};
use crate::handlers;
use crate::middleware::require_session;
use crate::services::{
    BucketStorage, Clock, DescriptorStore, DocumentRegistry, LogOtpSender, MemoryDescriptorStore,
    MemoryProfileStore, MemorySessionStore, MongoDb, MongoDescriptorStore, MongoProfileStore,
    OtpSender, ProfileStore, ProfileUpdateDispatcher, RedisSessionStore, SessionGuard,
    SessionStore, Storage, StorageProbe, SystemClock, UrlSigner,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::rate_limit::{
    create_ip_rate_limiter, ip_rate_limit_middleware, prune, IpRateLimiter,
};
use service_core::middleware::security_headers::security_headers_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProfileConfig>,
    pub guard: SessionGuard,
    pub registry: DocumentRegistry,
    pub dispatcher: ProfileUpdateDispatcher,
    pub probe: StorageProbe,
    pub url_signer: UrlSigner,
    pub clock: Arc<dyn Clock>,
    pub ip_limiter: IpRateLimiter,
}

/// Wires the configured backends into an [`AppState`]. Any piece can be
/// swapped before `build`, which is how tests inject fakes.
pub struct StateBuilder {
    config: ProfileConfig,
    clock: Option<Arc<dyn Clock>>,
    otp_sender: Option<Arc<dyn OtpSender>>,
    storage: Option<Arc<dyn Storage>>,
}

impl StateBuilder {
    pub fn new(config: ProfileConfig) -> Self {
        Self {
            config,
            clock: None,
            otp_sender: None,
            storage: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_otp_sender(mut self, sender: Arc<dyn OtpSender>) -> Self {
        self.otp_sender = Some(sender);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub async fn build(self) -> Result<AppState, AppError> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let url_signer = UrlSigner::new(
            config.documents.public_base_url.clone(),
            config.documents.url_signing_secret.clone(),
        );

        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(
                BucketStorage::from_config(&config.storage, url_signer.clone(), clock.clone())
                    .map_err(|e| {
                        tracing::error!("Failed to initialize object storage: {}", e);
                        AppError::ConfigError(anyhow::anyhow!("Storage initialization: {}", e))
                    })?,
            ),
        };

        let (descriptors, profiles): (Arc<dyn DescriptorStore>, Arc<dyn ProfileStore>) =
            match config.metadata.backend {
                MetadataBackend::Memory => (
                    Arc::new(MemoryDescriptorStore::new()),
                    Arc::new(MemoryProfileStore::new()),
                ),
                MetadataBackend::Mongo => {
                    let mongo = config.metadata.mongodb.as_ref().ok_or_else(|| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "Mongo metadata backend selected without MONGODB_URI"
                        ))
                    })?;
                    let db = MongoDb::connect(&mongo.uri, &mongo.database)
                        .await
                        .map_err(|e| {
                            tracing::error!("Failed to connect to MongoDB: {}", e);
                            e
                        })?;
                    db.initialize_indexes().await.map_err(|e| {
                        tracing::error!("Failed to initialize database indexes: {}", e);
                        e
                    })?;
                    (
                        Arc::new(MongoDescriptorStore::new(db.clone())),
                        Arc::new(MongoProfileStore::new(db)),
                    )
                }
            };

        let sessions: Arc<dyn SessionStore> = match config.sessions.backend {
            SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
            SessionBackend::Redis => {
                let url = config.sessions.redis_url.as_deref().ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Redis session backend selected without REDIS_URL"
                    ))
                })?;
                Arc::new(RedisSessionStore::connect(url).await.map_err(|e| {
                    tracing::error!("Failed to connect to Redis: {}", e);
                    AppError::ConfigError(e)
                })?)
            }
        };

        let sender = self
            .otp_sender
            .unwrap_or_else(|| Arc::new(LogOtpSender));

        let guard = SessionGuard::new(sessions, sender, clock.clone(), &config.sessions);
        let registry = DocumentRegistry::new(
            storage.clone(),
            descriptors,
            config.documents.max_upload_bytes,
            clock.clone(),
        );
        let dispatcher = ProfileUpdateDispatcher::new(registry.clone(), profiles, clock.clone());
        let ip_limiter = create_ip_rate_limiter(
            config.sessions.auth_ip_limit,
            config.sessions.auth_ip_window_seconds,
        );

        Ok(AppState {
            config: Arc::new(config),
            guard,
            registry,
            dispatcher,
            probe: StorageProbe::new(storage),
            url_signer,
            clock,
            ip_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let ip_limiter = state.ip_limiter.clone();
    let body_limit = state
        .config
        .documents
        .max_upload_bytes
        .saturating_mul(4)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let auth_routes = Router::new()
        .route("/auth/request-otp", post(handlers::request_otp))
        .route("/auth/verify-otp", post(handlers::verify_otp))
        .route_layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware));

    let protected_routes = Router::new()
        .route("/auth/csrf-token", get(handlers::csrf_token))
        .route("/auth/csrf-token/rotate", post(handlers::rotate_csrf_token))
        .route("/auth/logout", post(handlers::logout))
        .route(
            "/profile",
            get(handlers::get_profile).put(handlers::update_profile),
        )
        .route("/profile/files/metadata", get(handlers::file_metadata))
        .route("/profile/files/urls", get(handlers::file_urls))
        .route("/profile/files/:slot", delete(handlers::delete_file))
        .route_layer(from_fn_with_state(state.clone(), require_session))
        .layer(DefaultBodyLimit::max(body_limit));

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/storage", get(handlers::storage_health))
        .route("/metrics", get(handlers::metrics))
        .route("/files/*key", get(handlers::download_file));

    Router::new()
        .merge(auth_routes)
        .merge(protected_routes)
        .merge(public_routes)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Periodically drops expired OTP records, sessions and idle rate-limit keys.
fn spawn_sweeper(guard: SessionGuard, ip_limiter: IpRateLimiter) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            prune(&ip_limiter);
            match guard.sweep().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Swept expired session records"),
                Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
            }
        }
    });
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: ProfileConfig) -> Result<Self, AppError> {
        let port = config.common.port;
        let state = StateBuilder::new(config).build().await?;
        Self::with_state(state, port).await
    }

    pub async fn with_state(state: AppState, port: u16) -> Result<Self, AppError> {
        spawn_sweeper(state.guard.clone(), state.ip_limiter.clone());

        let app = build_router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
