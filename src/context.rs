/// Application context and dependency injection
use crate::{
    agents::SqliteAgentDirectory,
    auth::{Authenticator, JwtAuthenticator},
    config::ServerConfig,
    db,
    error::{PinError, PinResult},
    ipfs::{self, StorageNetwork},
    jobs::{completion_queue, CompletionReceiver},
    pin_store::SqlitePinStore,
    pins::{PinService, PinServiceOptions},
    rate_limit::RateLimiter,
    storage_ledger::SqliteStorageLedger,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub pin_service: Arc<PinService>,
    pub authenticator: Arc<dyn Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration.
    ///
    /// Returns the consumer side of the completion queue; the caller hands it
    /// to the worker pool.
    pub async fn new(config: ServerConfig) -> PinResult<(Self, CompletionReceiver)> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Initialize pins database
        let db = db::create_pool(&config.storage.pins_db, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let network = ipfs::from_config(&config.ipfs)?;

        Ok(Self::build(config, db, network))
    }

    /// Wire services over an existing pool and network
    pub fn build(
        config: ServerConfig,
        db: SqlitePool,
        network: Arc<dyn StorageNetwork>,
    ) -> (Self, CompletionReceiver) {
        let (queue, receiver) = completion_queue(config.worker.queue_capacity);

        let pin_service = Arc::new(PinService::new(
            Arc::new(SqlitePinStore::new(db.clone())),
            Arc::new(SqliteStorageLedger::new(db.clone(), config.quota.clone())),
            network,
            Arc::new(SqliteAgentDirectory::new(db.clone())),
            queue,
            PinServiceOptions {
                delegates: config.service.delegates.clone(),
                max_upload_size: config.service.max_upload_size,
                ..Default::default()
            },
        ));

        let authenticator = Arc::new(JwtAuthenticator::new(&config.authentication.jwt_secret));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        let context = Self {
            config: Arc::new(config),
            db,
            pin_service,
            authenticator,
            rate_limiter,
            started_at: Instant::now(),
        };

        (context, receiver)
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> PinResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PinError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
