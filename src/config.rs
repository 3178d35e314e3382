/// Configuration management for the pinning service
use crate::error::{PinError, PinResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// 1 GiB default quota, matching the free pinning tier
pub const DEFAULT_QUOTA_BYTES: i64 = 1024 * 1024 * 1024;

/// Default maximum upload size (100MB)
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 100 * 1024 * 1024;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub ipfs: IpfsConfig,
    pub authentication: AuthConfig,
    pub quota: QuotaConfig,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub max_upload_size: usize,
    /// Multiaddrs offered back to clients as `delegates`
    pub delegates: Vec<String>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub pins_db: PathBuf,
}

/// Which storage network implementation backs the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpfsBackend {
    /// Kubo RPC API at `api_url`
    Kubo,
    /// Process-local content store, for development
    Memory,
}

/// IPFS node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    pub backend: IpfsBackend,
    pub api_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl IpfsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Default quotas for owners without a provisioned row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub human_quota_bytes: i64,
    pub agent_quota_bytes: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            human_quota_bytes: DEFAULT_QUOTA_BYTES,
            agent_quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

/// Completion worker and maintenance job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Pins left in queued/pinning longer than this are re-enqueued
    pub stale_pin_secs: u64,
    pub ledger_auto_repair: bool,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

/// Parse `key` if set, falling back to `default` when unset or blank
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> PinResult<T> {
    let value = match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return Ok(default),
    };

    value
        .trim()
        .parse()
        .map_err(|_| PinError::Validation(format!("{} has an invalid value: {}", key, value)))
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PinResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("PINS_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PINS_PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .map_err(|_| PinError::Validation("Invalid port number".to_string()))?;

        let data_directory: PathBuf = env::var("PINS_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let pins_db = env::var("PINS_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("pins.sqlite"));

        let backend = match env::var("PINS_IPFS_BACKEND")
            .unwrap_or_else(|_| "kubo".to_string())
            .to_lowercase()
            .as_str()
        {
            "kubo" => IpfsBackend::Kubo,
            "memory" => IpfsBackend::Memory,
            other => {
                return Err(PinError::Validation(format!(
                    "Unknown PINS_IPFS_BACKEND: {}",
                    other
                )))
            }
        };

        let jwt_secret = env::var("PINS_JWT_SECRET")
            .map_err(|_| PinError::Validation("JWT secret required".to_string()))?;

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                max_upload_size: env_parse("PINS_MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE)?,
                delegates: env_list("PINS_DELEGATES"),
            },
            storage: StorageConfig {
                data_directory,
                pins_db,
            },
            ipfs: IpfsConfig {
                backend,
                api_url: env::var("IPFS_API_URL")
                    .unwrap_or_else(|_| "http://localhost:5001".to_string()),
                timeout_secs: env_parse("PINS_IPFS_TIMEOUT_SECS", 300)?,
                max_retries: env_parse("PINS_IPFS_MAX_RETRIES", 3)?,
                retry_delay_ms: env_parse("PINS_IPFS_RETRY_DELAY_MS", 1000)?,
            },
            authentication: AuthConfig { jwt_secret },
            quota: QuotaConfig {
                human_quota_bytes: env_parse("PINS_HUMAN_QUOTA_BYTES", DEFAULT_QUOTA_BYTES)?,
                agent_quota_bytes: env_parse("PINS_AGENT_QUOTA_BYTES", DEFAULT_QUOTA_BYTES)?,
            },
            worker: WorkerConfig {
                worker_count: env_parse("PINS_WORKER_COUNT", 4)?,
                queue_capacity: env_parse("PINS_QUEUE_CAPACITY", 1024)?,
                stale_pin_secs: env_parse("PINS_STALE_PIN_SECS", 600)?,
                ledger_auto_repair: env_parse("PINS_LEDGER_AUTO_REPAIR", false)?,
            },
            rate_limit: RateLimitConfig {
                enabled: env_parse("PINS_RATE_LIMITS_ENABLED", true)?,
                authenticated_rps: env_parse("PINS_RATE_LIMIT_AUTHENTICATED_RPS", 100)?,
                unauthenticated_rps: env_parse("PINS_RATE_LIMIT_UNAUTHENTICATED_RPS", 10)?,
            },
            logging: LoggingConfig {
                level: env::var("PINS_LOG_LEVEL")
                    .unwrap_or_else(|_| "pinledger=debug,tower_http=debug".to_string()),
                json: env::var("PINS_LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PinResult<()> {
        if self.service.hostname.is_empty() {
            return Err(PinError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(PinError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.worker.worker_count == 0 || self.worker.queue_capacity == 0 {
            return Err(PinError::Validation(
                "Worker count and queue capacity must be positive".to_string(),
            ));
        }

        if self.quota.human_quota_bytes < 0 || self.quota.agent_quota_bytes < 0 {
            return Err(PinError::Validation("Quotas cannot be negative".to_string()));
        }

        if self.ipfs.backend == IpfsBackend::Kubo && self.ipfs.api_url.is_empty() {
            return Err(PinError::Validation("IPFS_API_URL cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Configuration used by unit and router tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                max_upload_size: 1024,
                delegates: vec![],
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                pins_db: PathBuf::from(":memory:"),
            },
            ipfs: IpfsConfig {
                backend: IpfsBackend::Memory,
                api_url: String::new(),
                timeout_secs: 5,
                max_retries: 0,
                retry_delay_ms: 1,
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-that-is-at-least-32-characters".to_string(),
            },
            quota: QuotaConfig::default(),
            worker: WorkerConfig {
                worker_count: 2,
                queue_capacity: 64,
                stale_pin_secs: 600,
                ledger_auto_repair: false,
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                authenticated_rps: 100,
                unauthenticated_rps: 10,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
