/// Storage Ledger
///
/// Per-owner running total of pinned bytes against a quota. Adjustments are
/// signed deltas applied atomically by the backend; callers guarantee each
/// completion or deletion event applies its delta exactly once.

pub mod sqlite;

pub use sqlite::SqliteStorageLedger;

use crate::{error::PinResult, pin_store::Owner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Usage snapshot for one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUsage {
    pub owner: Owner,
    pub used_bytes: i64,
    pub quota_bytes: i64,
}

impl StorageUsage {
    /// Percentage of quota used; zero when no quota is provisioned
    pub fn percentage(&self) -> f64 {
        if self.quota_bytes <= 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.quota_bytes as f64 * 100.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.used_bytes >= self.quota_bytes
    }
}

/// Wire shape for storage endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse {
    pub used: i64,
    pub quota: i64,
    pub percentage: f64,
}

impl From<&StorageUsage> for StorageResponse {
    fn from(usage: &StorageUsage) -> Self {
        Self {
            used: usage.used_bytes,
            quota: usage.quota_bytes,
            percentage: usage.percentage(),
        }
    }
}

/// Storage accounting backend
#[async_trait]
pub trait StorageLedger: Send + Sync {
    /// Current usage; owners without a row report zero usage and the default quota
    async fn get_usage(&self, owner: &Owner) -> PinResult<StorageUsage>;

    /// Apply a signed delta. Must be a single atomic increment, never read-modify-write.
    async fn adjust(&self, owner: &Owner, delta_bytes: i64) -> PinResult<()>;

    /// All provisioned rows
    async fn list_usage(&self) -> PinResult<Vec<StorageUsage>>;

    /// Overwrite `used_bytes` (ledger repair only)
    async fn set_used(&self, owner: &Owner, used_bytes: i64) -> PinResult<()>;
}
