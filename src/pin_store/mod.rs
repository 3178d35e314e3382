/// Pin Store
///
/// Persists pin records. Status transitions are conditional updates that
/// return the row as it was written, so callers learn atomically whether
/// they performed a transition and who owns the pin.

pub mod models;
pub mod sqlite;

pub use models::*;
pub use sqlite::SqlitePinStore;

use crate::error::PinResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Pin persistence backend
#[async_trait]
pub trait PinStore: Send + Sync {
    /// Insert a new pin. Fails with `Conflict` if the owner already pins this CID.
    async fn create(&self, pin: &Pin) -> PinResult<()>;

    /// Fetch a pin by its request id
    async fn get_by_id(&self, id: &str) -> PinResult<Option<Pin>>;

    /// Fetch an owner's pin for a CID
    async fn get_by_cid(&self, cid: &str, owner_id: &str) -> PinResult<Option<Pin>>;

    /// List an owner's pins, newest first, with the total matching the filters
    async fn list_by_owner(&self, owner: &Owner, opts: &PinListOptions) -> PinResult<(Vec<Pin>, i64)>;

    /// Move a pin to a non-`pinned` status.
    ///
    /// Returns the updated pin, or `None` when the pin is gone or the
    /// transition is not allowed from its current status.
    async fn update_status(&self, id: &str, status: PinStatus) -> PinResult<Option<Pin>>;

    /// Write final status and size in one statement; same return contract as `update_status`
    async fn update_status_and_size(
        &self,
        id: &str,
        status: PinStatus,
        size_bytes: i64,
    ) -> PinResult<Option<Pin>>;

    /// Delete a pin, returning the row as it was at deletion
    async fn delete(&self, id: &str) -> PinResult<Option<Pin>>;

    /// Whether any pin record (of any owner) still references the CID
    async fn cid_in_use(&self, cid: &str) -> PinResult<bool>;

    /// Pins in queued/pinning not touched since `cutoff`, oldest first
    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> PinResult<Vec<Pin>>;

    /// Pinned bytes and in-flight counts per owner
    async fn owner_totals(&self) -> PinResult<Vec<OwnerPinTotals>>;
}
