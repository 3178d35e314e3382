/// Pin data models
use crate::error::PinError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default page size for pin listings
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Hard ceiling on page size
pub const MAX_LIST_LIMIT: i64 = 1000;

/// Kind of principal that owns pins and storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    Human,
    Agent,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::Human => "human",
            OwnerType::Agent => "agent",
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerType {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(OwnerType::Human),
            "agent" => Ok(OwnerType::Agent),
            other => Err(PinError::Validation(format!("Unknown owner type: {}", other))),
        }
    }
}

/// Authenticated principal; also the access-control boundary of a pin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub kind: OwnerType,
}

impl Owner {
    pub fn new(id: impl Into<String>, kind: OwnerType) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn human(id: impl Into<String>) -> Self {
        Self::new(id, OwnerType::Human)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(id, OwnerType::Agent)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Pin lifecycle status
///
/// `queued -> pinning -> pinned | failed`; `pinned` and `failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinStatus {
    Queued,
    Pinning,
    Pinned,
    Failed,
}

impl PinStatus {
    pub const ALL: [PinStatus; 4] = [
        PinStatus::Queued,
        PinStatus::Pinning,
        PinStatus::Pinned,
        PinStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PinStatus::Queued => "queued",
            PinStatus::Pinning => "pinning",
            PinStatus::Pinned => "pinned",
            PinStatus::Failed => "failed",
        }
    }

    /// Statuses from which a transition into `self` is allowed
    pub fn predecessors(&self) -> &'static [PinStatus] {
        match self {
            PinStatus::Queued => &[],
            PinStatus::Pinning | PinStatus::Pinned | PinStatus::Failed => {
                &[PinStatus::Queued, PinStatus::Pinning]
            }
        }
    }
}

impl fmt::Display for PinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinStatus {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PinStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                PinError::Validation(
                    "status must be one of: queued, pinning, pinned, failed".to_string(),
                )
            })
    }
}

/// Pin record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    /// `requestid` in the Pinning Service API
    pub id: String,
    pub cid: String,
    pub name: Option<String>,
    pub origins: Vec<String>,
    pub meta: BTreeMap<String, String>,
    pub status: PinStatus,
    /// Set together with `pinned`, never otherwise
    pub size_bytes: Option<i64>,
    pub delegates: Vec<String>,
    pub owner: Owner,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pinned_at: Option<DateTime<Utc>>,
}

impl Pin {
    /// Build a new queued pin owned by `owner`
    pub fn queued(
        owner: Owner,
        cid: String,
        name: Option<String>,
        origins: Vec<String>,
        meta: BTreeMap<String, String>,
        delegates: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cid,
            name,
            origins,
            meta,
            status: PinStatus::Queued,
            size_bytes: None,
            delegates,
            owner,
            created_at: now,
            updated_at: now,
            pinned_at: None,
        }
    }

    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        self.owner == *owner
    }

    /// Bytes this pin contributes to its owner's ledger
    pub fn accounted_bytes(&self) -> i64 {
        match (self.status, self.size_bytes) {
            (PinStatus::Pinned, Some(size)) if size > 0 => size,
            _ => 0,
        }
    }
}

/// Filters and pagination for listing an owner's pins
#[derive(Debug, Clone, PartialEq)]
pub struct PinListOptions {
    /// Substring match on the CID
    pub cid: Option<String>,
    /// Exact name match
    pub name: Option<String>,
    /// Any of these statuses; empty means all
    pub statuses: Vec<PinStatus>,
    /// Every entry must be present in the pin's meta
    pub meta: BTreeMap<String, String>,
    /// Created strictly before
    pub before: Option<DateTime<Utc>>,
    /// Created strictly after
    pub after: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for PinListOptions {
    fn default() -> Self {
        Self {
            cid: None,
            name: None,
            statuses: Vec::new(),
            meta: BTreeMap::new(),
            before: None,
            after: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl PinListOptions {
    /// Limit and offset clamped to their valid ranges
    pub fn bounded_page(&self) -> (i64, i64) {
        let limit = if self.limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit.min(MAX_LIST_LIMIT)
        };
        (limit, self.offset.max(0))
    }
}

/// Per-owner aggregate used by the ledger audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerPinTotals {
    pub owner: Owner,
    /// Sum of `size_bytes` over pinned pins
    pub pinned_bytes: i64,
    /// Pins still queued or pinning
    pub in_flight: i64,
}
