/// Pinning Service API response shapes
use crate::pin_store::{Pin, PinStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pin object as submitted by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinObject {
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinInfo {
    pub size_bytes: i64,
}

/// `PinStatus` object of the Pinning Service API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinStatusResponse {
    pub requestid: String,
    pub status: PinStatus,
    pub created: DateTime<Utc>,
    pub pin: PinObject,
    pub delegates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<PinInfo>,
}

impl From<&Pin> for PinStatusResponse {
    fn from(pin: &Pin) -> Self {
        Self {
            requestid: pin.id.clone(),
            status: pin.status,
            created: pin.created_at,
            pin: PinObject {
                cid: pin.cid.clone(),
                name: pin.name.clone(),
                origins: pin.origins.clone(),
                meta: pin.meta.clone(),
            },
            delegates: pin.delegates.clone(),
            info: pin.size_bytes.map(|size_bytes| PinInfo { size_bytes }),
        }
    }
}

/// `PinResults` object: total matching the filters plus one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinListResponse {
    pub count: i64,
    pub results: Vec<PinStatusResponse>,
}

impl PinListResponse {
    pub fn new(pins: &[Pin], count: i64) -> Self {
        Self {
            count,
            results: pins.iter().map(PinStatusResponse::from).collect(),
        }
    }
}
