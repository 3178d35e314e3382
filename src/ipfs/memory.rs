/// In-memory storage network
///
/// Content is addressed by a CIDv0-shaped identifier over the SHA-256 of the
/// raw bytes. Failures, sizes and latency can be injected so the completion
/// step can be exercised against partial network failure.
use crate::{
    error::{PinError, PinResult},
    ipfs::{NodeInfo, StorageNetwork},
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// sha2-256 multihash prefix: code 0x12, length 32
const MULTIHASH_SHA256: [u8; 2] = [0x12, 0x20];

#[derive(Debug, Default, Clone)]
struct Faults {
    pin: bool,
    unpin: bool,
    stat: bool,
    add: bool,
    latency: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryNetwork {
    blocks: RwLock<HashMap<String, Vec<u8>>>,
    sizes: RwLock<HashMap<String, i64>>,
    pinned: RwLock<HashSet<String>>,
    unpinned: RwLock<Vec<String>>,
    faults: RwLock<Faults>,
    /// Held by tests to park `pin` calls mid-flight
    pin_gate: Arc<Mutex<()>>,
}

/// CIDv0 form of the content's SHA-256 multihash
pub fn content_cid(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut multihash = Vec::with_capacity(34);
    multihash.extend_from_slice(&MULTIHASH_SHA256);
    multihash.extend_from_slice(&digest);
    bs58::encode(multihash).into_string()
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    async fn faults(&self) -> Faults {
        let faults = self.faults.read().await.clone();
        if let Some(latency) = faults.latency {
            tokio::time::sleep(latency).await;
        }
        faults
    }
}

/// Fault injection and inspection for tests
#[cfg(test)]
impl MemoryNetwork {
    /// Report `size` for `cid` regardless of stored content
    pub async fn set_size(&self, cid: &str, size: i64) {
        self.sizes.write().await.insert(cid.to_string(), size);
    }

    pub async fn fail_pin(&self, fail: bool) {
        self.faults.write().await.pin = fail;
    }

    pub async fn fail_unpin(&self, fail: bool) {
        self.faults.write().await.unpin = fail;
    }

    pub async fn fail_stat(&self, fail: bool) {
        self.faults.write().await.stat = fail;
    }

    pub async fn fail_add(&self, fail: bool) {
        self.faults.write().await.add = fail;
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.faults.write().await.latency = latency;
    }

    /// Block `pin` calls until the returned guard is dropped
    pub async fn hold_pins(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.pin_gate).lock_owned().await
    }

    pub async fn is_pinned(&self, cid: &str) -> bool {
        self.pinned.read().await.contains(cid)
    }

    /// CIDs passed to `unpin`, in call order
    pub async fn unpin_calls(&self) -> Vec<String> {
        self.unpinned.read().await.clone()
    }
}

#[async_trait]
impl StorageNetwork for MemoryNetwork {
    async fn add(&self, data: Vec<u8>) -> PinResult<String> {
        if self.faults().await.add {
            return Err(PinError::Network("injected add failure".to_string()));
        }

        let cid = content_cid(&data);
        self.blocks.write().await.insert(cid.clone(), data);
        Ok(cid)
    }

    async fn pin(&self, cid: &str) -> PinResult<()> {
        if self.faults().await.pin {
            return Err(PinError::Network("injected pin failure".to_string()));
        }

        let _gate = self.pin_gate.lock().await;

        self.pinned.write().await.insert(cid.to_string());
        Ok(())
    }

    async fn unpin(&self, cid: &str) -> PinResult<()> {
        self.unpinned.write().await.push(cid.to_string());

        if self.faults().await.unpin {
            return Err(PinError::Network("injected unpin failure".to_string()));
        }

        if !self.pinned.write().await.remove(cid) {
            return Err(PinError::Network(format!("{} is not pinned", cid)));
        }
        Ok(())
    }

    async fn stat(&self, cid: &str) -> PinResult<i64> {
        if self.faults().await.stat {
            return Err(PinError::Network("injected stat failure".to_string()));
        }

        if let Some(size) = self.sizes.read().await.get(cid) {
            return Ok(*size);
        }

        self.blocks
            .read()
            .await
            .get(cid)
            .map(|data| data.len() as i64)
            .ok_or_else(|| PinError::Network(format!("{} not found", cid)))
    }

    async fn node_info(&self) -> PinResult<NodeInfo> {
        self.faults().await;
        Ok(NodeInfo {
            peer_id: "memory".to_string(),
            agent_version: concat!("pinledger/", env!("CARGO_PKG_VERSION")).to_string(),
            protocol_version: "memory/1.0.0".to_string(),
        })
    }
}
