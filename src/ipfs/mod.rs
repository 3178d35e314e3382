/// Storage network client
///
/// Capability surface over the content-addressable storage network. The
/// orchestrator only sees the `StorageNetwork` trait; production uses the
/// Kubo RPC client, development and tests use the in-memory network.

pub mod kubo;
pub mod memory;

pub use kubo::KuboClient;
pub use memory::MemoryNetwork;

use crate::{
    config::{IpfsBackend, IpfsConfig},
    error::PinResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity of the storage node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub peer_id: String,
    pub agent_version: String,
    pub protocol_version: String,
}

#[async_trait]
pub trait StorageNetwork: Send + Sync {
    /// Upload bytes, returning the CID of the stored object
    async fn add(&self, data: Vec<u8>) -> PinResult<String>;

    /// Ask the network to keep `cid` available
    async fn pin(&self, cid: &str) -> PinResult<()>;

    /// Release a previous pin
    async fn unpin(&self, cid: &str) -> PinResult<()>;

    /// Cumulative size of the object in bytes
    async fn stat(&self, cid: &str) -> PinResult<i64>;

    async fn node_info(&self) -> PinResult<NodeInfo>;
}

/// Build the configured network backend
pub fn from_config(config: &IpfsConfig) -> PinResult<Arc<dyn StorageNetwork>> {
    match config.backend {
        IpfsBackend::Kubo => Ok(Arc::new(KuboClient::new(config)?)),
        IpfsBackend::Memory => {
            tracing::warn!("Using in-memory storage network; pinned content is not durable");
            Ok(Arc::new(MemoryNetwork::new()))
        }
    }
}
