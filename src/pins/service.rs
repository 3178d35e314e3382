/// Pin lifecycle orchestration
use crate::{
    agents::AgentDirectory,
    cid::is_valid_cid,
    config::DEFAULT_MAX_UPLOAD_SIZE,
    error::{PinError, PinResult},
    ipfs::StorageNetwork,
    jobs::{CompletionJob, CompletionQueue},
    metrics,
    pin_store::{Owner, OwnerType, Pin, PinListOptions, PinStatus, PinStore},
    storage_ledger::{StorageLedger, StorageUsage},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Maximum pin name length accepted by the Pinning Service API
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct PinServiceOptions {
    /// Offered back to clients in every pin response
    pub delegates: Vec<String>,
    pub max_upload_size: usize,
    /// Attempts for store writes made by the completion step
    pub write_attempts: u32,
    /// Initial backoff between attempts, doubled each retry
    pub write_backoff: Duration,
}

impl Default for PinServiceOptions {
    fn default() -> Self {
        Self {
            delegates: Vec::new(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            write_attempts: 3,
            write_backoff: Duration::from_millis(100),
        }
    }
}

/// Create request after body parsing
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewPin {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// Result of uploading raw content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedContent {
    pub cid: String,
    pub size: i64,
}

/// What the completion step did to a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Pinned { size_bytes: i64 },
    Failed,
    /// Pin deleted or already finalized elsewhere
    Skipped,
}

pub struct PinService {
    store: Arc<dyn PinStore>,
    ledger: Arc<dyn StorageLedger>,
    network: Arc<dyn StorageNetwork>,
    agents: Arc<dyn AgentDirectory>,
    queue: CompletionQueue,
    options: PinServiceOptions,
}

/// `pin_<first 8 chars of cid>_<YYYYMMDD>`
fn default_pin_name(cid: &str, now: DateTime<Utc>) -> String {
    let prefix: String = cid.chars().take(8).collect();
    format!("pin_{}_{}", prefix, now.format("%Y%m%d"))
}

impl PinService {
    pub fn new(
        store: Arc<dyn PinStore>,
        ledger: Arc<dyn StorageLedger>,
        network: Arc<dyn StorageNetwork>,
        agents: Arc<dyn AgentDirectory>,
        queue: CompletionQueue,
        options: PinServiceOptions,
    ) -> Self {
        Self {
            store,
            ledger,
            network,
            agents,
            queue,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn PinStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn StorageLedger> {
        &self.ledger
    }

    pub fn network(&self) -> &Arc<dyn StorageNetwork> {
        &self.network
    }

    pub fn queue(&self) -> &CompletionQueue {
        &self.queue
    }

    pub fn max_upload_size(&self) -> usize {
        self.options.max_upload_size
    }

    /// Accept a pin request: persist it as `queued` and schedule completion
    pub async fn create(&self, principal: &Owner, request: NewPin) -> PinResult<Pin> {
        if request.cid.is_empty() {
            return Err(PinError::Validation("cid is required".to_string()));
        }
        if !is_valid_cid(&request.cid) {
            return Err(PinError::Validation(
                "invalid CID format: must be a valid CIDv0 (Qm...) or CIDv1 (bafy...)".to_string(),
            ));
        }

        let name = match request.name {
            Some(name) if !name.is_empty() => name,
            _ => default_pin_name(&request.cid, Utc::now()),
        };
        if name.chars().count() > MAX_NAME_LEN {
            return Err(PinError::Validation(format!(
                "name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }

        // Fail open: an unreadable ledger must not block pinning
        match self.ledger.get_usage(principal).await {
            Ok(usage) if usage.is_exhausted() => {
                return Err(PinError::QuotaExceeded("storage quota exceeded".to_string()));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(owner = %principal, "Failed to check storage quota: {}", e);
            }
        }

        let pin = Pin::queued(
            principal.clone(),
            request.cid,
            Some(name),
            request.origins,
            request.meta,
            self.options.delegates.clone(),
        );

        if let Err(e) = self.store.create(&pin).await {
            if matches!(e, PinError::Conflict(_)) {
                if let Ok(Some(existing)) = self.store.get_by_cid(&pin.cid, &principal.id).await {
                    tracing::debug!(
                        cid = %pin.cid,
                        existing_pin_id = %existing.id,
                        "Duplicate pin request"
                    );
                }
            }
            return Err(e);
        }

        metrics::record_pin_created(principal.kind.as_str());
        tracing::info!(pin_id = %pin.id, cid = %pin.cid, owner = %principal, "Pin queued");

        self.queue.enqueue(CompletionJob {
            pin_id: pin.id.clone(),
            cid: pin.cid.clone(),
        });

        Ok(pin)
    }

    /// Fetch a pin the principal owns
    pub async fn get(&self, principal: &Owner, id: &str) -> PinResult<Pin> {
        let pin = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| PinError::NotFound("pin not found".to_string()))?;

        if !pin.is_owned_by(principal) {
            return Err(PinError::Authorization("you can only access your own pins".to_string()));
        }

        Ok(pin)
    }

    pub async fn list(&self, principal: &Owner, opts: &PinListOptions) -> PinResult<(Vec<Pin>, i64)> {
        self.store.list_by_owner(principal, opts).await
    }

    /// Remove a pin: delete the record, release its bytes, and unpin the CID
    /// from the network once no other record references it.
    pub async fn delete(&self, principal: &Owner, id: &str) -> PinResult<Pin> {
        self.get(principal, id).await?;

        // The returned row is the pin as it was when removed, so a concurrent
        // completion either finished first (size included) or will find nothing.
        let removed = self
            .store
            .delete(id)
            .await?
            .ok_or_else(|| PinError::NotFound("pin not found".to_string()))?;

        let released = removed.accounted_bytes();
        if released > 0 {
            self.adjust_ledger(&removed.owner, -released).await;
        }

        match self.store.cid_in_use(&removed.cid).await {
            Ok(false) => {
                if let Err(e) = self.network.unpin(&removed.cid).await {
                    metrics::record_network_failure("unpin");
                    tracing::warn!(pin_id = %removed.id, cid = %removed.cid, "Unpin failed: {}", e);
                }
            }
            Ok(true) => {
                tracing::debug!(cid = %removed.cid, "CID still referenced; keeping network pin");
            }
            Err(e) => {
                tracing::warn!(cid = %removed.cid, "Could not check CID references; keeping network pin: {}", e);
            }
        }

        tracing::info!(
            pin_id = %removed.id,
            cid = %removed.cid,
            owner = %removed.owner,
            released_bytes = released,
            "Pin deleted"
        );

        Ok(removed)
    }

    /// List an agent's pins as the agent, a sibling agent, or the claiming human
    pub async fn list_agent_pins(
        &self,
        principal: &Owner,
        agent_id: &str,
        opts: &PinListOptions,
    ) -> PinResult<(Vec<Pin>, i64)> {
        let agent = Owner::agent(agent_id);

        if *principal != agent {
            let target = self.find_agent(agent_id).await?;
            match principal.kind {
                OwnerType::Agent => {
                    let caller = self.agents.find_agent(&principal.id).await?;
                    if !caller.map_or(false, |caller| caller.is_sibling_of(&target)) {
                        return Err(PinError::Authorization(
                            "agents can only access their own or sibling agents' pins".to_string(),
                        ));
                    }
                }
                OwnerType::Human => {
                    if !target.is_claimed_by(&principal.id) {
                        return Err(PinError::Authorization(
                            "you must be the claiming owner of this agent".to_string(),
                        ));
                    }
                }
            }
        }

        self.store.list_by_owner(&agent, opts).await
    }

    pub async fn storage_usage(&self, principal: &Owner) -> PinResult<StorageUsage> {
        self.ledger.get_usage(principal).await
    }

    /// Storage of an agent, visible to the agent itself or its claiming human
    pub async fn agent_storage_usage(&self, principal: &Owner, agent_id: &str) -> PinResult<StorageUsage> {
        let agent = Owner::agent(agent_id);

        match principal.kind {
            OwnerType::Agent if *principal == agent => {}
            OwnerType::Agent => {
                return Err(PinError::Authorization(
                    "agents can only view their own storage".to_string(),
                ));
            }
            OwnerType::Human => {
                let target = self.find_agent(agent_id).await?;
                if !target.is_claimed_by(&principal.id) {
                    return Err(PinError::Authorization(
                        "you must be the claiming owner of this agent".to_string(),
                    ));
                }
            }
        }

        self.ledger.get_usage(&agent).await
    }

    /// Upload raw bytes to the storage network without pinning them
    pub async fn add_content(&self, data: Vec<u8>) -> PinResult<AddedContent> {
        if data.is_empty() {
            return Err(PinError::Validation("file is empty".to_string()));
        }
        if data.len() > self.options.max_upload_size {
            return Err(PinError::PayloadTooLarge(format!(
                "file exceeds maximum upload size of {} bytes",
                self.options.max_upload_size
            )));
        }

        let size = data.len() as i64;
        let cid = self.network.add(data).await.map_err(|e| {
            metrics::record_network_failure("add");
            e
        })?;

        tracing::info!(cid = %cid, size, "Content added");
        Ok(AddedContent { cid, size })
    }

    /// Completion step: confirm the pin with the network, measure it, write the
    /// final status and size together, then credit the owner's ledger.
    pub async fn complete(&self, job: &CompletionJob) -> PinResult<CompletionOutcome> {
        let started = self
            .with_retries("mark pinning", &job.pin_id, move || {
                self.store.update_status(&job.pin_id, PinStatus::Pinning)
            })
            .await?;

        let Some(pin) = started else {
            tracing::debug!(pin_id = %job.pin_id, "Pin deleted or already final; skipping completion");
            metrics::record_pin_completion("skipped");
            return Ok(CompletionOutcome::Skipped);
        };

        let pinned = self.network.pin(&pin.cid).await;
        if let Err(e) = &pinned {
            metrics::record_network_failure("pin");
            tracing::warn!(pin_id = %pin.id, cid = %pin.cid, "Network pin failed: {}", e);
        }

        let measured = self.network.stat(&pin.cid).await;
        if let Err(e) = &measured {
            metrics::record_network_failure("stat");
            tracing::warn!(pin_id = %pin.id, cid = %pin.cid, "Network stat failed: {}", e);
        }

        let network_pinned = pinned.is_ok();

        // A successful stat proves the content is retrievable even if the
        // explicit pin call errored; with neither, the pin fails.
        let (status, size) = match (pinned, measured) {
            (_, Ok(size)) => (PinStatus::Pinned, Some(size.max(0))),
            (Ok(()), Err(_)) => (PinStatus::Pinned, Some(0)),
            (Err(_), Err(_)) => (PinStatus::Failed, None),
        };

        let store = &self.store;
        let pin_id = pin.id.as_str();
        let written = self
            .with_retries("write final status", pin_id, move || async move {
                match size {
                    Some(size) => store.update_status_and_size(pin_id, status, size).await,
                    None => store.update_status(pin_id, status).await,
                }
            })
            .await;

        let finalized = match written {
            Ok(Some(finalized)) => finalized,
            Ok(None) => {
                tracing::debug!(pin_id = %pin.id, "Pin removed or finalized during completion");
                // A delete that raced the network pin unpinned too early
                if network_pinned {
                    self.release_orphaned_cid(&pin).await;
                }
                metrics::record_pin_completion("skipped");
                return Ok(CompletionOutcome::Skipped);
            }
            Err(e) => {
                metrics::record_pin_completion("error");
                return Err(e);
            }
        };

        if finalized.status != PinStatus::Pinned {
            metrics::record_pin_completion("failed");
            tracing::warn!(pin_id = %finalized.id, cid = %finalized.cid, "Pin failed");
            return Ok(CompletionOutcome::Failed);
        }

        // Owner comes from the row this call finalized, never from the job
        let credited = finalized.accounted_bytes();
        if credited > 0 {
            self.adjust_ledger(&finalized.owner, credited).await;
        }

        metrics::record_pin_completion("pinned");
        tracing::info!(
            pin_id = %finalized.id,
            cid = %finalized.cid,
            owner = %finalized.owner,
            size_bytes = credited,
            "Pin completed"
        );

        Ok(CompletionOutcome::Pinned {
            size_bytes: finalized.size_bytes.unwrap_or(0),
        })
    }

    /// Unpin a CID this step pinned after its record was deleted, unless
    /// another record still references it
    async fn release_orphaned_cid(&self, pin: &Pin) {
        match self.store.cid_in_use(&pin.cid).await {
            Ok(false) => {
                if let Err(e) = self.network.unpin(&pin.cid).await {
                    metrics::record_network_failure("unpin");
                    tracing::warn!(pin_id = %pin.id, cid = %pin.cid, "Unpin of orphaned CID failed: {}", e);
                } else {
                    tracing::info!(pin_id = %pin.id, cid = %pin.cid, "Unpinned CID orphaned by concurrent delete");
                }
            }
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(cid = %pin.cid, "Could not check CID references; keeping network pin: {}", e);
            }
        }
    }

    async fn find_agent(&self, agent_id: &str) -> PinResult<crate::agents::AgentRecord> {
        self.agents
            .find_agent(agent_id)
            .await?
            .ok_or_else(|| PinError::NotFound("agent not found".to_string()))
    }

    /// Apply a ledger delta, retrying transient failures. Drift left by a
    /// final failure is reported and repaired by the ledger audit.
    async fn adjust_ledger(&self, owner: &Owner, delta_bytes: i64) {
        let result = self
            .with_retries("adjust ledger", &owner.id, move || self.ledger.adjust(owner, delta_bytes))
            .await;

        metrics::record_ledger_adjustment(delta_bytes, result.is_ok());
        if let Err(e) = result {
            tracing::error!(owner = %owner, delta_bytes, "Storage ledger adjustment lost: {}", e);
        }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, subject: &str, mut op: F) -> PinResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PinResult<T>>,
    {
        let attempts = self.options.write_attempts.max(1);
        let mut delay = self.options.write_backoff;

        for attempt in 1..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(subject, attempt, "Failed to {}: {}; retrying", operation, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }

        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agents::SqliteAgentDirectory,
        config::QuotaConfig,
        db::memory_pool,
        ipfs::MemoryNetwork,
        jobs::{completion_queue, CompletionReceiver},
        pin_store::SqlitePinStore,
        storage_ledger::SqliteStorageLedger,
    };

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
    const OTHER_CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";

    struct Harness {
        service: PinService,
        network: Arc<MemoryNetwork>,
        ledger: Arc<SqliteStorageLedger>,
        store: Arc<SqlitePinStore>,
        agents: Arc<SqliteAgentDirectory>,
        receiver: CompletionReceiver,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_quota(QuotaConfig::default()).await
        }

        async fn with_quota(quota: QuotaConfig) -> Self {
            let pool = memory_pool().await;
            let store = Arc::new(SqlitePinStore::new(pool.clone()));
            let ledger = Arc::new(SqliteStorageLedger::new(pool.clone(), quota));
            let agents = Arc::new(SqliteAgentDirectory::new(pool));
            let network = Arc::new(MemoryNetwork::new());
            let (queue, receiver) = completion_queue(16);

            let service = PinService::new(
                store.clone(),
                ledger.clone(),
                network.clone(),
                agents.clone(),
                queue,
                PinServiceOptions {
                    max_upload_size: 1024,
                    write_backoff: Duration::from_millis(1),
                    ..Default::default()
                },
            );

            Self {
                service,
                network,
                ledger,
                store,
                agents,
                receiver,
            }
        }

        /// Run the completion step for the next queued job
        async fn drain_one(&mut self) -> CompletionOutcome {
            let job = self.receiver.recv().await.unwrap();
            self.service.complete(&job).await.unwrap()
        }

        async fn used(&self, owner: &Owner) -> i64 {
            self.ledger.get_usage(owner).await.unwrap().used_bytes
        }
    }

    fn new_pin(cid: &str) -> NewPin {
        NewPin {
            cid: cid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_pin_name() {
        let now = DateTime::parse_from_rfc3339("2026-03-04T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(default_pin_name(CID, now), "pin_QmYwAPJz_20260304");
    }

    #[tokio::test]
    async fn test_create_queues_and_enqueues() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        assert_eq!(pin.status, PinStatus::Queued);
        assert!(pin.size_bytes.is_none());
        assert!(pin.name.as_deref().unwrap().starts_with("pin_QmYwAPJz_"));

        let job = h.receiver.recv().await.unwrap();
        assert_eq!(job.pin_id, pin.id);
        assert_eq!(job.cid, CID);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_cid() {
        let h = Harness::new().await;
        let owner = Owner::human("user-123");

        for cid in ["", "Qm123", "not-a-cid", "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPb0l"] {
            let err = h.service.create(&owner, new_pin(cid)).await.unwrap_err();
            assert!(matches!(err, PinError::Validation(_)), "{}", cid);
        }

        let (pins, total) = h.service.list(&owner, &PinListOptions::default()).await.unwrap();
        assert!(pins.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts_without_mutation() {
        let h = Harness::new().await;
        let owner = Owner::human("user-123");

        let mut request = new_pin(CID);
        request.name = Some("first".to_string());
        let first = h.service.create(&owner, request).await.unwrap();

        let mut again = new_pin(CID);
        again.name = Some("second".to_string());
        let err = h.service.create(&owner, again).await.unwrap_err();
        assert!(matches!(err, PinError::Conflict(_)));

        let stored = h.service.get(&owner, &first.id).await.unwrap();
        assert_eq!(stored.name.as_deref(), Some("first"));
        assert_eq!(stored.status, PinStatus::Queued);
    }

    #[tokio::test]
    async fn test_quota_exhausted_rejects_create() {
        let h = Harness::with_quota(QuotaConfig {
            human_quota_bytes: 100,
            agent_quota_bytes: 100,
        })
        .await;
        let owner = Owner::human("user-123");

        h.ledger.adjust(&owner, 100).await.unwrap();
        let err = h.service.create(&owner, new_pin(CID)).await.unwrap_err();
        assert!(matches!(err, PinError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_completion_and_delete_balance_the_ledger() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.set_size(CID, 1_048_576).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        assert_eq!(
            h.drain_one().await,
            CompletionOutcome::Pinned {
                size_bytes: 1_048_576
            }
        );

        let stored = h.service.get(&owner, &pin.id).await.unwrap();
        assert_eq!(stored.status, PinStatus::Pinned);
        assert_eq!(stored.size_bytes, Some(1_048_576));
        assert!(stored.pinned_at.is_some());
        assert!(h.network.is_pinned(CID).await);
        assert_eq!(h.used(&owner).await, 1_048_576);

        h.service.delete(&owner, &pin.id).await.unwrap();
        assert_eq!(h.used(&owner).await, 0);
        assert!(!h.network.is_pinned(CID).await);
        assert!(matches!(
            h.service.get(&owner, &pin.id).await,
            Err(PinError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_completion_runs_once() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.set_size(CID, 500).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        h.drain_one().await;

        let replay = CompletionJob {
            pin_id: pin.id.clone(),
            cid: CID.to_string(),
        };
        assert_eq!(h.service.complete(&replay).await.unwrap(), CompletionOutcome::Skipped);
        assert_eq!(h.used(&owner).await, 500);
        assert!(h.network.unpin_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stat_failure_pins_without_size() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.fail_stat(true).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        assert_eq!(h.drain_one().await, CompletionOutcome::Pinned { size_bytes: 0 });

        let stored = h.service.get(&owner, &pin.id).await.unwrap();
        assert_eq!(stored.status, PinStatus::Pinned);
        assert_eq!(stored.size_bytes, Some(0));
        assert_eq!(h.used(&owner).await, 0);
        assert!(h.ledger.list_usage().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pin_failure_with_successful_stat_still_pins() {
        let mut h = Harness::new().await;
        let owner = Owner::agent("agent-1");
        h.network.fail_pin(true).await;
        h.network.set_size(CID, 42).await;

        h.service.create(&owner, new_pin(CID)).await.unwrap();
        assert_eq!(h.drain_one().await, CompletionOutcome::Pinned { size_bytes: 42 });
        assert_eq!(h.used(&owner).await, 42);
    }

    #[tokio::test]
    async fn test_pin_and_stat_failure_marks_failed() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.fail_pin(true).await;
        h.network.fail_stat(true).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        assert_eq!(h.drain_one().await, CompletionOutcome::Failed);

        let stored = h.service.get(&owner, &pin.id).await.unwrap();
        assert_eq!(stored.status, PinStatus::Failed);
        assert!(stored.size_bytes.is_none());
        assert_eq!(h.used(&owner).await, 0);
    }

    #[tokio::test]
    async fn test_completion_after_delete_is_noop() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.set_size(CID, 1000).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        h.service.delete(&owner, &pin.id).await.unwrap();

        assert_eq!(h.drain_one().await, CompletionOutcome::Skipped);
        assert_eq!(h.used(&owner).await, 0);
    }

    #[tokio::test]
    async fn test_delete_during_network_pin_unpins_cid() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.set_size(CID, 1000).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        let job = h.receiver.recv().await.unwrap();
        let gate = h.network.hold_pins().await;

        // Delete once the step is inside the network pin call, then let it finish
        let delete_mid_pin = async {
            loop {
                let current = h.store.get_by_id(&pin.id).await.unwrap();
                if current.map(|p| p.status) == Some(PinStatus::Pinning) {
                    break;
                }
                tokio::task::yield_now().await;
            }
            h.service.delete(&owner, &pin.id).await.unwrap();
            drop(gate);
        };

        let (outcome, ()) = tokio::join!(h.service.complete(&job), delete_mid_pin);

        assert_eq!(outcome.unwrap(), CompletionOutcome::Skipped);
        assert!(h.store.get_by_id(&pin.id).await.unwrap().is_none());
        assert!(!h.network.is_pinned(CID).await);
        assert_eq!(h.used(&owner).await, 0);
    }

    #[tokio::test]
    async fn test_delete_during_network_pin_keeps_shared_cid() {
        let mut h = Harness::new().await;
        let alice = Owner::human("alice");
        let bob = Owner::human("bob");
        h.network.set_size(CID, 10).await;

        let pin = h.service.create(&alice, new_pin(CID)).await.unwrap();
        h.service.create(&bob, new_pin(CID)).await.unwrap();
        let job = h.receiver.recv().await.unwrap();
        let gate = h.network.hold_pins().await;

        let delete_mid_pin = async {
            loop {
                let current = h.store.get_by_id(&pin.id).await.unwrap();
                if current.map(|p| p.status) == Some(PinStatus::Pinning) {
                    break;
                }
                tokio::task::yield_now().await;
            }
            h.service.delete(&alice, &pin.id).await.unwrap();
            drop(gate);
        };

        let (outcome, ()) = tokio::join!(h.service.complete(&job), delete_mid_pin);

        assert_eq!(outcome.unwrap(), CompletionOutcome::Skipped);
        // Bob's record still references the CID
        assert!(h.network.is_pinned(CID).await);
    }

    #[tokio::test]
    async fn test_delete_of_unsized_pin_leaves_ledger() {
        let h = Harness::new().await;
        let owner = Owner::human("user-123");

        h.ledger.adjust(&owner, 77).await.unwrap();
        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        h.service.delete(&owner, &pin.id).await.unwrap();

        assert_eq!(h.used(&owner).await, 77);
    }

    #[tokio::test]
    async fn test_unpin_failure_does_not_block_delete() {
        let mut h = Harness::new().await;
        let owner = Owner::human("user-123");
        h.network.set_size(CID, 10).await;

        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();
        h.drain_one().await;
        h.network.fail_unpin(true).await;

        h.service.delete(&owner, &pin.id).await.unwrap();
        assert!(h.store.get_by_id(&pin.id).await.unwrap().is_none());
        assert_eq!(h.used(&owner).await, 0);
        assert_eq!(h.network.unpin_calls().await, vec![CID.to_string()]);
    }

    #[tokio::test]
    async fn test_shared_cid_stays_pinned_until_last_owner_deletes() {
        let mut h = Harness::new().await;
        let alice = Owner::human("alice");
        let bob = Owner::human("bob");
        h.network.set_size(CID, 10).await;

        let a = h.service.create(&alice, new_pin(CID)).await.unwrap();
        let b = h.service.create(&bob, new_pin(CID)).await.unwrap();
        h.drain_one().await;
        h.drain_one().await;

        h.service.delete(&alice, &a.id).await.unwrap();
        assert!(h.network.unpin_calls().await.is_empty());
        assert!(h.network.is_pinned(CID).await);

        h.service.delete(&bob, &b.id).await.unwrap();
        assert_eq!(h.network.unpin_calls().await, vec![CID.to_string()]);
    }

    #[tokio::test]
    async fn test_non_owner_is_forbidden() {
        let h = Harness::new().await;
        let owner = Owner::human("user-123");
        let pin = h.service.create(&owner, new_pin(CID)).await.unwrap();

        for intruder in [Owner::human("user-456"), Owner::agent("user-123")] {
            assert!(matches!(
                h.service.get(&intruder, &pin.id).await,
                Err(PinError::Authorization(_))
            ));
            assert!(matches!(
                h.service.delete(&intruder, &pin.id).await,
                Err(PinError::Authorization(_))
            ));
        }

        assert!(h.service.get(&owner, &pin.id).await.is_ok());
        assert!(matches!(
            h.service.get(&owner, "missing").await,
            Err(PinError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_agent_pin_access() {
        let h = Harness::new().await;
        h.agents.record_agent("agent-a", Some("user-1")).await.unwrap();
        h.agents.record_agent("agent-b", Some("user-1")).await.unwrap();
        h.agents.record_agent("agent-c", Some("user-2")).await.unwrap();

        h.service
            .create(&Owner::agent("agent-a"), new_pin(CID))
            .await
            .unwrap();
        h.service
            .create(&Owner::agent("agent-a"), new_pin(OTHER_CID))
            .await
            .unwrap();

        let opts = PinListOptions::default();
        for allowed in [Owner::agent("agent-a"), Owner::agent("agent-b"), Owner::human("user-1")] {
            let (pins, total) = h.service.list_agent_pins(&allowed, "agent-a", &opts).await.unwrap();
            assert_eq!(total, 2, "{}", allowed);
            assert_eq!(pins.len(), 2);
        }

        for denied in [Owner::agent("agent-c"), Owner::human("user-2")] {
            assert!(matches!(
                h.service.list_agent_pins(&denied, "agent-a", &opts).await,
                Err(PinError::Authorization(_))
            ));
        }

        assert!(matches!(
            h.service.list_agent_pins(&Owner::human("user-1"), "ghost", &opts).await,
            Err(PinError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_agent_storage_access() {
        let h = Harness::new().await;
        h.agents.record_agent("agent-a", Some("user-1")).await.unwrap();
        h.agents.record_agent("agent-b", Some("user-1")).await.unwrap();
        h.ledger.adjust(&Owner::agent("agent-a"), 2048).await.unwrap();

        let own = h
            .service
            .agent_storage_usage(&Owner::agent("agent-a"), "agent-a")
            .await
            .unwrap();
        assert_eq!(own.used_bytes, 2048);

        let claimed = h
            .service
            .agent_storage_usage(&Owner::human("user-1"), "agent-a")
            .await
            .unwrap();
        assert_eq!(claimed.used_bytes, 2048);

        assert!(matches!(
            h.service.agent_storage_usage(&Owner::agent("agent-b"), "agent-a").await,
            Err(PinError::Authorization(_))
        ));
        assert!(matches!(
            h.service.agent_storage_usage(&Owner::human("user-2"), "agent-a").await,
            Err(PinError::Authorization(_))
        ));
        assert!(matches!(
            h.service.agent_storage_usage(&Owner::human("user-1"), "ghost").await,
            Err(PinError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_content_limits() {
        let h = Harness::new().await;

        assert!(matches!(
            h.service.add_content(Vec::new()).await,
            Err(PinError::Validation(_))
        ));
        assert!(matches!(
            h.service.add_content(vec![0u8; 1025]).await,
            Err(PinError::PayloadTooLarge(_))
        ));

        let added = h.service.add_content(b"hello".to_vec()).await.unwrap();
        assert_eq!(added.size, 5);
        assert!(is_valid_cid(&added.cid));
        assert_eq!(h.network.stat(&added.cid).await.unwrap(), 5);
    }
}
