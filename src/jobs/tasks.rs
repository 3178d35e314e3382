/// Background task implementations
use crate::{
    error::{PinError, PinResult},
    jobs::CompletionJob,
    pin_store::Owner,
    pins::PinService,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;

/// Stale pins re-enqueued per recovery run
const STALE_BATCH_SIZE: i64 = 500;

/// Re-enqueue pins stuck in queued/pinning for longer than `stale_after`
pub async fn recover_stale_pins(service: &PinService, stale_after: Duration) -> PinResult<usize> {
    let stale_after = chrono::Duration::from_std(stale_after)
        .map_err(|e| PinError::Internal(format!("Invalid stale pin threshold: {}", e)))?;
    let cutoff = Utc::now() - stale_after;

    let stale = service.store().list_stale(cutoff, STALE_BATCH_SIZE).await?;

    let mut enqueued = 0;
    for pin in stale {
        tracing::debug!(pin_id = %pin.id, status = %pin.status, "Re-enqueueing stale pin");
        let accepted = service.queue().enqueue(CompletionJob {
            pin_id: pin.id,
            cid: pin.cid,
        });
        if !accepted {
            break;
        }
        enqueued += 1;
    }

    Ok(enqueued)
}

/// One owner whose ledger disagrees with their pinned bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDrift {
    pub owner: Owner,
    pub recorded_bytes: i64,
    pub pinned_bytes: i64,
    pub in_flight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub owners_checked: usize,
    pub drift: Vec<LedgerDrift>,
    pub repaired: usize,
}

/// Compare each owner's ledger with the sum of their pinned sizes.
///
/// With `auto_repair`, owners with no in-flight pins get `used_bytes`
/// rewritten to the pinned total.
pub async fn audit_storage_ledger(service: &PinService, auto_repair: bool) -> PinResult<AuditReport> {
    let mut owners: BTreeMap<Owner, (i64, i64, i64)> = BTreeMap::new();

    for totals in service.store().owner_totals().await? {
        let entry = owners.entry(totals.owner).or_default();
        entry.1 = totals.pinned_bytes;
        entry.2 = totals.in_flight;
    }
    for usage in service.ledger().list_usage().await? {
        owners.entry(usage.owner).or_default().0 = usage.used_bytes;
    }

    let mut report = AuditReport {
        owners_checked: owners.len(),
        ..Default::default()
    };

    for (owner, (recorded_bytes, pinned_bytes, in_flight)) in owners {
        if recorded_bytes == pinned_bytes {
            continue;
        }

        tracing::warn!(
            owner = %owner,
            recorded_bytes,
            pinned_bytes,
            in_flight,
            "Storage ledger drift detected"
        );

        if auto_repair && in_flight == 0 {
            service.ledger().set_used(&owner, pinned_bytes).await?;
            tracing::info!(owner = %owner, pinned_bytes, "Storage ledger repaired");
            report.repaired += 1;
        }

        report.drift.push(LedgerDrift {
            owner,
            recorded_bytes,
            pinned_bytes,
            in_flight,
        });
    }

    Ok(report)
}
