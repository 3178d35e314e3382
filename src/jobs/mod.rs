use crate::{context::AppContext, metrics};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod queue;
pub mod tasks;

pub use queue::{completion_queue, spawn_workers, CompletionJob, CompletionQueue, CompletionReceiver};

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: AppContext,
}

impl JobScheduler {
    pub fn new(context: AppContext) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::stale_pin_recovery_job(Arc::clone(&self)));
        tokio::spawn(Self::ledger_audit_job(Arc::clone(&self)));
        tokio::spawn(Self::uptime_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Re-enqueue pins stuck before their final status (runs every minute)
    async fn stale_pin_recovery_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));
        let stale_after = Duration::from_secs(scheduler.context.config.worker.stale_pin_secs);

        loop {
            interval.tick().await;
            let started = Instant::now();

            match tasks::recover_stale_pins(&scheduler.context.pin_service, stale_after).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Re-enqueued {} stale pins", count);
                    }
                    metrics::record_background_job(
                        "stale_pin_recovery",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    error!("Failed to recover stale pins: {}", e);
                    metrics::record_background_job(
                        "stale_pin_recovery",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }

    /// Compare the storage ledger with pinned sizes (runs hourly)
    async fn ledger_audit_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));
        let auto_repair = scheduler.context.config.worker.ledger_auto_repair;

        loop {
            interval.tick().await;
            info!("Running storage ledger audit");
            let started = Instant::now();

            match tasks::audit_storage_ledger(&scheduler.context.pin_service, auto_repair).await {
                Ok(report) => {
                    metrics::LEDGER_DRIFT_OWNERS.set(report.drift.len() as i64);
                    if report.drift.is_empty() {
                        info!("Ledger audit: {} owners consistent", report.owners_checked);
                    } else {
                        info!(
                            "Ledger audit: {} of {} owners drifted, {} repaired",
                            report.drift.len(),
                            report.owners_checked,
                            report.repaired
                        );
                    }
                    metrics::record_background_job(
                        "ledger_audit",
                        "success",
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    error!("Storage ledger audit failed: {}", e);
                    metrics::record_background_job(
                        "ledger_audit",
                        "failure",
                        started.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }

    /// Publish uptime (runs every 15 seconds)
    async fn uptime_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(15));

        loop {
            interval.tick().await;
            metrics::UPTIME_SECONDS.set(scheduler.context.started_at.elapsed().as_secs_f64());
        }
    }
}
