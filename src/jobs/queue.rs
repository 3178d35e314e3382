/// Completion queue and worker pool
///
/// Create requests enqueue a job and return immediately; a fixed pool of
/// workers drains the bounded queue and runs the completion step. A job that
/// cannot be enqueued is not lost: its pin stays queued and the stale-pin
/// recovery job re-enqueues it.
use crate::{metrics, pins::PinService};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Work item for the completion step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionJob {
    pub pin_id: String,
    pub cid: String,
}

/// Producer side of the completion queue
#[derive(Clone)]
pub struct CompletionQueue {
    sender: mpsc::Sender<CompletionJob>,
}

/// Consumer side, handed to `spawn_workers`
pub struct CompletionReceiver {
    receiver: mpsc::Receiver<CompletionJob>,
}

/// Create a bounded completion queue
pub fn completion_queue(capacity: usize) -> (CompletionQueue, CompletionReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (CompletionQueue { sender }, CompletionReceiver { receiver })
}

impl CompletionQueue {
    /// Enqueue without waiting; returns false when the job was not accepted
    pub fn enqueue(&self, job: CompletionJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                metrics::COMPLETION_QUEUE_DEPTH.set(self.depth() as i64);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    pin_id = %job.pin_id,
                    cid = %job.cid,
                    "Completion queue full; pin left for stale-pin recovery"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::error!(
                    pin_id = %job.pin_id,
                    "Completion queue closed; pin left for stale-pin recovery"
                );
                false
            }
        }
    }

    /// Jobs currently waiting
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl CompletionReceiver {
    pub async fn recv(&mut self) -> Option<CompletionJob> {
        self.receiver.recv().await
    }
}

/// Spawn `count` workers sharing one receiver
pub fn spawn_workers(
    service: Arc<PinService>,
    receiver: CompletionReceiver,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..count.max(1))
        .map(|worker_id| {
            let service = Arc::clone(&service);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                tracing::debug!(worker_id, "Completion worker started");
                loop {
                    // Hold the lock only while waiting for the next job
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else { break };

                    metrics::COMPLETION_QUEUE_DEPTH.dec();
                    if let Err(e) = service.complete(&job).await {
                        tracing::error!(
                            worker_id,
                            pin_id = %job.pin_id,
                            cid = %job.cid,
                            "Completion step failed: {}",
                            e
                        );
                    }
                }
                tracing::debug!(worker_id, "Completion worker stopped");
            })
        })
        .collect()
}
