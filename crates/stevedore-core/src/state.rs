//! Buffered, acknowledged status reporting.
//!
//! Status updates are queued, delivered to the agent at least once, and kept
//! in an unacknowledged map until the agent echoes their UUID back. The map
//! is replayed inside every SUBSCRIBE call so a restarted agent can dedupe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stevedore_proto::{ExecutorId, OptionalInfo, StatusUpdate, TaskId, TaskState};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Pause after a failed delivery before the next queue cycle, so an offline
/// agent does not turn the worker into a busy loop.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Delivery channel for a single status update.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    async fn send_update(&self, update: &StatusUpdate) -> Result<()>;
}

/// Reports task status to the agent.
///
/// Implementations own all retry logic for an offline agent.
#[async_trait]
pub trait Updater: Send + Sync {
    /// Enqueues a status update. Blocks only while the buffer is full.
    async fn update(&self, task_id: TaskId, state: TaskState);

    /// Enqueues a status update with optional message and health fields.
    async fn update_with_options(&self, task_id: TaskId, state: TaskState, info: OptionalInfo);

    /// Marks the update with the matching UUID as acknowledged by the agent.
    fn acknowledge(&self, uuid: &uuid::Uuid);

    /// Snapshot of the updates the agent has not acknowledged yet.
    fn unacknowledged(&self) -> Vec<StatusUpdate>;

    /// Keeps delivering queued updates until everything is sent and
    /// acknowledged, or the timeout elapses.
    async fn wait(&self, timeout: Duration) -> Result<()>;
}

/// [`Updater`] that keeps updates in a bounded queue and retries delivery in
/// a background worker until acknowledged.
pub struct BufferedUpdater {
    executor_id: ExecutorId,
    queue: mpsc::Sender<StatusUpdate>,
    unacknowledged: Arc<Mutex<HashMap<uuid::Uuid, StatusUpdate>>>,
    stop: watch::Sender<bool>,
}

impl BufferedUpdater {
    /// Creates the updater and spawns its delivery worker.
    pub fn new(
        executor_id: ExecutorId,
        transport: Arc<dyn UpdateTransport>,
        buffer_size: usize,
    ) -> Self {
        let (queue, rx) = mpsc::channel(buffer_size.max(1));
        let unacknowledged = Arc::new(Mutex::new(HashMap::new()));
        let (stop, stop_rx) = watch::channel(false);

        tokio::spawn(delivery_loop(
            rx,
            queue.clone(),
            Arc::clone(&unacknowledged),
            transport,
            stop_rx,
        ));

        Self {
            executor_id,
            queue,
            unacknowledged,
            stop,
        }
    }

    /// Number of updates sitting in the queue.
    fn buffered(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }
}

#[async_trait]
impl Updater for BufferedUpdater {
    async fn update(&self, task_id: TaskId, state: TaskState) {
        self.update_with_options(task_id, state, OptionalInfo::default())
            .await;
    }

    async fn update_with_options(&self, task_id: TaskId, state: TaskState, info: OptionalInfo) {
        let update = StatusUpdate::new(task_id, self.executor_id.clone(), state, info);
        // The send only blocks when the buffer is full; state updates are few
        // enough that this backpressure is acceptable.
        if self.queue.send(update).await.is_err() {
            warn!(state = %state, "Status update dropped: delivery worker is gone");
        }
    }

    fn acknowledge(&self, uuid: &uuid::Uuid) {
        info!(uuid = %uuid, "Agent acknowledged status update");
        self.unacknowledged
            .lock()
            .expect("unacknowledged lock poisoned")
            .remove(uuid);
    }

    fn unacknowledged(&self) -> Vec<StatusUpdate> {
        self.unacknowledged
            .lock()
            .expect("unacknowledged lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    async fn wait(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;

            let buffered = self.buffered();
            let unacknowledged = self.unacknowledged().len();
            if buffered == 0 && unacknowledged == 0 {
                let _ = self.stop.send(true);
                return Ok(());
            }
            if started.elapsed() >= timeout {
                let _ = self.stop.send(true);
                return Err(Error::DrainDeadline {
                    buffered,
                    unacknowledged,
                });
            }
        }
    }
}

async fn delivery_loop(
    mut rx: mpsc::Receiver<StatusUpdate>,
    requeue: mpsc::Sender<StatusUpdate>,
    unacknowledged: Arc<Mutex<HashMap<uuid::Uuid, StatusUpdate>>>,
    transport: Arc<dyn UpdateTransport>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let update = tokio::select! {
            _ = stop.changed() => return,
            received = rx.recv() => match received {
                Some(update) => update,
                None => return,
            },
        };

        info!(
            state = %update.state,
            uuid = %update.uuid,
            "Sending task state update to agent"
        );
        unacknowledged
            .lock()
            .expect("unacknowledged lock poisoned")
            .insert(update.uuid, update.clone());

        let mut current = update;
        loop {
            match transport.send_update(&current).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        error = %err,
                        state = %current.state,
                        "Error sending task state update, requeuing"
                    );
                    match requeue.try_send(current) {
                        Ok(()) => {
                            tokio::time::sleep(RETRY_PAUSE).await;
                            break;
                        }
                        // A full buffer keeps the update in flight instead of
                        // deadlocking the worker on its own queue.
                        Err(TrySendError::Full(update)) => {
                            current = update;
                            tokio::time::sleep(RETRY_PAUSE).await;
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            }
        }
    }
}
