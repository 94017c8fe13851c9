/// Submission Queue & Worker Pool
///
/// A bounded in-process channel of submission ids feeding a fixed number of
/// worker tasks. The queue owns the set of ids that are queued or being
/// processed; an id already in the set is not enqueued again, so one
/// submission is never evaluated by two workers at once.
///
/// Nothing here is durable: ids still in the channel when the process dies
/// are lost and the submissions stay PENDING.

use crate::executor::{ProcessOutcome, SubmissionExecutor};
use judge_common::metrics;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Already queued or being processed; nothing was added
    AlreadyQueued,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("submission queue is full")]
    Full,
    #[error("submission queue is closed")]
    Closed,
}

/// Receiving half handed to the worker pool
pub struct QueueReceiver(mpsc::Receiver<Uuid>);

pub struct SubmissionQueue {
    sender: mpsc::Sender<Uuid>,
    inflight: Mutex<HashSet<Uuid>>,
    closed: AtomicBool,
}

impl SubmissionQueue {
    pub fn bounded(capacity: usize) -> (Arc<Self>, QueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Arc::new(Self {
            sender,
            inflight: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        });
        (queue, QueueReceiver(receiver))
    }

    /// Non-blocking enqueue; a full channel is reported, never waited on
    pub fn enqueue(&self, id: Uuid) -> Result<EnqueueOutcome, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            metrics::record_submission_rejected("closed");
            return Err(QueueError::Closed);
        }

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if !inflight.insert(id) {
            metrics::record_submission_rejected("duplicate");
            debug!(submission_id = %id, "Submission already queued");
            return Ok(EnqueueOutcome::AlreadyQueued);
        }

        match self.sender.try_send(id) {
            Ok(()) => {
                metrics::set_queue_depth(inflight.len());
                Ok(EnqueueOutcome::Queued)
            }
            Err(TrySendError::Full(_)) => {
                inflight.remove(&id);
                metrics::record_submission_rejected("full");
                Err(QueueError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                inflight.remove(&id);
                metrics::record_submission_rejected("closed");
                Err(QueueError::Closed)
            }
        }
    }

    /// Release an id once its worker is done with it
    fn complete(&self, id: Uuid) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.remove(&id);
        metrics::set_queue_depth(inflight.len());
    }

    pub fn is_inflight(&self, id: &Uuid) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Submissions queued or being processed
    pub fn depth(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting new work; queued ids are still drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Fixed set of worker tasks pulling from one queue
pub struct WorkerPool {
    queue: Arc<SubmissionQueue>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        worker_count: usize,
        queue: Arc<SubmissionQueue>,
        receiver: QueueReceiver,
        executor: SubmissionExecutor,
    ) -> Self {
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver.0));
        let token = CancellationToken::new();

        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    queue.clone(),
                    receiver.clone(),
                    executor.clone(),
                    token.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Worker pool started");
        Self {
            queue,
            token,
            handles,
        }
    }

    /// Close the queue, let workers drain what is already queued, then wait
    /// for them to exit
    pub async fn shutdown(self) {
        self.queue.close();
        self.token.cancel();
        info!(remaining = self.queue.depth(), "Draining submission queue");

        for result in futures_util::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task terminated abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn next_id(
    receiver: &tokio::sync::Mutex<mpsc::Receiver<Uuid>>,
    token: &CancellationToken,
) -> Option<Uuid> {
    let mut receiver = receiver.lock().await;
    // queued work wins over cancellation so shutdown drains the channel
    tokio::select! {
        biased;
        id = receiver.recv() => id,
        _ = token.cancelled() => receiver.try_recv().ok(),
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<SubmissionQueue>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
    executor: SubmissionExecutor,
    token: CancellationToken,
) {
    debug!(worker_id, "Worker listening for submissions");

    while let Some(id) = next_id(&receiver, &token).await {
        debug!(worker_id, submission_id = %id, "Dequeued submission");

        // isolate panics so the id is always released
        let task_executor = executor.clone();
        let outcome = tokio::spawn(async move { task_executor.process(id).await }).await;

        match outcome {
            Ok(Ok(ProcessOutcome::Completed(status))) => {
                debug!(worker_id, submission_id = %id, %status, "Submission done");
            }
            Ok(Ok(ProcessOutcome::Skipped(_))) | Ok(Ok(ProcessOutcome::Missing)) => {}
            Ok(Err(e)) => {
                error!(
                    worker_id,
                    submission_id = %id,
                    error = %e,
                    "Persistence failed while processing submission"
                );
            }
            Err(e) => {
                error!(
                    worker_id,
                    submission_id = %id,
                    error = %e,
                    "Submission processing panicked"
                );
            }
        }

        queue.complete(id);
    }

    if !queue.is_closed() {
        warn!(worker_id, "Queue channel closed unexpectedly");
    }
    debug!(worker_id, "Worker stopped");
}
