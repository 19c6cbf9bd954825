//! Background scheduler: three FIFO queues, one worker each.
//!
//! The digest worker runs digest and segment embeddings for a turn, then
//! feeds the graph and compression queues. Workers catch and log every task
//! error; nothing propagates to the foreground. Depth counters are
//! decremented only after a task finishes, so draining covers in-flight
//! work.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use mnemos_types::{Id, Timestamp, new_id, now};

use crate::error::{MemoryError, Result};
use crate::pipeline::Pipeline;

const QUEUE_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A queued unit of work.
#[derive(Debug, Clone)]
pub struct Task<P> {
    pub task_id: Id,
    pub queued_at: Timestamp,
    pub payload: P,
}

impl<P> Task<P> {
    fn new(payload: P) -> Self {
        Self {
            task_id: new_id(),
            queued_at: now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DigestJob {
    pub turn_guid: Id,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphJob {
    pub turn_guid: Id,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CompressionJob;

/// Counters for one queue: current depth, totals, and the time the last
/// task finished.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub depth: usize,
    pub processed: u64,
    pub failed: u64,
    pub last_finished: Option<Timestamp>,
}

/// Per-queue stats snapshot for the heartbeat and for callers.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub digest: QueueStats,
    pub graph: QueueStats,
    pub compression: QueueStats,
}

impl SchedulerStats {
    pub fn total_depth(&self) -> usize {
        self.digest.depth + self.graph.depth + self.compression.depth
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

struct Queue<P> {
    name: &'static str,
    tx: mpsc::Sender<Task<P>>,
    depth: Arc<AtomicUsize>,
    processed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    last_finished: Arc<Mutex<Option<Timestamp>>>,
}

impl<P> Clone for Queue<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            depth: self.depth.clone(),
            processed: self.processed.clone(),
            failed: self.failed.clone(),
            last_finished: self.last_finished.clone(),
        }
    }
}

impl<P> Queue<P> {
    fn new(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<Task<P>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                name,
                tx,
                depth: Arc::new(AtomicUsize::new(0)),
                processed: Arc::new(AtomicUsize::new(0)),
                failed: Arc::new(AtomicUsize::new(0)),
                last_finished: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    fn enqueue(&self, payload: P) -> Result<Id> {
        let task = Task::new(payload);
        let task_id = task.task_id;
        // Count before sending so a waiter never observes an empty depth
        // while a task is in the channel.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.try_send(task).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(MemoryError::QueueFull { queue: self.name });
        }
        Ok(task_id)
    }

    fn finish(&self, notify: &Notify, ok: bool) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if !ok {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        *self.last_finished.lock() = Some(now());
        self.depth.fetch_sub(1, Ordering::SeqCst);
        notify.notify_waiters();
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.depth(),
            processed: self.processed.load(Ordering::SeqCst) as u64,
            failed: self.failed.load(Ordering::SeqCst) as u64,
            last_finished: *self.last_finished.lock(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the three background queues and their workers.
pub(crate) struct Scheduler {
    digest: Queue<DigestJob>,
    graph: Queue<GraphJob>,
    compression: Queue<CompressionJob>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the three workers plus the heartbeat task.
    pub(crate) fn spawn(pipeline: Arc<Pipeline>) -> Self {
        Self::spawn_with_capacity(pipeline, QUEUE_CAPACITY)
    }

    pub(crate) fn spawn_with_capacity(pipeline: Arc<Pipeline>, capacity: usize) -> Self {
        let cancel = CancellationToken::new();
        let notify = Arc::new(Notify::new());

        let (digest, digest_rx) = Queue::new("digest", capacity);
        let (graph, graph_rx) = Queue::new("graph", capacity);
        let (compression, compression_rx) = Queue::new("compression", capacity);

        let mut workers = Vec::new();
        workers.push(tokio::spawn(digest_worker(
            pipeline.clone(),
            digest_rx,
            digest.clone(),
            graph.clone(),
            compression.clone(),
            notify.clone(),
            cancel.clone(),
        )));
        workers.push(tokio::spawn(graph_worker(
            pipeline.clone(),
            graph_rx,
            graph.clone(),
            notify.clone(),
            cancel.clone(),
        )));
        workers.push(tokio::spawn(compression_worker(
            pipeline,
            compression_rx,
            compression.clone(),
            notify.clone(),
            cancel.clone(),
        )));

        let scheduler = Self {
            digest,
            graph,
            compression,
            notify,
            cancel,
            workers,
        };
        scheduler.spawn_heartbeat();
        scheduler
    }

    fn spawn_heartbeat(&self) {
        let digest = self.digest.clone();
        let graph = self.graph.clone();
        let compression = self.compression.clone();
        let cancel = self.cancel.clone();
        // Telemetry only; never mutates state.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                        debug!(
                            digest_depth = digest.depth(),
                            graph_depth = graph.depth(),
                            compression_depth = compression.depth(),
                            "scheduler heartbeat"
                        );
                    }
                }
            }
        });
    }

    pub(crate) fn enqueue_digest(&self, turn_guid: Id) -> Result<Id> {
        self.digest.enqueue(DigestJob { turn_guid })
    }

    pub(crate) fn enqueue_graph(&self, turn_guid: Id) -> Result<Id> {
        self.graph.enqueue(GraphJob { turn_guid })
    }

    pub(crate) fn enqueue_compression(&self) -> Result<Id> {
        self.compression.enqueue(CompressionJob)
    }

    pub(crate) fn total_depth(&self) -> usize {
        self.digest.depth() + self.graph.depth() + self.compression.depth()
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            digest: self.digest.stats(),
            graph: self.graph.stats(),
            compression: self.compression.stats(),
        }
    }

    /// Resolve when every queue is empty and no worker holds a task.
    pub(crate) async fn wait_for_pending(&self) {
        loop {
            let notified = self.notify.notified();
            if self.total_depth() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop the workers. In-flight tasks complete; queued tasks are dropped.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "scheduler worker panicked during shutdown");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workers
// ─────────────────────────────────────────────────────────────────────────────

async fn digest_worker(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<Task<DigestJob>>,
    queue: Queue<DigestJob>,
    graph: Queue<GraphJob>,
    compression: Queue<CompressionJob>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let turn_guid = task.payload.turn_guid;
        let ok = match pipeline.run_digest(turn_guid).await {
            Ok(followup) => {
                if followup.graph
                    && let Err(e) = graph.enqueue(GraphJob { turn_guid })
                {
                    warn!(turn = %turn_guid, error = %e, "dropping graph followup");
                }
                if followup.compression
                    && let Err(e) = compression.enqueue(CompressionJob)
                {
                    warn!(error = %e, "dropping compression followup");
                }
                true
            }
            Err(e) => {
                error!(task = %task.task_id, turn = %turn_guid, error = %e, "digest task failed");
                false
            }
        };
        queue.finish(&notify, ok);
    }
}

async fn graph_worker(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<Task<GraphJob>>,
    queue: Queue<GraphJob>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let ok = match pipeline.run_graph(task.payload.turn_guid).await {
            Ok(()) => true,
            Err(e) => {
                error!(task = %task.task_id, turn = %task.payload.turn_guid, error = %e, "graph task failed");
                false
            }
        };
        queue.finish(&notify, ok);
    }
}

async fn compression_worker(
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<Task<CompressionJob>>,
    queue: Queue<CompressionJob>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let ok = match pipeline.run_compression().await {
            Ok(()) => true,
            Err(e) => {
                error!(task = %task.task_id, error = %e, "compression task failed");
                false
            }
        };
        queue.finish(&notify, ok);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
