use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use super::{
    protocol::{RenderRequest, RenderResponse, WorkerReply},
    registry::ListenerRegistry,
};
use crate::{
    core::error::RenderError,
    fractals::{mandelbrot::FrameRequest, row_renderer::render_seeded_row},
};

/// How requests are handed to the worker threads.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Each request goes to the next worker's own inbox in turn.
    #[default]
    RoundRobin,
    /// All workers consume from a single queue; an idle worker takes the next row.
    SharedQueue,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. `None` uses one per logical CPU.
    pub worker_count: Option<usize>,
    pub dispatch: DispatchPolicy,
    /// How long a worker may take on one request, measured from when it picks the request up.
    pub response_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            worker_count: None,
            dispatch: DispatchPolicy::default(),
            response_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.worker_count == Some(0) {
            return Err(RenderError::Configuration(
                "worker_count must be at least 1".to_owned(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(RenderError::Configuration(
                "response_timeout_ms must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// The job a worker thread runs for each request.
pub trait RowWorker: Send + Sync + 'static {
    /// RGBA bytes of the requested row, or a description of why it could not be rendered.
    fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String>;
}

/// Renders rows with the escape-time engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct MandelbrotRowWorker;

impl RowWorker for MandelbrotRowWorker {
    fn render_row(&self, request: &RenderRequest) -> Result<Vec<u8>, String> {
        Ok(render_seeded_row(&request.frame, request.row))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_owned()
    }
}

fn run_worker(
    index: usize,
    worker: Arc<dyn RowWorker>,
    inbox: Receiver<RenderRequest>,
    replies: Sender<WorkerReply>,
    registry: Arc<ListenerRegistry>,
) {
    for request in inbox.iter() {
        if !registry.begin(request.correlation_id) {
            log::trace!(
                "worker {} skipping abandoned request {} (row {})",
                index,
                request.correlation_id,
                request.row
            );
            continue;
        }
        log::trace!("worker {} rendering row {}", index, request.row);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.render_row(&request)));
        let reply = match outcome {
            Ok(Ok(row_bytes)) => WorkerReply::Rendered(RenderResponse {
                correlation_id: request.correlation_id,
                row: request.row,
                row_pixels: row_bytes,
            }),
            Ok(Err(message)) => WorkerReply::Failed {
                correlation_id: request.correlation_id,
                row: request.row,
                message,
            },
            Err(payload) => WorkerReply::Failed {
                correlation_id: request.correlation_id,
                row: request.row,
                message: panic_message(payload.as_ref()),
            },
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
    log::trace!("worker {} exiting", index);
}

fn run_router(replies: Receiver<WorkerReply>, registry: Arc<ListenerRegistry>) {
    for reply in replies.iter() {
        registry.deliver(reply);
    }
    registry.close();
}

/**
 * Fixed set of worker threads rendering rows on request.
 *
 * Every submission gets a fresh, strictly increasing correlation id and joins a
 * `ReplyBatch` to wait on. Workers send their replies to a single router
 * thread, which hands each reply to the listener registered under its id.
 * A worker skips any request whose listener is gone, so cancelled or abandoned
 * rows cost nothing. Dropping the pool closes the inboxes and joins all threads.
 */
pub struct WorkerPool {
    inboxes: Vec<Sender<RenderRequest>>,
    next_inbox: AtomicUsize,
    next_correlation_id: AtomicU64,
    next_group: AtomicU64,
    registry: Arc<ListenerRegistry>,
    response_timeout: Duration,
    dispatch: DispatchPolicy,
    worker_count: usize,
    workers: Vec<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new<W: RowWorker>(config: PoolConfig, worker: W) -> Result<WorkerPool, RenderError> {
        config.validate()?;
        let worker_count = config.resolved_worker_count();
        let worker: Arc<dyn RowWorker> = Arc::new(worker);
        let registry = Arc::new(ListenerRegistry::default());
        let (reply_sender, reply_receiver) = unbounded();

        let mut inboxes = Vec::new();
        let mut workers = Vec::with_capacity(worker_count);
        let shared_queue = match config.dispatch {
            DispatchPolicy::SharedQueue => {
                let (sender, receiver) = unbounded();
                inboxes.push(sender);
                Some(receiver)
            }
            DispatchPolicy::RoundRobin => None,
        };

        for index in 0..worker_count {
            let inbox = match &shared_queue {
                Some(receiver) => receiver.clone(),
                None => {
                    let (sender, receiver) = unbounded();
                    inboxes.push(sender);
                    receiver
                }
            };
            let worker = Arc::clone(&worker);
            let replies = reply_sender.clone();
            let worker_registry = Arc::clone(&registry);
            workers.push(
                thread::Builder::new()
                    .name(format!("row-worker-{}", index))
                    .spawn(move || run_worker(index, worker, inbox, replies, worker_registry))?,
            );
        }
        // Only the workers hold reply senders, so the router stops once they are gone.
        drop(reply_sender);

        let router_registry = Arc::clone(&registry);
        let router = thread::Builder::new()
            .name("reply-router".to_owned())
            .spawn(move || run_router(reply_receiver, router_registry))?;

        log::debug!(
            "started {} row workers ({:?} dispatch)",
            worker_count,
            config.dispatch
        );
        Ok(WorkerPool {
            inboxes,
            next_inbox: AtomicUsize::new(0),
            next_correlation_id: AtomicU64::new(0),
            next_group: AtomicU64::new(1),
            registry,
            response_timeout: config.response_timeout(),
            dispatch: config.dispatch,
            worker_count,
            workers,
            router: Some(router),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn dispatch(&self) -> DispatchPolicy {
        self.dispatch
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Starts an empty batch. Group ids are never zero.
    pub fn batch(&self) -> ReplyBatch {
        let (sender, receiver) = unbounded();
        ReplyBatch {
            registry: Arc::clone(&self.registry),
            group: self.next_group.fetch_add(1, Ordering::Relaxed),
            sender: Some(sender),
            receiver,
            outstanding: HashMap::new(),
            last_submit: Instant::now(),
            timeout: self.response_timeout,
        }
    }

    /// Queues `row` of `frame` as part of `batch` and returns its correlation id.
    pub fn submit_into(
        &self,
        batch: &mut ReplyBatch,
        frame: &Arc<FrameRequest>,
        row: u32,
    ) -> Result<u64, RenderError> {
        let sender = match &batch.sender {
            Some(sender) => sender.clone(),
            None => {
                return Err(RenderError::Configuration(
                    "cannot submit to a batch that is already being collected".to_owned(),
                ))
            }
        };
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        self.registry.register(correlation_id, batch.group, sender);
        batch.outstanding.insert(correlation_id, row);
        batch.last_submit = Instant::now();

        let inbox = match self.dispatch {
            DispatchPolicy::RoundRobin => {
                let index = self.next_inbox.fetch_add(1, Ordering::Relaxed) % self.inboxes.len();
                &self.inboxes[index]
            }
            DispatchPolicy::SharedQueue => &self.inboxes[0],
        };
        let request = RenderRequest {
            correlation_id,
            row,
            frame: Arc::clone(frame),
        };
        // On failure the batch still owns the id and deregisters it when dropped.
        inbox.send(request).map_err(|_| RenderError::PoolClosed)?;
        Ok(correlation_id)
    }

    /// Queues a single request and returns the handle its reply will arrive on.
    pub fn submit(
        &self,
        frame: &Arc<FrameRequest>,
        row: u32,
    ) -> Result<PendingResponse, RenderError> {
        let mut batch = self.batch();
        let correlation_id = self.submit_into(&mut batch, frame, row)?;
        Ok(PendingResponse {
            batch,
            correlation_id,
            row,
        })
    }

    /// Abandons every outstanding request of `group`. Workers skip the ones they
    /// have not started and the batch waiting on them observes `Superseded`.
    pub fn cancel(&self, group: u64) -> usize {
        let cancelled = self.registry.cancel_group(group);
        if cancelled > 0 {
            log::debug!("cancelled {} requests of batch {}", cancelled, group);
        }
        cancelled
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inboxes.clear();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("row worker thread panicked during shutdown");
            }
        }
        if let Some(router) = self.router.take() {
            if router.join().is_err() {
                log::warn!("reply router thread panicked during shutdown");
            }
        }
    }
}

/**
 * Collects the replies of a group of requests in arrival order.
 *
 * The response timeout of a request runs from the moment a worker picks it up,
 * so time spent queued behind healthy work does not count. A request that is
 * still queued only fails once the whole pool has gone a full timeout without
 * starting or finishing anything. Dropping the batch deregisters every
 * outstanding request; workers skip them and late replies are discarded.
 */
pub struct ReplyBatch {
    registry: Arc<ListenerRegistry>,
    group: u64,
    sender: Option<Sender<WorkerReply>>,
    receiver: Receiver<WorkerReply>,
    /// Correlation id to row of every request without a reply yet.
    outstanding: HashMap<u64, u32>,
    last_submit: Instant,
    timeout: Duration,
}

impl ReplyBatch {
    pub fn group(&self) -> u64 {
        self.group
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Earliest moment some outstanding request times out. The request is `None`
    /// when the deadline comes from a stall of the pool rather than a started row.
    fn deadline(&self) -> (Instant, Option<u64>) {
        let activity = self
            .registry
            .activity(|id| self.outstanding.contains_key(&id));
        let stalled = activity.last_activity.max(self.last_submit) + self.timeout;
        match activity.earliest_start {
            Some((id, start)) if activity.started == self.outstanding.len() => {
                (start + self.timeout, Some(id))
            }
            Some((id, start)) if start + self.timeout <= stalled => {
                (start + self.timeout, Some(id))
            }
            _ => (stalled, None),
        }
    }

    /// Lowest outstanding request no worker has picked up yet.
    fn first_queued(&self) -> Option<u64> {
        self.outstanding
            .keys()
            .filter(|&&id| !self.registry.is_started(id))
            .min()
            .copied()
    }

    fn timeout_error(&self, blamed: Option<u64>) -> RenderError {
        let correlation_id = blamed
            .or_else(|| self.first_queued())
            .or_else(|| self.outstanding.keys().min().copied())
            .unwrap_or_default();
        RenderError::WorkerTimeout {
            correlation_id,
            row: self.outstanding.get(&correlation_id).copied().unwrap_or_default(),
            timeout: self.timeout,
        }
    }

    /// Blocks until the next reply of the batch arrives. No more requests can be
    /// added once collection has started.
    pub fn next_reply(&mut self) -> Result<RenderResponse, RenderError> {
        assert!(!self.outstanding.is_empty(), "no outstanding requests");
        // Once only listeners hold senders, cancelling them wakes this receiver.
        self.sender = None;
        loop {
            let (deadline, _) = self.deadline();
            match self.receiver.recv_deadline(deadline) {
                Ok(reply) => {
                    if self.outstanding.remove(&reply.correlation_id()).is_none() {
                        continue;
                    }
                    return match reply {
                        WorkerReply::Rendered(response) => Ok(response),
                        WorkerReply::Failed {
                            correlation_id,
                            message,
                            ..
                        } => Err(RenderError::WorkerFailed {
                            correlation_id,
                            message,
                        }),
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Work may have started or finished while waiting.
                    let (deadline, blamed) = self.deadline();
                    if Instant::now() >= deadline {
                        return Err(self.timeout_error(blamed));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(if self.registry.is_closed() {
                        RenderError::PoolClosed
                    } else {
                        RenderError::Superseded
                    });
                }
            }
        }
    }
}

impl Drop for ReplyBatch {
    fn drop(&mut self) {
        for correlation_id in self.outstanding.keys() {
            self.registry.deregister(*correlation_id);
        }
    }
}

/// Handle to the single reply of one submitted request.
pub struct PendingResponse {
    batch: ReplyBatch,
    correlation_id: u64,
    row: u32,
}

impl PendingResponse {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    /// Blocks until the reply arrives or the request times out.
    pub fn wait(mut self) -> Result<RenderResponse, RenderError> {
        self.batch.next_reply()
    }
}
