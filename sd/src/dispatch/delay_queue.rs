//! Timer-heap dispatch queue

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::{DispatchError, DispatchQueue};
use crate::scheduler::ScheduledRequest;

struct Delayed {
    ready_at: Instant,
    seq: u64,
    request: ScheduledRequest,
}

impl Eq for Delayed {}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior, FIFO among equal deadlines
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// In-process delay queue
///
/// Requests wait in a heap owned by a background task and are released on
/// the returned receiver once their delay has passed. The task drains and
/// exits after `close` or once every handle is dropped.
#[derive(Clone)]
pub struct DelayQueue {
    tx: mpsc::Sender<Delayed>,
    seq: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl DelayQueue {
    /// Start the timer task; `capacity` bounds requests in flight to it
    pub fn spawn(capacity: usize) -> (Self, mpsc::Receiver<ScheduledRequest>) {
        debug!(%capacity, "DelayQueue::spawn: called");
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (ready_tx, ready_rx) = mpsc::channel(capacity);
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(run(rx, ready_tx, shutdown.clone()));

        let queue = Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown,
        };
        (queue, ready_rx)
    }

    /// Stop accepting requests; those already queued are still released
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closing dispatch queue");
            self.shutdown.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

#[async_trait]
impl DispatchQueue for DelayQueue {
    async fn enqueue(&self, request: ScheduledRequest, delay: Duration) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let entry = Delayed {
            ready_at: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            request,
        };
        self.tx.try_send(entry).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Full,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

async fn run(mut rx: mpsc::Receiver<Delayed>, ready_tx: mpsc::Sender<ScheduledRequest>, shutdown: Arc<Notify>) {
    debug!("DelayQueue::run: started");
    let mut heap: BinaryHeap<Delayed> = BinaryHeap::new();
    let mut open = true;

    loop {
        let now = Instant::now();
        while let Some(next) = heap.peek() {
            if next.ready_at > now {
                break;
            }
            let Some(due) = heap.pop() else { break };
            debug!(request_id = %due.request.id, "DelayQueue::run: releasing");
            if ready_tx.send(due.request).await.is_err() {
                warn!(remaining = heap.len(), "Dispatch receiver dropped, abandoning delayed requests");
                return;
            }
        }

        let next_ready = heap.peek().map(|d| d.ready_at);

        if !open {
            match next_ready {
                Some(at) => {
                    sleep_until(at).await;
                    continue;
                }
                None => break,
            }
        }

        tokio::select! {
            msg = rx.recv() => match msg {
                Some(entry) => heap.push(entry),
                None => open = false,
            },
            _ = shutdown.notified() => {
                open = false;
                rx.close();
                while let Ok(entry) = rx.try_recv() {
                    heap.push(entry);
                }
            },
            _ = sleep_until(next_ready.unwrap_or(now)), if next_ready.is_some() => {}
        }
    }

    debug!("DelayQueue::run: drained");
}
