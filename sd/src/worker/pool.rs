//! Bounded worker pool draining the dispatch queue

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use crate::downstream::{Downstream, DownstreamError};
use crate::scheduler::{JobKind, ScheduledRequest, Scheduler};

/// Outcome of one dispatched request
#[derive(Debug)]
pub struct CompletionReport {
    pub request_id: String,
    pub kind: JobKind,
    pub attempts: u32,
    pub outcome: Result<Value, DownstreamError>,
}

/// Runs released requests against the downstream, at most
/// `max_concurrent` at a time, and reports each completion back to the
/// scheduler whatever the outcome.
pub struct WorkerPool {
    scheduler: Arc<Scheduler>,
    downstream: Arc<dyn Downstream>,
    max_concurrent: usize,
    retry: RetryPolicy,
    reports: Option<mpsc::UnboundedSender<CompletionReport>>,
}

impl WorkerPool {
    pub fn new(scheduler: Arc<Scheduler>, downstream: Arc<dyn Downstream>, max_concurrent: usize) -> Self {
        Self {
            scheduler,
            downstream,
            max_concurrent: max_concurrent.max(1),
            retry: RetryPolicy::default(),
            reports: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Also publish every completion on `tx`
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<CompletionReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Consume `rx` until it closes, then wait for in-flight work
    pub fn spawn(self, rx: mpsc::Receiver<ScheduledRequest>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::Receiver<ScheduledRequest>) {
        info!(max_concurrent = self.max_concurrent, "Worker pool started");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        while let Some(request) = rx.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let scheduler = self.scheduler.clone();
            let downstream = self.downstream.clone();
            let retry = self.retry.clone();
            let reports = self.reports.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let report = process(request, downstream.as_ref(), &retry).await;
                record_completion(&scheduler, &report.request_id, &retry).await;
                if let Some(tx) = reports {
                    let _ = tx.send(report);
                }
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task failed");
                }
            }
        }

        debug!(in_flight = tasks.len(), "WorkerPool::run: queue closed, draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn process(request: ScheduledRequest, downstream: &dyn Downstream, retry: &RetryPolicy) -> CompletionReport {
    debug!(request_id = %request.id, kind = %request.kind, "process: called");
    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        let result = AssertUnwindSafe(downstream.call(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DownstreamError::Panicked(panic_message(panic.as_ref()))));
        match result {
            Ok(value) => break Ok(value),
            Err(e) if retry.should_retry(attempt, &e) => {
                let delay = retry.delay_for(attempt, &e);
                warn!(request_id = %request.id, attempt, ?delay, error = %e, "Downstream call failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    match &outcome {
        Ok(_) => info!(request_id = %request.id, attempts = attempt, "Request delivered"),
        Err(e) => error!(request_id = %request.id, attempts = attempt, error = %e, "Request failed"),
    }

    CompletionReport {
        request_id: request.id,
        kind: request.kind,
        attempts: attempt,
        outcome,
    }
}

/// Release the backlog slot, retrying while the store is unavailable
async fn record_completion(scheduler: &Scheduler, request_id: &str, retry: &RetryPolicy) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match scheduler.on_completed(request_id).await {
            Ok(_) => return,
            Err(e) if e.is_retryable() && attempt <= retry.max_retries => {
                let delay = retry.backoff(attempt);
                warn!(%request_id, attempt, ?delay, error = %e, "Failed to record completion, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    %request_id,
                    attempts = attempt,
                    error = %e,
                    "Failed to record completion, run a reset if the count drifts"
                );
                return;
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
