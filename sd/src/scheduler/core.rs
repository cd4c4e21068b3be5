//! Scheduler implementation

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::dispatch::DispatchQueue;
use crate::store::{StateStore, StateTransition};

use super::clock::{Clock, SystemClock};
use super::config::SchedulerConfig;
use super::error::SchedulerError;
use super::queue::{JobKind, QueueState, ScheduleReceipt, ScheduledRequest, SchedulerStats};

/// Compute the dispatch delay for a request arriving at `now`
///
/// `previous` is the backlog record as it was before this request. With no
/// record the request goes out immediately. With a backlog the delay grows
/// linearly with the pending count; with an idle backlog only the remainder
/// of the minimum spacing is waited out. The result is always rounded up to
/// whole milliseconds and never exceeds the distribution window.
pub fn plan_delay(config: &SchedulerConfig, previous: Option<&QueueState>, now: u64) -> u64 {
    let Some(state) = previous else {
        return 0;
    };

    let raw = if state.pending_requests > 0 {
        (state.pending_requests as f64 / config.target_rate) * 1000.0
    } else {
        let spacing = config.min_spacing_ms();
        let elapsed = now.saturating_sub(state.last_scheduled_time) as f64;
        (spacing - elapsed).max(0.0)
    };

    let window = config.distribution_window_ms as f64;
    raw.clamp(0.0, window).ceil() as u64
}

/// The Scheduler spaces requests out so the downstream sees a steady rate
///
/// Every decision goes through a single atomic update of the shared backlog
/// record, so several instances pointed at the same store agree on the
/// schedule.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn StateStore>,
    queue: Arc<dyn DispatchQueue>,
    clock: Arc<dyn Clock>,
    default_credential: Option<String>,
    stats: Mutex<SchedulerStats>,
}

impl Scheduler {
    /// Create a new scheduler, rejecting an unusable configuration
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn StateStore>,
        queue: Arc<dyn DispatchQueue>,
    ) -> Result<Self, SchedulerError> {
        debug!(?config, "Scheduler::new: called");
        config.validate()?;
        Ok(Self {
            config,
            store,
            queue,
            clock: Arc::new(SystemClock),
            default_credential: None,
            stats: Mutex::new(SchedulerStats::default()),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Credential used when a request carries none
    pub fn with_default_credential(mut self, credential: Option<String>) -> Self {
        self.default_credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Schedule a request and hand it to the dispatch queue
    pub async fn schedule(
        &self,
        kind: JobKind,
        data: Value,
        credential: Option<String>,
    ) -> Result<ScheduledRequest, SchedulerError> {
        let (request, _) = self.schedule_inner(kind, data, credential).await?;
        Ok(request)
    }

    /// Schedule a request and describe the outcome for the caller
    pub async fn submit(
        &self,
        kind: JobKind,
        data: Value,
        credential: Option<String>,
    ) -> Result<ScheduleReceipt, SchedulerError> {
        let (request, state) = self.schedule_inner(kind, data, credential).await?;
        Ok(ScheduleReceipt {
            message: "Request scheduled successfully".to_string(),
            request_id: request.id,
            queue: self.config.queue_name.clone(),
            scheduled_at: request.scheduled_at,
            delay_ms: request.delay,
            expected_execution_time: request.expected_execution_time,
            pending_requests: state.pending_requests,
        })
    }

    async fn schedule_inner(
        &self,
        kind: JobKind,
        data: Value,
        credential: Option<String>,
    ) -> Result<(ScheduledRequest, QueueState), SchedulerError> {
        debug!(%kind, "Scheduler::schedule: called");

        // Fail before touching the backlog
        let credential = match self.resolve_credential(credential) {
            Ok(credential) => credential,
            Err(e) => {
                self.stats.lock().await.total_rejected += 1;
                return Err(e);
            }
        };

        let now = self.clock.now_ms();
        let transition = match self
            .store
            .update(
                &self.config.state_key,
                Box::new(move |previous: Option<QueueState>| {
                    previous.unwrap_or(QueueState::new(now, 0)).scheduled(now)
                }),
            )
            .await
        {
            Ok(transition) => transition,
            Err(e) => {
                warn!(error = %e, "Scheduler::schedule: state update failed");
                self.stats.lock().await.total_rejected += 1;
                return Err(e.into());
            }
        };

        let delay = plan_delay(&self.config, transition.previous.as_ref(), now);
        let request = ScheduledRequest::new(kind, data, credential, now, delay);
        debug!(request_id = %request.id, delay, previous = ?transition.previous, "Scheduler::schedule: planned");

        if let Err(e) = self.queue.enqueue(request.clone(), request.delay_duration()).await {
            warn!(request_id = %request.id, error = %e, "Scheduler::schedule: enqueue failed, releasing backlog slot");
            self.release_slot(&request.id, transition).await;
            self.stats.lock().await.total_rejected += 1;
            return Err(e.into());
        }

        {
            let mut stats = self.stats.lock().await;
            stats.total_scheduled += 1;
            if delay > 0 {
                stats.total_throttled += 1;
            }
            stats.max_delay_ms = stats.max_delay_ms.max(delay);
        }

        info!(
            request_id = %request.id,
            %kind,
            delay_ms = delay,
            pending = transition.current.pending_requests,
            "Scheduled request"
        );
        Ok((request, transition.current))
    }

    /// Record that a dispatched request finished, successfully or not
    pub async fn on_completed(&self, request_id: &str) -> Result<QueueState, SchedulerError> {
        debug!(%request_id, "Scheduler::on_completed: called");
        let transition = self.decrement().await?;
        if transition.previous.map(|s| s.pending_requests).unwrap_or(0) == 0 {
            warn!(%request_id, "Completion with an empty backlog, count stays at zero");
        }
        self.stats.lock().await.total_completed += 1;
        debug!(%request_id, pending = transition.current.pending_requests, "Scheduler::on_completed: released");
        Ok(transition.current)
    }

    /// Current backlog record (defaults when absent)
    pub async fn queue_state(&self) -> Result<QueueState, SchedulerError> {
        debug!("Scheduler::queue_state: called");
        let state = self.store.get(&self.config.state_key).await?;
        Ok(state.unwrap_or_default())
    }

    /// Clear the backlog, e.g. after lost completions
    pub async fn reset(&self) -> Result<QueueState, SchedulerError> {
        let state = QueueState::new(self.clock.now_ms(), 0);
        info!(key = %self.config.state_key, "Resetting backlog");
        self.store.set(&self.config.state_key, state).await?;
        Ok(state)
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.lock().await.clone()
    }

    /// Delay a request arriving now would get, without scheduling it
    pub async fn preview_delay(&self) -> Result<u64, SchedulerError> {
        let previous = self.store.get(&self.config.state_key).await?;
        Ok(plan_delay(&self.config, previous.as_ref(), self.clock.now_ms()))
    }

    fn resolve_credential(&self, credential: Option<String>) -> Result<String, SchedulerError> {
        credential
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.default_credential.clone())
            .ok_or_else(|| {
                SchedulerError::Configuration("No API credential provided and no default configured".to_string())
            })
    }

    async fn decrement(&self) -> Result<StateTransition, SchedulerError> {
        let transition = self
            .store
            .update(
                &self.config.state_key,
                Box::new(|previous: Option<QueueState>| previous.unwrap_or_default().completed()),
            )
            .await?;
        Ok(transition)
    }

    /// Undo the increment of a request that never reached the queue
    ///
    /// If nobody wrote the record since, the previous record is restored
    /// whole, timestamp included. Otherwise only the count is released.
    async fn release_slot(&self, request_id: &str, transition: StateTransition) {
        let StateTransition { previous, current: written } = transition;
        let result = self
            .store
            .update(
                &self.config.state_key,
                Box::new(move |latest: Option<QueueState>| match latest {
                    Some(state) if state == written => previous.unwrap_or_default(),
                    other => other.unwrap_or_default().completed(),
                }),
            )
            .await;
        if let Err(e) = result {
            error!(
                %request_id,
                error = %e,
                "Failed to release backlog slot, run a reset if the count drifts"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DiscardQueue;
    use crate::dispatch::mock::RecordingQueue;
    use crate::scheduler::clock::ManualClock;
    use crate::store::MemoryStateStore;
    use crate::store::mock::FailingStore;
    use proptest::prelude::*;
    use serde_json::json;

    const T0: u64 = 1_700_000_000_000;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    struct Harness {
        scheduler: Scheduler,
        store: Arc<MemoryStateStore>,
        queue: Arc<RecordingQueue>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(RecordingQueue::new());
        let clock = Arc::new(ManualClock::new(T0));
        let scheduler = Scheduler::new(config(), store.clone(), queue.clone())
            .unwrap()
            .with_clock(clock.clone())
            .with_default_credential(Some("default-key".to_string()));
        Harness {
            scheduler,
            store,
            queue,
            clock,
        }
    }

    #[test]
    fn test_plan_delay_absent_state_is_immediate() {
        assert_eq!(plan_delay(&config(), None, T0), 0);
    }

    #[test]
    fn test_plan_delay_backlog() {
        let state = QueueState::new(T0, 10);
        assert_eq!(plan_delay(&config(), Some(&state), T0), 5_000);
    }

    #[test]
    fn test_plan_delay_backlog_is_capped_by_window() {
        let state = QueueState::new(T0, 1_000);
        assert_eq!(plan_delay(&config(), Some(&state), T0), 60_000);
    }

    #[test]
    fn test_plan_delay_idle_waits_out_spacing() {
        let state = QueueState::new(T0, 0);
        assert_eq!(plan_delay(&config(), Some(&state), T0 + 100), 400);
        assert_eq!(plan_delay(&config(), Some(&state), T0 + 500), 0);
        assert_eq!(plan_delay(&config(), Some(&state), T0 + 10_000), 0);
    }

    #[test]
    fn test_plan_delay_clock_skew_saturates() {
        // Record written by a host whose clock runs ahead
        let state = QueueState::new(T0 + 5_000, 0);
        assert_eq!(plan_delay(&config(), Some(&state), T0), 500);
    }

    #[test]
    fn test_plan_delay_rounds_up() {
        let config = SchedulerConfig {
            target_rate: 3.0,
            ..Default::default()
        };
        let state = QueueState::new(T0, 0);
        // 333.33.. - 100 = 233.33..
        assert_eq!(plan_delay(&config, Some(&state), T0 + 100), 234);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let bad = SchedulerConfig {
            target_rate: 0.0,
            ..Default::default()
        };
        let result = Scheduler::new(bad, Arc::new(MemoryStateStore::new()), Arc::new(DiscardQueue));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_first_request_goes_out_immediately() {
        let h = harness();
        let request = h.scheduler.schedule(JobKind::Http, json!({"a": 1}), None).await.unwrap();

        assert_eq!(request.delay, 0);
        assert_eq!(request.credential, "default-key");
        assert_eq!(h.scheduler.queue_state().await.unwrap(), QueueState::new(T0, 1));
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_burst_is_spread_out() {
        let h = harness();
        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(h.scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap().delay);
        }
        assert_eq!(delays, vec![0, 500, 1_000, 1_500, 2_000]);
        assert_eq!(h.scheduler.queue_state().await.unwrap().pending_requests, 5);
    }

    #[tokio::test]
    async fn test_spacing_after_completion() {
        let h = harness();
        let first = h.scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap();
        h.scheduler.on_completed(&first.id).await.unwrap();

        h.clock.advance(100);
        let second = h.scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap();
        assert_eq!(second.delay, 400);
    }

    #[tokio::test]
    async fn test_backlog_of_ten_gives_five_seconds() {
        let h = harness();
        h.store.set("api_queue_state", QueueState::new(T0, 10)).await.unwrap();

        let receipt = h.scheduler.submit(JobKind::Http, json!({}), Some("k".to_string())).await.unwrap();
        assert_eq!(receipt.delay_ms, 5_000);
        assert_eq!(receipt.pending_requests, 11);
        assert_eq!(receipt.queue, "api-rate-limited-queue");
        assert_eq!(receipt.expected_execution_time.timestamp_millis() as u64, T0 + 5_000);
    }

    #[tokio::test]
    async fn test_explicit_credential_wins() {
        let h = harness();
        let request = h
            .scheduler
            .schedule(JobKind::Http, json!({}), Some("caller-key".to_string()))
            .await
            .unwrap();
        assert_eq!(request.credential, "caller-key");
    }

    #[tokio::test]
    async fn test_missing_credential_leaves_state_untouched() {
        let store = Arc::new(MemoryStateStore::new());
        let scheduler = Scheduler::new(config(), store.clone(), Arc::new(DiscardQueue)).unwrap();

        let result = scheduler.schedule(JobKind::Http, json!({}), Some("  ".to_string())).await;
        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
        assert_eq!(store.get("api_queue_state").await.unwrap(), None);
        assert_eq!(scheduler.stats().await.total_rejected, 1);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let scheduler = Scheduler::new(config(), Arc::new(FailingStore), Arc::new(DiscardQueue))
            .unwrap()
            .with_default_credential(Some("k".to_string()));

        let result = scheduler.schedule(JobKind::Http, json!({}), None).await;
        assert!(matches!(result, Err(SchedulerError::StateStore(_))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_enqueue_failure_releases_slot() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = Arc::new(RecordingQueue::rejecting());
        let scheduler = Scheduler::new(config(), store.clone(), queue)
            .unwrap()
            .with_default_credential(Some("k".to_string()));

        let result = scheduler.schedule(JobKind::Http, json!({}), None).await;
        assert!(matches!(result, Err(SchedulerError::Dispatch(_))));
        assert_eq!(scheduler.queue_state().await.unwrap().pending_requests, 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_restores_previous_record() {
        let store = Arc::new(MemoryStateStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        store.set("api_queue_state", QueueState::new(T0 - 10_000, 0)).await.unwrap();

        let rejecting = Scheduler::new(config(), store.clone(), Arc::new(RecordingQueue::rejecting()))
            .unwrap()
            .with_clock(clock.clone())
            .with_default_credential(Some("k".to_string()));
        assert!(rejecting.schedule(JobKind::Http, json!({}), None).await.is_err());
        assert_eq!(
            store.get("api_queue_state").await.unwrap(),
            Some(QueueState::new(T0 - 10_000, 0))
        );

        // The rejected request does not throttle the next one
        clock.advance(100);
        let accepting = Scheduler::new(config(), store.clone(), Arc::new(RecordingQueue::new()))
            .unwrap()
            .with_clock(clock.clone())
            .with_default_credential(Some("k".to_string()));
        let request = accepting.schedule(JobKind::Http, json!({}), None).await.unwrap();
        assert_eq!(request.delay, 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_on_absent_record_is_not_throttling() {
        let h = harness();
        let rejecting = Scheduler::new(config(), h.store.clone(), Arc::new(RecordingQueue::rejecting()))
            .unwrap()
            .with_clock(h.clock.clone())
            .with_default_credential(Some("k".to_string()));
        assert!(rejecting.schedule(JobKind::Http, json!({}), None).await.is_err());

        h.clock.advance(100);
        let request = h.scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap();
        assert_eq!(request.delay, 0);
    }

    #[tokio::test]
    async fn test_completion_floors_at_zero() {
        let h = harness();
        let state = h.scheduler.on_completed("req_unknown").await.unwrap();
        assert_eq!(state.pending_requests, 0);
        let state = h.scheduler.on_completed("req_unknown").await.unwrap();
        assert_eq!(state.pending_requests, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_backlog() {
        let h = harness();
        h.store.set("api_queue_state", QueueState::new(T0, 42)).await.unwrap();
        h.clock.advance(1_000);

        let state = h.scheduler.reset().await.unwrap();
        assert_eq!(state, QueueState::new(T0 + 1_000, 0));
        assert_eq!(h.scheduler.preview_delay().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_stats_track_throttling() {
        let h = harness();
        for _ in 0..3 {
            h.scheduler.schedule(JobKind::Email, json!({}), None).await.unwrap();
        }
        let stats = h.scheduler.stats().await;
        assert_eq!(stats.total_scheduled, 3);
        assert_eq!(stats.total_throttled, 2);
        assert_eq!(stats.max_delay_ms, 1_000);
    }

    #[tokio::test]
    async fn test_concurrent_schedules_are_serialized() {
        let h = harness();
        let scheduler = Arc::new(h.scheduler);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap().delay
            }));
        }

        let mut delays = Vec::new();
        for handle in handles {
            delays.push(handle.await.unwrap());
        }
        delays.sort_unstable();

        let expected: Vec<u64> = (0..20).map(|i| i * 500).collect();
        assert_eq!(delays, expected);
        assert_eq!(scheduler.queue_state().await.unwrap().pending_requests, 20);
    }

    proptest! {
        #[test]
        fn prop_delay_stays_within_window(
            pending in 0u64..1_000_000,
            last in 0u64..2_000_000_000_000,
            now in 0u64..2_000_000_000_000,
            rate in 0.01f64..1_000.0,
            window in 1u64..600_000,
        ) {
            let config = SchedulerConfig {
                target_rate: rate,
                distribution_window_ms: window,
                ..Default::default()
            };
            let delay = plan_delay(&config, Some(&QueueState::new(last, pending)), now);
            prop_assert!(delay <= window);
        }

        #[test]
        fn prop_backlog_delay_is_monotonic(pending in 0u64..100_000, now in 0u64..1_000_000) {
            let config = config();
            let lower = plan_delay(&config, Some(&QueueState::new(now, pending)), now);
            let higher = plan_delay(&config, Some(&QueueState::new(now, pending + 1)), now);
            prop_assert!(higher >= lower);
        }

        #[test]
        fn prop_pending_matches_outstanding(ops in proptest::collection::vec(any::<bool>(), 0..60)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let h = harness();
                let mut outstanding: Vec<String> = Vec::new();
                for schedule in ops {
                    if schedule {
                        let request = h.scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap();
                        outstanding.push(request.id);
                    } else if let Some(id) = outstanding.pop() {
                        h.scheduler.on_completed(&id).await.unwrap();
                    }
                    h.clock.advance(10);
                }
                let state = h.scheduler.queue_state().await.unwrap();
                assert_eq!(state.pending_requests, outstanding.len() as u64);
            });
        }

        #[test]
        fn prop_last_scheduled_time_never_decreases(steps in proptest::collection::vec(0u64..5_000, 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let h = harness();
                let mut last_seen = 0;
                for step in steps {
                    // Jitter the clock both ways
                    if step % 3 == 0 {
                        h.clock.set(h.clock.now_ms().saturating_sub(step));
                    } else {
                        h.clock.advance(step);
                    }
                    h.scheduler.schedule(JobKind::Http, json!({}), None).await.unwrap();
                    let state = h.scheduler.queue_state().await.unwrap();
                    assert!(state.last_scheduled_time >= last_seen);
                    last_seen = state.last_scheduled_time;
                }
            });
        }
    }
}
