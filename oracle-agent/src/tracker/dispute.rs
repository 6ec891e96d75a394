//! The dispute tracker: subscription loop, delayed commits and the
//! transactional append.
//!
//! # Subscription
//!
//! ```text
//! Unsubscribed -> Subscribing -> Active
//!                   ^   |          |
//!                   +---+          | stream error -> Erroring
//!                 open failed      | stream ended
//!                   ^              v
//!                   +--- retry tick ---+
//! ```
//!
//! One retry interval is shared by every attempt, with no backoff and no cap.
//! Cancelling the tracker's token moves it to `Stopped` from any state.
//!
//! # Delayed commits
//!
//! Every event gets an entry in the pending map and a task that sleeps for
//! the reorg window. A removal notice for the same transaction cancels the
//! entry. When the sleep ends, the task must claim its entry before writing;
//! claim and cancel both take the entry out of the map under its lock, so
//! only one of them can win.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ::time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::pending::{EntryId, PendingAppends};
use super::{
    EventSource, NonceSubmitted, Observation, ReferenceValues, StatsSnapshot,
    SubscriptionState, TrackerStats,
};
use crate::config::DisputeTrackerConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::tsdb::{Appender, Labels, SeriesRef, TimeSeriesStore, METRIC_NAME};

const ORACLE_VALUE: &str = "oracle_value";
const PSR_VALUE: &str = "psr_value";

/// Follows submissions on chain and records them once they are final.
pub struct DisputeTracker {
    retry_interval: Duration,
    events: Arc<dyn EventSource>,
    pipeline: Arc<Pipeline>,
    state: watch::Sender<SubscriptionState>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Cloneable view of a tracker, usable after [`DisputeTracker::run`] has
/// taken ownership of it.
#[derive(Clone)]
pub struct TrackerHandle {
    pending: Arc<PendingAppends>,
    stats: Arc<TrackerStats>,
    state: watch::Receiver<SubscriptionState>,
    shutdown: CancellationToken,
}

impl TrackerHandle {
    /// Ask the tracker to stop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Number of events still inside their reorg window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Everything a delayed-commit task needs.
struct Pipeline {
    contract: String,
    reorg_wait: Duration,
    store: Arc<dyn TimeSeriesStore>,
    reference: Arc<dyn ReferenceValues>,
    pending: Arc<PendingAppends>,
    stats: Arc<TrackerStats>,
}

impl DisputeTracker {
    /// Create a tracker whose lifetime is bound to `shutdown`.
    pub fn new(
        config: &DisputeTrackerConfig,
        events: Arc<dyn EventSource>,
        store: Arc<dyn TimeSeriesStore>,
        reference: Arc<dyn ReferenceValues>,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        if config.reorg_wait().is_zero() {
            return Err(Error::Config("reorg wait must be positive".into()));
        }
        if config.retry_interval().is_zero() {
            return Err(Error::Config("subscription retry interval must be positive".into()));
        }
        if config.contract.is_empty() {
            return Err(Error::Config("contract name must not be empty".into()));
        }

        let (state, _) = watch::channel(SubscriptionState::Unsubscribed);
        Ok(Self {
            retry_interval: config.retry_interval(),
            events,
            pipeline: Arc::new(Pipeline {
                contract: config.contract.clone(),
                reorg_wait: config.reorg_wait(),
                store,
                reference,
                pending: Arc::new(PendingAppends::default()),
                stats: Arc::new(TrackerStats::default()),
            }),
            state,
            shutdown: shutdown.child_token(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle {
            pending: Arc::clone(&self.pipeline.pending),
            stats: Arc::clone(&self.pipeline.stats),
            state: self.state.subscribe(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn pending_len(&self) -> usize {
        self.pipeline.pending.len()
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    fn set_state(&self, state: SubscriptionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Subscription state changed");
        }
    }

    /// Run until the tracker's token is cancelled.
    pub async fn run(self) {
        info!(
            contract = %self.pipeline.contract,
            reorg_wait = ?self.pipeline.reorg_wait,
            "Dispute tracker started"
        );

        let mut retry = time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.tick().await;

        'subscribe: loop {
            self.set_state(SubscriptionState::Subscribing);
            let opened = tokio::select! {
                _ = self.shutdown.cancelled() => break 'subscribe,
                opened = self.events.subscribe() => opened,
            };

            match opened {
                Ok(mut stream) => {
                    self.set_state(SubscriptionState::Active);
                    info!("Subscribed to NonceSubmitted events");

                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break 'subscribe,
                            item = stream.next() => match item {
                                Some(Ok(event)) => self.handle_event(event),
                                Some(Err(e)) => {
                                    self.set_state(SubscriptionState::Erroring);
                                    warn!(error = %e, "Subscription failed, resubscribing");
                                    break;
                                }
                                None => {
                                    warn!("Subscription ended, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe, retrying");
                }
            }

            if !self.wait_retry(&mut retry).await {
                break;
            }
        }

        self.set_state(SubscriptionState::Stopped);

        let dropped = self.pipeline.pending.clear();
        if dropped > 0 {
            info!(dropped, "Dropped appends still inside the reorg window");
        }
        self.tasks.close();
        self.tasks.wait().await;

        self.pipeline.stats.log_summary();
        info!("Dispute tracker stopped");
    }

    /// Wait one retry tick. Returns `false` if the tracker was stopped.
    async fn wait_retry(&self, retry: &mut Interval) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = retry.tick() => true,
        }
    }

    fn handle_event(&self, event: NonceSubmitted) {
        let pending = &self.pipeline.pending;
        self.pipeline.stats.event_seen();

        if event.removed {
            if pending.cancel(&event.tx_hash) {
                self.pipeline.stats.cancelled();
                info!(tx = %event.tx_hash, "Reorg removed a submission, append cancelled");
            } else {
                warn!(tx = %event.tx_hash, "Removal notice with no pending append");
            }
            return;
        }

        let token = self.shutdown.child_token();
        let registered = pending.insert(event.tx_hash.clone(), token.clone());
        if registered.replaced {
            self.pipeline.stats.cancelled();
            warn!(tx = %event.tx_hash, "Duplicate submission, replacing pending append");
        }
        debug!(
            tx = %event.tx_hash,
            values = event.observations.len(),
            "Append scheduled after reorg window"
        );

        let pipeline = Arc::clone(&self.pipeline);
        self.tasks.spawn(async move {
            pipeline.delayed_append(event, registered.id, token).await;
        });
    }
}

impl Pipeline {
    async fn delayed_append(&self, event: NonceSubmitted, id: EntryId, token: CancellationToken) {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(tx = %event.tx_hash, "Pending append cancelled");
                return;
            }
            _ = time::sleep(self.reorg_wait) => {}
        }

        if !self.pending.claim(&event.tx_hash, id) {
            debug!(tx = %event.tx_hash, "Pending append cancelled at the deadline");
            return;
        }

        self.append_values(&event).await;
    }

    /// Write every observation of `event` in one transaction.
    async fn append_values(&self, event: &NonceSubmitted) {
        let mut scope = AppendScope::new(self.store.appender());

        for observation in &event.observations {
            if let Err(e) = self.append_observation(&mut scope, observation).await {
                error!(
                    tx = %event.tx_hash,
                    id = observation.id,
                    error = %e,
                    "Append failed, rolling back"
                );
                if let Err(e) = scope.rollback() {
                    error!(tx = %event.tx_hash, error = %e, "Rollback failed");
                }
                self.stats.rolled_back();
                return;
            }
        }

        match scope.commit() {
            Ok(()) => {
                self.stats.committed();
                info!(
                    tx = %event.tx_hash,
                    values = event.observations.len(),
                    "Submission recorded"
                );
            }
            Err(e) => {
                // Not retried: the submission is lost to the store
                self.stats.commit_lost();
                error!(tx = %event.tx_hash, error = %e, "Commit failed");
            }
        }
    }

    async fn append_observation(
        &self,
        scope: &mut AppendScope,
        observation: &Observation,
    ) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let timestamp_ms = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        let id = observation.id.to_string();

        let oracle = Labels::new([
            (METRIC_NAME, ORACLE_VALUE),
            ("contract", self.contract.as_str()),
            ("id", id.as_str()),
            ("miner", observation.submitter.as_str()),
        ]);
        scope.append(&oracle, timestamp_ms, observation.value)?;

        // Reference as of the moment the submission became final
        let reference = self
            .reference
            .get_value(observation.id, now - self.reorg_wait)
            .await?;

        let psr = Labels::new([
            (METRIC_NAME, PSR_VALUE),
            ("contract", self.contract.as_str()),
            ("id", id.as_str()),
        ]);
        scope.append(&psr, timestamp_ms, reference)?;
        Ok(())
    }
}

/// Appender that is resolved exactly once.
///
/// Dropping it without calling [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) rolls it back.
struct AppendScope {
    appender: Option<Box<dyn Appender>>,
}

impl AppendScope {
    fn new(appender: Box<dyn Appender>) -> Self {
        Self {
            appender: Some(appender),
        }
    }

    fn append(&mut self, labels: &Labels, timestamp_ms: i64, value: f64) -> Result<SeriesRef> {
        match self.appender.as_mut() {
            Some(appender) => appender.append(labels, timestamp_ms, value),
            None => Err(Error::Store("append scope already resolved".into())),
        }
    }

    fn commit(mut self) -> Result<()> {
        match self.appender.take() {
            Some(appender) => appender.commit(),
            None => Err(Error::Store("append scope already resolved".into())),
        }
    }

    fn rollback(mut self) -> Result<()> {
        match self.appender.take() {
            Some(appender) => appender.rollback(),
            None => Ok(()),
        }
    }
}

impl Drop for AppendScope {
    fn drop(&mut self) {
        if let Some(appender) = self.appender.take() {
            if let Err(e) = appender.rollback() {
                error!(error = %e, "Rollback of abandoned append scope failed");
            }
        }
    }
}
