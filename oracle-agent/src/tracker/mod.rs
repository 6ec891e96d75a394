//! Reorg-safe ingestion of on-chain submissions.
//!
//! The [`DisputeTracker`] follows `NonceSubmitted` events from an
//! [`EventSource`]. Each event is held back for the configured reorg window;
//! if the chain does not take it back in that time, its values are written to
//! a [`TimeSeriesStore`](crate::tsdb::TimeSeriesStore) next to the reference
//! value from a [`ReferenceValues`] provider, all in one transaction.

pub mod dispute;
mod pending;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::BoxStream;
use time::OffsetDateTime;

use crate::error::Result;
use crate::tracing::prelude::*;

pub use dispute::{DisputeTracker, TrackerHandle};

/// Transaction hash identifying an event.
pub type EventKey = String;

/// One value reported in a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Data request id
    pub id: u64,
    pub value: f64,
    /// Address of the miner that reported it
    pub submitter: String,
}

/// A `NonceSubmitted` event as delivered by the chain client.
#[derive(Debug, Clone, PartialEq)]
pub struct NonceSubmitted {
    /// Set when a reorg removed the transaction this event came from
    pub removed: bool,
    pub tx_hash: EventKey,
    pub observations: Vec<Observation>,
}

/// Live event subscription. Ends or yields an error when the connection
/// drops.
pub type EventStream = BoxStream<'static, Result<NonceSubmitted>>;

/// Opens event subscriptions.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self) -> Result<EventStream>;
}

/// Provider of independently computed reference values.
#[async_trait]
pub trait ReferenceValues: Send + Sync {
    /// Reference value for request `id` as of `at`.
    async fn get_value(&self, id: u64, at: OffsetDateTime) -> Result<f64>;
}

/// Where the tracker's subscription stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Erroring,
    Stopped,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Erroring => "erroring",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Counters kept by the tracker.
#[derive(Debug, Default)]
pub struct TrackerStats {
    events_seen: AtomicU64,
    committed: AtomicU64,
    cancelled: AtomicU64,
    rolled_back: AtomicU64,
    commits_lost: AtomicU64,
}

/// Point-in-time copy of [`TrackerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_seen: u64,
    pub committed: u64,
    pub cancelled: u64,
    pub rolled_back: u64,
    pub commits_lost: u64,
}

impl TrackerStats {
    pub(crate) fn event_seen(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit_lost(&self) {
        self.commits_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            commits_lost: self.commits_lost.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            events = s.events_seen,
            committed = s.committed,
            cancelled = s.cancelled,
            rolled_back = s.rolled_back,
            commits_lost = s.commits_lost,
            "Dispute tracker summary"
        );
    }
}
