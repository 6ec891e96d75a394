//! Daemon lifecycle management for oracle-agent.
//!
//! This module handles task startup, signal handling, and graceful shutdown.
//! Every component gets a child of the daemon's cancellation token and runs
//! on its task tracker, so one `cancel()` followed by `wait()` stops them all.
//!
//! The `oracle-agent` binary runs mining only. This crate has no chain
//! client, so the dispute tracker starts only when an embedder supplies its
//! event source, store and reference values through
//! [`Daemon::with_dispute_tracker`].

use std::future::Future;
use std::sync::Arc;

use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::tracing::prelude::*;
use crate::{
    config::Config,
    cpu_pool::CpuPool,
    mining::{
        dummy::{DummyChallengeSource, LogSolutionSink},
        MiningManager,
    },
    tracker::{DisputeTracker, EventSource, ReferenceValues},
    tsdb::TimeSeriesStore,
};

/// Chain-facing collaborators the dispute tracker needs.
#[derive(Clone)]
pub struct TrackerCollaborators {
    pub events: Arc<dyn EventSource>,
    pub store: Arc<dyn TimeSeriesStore>,
    pub reference: Arc<dyn ReferenceValues>,
}

/// The main daemon.
pub struct Daemon {
    config: Config,
    tracker_collaborators: Option<TrackerCollaborators>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tracker_collaborators: None,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Run the dispute tracker against these collaborators.
    pub fn with_dispute_tracker(mut self, collaborators: TrackerCollaborators) -> Self {
        self.tracker_collaborators = Some(collaborators);
        self
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        self.run_until(async move {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT.");
                },
                _ = sigterm.recv() => {
                    info!("Received SIGTERM.");
                },
            }
        })
        .await
    }

    /// Run the daemon until `stop` completes or the shutdown token is
    /// cancelled.
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> anyhow::Result<()> {
        if let Err(e) = self.start_components() {
            self.shutdown.cancel();
            self.tasks.close();
            self.tasks.wait().await;
            return Err(e);
        }
        self.tasks.close();

        info!("Started.");
        info!("For debugging, set RUST_LOG=oracle_agent=debug or trace.");

        tokio::select! {
            _ = stop => {}
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested.");
            }
        }

        // Initiate shutdown
        self.shutdown.cancel();

        // Wait for all tasks to complete
        self.tasks.wait().await;
        info!("Exiting.");

        Ok(())
    }

    fn start_components(&self) -> anyhow::Result<()> {
        let mining = &self.config.mining;
        if mining.enabled {
            info!(
                threads = mining.threads,
                duty = mining.duty_percent,
                "Mining enabled"
            );
            info!("Using dummy challenge source (no chain client configured)");

            let manager = MiningManager::new(
                mining,
                Box::new(DummyChallengeSource::new(
                    mining.dummy_challenge_interval(),
                    mining.dummy_difficulty,
                )),
                Arc::new(LogSolutionSink),
                Box::new(CpuPool::from_config(mining)),
                self.shutdown.child_token(),
            )?;
            let handle = manager.start();
            self.tasks.spawn(async move {
                if let Err(e) = handle.await {
                    error!("Mining manager task failed: {}", e);
                }
            });
        } else {
            info!("Mining disabled");
        }

        match &self.tracker_collaborators {
            Some(collaborators) => {
                let tracker = DisputeTracker::new(
                    &self.config.dispute_tracker,
                    Arc::clone(&collaborators.events),
                    Arc::clone(&collaborators.store),
                    Arc::clone(&collaborators.reference),
                    &self.shutdown,
                )?;
                self.tasks.spawn(tracker.run());
            }
            None => info!("Dispute tracker disabled (no chain client configured)"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use time::OffsetDateTime;

    use super::*;
    use crate::error::Result;
    use crate::tracker::EventStream;
    use crate::tsdb::MemoryStore;

    /// Subscription that never delivers anything.
    struct SilentEvents;

    #[async_trait]
    impl EventSource for SilentEvents {
        async fn subscribe(&self) -> Result<EventStream> {
            Ok(futures::stream::pending().boxed())
        }
    }

    struct ZeroReference;

    #[async_trait]
    impl ReferenceValues for ZeroReference {
        async fn get_value(&self, _id: u64, _at: OffsetDateTime) -> Result<f64> {
            Ok(0.0)
        }
    }

    fn collaborators() -> TrackerCollaborators {
        TrackerCollaborators {
            events: Arc::new(SilentEvents),
            store: Arc::new(MemoryStore::new()),
            reference: Arc::new(ZeroReference),
        }
    }

    #[tokio::test]
    async fn test_stops_when_token_cancelled() {
        let mut config = Config::default();
        config.mining.threads = 1;
        config.mining.duty_percent = 10;
        let daemon = Daemon::new(config).with_dispute_tracker(collaborators());
        let shutdown = daemon.shutdown_token();

        let run = tokio::spawn(daemon.run_until(std::future::pending()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("daemon did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stops_when_stop_future_completes() {
        let mut config = Config::default();
        config.mining.enabled = false;
        let daemon = Daemon::new(config);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            daemon.run_until(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("daemon did not stop");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_tracker_config_fails_startup() {
        let mut config = Config::default();
        config.mining.enabled = false;
        config.dispute_tracker.contract.clear();
        let daemon = Daemon::new(config).with_dispute_tracker(collaborators());

        let result = daemon.run_until(std::future::pending()).await;
        assert!(result.is_err());
    }
}
