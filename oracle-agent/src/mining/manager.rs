//! The mining orchestration loop.
//!
//! One task owns the worker pool's command and event channels. It waits on
//! three things at once, taking whichever is ready first:
//!
//! 1. the shutdown token: send [`PoolCommand::Stop`] through the same channel
//!    the pool already reads, then keep looping until the pool confirms;
//! 2. a pool event: [`PoolEvent::Solution`] goes to the solution sink,
//!    [`PoolEvent::Stopped`] ends the loop;
//! 3. the refresh interval: ask the challenge source for an update and, if
//!    there is one, push a fresh window.
//!
//! Shutdown is cooperative. The loop only exits once the pool has said it
//! stopped (or its event channel closed), so the pool's threads are never
//! left running behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChallengeSource, SolutionSink, WorkerPool};
use crate::config::MiningConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::types::{PoolCommand, PoolEvent, Solution, Work};

/// Capacity of the command channel into the pool.
const COMMAND_CAPACITY: usize = 4;

/// Capacity of the event channel out of the pool.
const EVENT_CAPACITY: usize = 64;

/// Shared view of whether the loop is still running.
#[derive(Debug, Clone, Default)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }
}

/// Supervises challenge refresh, the worker pool and solution submission.
pub struct MiningManager {
    refresh_interval: Duration,
    source: Box<dyn ChallengeSource>,
    sink: Arc<dyn SolutionSink>,
    pool: Box<dyn WorkerPool>,
    shutdown: CancellationToken,
    running: RunningFlag,
}

impl MiningManager {
    /// Create a manager. Fails only if the configuration is unusable.
    pub fn new(
        config: &MiningConfig,
        source: Box<dyn ChallengeSource>,
        sink: Arc<dyn SolutionSink>,
        pool: Box<dyn WorkerPool>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let refresh_interval = config.refresh_interval();
        if refresh_interval.is_zero() {
            return Err(Error::Config("mining refresh interval must be positive".into()));
        }

        Ok(Self {
            refresh_interval,
            source,
            sink,
            pool,
            shutdown,
            running: RunningFlag::default(),
        })
    }

    /// Handle for observing whether the loop is running.
    pub fn running(&self) -> RunningFlag {
        self.running.clone()
    }

    /// Start the loop as an independent task and return immediately.
    ///
    /// The pool is spawned alongside it; the returned handle completes once
    /// both have finished.
    pub fn start(self) -> JoinHandle<()> {
        let MiningManager {
            refresh_interval,
            source,
            sink,
            pool,
            shutdown,
            running,
        } = self;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        running.set(true);
        let mining_loop = MiningLoop {
            refresh_interval,
            source,
            sink,
            commands: command_tx,
            events: event_rx,
            shutdown,
            running,
            rng: StdRng::from_entropy(),
            stats: MiningStats::default(),
        };

        tokio::spawn(async move {
            let pool_handle = tokio::spawn(pool.mine(command_rx, event_tx));
            mining_loop.run().await;
            if let Err(e) = pool_handle.await {
                error!(error = %e, "Worker pool task failed");
            }
        })
    }
}

/// State owned by the running loop.
struct MiningLoop {
    refresh_interval: Duration,
    source: Box<dyn ChallengeSource>,
    sink: Arc<dyn SolutionSink>,
    commands: mpsc::Sender<PoolCommand>,
    events: mpsc::Receiver<PoolEvent>,
    shutdown: CancellationToken,
    running: RunningFlag,
    rng: StdRng,
    stats: MiningStats,
}

impl MiningLoop {
    async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the initial send_work stands in
        // for it.
        refresh.tick().await;

        debug!(
            refresh_ms = self.refresh_interval.as_millis() as u64,
            "Mining loop started"
        );
        self.send_work().await;

        let mut stopping = false;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled(), if !stopping => {
                    info!("Shutdown requested, stopping worker pool");
                    stopping = true;
                    if self.commands.send(PoolCommand::Stop).await.is_err() {
                        warn!("Worker pool already gone");
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(PoolEvent::Solution(solution)) => {
                            if stopping {
                                debug!(
                                    challenge = %solution.work.challenge.id,
                                    nonce = solution.nonce,
                                    "Dropping solution found during shutdown"
                                );
                                continue;
                            }
                            self.handle_solution(solution).await;
                        }
                        Some(PoolEvent::Stopped) => {
                            debug!("Worker pool stopped");
                            break;
                        }
                        None => {
                            warn!("Worker pool closed its event channel without stopping");
                            break;
                        }
                    }
                }

                _ = refresh.tick(), if !stopping => {
                    self.send_work().await;
                }
            }
        }

        self.running.set(false);
        self.stats.log_summary();
        debug!("Mining loop exited");
    }

    /// Push a new window if the challenge source has a new challenge.
    ///
    /// With no update nothing is sent and the pool keeps its current window.
    async fn send_work(&mut self) {
        let Some(challenge) = self.source.pull_update().await else {
            trace!("No new challenge");
            return;
        };

        let work = Work {
            challenge: Arc::new(challenge),
            start: self.rng.gen_range(0..=Work::MAX_SIZE),
            size: Work::MAX_SIZE,
        };

        info!(
            challenge = %work.challenge.id,
            difficulty = work.challenge.difficulty,
            start = work.start,
            "New challenge, dispatching work"
        );
        self.stats.challenges += 1;

        if self.commands.send(PoolCommand::Mine(work)).await.is_err() {
            error!("Failed to dispatch work: worker pool is gone");
        }
    }

    async fn handle_solution(&mut self, solution: Solution) {
        let challenge = &solution.work.challenge;
        info!(challenge = %challenge.id, nonce = solution.nonce, "Solution found");

        match self.sink.submit(challenge, solution.nonce).await {
            Ok(()) => self.stats.solutions_submitted += 1,
            Err(e) => {
                self.stats.submit_failures += 1;
                error!(
                    challenge = %challenge.id,
                    nonce = solution.nonce,
                    error = %e,
                    "Solution submission failed"
                );
            }
        }
    }
}

/// Counters logged when the loop exits.
struct MiningStats {
    start_time: Instant,
    challenges: u64,
    solutions_submitted: u64,
    submit_failures: u64,
}

impl Default for MiningStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            challenges: 0,
            solutions_submitted: 0,
            submit_failures: 0,
        }
    }
}

impl MiningStats {
    fn log_summary(&self) {
        info!(
            uptime_s = self.start_time.elapsed().as_secs(),
            challenges = self.challenges,
            submitted = self.solutions_submitted,
            failed = self.submit_failures,
            "Mining summary."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Challenge, ChallengeId};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const REFRESH: Duration = Duration::from_millis(100);

    fn challenge(byte: u8) -> Challenge {
        Challenge {
            id: ChallengeId([byte; 32]),
            difficulty: 1000,
            request_ids: vec![1, 2, 3, 4, 5],
        }
    }

    fn config() -> MiningConfig {
        MiningConfig {
            refresh_interval_ms: REFRESH.as_millis() as u64,
            ..MiningConfig::default()
        }
    }

    /// Returns scripted updates, then `None` forever.
    struct ScriptedSource {
        updates: VecDeque<Option<Challenge>>,
    }

    #[async_trait]
    impl ChallengeSource for ScriptedSource {
        async fn pull_update(&mut self) -> Option<Challenge> {
            self.updates.pop_front().flatten()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        submitted: Mutex<Vec<(ChallengeId, u64)>>,
    }

    #[async_trait]
    impl SolutionSink for RecordingSink {
        async fn submit(&self, challenge: &Challenge, nonce: u64) -> Result<()> {
            self.submitted.lock().unwrap().push((challenge.id, nonce));
            Ok(())
        }
    }

    /// Pool whose behaviour is driven by the test: commands are forwarded to
    /// the test, events come from the test.
    struct ChannelPool {
        commands_out: mpsc::UnboundedSender<PoolCommand>,
        events_in: mpsc::UnboundedReceiver<PoolEvent>,
    }

    #[async_trait]
    impl WorkerPool for ChannelPool {
        async fn mine(
            mut self: Box<Self>,
            mut commands: mpsc::Receiver<PoolCommand>,
            events: mpsc::Sender<PoolEvent>,
        ) {
            loop {
                tokio::select! {
                    Some(cmd) = commands.recv() => {
                        let _ = self.commands_out.send(cmd);
                    }
                    Some(event) = self.events_in.recv() => {
                        let stopped = matches!(event, PoolEvent::Stopped);
                        let _ = events.send(event).await;
                        if stopped {
                            return;
                        }
                    }
                    else => return,
                }
            }
        }
    }

    struct TestHarness {
        handle: JoinHandle<()>,
        running: RunningFlag,
        shutdown: CancellationToken,
        sink: Arc<RecordingSink>,
        commands: mpsc::UnboundedReceiver<PoolCommand>,
        events: mpsc::UnboundedSender<PoolEvent>,
    }

    impl TestHarness {
        fn start(updates: Vec<Option<Challenge>>) -> Self {
            let (commands_out, commands) = mpsc::unbounded_channel();
            let (events, events_in) = mpsc::unbounded_channel();
            let sink = Arc::new(RecordingSink::default());
            let shutdown = CancellationToken::new();

            let manager = MiningManager::new(
                &config(),
                Box::new(ScriptedSource {
                    updates: updates.into(),
                }),
                sink.clone(),
                Box::new(ChannelPool {
                    commands_out,
                    events_in,
                }),
                shutdown.clone(),
            )
            .unwrap();
            let running = manager.running();
            let handle = manager.start();

            Self {
                handle,
                running,
                shutdown,
                sink,
                commands,
                events,
            }
        }

        async fn next_work(&mut self) -> Work {
            match self.commands.recv().await {
                Some(PoolCommand::Mine(work)) => work,
                other => panic!("Expected Mine command, got {:?}", other),
            }
        }

        fn solution(work: &Work, nonce: u64) -> PoolEvent {
            PoolEvent::Solution(Solution {
                work: work.clone(),
                nonce,
            })
        }
    }

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let (commands_out, _commands) = mpsc::unbounded_channel();
        let (_events, events_in) = mpsc::unbounded_channel();
        let config = MiningConfig {
            refresh_interval_ms: 0,
            ..MiningConfig::default()
        };

        let result = MiningManager::new(
            &config,
            Box::new(ScriptedSource {
                updates: VecDeque::new(),
            }),
            Arc::new(RecordingSink::default()),
            Box::new(ChannelPool {
                commands_out,
                events_in,
            }),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_challenge_dispatched() {
        let mut harness = TestHarness::start(vec![Some(challenge(1))]);
        assert!(harness.running.is_running());

        let work = harness.next_work().await;
        assert_eq!(work.challenge.id, ChallengeId([1; 32]));
        assert_eq!(work.size, Work::MAX_SIZE);
        assert!(work.start <= Work::MAX_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_update_sends_no_work() {
        let mut harness = TestHarness::start(vec![Some(challenge(1)), None, None]);
        harness.next_work().await;

        // Two refresh cycles without an update
        tokio::time::sleep(REFRESH * 2 + REFRESH / 2).await;
        assert!(harness.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_update_gets_fresh_start_offset() {
        let mut harness = TestHarness::start(vec![
            Some(challenge(1)),
            Some(challenge(2)),
            None,
            Some(challenge(3)),
        ]);

        let first = harness.next_work().await;
        let second = harness.next_work().await;
        let third = harness.next_work().await;

        assert_eq!(second.challenge.id, ChallengeId([2; 32]));
        assert_eq!(third.challenge.id, ChallengeId([3; 32]));
        assert_ne!(first.start, second.start);
        assert_ne!(second.start, third.start);
        for work in [&first, &second, &third] {
            assert!(work.start.checked_add(work.size).is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_solution_submitted_once() {
        let mut harness = TestHarness::start(vec![Some(challenge(7))]);
        let work = harness.next_work().await;

        for nonce in [11, 22, 33] {
            harness
                .events
                .send(TestHarness::solution(&work, nonce))
                .unwrap();
        }

        // Let the loop drain the events
        tokio::time::sleep(Duration::from_millis(10)).await;

        let submitted = harness.sink.submitted.lock().unwrap().clone();
        assert_eq!(
            submitted,
            vec![
                (ChallengeId([7; 32]), 11),
                (ChallengeId([7; 32]), 22),
                (ChallengeId([7; 32]), 33),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_pool_and_drops_late_solutions() {
        let mut harness = TestHarness::start(vec![Some(challenge(9))]);
        let work = harness.next_work().await;

        harness.shutdown.cancel();
        assert!(matches!(
            harness.commands.recv().await,
            Some(PoolCommand::Stop)
        ));

        // Still running until the pool confirms
        assert!(harness.running.is_running());
        assert!(!harness.handle.is_finished());

        // A solution that races with shutdown is not submitted
        harness
            .events
            .send(TestHarness::solution(&work, 42))
            .unwrap();
        harness.events.send(PoolEvent::Stopped).unwrap();

        harness.handle.await.unwrap();
        assert!(!harness.running.is_running());
        assert!(harness.sink.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_refresh_after_shutdown() {
        let mut harness = TestHarness::start(vec![Some(challenge(1)), Some(challenge(2))]);
        harness.next_work().await;

        harness.shutdown.cancel();
        assert!(matches!(
            harness.commands.recv().await,
            Some(PoolCommand::Stop)
        ));

        tokio::time::sleep(REFRESH * 3).await;
        assert!(harness.commands.try_recv().is_err());

        harness.events.send(PoolEvent::Stopped).unwrap();
        harness.handle.await.unwrap();
    }
}
