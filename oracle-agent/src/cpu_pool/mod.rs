//! CPU worker pool.
//!
//! Runs the nonce search on dedicated OS threads, one per configured worker.
//! Each `Mine` command splits the window evenly across the workers and
//! replaces whatever they were searching. Solutions are tagged with the
//! generation of the window they came from so that anything still in flight
//! from an older window is dropped rather than reported.

mod hasher;
mod worker;

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    config::MiningConfig,
    mining::WorkerPool,
    tracing::prelude::*,
    types::{HashRate, PoolCommand, PoolEvent, Work},
};

pub use hasher::check_nonce;
use worker::CpuWorker;

/// How often the pool logs its hashrate.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// [`WorkerPool`] backed by CPU threads.
#[derive(Debug, Clone)]
pub struct CpuPool {
    threads: usize,
    duty_percent: u8,
}

impl CpuPool {
    pub fn new(threads: usize, duty_percent: u8) -> Self {
        Self {
            threads: threads.max(1),
            duty_percent: duty_percent.clamp(1, 100),
        }
    }

    pub fn from_config(config: &MiningConfig) -> Self {
        Self::new(config.threads, config.duty_percent)
    }

    fn spawn_workers(&self, solution_tx: &mpsc::UnboundedSender<hasher::Found>) -> Vec<CpuWorker> {
        let mut workers = Vec::with_capacity(self.threads);
        for i in 0..self.threads {
            match CpuWorker::spawn(i.to_string(), self.duty_percent, solution_tx.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => error!(error = %e, "Failed to start CPU worker"),
            }
        }
        workers
    }
}

/// Hand every worker its slice of `work`.
fn dispatch(workers: &[CpuWorker], work: &Work, generation: u64) {
    for (worker, slice) in workers.iter().zip(work.split(workers.len())) {
        if let Err(e) = worker.replace_work(slice, generation) {
            warn!(worker = worker.name(), error = %e, "Failed to hand out work");
        }
    }
}

#[async_trait]
impl WorkerPool for CpuPool {
    async fn mine(
        self: Box<Self>,
        mut commands: mpsc::Receiver<PoolCommand>,
        events: mpsc::Sender<PoolEvent>,
    ) {
        let (solution_tx, mut solution_rx) = mpsc::unbounded_channel();
        let workers = self.spawn_workers(&solution_tx);
        // Workers hold the only senders from here on
        drop(solution_tx);

        info!(
            workers = workers.len(),
            duty_percent = self.duty_percent,
            "CPU pool started"
        );

        let mut generation: u64 = 0;
        let mut status_interval = time::interval(STATUS_INTERVAL);
        status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        status_interval.tick().await;
        let mut last_status = (Instant::now(), 0u64);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(PoolCommand::Mine(work)) => {
                            generation += 1;
                            debug!(
                                challenge = %work.challenge.id,
                                start = work.start,
                                generation,
                                "New window"
                            );
                            dispatch(&workers, &work, generation);
                        }
                        Some(PoolCommand::Stop) | None => break,
                    }
                }

                Some(found) = solution_rx.recv() => {
                    if found.generation != generation {
                        trace!(nonce = found.solution.nonce, "Dropping solution for a replaced window");
                        continue;
                    }
                    if events.send(PoolEvent::Solution(found.solution)).await.is_err() {
                        debug!("Event receiver closed");
                        break;
                    }
                }

                _ = status_interval.tick() => {
                    let total: u64 = workers.iter().map(CpuWorker::hashes).sum();
                    let elapsed = last_status.0.elapsed().as_secs_f64();
                    if elapsed > 0.0 {
                        let rate = HashRate(((total - last_status.1) as f64 / elapsed) as u64);
                        info!(hashrate = %rate, "CPU pool status");
                    }
                    last_status = (Instant::now(), total);
                }
            }
        }

        // Joining blocks, keep it off the runtime threads
        let joined = tokio::task::spawn_blocking(move || {
            workers.into_iter().map(CpuWorker::join).filter(|ok| !ok).count()
        })
        .await;
        match joined {
            Ok(0) => debug!("All CPU workers joined"),
            Ok(panicked) => warn!(panicked, "Some CPU workers panicked"),
            Err(e) => error!(error = %e, "Failed to join CPU workers"),
        }

        let _ = events.send(PoolEvent::Stopped).await;
        info!("CPU pool stopped");
    }
}
