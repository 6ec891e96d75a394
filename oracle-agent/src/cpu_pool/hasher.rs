//! CPU search loop.
//!
//! Runs in a dedicated `std::thread` to avoid blocking the Tokio runtime.
//! Implements duty cycling for CPU utilization control.
//!
//! A nonce solves a challenge when `sha256d(challenge_id || nonce_le)`, read
//! as a big-endian 256-bit integer, is divisible by the challenge difficulty.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, RecvTimeoutError, TryRecvError},
    Arc,
};
use std::time::{Duration, Instant};

use bitcoin::hashes::{sha256d, Hash, HashEngine};
use tokio::sync::mpsc as tokio_mpsc;

use crate::{
    tracing::prelude::*,
    types::{Challenge, Solution, Work},
    u256::U256,
};

/// Commands sent to a worker thread.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Search `work`, dropping whatever window was in progress.
    Replace { work: Work, generation: u64 },

    /// Shutdown the thread.
    Shutdown,
}

/// A solution tagged with the generation of the window it came from.
#[derive(Debug)]
pub struct Found {
    pub generation: u64,
    pub solution: Solution,
}

/// Whether `nonce` solves `challenge`.
pub fn check_nonce(challenge: &Challenge, nonce: u64) -> bool {
    let mut engine = sha256d::Hash::engine();
    engine.input(challenge.id.as_bytes());
    engine.input(&nonce.to_le_bytes());
    let digest = sha256d::Hash::from_engine(engine).to_byte_array();

    (U256::from_be_bytes(digest) % challenge.difficulty.max(1)).is_zero()
}

/// Window currently being searched.
struct ActiveWindow {
    work: Work,
    generation: u64,
    next: u64,
    end: u64,
}

impl ActiveWindow {
    fn new(work: Work, generation: u64) -> Self {
        let next = work.start;
        let end = work.start.saturating_add(work.size);
        Self {
            work,
            generation,
            next,
            end,
        }
    }
}

/// Run the CPU search loop.
///
/// Receives commands via `cmd_rx`, reports solutions on `solution_tx` and
/// adds every hash computed to `hashes`.
pub fn run_search_loop(
    thread_name: String,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    solution_tx: tokio_mpsc::UnboundedSender<Found>,
    duty_percent: u8,
    shutdown: Arc<AtomicBool>,
    hashes: Arc<AtomicU64>,
) {
    let cycle_ms = 1000u64;
    let work_ms = (cycle_ms as f64 * duty_percent as f64 / 100.0) as u64;

    let mut window: Option<ActiveWindow> = None;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        // Idle: block until there is something to do
        if window.is_none() {
            match cmd_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(WorkerCommand::Replace { work, generation }) => {
                    window = Some(ActiveWindow::new(work, generation));
                }
                Ok(WorkerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            continue;
        }

        let cycle_start = Instant::now();
        let mut cycle_hashes: u64 = 0;

        loop {
            if cycle_hashes % 10_000 == 0 {
                if cycle_start.elapsed() >= Duration::from_millis(work_ms) {
                    break;
                }
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
            }

            if cycle_hashes % 1_000 == 0 {
                match cmd_rx.try_recv() {
                    Ok(WorkerCommand::Replace { work, generation }) => {
                        trace!(thread = %thread_name, generation, "Window replaced");
                        window = Some(ActiveWindow::new(work, generation));
                    }
                    Ok(WorkerCommand::Shutdown) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => {}
                }
            }

            let Some(active) = window.as_mut() else {
                break;
            };

            if active.next >= active.end {
                debug!(
                    thread = %thread_name,
                    challenge = %active.work.challenge.id,
                    "Window exhausted"
                );
                window = None;
                break;
            }

            let nonce = active.next;
            active.next += 1;
            cycle_hashes += 1;

            if check_nonce(&active.work.challenge, nonce) {
                debug!(thread = %thread_name, nonce, "Solution found");
                let found = Found {
                    generation: active.generation,
                    solution: Solution {
                        work: active.work.clone(),
                        nonce,
                    },
                };
                if solution_tx.send(found).is_err() {
                    // Pool is gone
                    return;
                }
            }
        }

        hashes.fetch_add(cycle_hashes, Ordering::Relaxed);

        // Sleep for remainder of cycle (utilization control)
        let elapsed = cycle_start.elapsed().as_millis() as u64;
        let sleep_ms = cycle_ms.saturating_sub(elapsed);
        if sleep_ms > 0 && work_ms < cycle_ms {
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
    }
}
