//! Handle to one CPU search thread.
//!
//! Uses the actor pattern with a dedicated `std::thread` for hashing. The
//! handle owns the command channel and the shutdown flag; the pool owns the
//! handles.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc, Arc,
};

use tokio::sync::mpsc as tokio_mpsc;

use super::hasher::{self, Found, WorkerCommand};
use crate::{
    error::{Error, Result},
    types::Work,
};

/// One CPU search thread.
pub struct CpuWorker {
    /// Human-readable name for logging.
    name: String,

    /// Channel for sending commands to the search thread.
    command_tx: mpsc::Sender<WorkerCommand>,

    /// Shutdown flag shared with the search thread.
    shutdown: Arc<AtomicBool>,

    /// Hashes computed so far.
    hashes: Arc<AtomicU64>,

    handle: Option<std::thread::JoinHandle<()>>,
}

impl CpuWorker {
    /// Spawn a search thread running at `duty_percent` (1-100).
    pub fn spawn(
        name: String,
        duty_percent: u8,
        solution_tx: tokio_mpsc::UnboundedSender<Found>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let hashes = Arc::new(AtomicU64::new(0));

        let shutdown_clone = Arc::clone(&shutdown);
        let hashes_clone = Arc::clone(&hashes);
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("cpu-pool-{}", name))
            .spawn(move || {
                hasher::run_search_loop(
                    thread_name,
                    cmd_rx,
                    solution_tx,
                    duty_percent,
                    shutdown_clone,
                    hashes_clone,
                );
            })
            .map_err(|e| Error::Pool(format!("failed to spawn worker {name}: {e}")))?;

        Ok(Self {
            name,
            command_tx: cmd_tx,
            shutdown,
            hashes,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total hashes computed by this thread.
    pub fn hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    /// Replace the window being searched.
    pub fn replace_work(&self, work: Work, generation: u64) -> Result<()> {
        self.command_tx
            .send(WorkerCommand::Replace { work, generation })
            .map_err(|_| Error::Pool(format!("worker {} is gone", self.name)))
    }

    /// Signal the search thread to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
    }

    /// Shut down and wait for the thread to exit. Blocks.
    pub fn join(mut self) -> bool {
        self.shutdown();
        match self.handle.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for CpuWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
