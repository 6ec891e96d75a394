//! Mining orchestration.
//!
//! The [`MiningManager`] bridges three collaborators into one supervised loop:
//!
//! - a [`ChallengeSource`], polled on a fixed interval for new challenges,
//! - a [`WorkerPool`], fed [`PoolCommand`]s and answering with [`PoolEvent`]s,
//! - a [`SolutionSink`], which submits found nonces on chain.
//!
//! # Worker pool contract
//!
//! A pool reads commands until it receives [`PoolCommand::Stop`], then emits
//! [`PoolEvent::Stopped`] and returns. A [`PoolCommand::Mine`] replaces the
//! window in progress: the pool never queues windows, and it stops reporting
//! solutions for the old window once the new one is accepted. Solutions
//! already in the output channel may still arrive; they are submitted like any
//! other (the challenge they carry is still a valid answer until the contract
//! moves on).

pub mod dummy;
pub mod manager;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{Challenge, PoolCommand, PoolEvent};

pub use manager::{MiningManager, RunningFlag};

/// Provider of proof-of-work challenges.
#[async_trait]
pub trait ChallengeSource: Send {
    /// Return the current challenge if it changed since the last call.
    ///
    /// `None` means "no change": the pool keeps searching its current window.
    async fn pull_update(&mut self) -> Option<Challenge>;
}

/// Submits solutions on chain.
#[async_trait]
pub trait SolutionSink: Send + Sync {
    /// Submit `nonce` as the answer to `challenge`.
    ///
    /// Retrying, gas pricing and the like are the sink's own business; the
    /// caller only logs a returned error.
    async fn submit(&self, challenge: &Challenge, nonce: u64) -> Result<()>;
}

/// A group of workers searching nonce windows.
#[async_trait]
pub trait WorkerPool: Send {
    /// Run the pool until [`PoolCommand::Stop`] is received or `commands`
    /// closes, then send [`PoolEvent::Stopped`].
    async fn mine(
        self: Box<Self>,
        commands: mpsc::Receiver<PoolCommand>,
        events: mpsc::Sender<PoolEvent>,
    );
}
