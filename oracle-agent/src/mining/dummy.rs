//! Development collaborators for running the miner without a chain.
//!
//! [`DummyChallengeSource`] makes up a random challenge every few minutes and
//! [`LogSolutionSink`] only logs what it would have submitted. The daemon
//! uses them when no chain client is wired in, which is enough to exercise
//! the orchestration loop and the CPU pool end to end.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;

use super::{ChallengeSource, SolutionSink};
use crate::error::Result;
use crate::tracing::prelude::*;
use crate::types::{Challenge, ChallengeId};

/// Number of request ids carried by every made-up challenge.
const REQUEST_IDS_PER_CHALLENGE: u64 = 5;

/// Challenge source that rotates a synthetic challenge on a fixed interval.
pub struct DummyChallengeSource {
    rotate_every: Duration,
    difficulty: u64,
    last_rotation: Option<Instant>,
}

impl DummyChallengeSource {
    pub fn new(rotate_every: Duration, difficulty: u64) -> Self {
        Self {
            rotate_every,
            difficulty,
            last_rotation: None,
        }
    }

    fn make_challenge(&self) -> Challenge {
        let mut rng = rand::thread_rng();
        let first_id = rng.gen_range(1..=50);
        Challenge {
            id: ChallengeId(rng.gen()),
            difficulty: self.difficulty,
            request_ids: (first_id..first_id + REQUEST_IDS_PER_CHALLENGE).collect(),
        }
    }
}

#[async_trait]
impl ChallengeSource for DummyChallengeSource {
    async fn pull_update(&mut self) -> Option<Challenge> {
        let due = self
            .last_rotation
            .is_none_or(|at| at.elapsed() >= self.rotate_every);
        if !due {
            return None;
        }

        self.last_rotation = Some(Instant::now());
        let challenge = self.make_challenge();
        debug!(challenge = %challenge.id, "Made up a new challenge");
        Some(challenge)
    }
}

/// Solution sink that logs instead of submitting.
#[derive(Debug, Default)]
pub struct LogSolutionSink;

#[async_trait]
impl SolutionSink for LogSolutionSink {
    async fn submit(&self, challenge: &Challenge, nonce: u64) -> Result<()> {
        info!(
            challenge = %challenge.id,
            nonce,
            request_ids = ?challenge.request_ids,
            "Would submit solution (no chain client configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rotates_on_interval() {
        let mut source = DummyChallengeSource::new(Duration::from_secs(60), 500);

        let first = source.pull_update().await.expect("first pull yields a challenge");
        assert_eq!(first.difficulty, 500);
        assert_eq!(first.request_ids.len(), REQUEST_IDS_PER_CHALLENGE as usize);

        assert!(source.pull_update().await.is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        let second = source.pull_update().await.expect("rotated after interval");
        assert_ne!(first.id, second.id);
        assert!(source.pull_update().await.is_none());
    }
}
