//! Core types for the mining side of the agent.
//!
//! A [`Challenge`] is what the oracle contract asks miners to solve. The
//! orchestration loop turns each new challenge into a [`Work`] window and
//! hands it to a worker pool through [`PoolCommand`]s; the pool answers with
//! [`PoolEvent`]s.

use std::fmt;
use std::sync::Arc;

/// Identifier of a proof-of-work challenge (the on-chain challenge hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChallengeId(pub [u8; 32]);

impl ChallengeId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChallengeId({})", self)
    }
}

/// A proof-of-work puzzle published by the oracle contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Challenge hash
    pub id: ChallengeId,

    /// A nonce solves the challenge when its hash is divisible by this value
    pub difficulty: u64,

    /// Data request ids the winning miners must report values for
    pub request_ids: Vec<u64>,
}

/// One bounded search assignment for the worker pool.
#[derive(Debug, Clone)]
pub struct Work {
    pub challenge: Arc<Challenge>,

    /// First nonce of the window
    pub start: u64,

    /// Number of nonces in the window; `start + size` never overflows
    pub size: u64,
}

impl Work {
    /// Largest window the orchestration loop hands out.
    pub const MAX_SIZE: u64 = i64::MAX as u64;

    /// Split the window into `parts` contiguous, non-overlapping slices.
    ///
    /// The last slice absorbs the remainder. Returns an empty vector when
    /// `parts` is zero.
    pub fn split(&self, parts: usize) -> Vec<Work> {
        if parts == 0 {
            return Vec::new();
        }
        let parts = parts as u64;
        let chunk = self.size / parts;
        (0..parts)
            .map(|i| {
                let start = self.start + i * chunk;
                let size = if i == parts - 1 {
                    self.size - i * chunk
                } else {
                    chunk
                };
                Work {
                    challenge: Arc::clone(&self.challenge),
                    start,
                    size,
                }
            })
            .collect()
    }
}

/// A nonce found by the pool for a given window.
#[derive(Debug, Clone)]
pub struct Solution {
    pub work: Work,
    pub nonce: u64,
}

/// Input to a worker pool.
#[derive(Debug, Clone)]
pub enum PoolCommand {
    /// Search this window, replacing any window in progress
    Mine(Work),

    /// Stop all workers; the pool answers with [`PoolEvent::Stopped`]
    Stop,
}

/// Output of a worker pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Solution(Solution),

    /// The pool has stopped; nothing follows this event
    Stopped,
}

/// Hashrate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HashRate(pub u64); // hashes per second

impl HashRate {
    #[cfg(test)]
    pub fn from_megahashes(mh: f64) -> Self {
        Self((mh * 1_000_000.0) as u64)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Format with an SI prefix, e.g. "4.20 MH/s".
    pub fn to_human_readable(&self) -> String {
        let hs = self.0 as f64;
        if hs >= 1e12 {
            format!("{:.2} TH/s", hs / 1e12)
        } else if hs >= 1e9 {
            format!("{:.2} GH/s", hs / 1e9)
        } else if hs >= 1e6 {
            format!("{:.2} MH/s", hs / 1e6)
        } else if hs >= 1e3 {
            format!("{:.2} KH/s", hs / 1e3)
        } else {
            format!("{} H/s", self.0)
        }
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn work(start: u64, size: u64) -> Work {
        Work {
            challenge: Arc::new(Challenge {
                id: ChallengeId([0xab; 32]),
                difficulty: 1,
                request_ids: vec![1],
            }),
            start,
            size,
        }
    }

    #[test_case(0, 100, 1)]
    #[test_case(0, 100, 3)]
    #[test_case(7, 10, 4)]
    #[test_case(1 << 40, Work::MAX_SIZE, 8)]
    fn test_split_covers_window(start: u64, size: u64, parts: usize) {
        let slices = work(start, size).split(parts);
        assert_eq!(slices.len(), parts);

        let mut next = start;
        for slice in &slices {
            assert_eq!(slice.start, next, "slices must be contiguous");
            next = slice.start + slice.size;
        }
        assert_eq!(next, start + size);
    }

    #[test]
    fn test_split_zero_parts() {
        assert!(work(0, 100).split(0).is_empty());
    }

    #[test]
    fn test_challenge_id_display() {
        let id = ChallengeId([0x0f; 32]);
        assert!(id.to_string().starts_with("0x0f0f"));
        assert_eq!(id.to_string().len(), 66);
    }

    #[test]
    fn test_hashrate_formatting() {
        assert_eq!(HashRate(500).to_human_readable(), "500 H/s");
        assert_eq!(HashRate::from_megahashes(4.2).to_human_readable(), "4.20 MH/s");
    }
}
