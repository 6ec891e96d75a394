//! oracle-agent: the runtime core of an oracle miner.
//!
//! Two engines run side by side under one [`daemon::Daemon`]:
//!
//! - [`mining`]: feeds proof-of-work windows to a worker pool
//!   ([`cpu_pool`]) and hands solutions to a submitter;
//! - [`tracker`]: follows on-chain submissions, waits out chain
//!   reorganizations and records the values in a time-series store
//!   ([`tsdb`]).

pub mod config;
pub mod cpu_pool;
pub mod daemon;
pub mod error;
pub mod mining;
pub mod tracing;
pub mod tracker;
pub mod tsdb;
pub mod types;
pub mod u256;
