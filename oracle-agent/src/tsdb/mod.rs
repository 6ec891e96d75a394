//! Time-series store interface.
//!
//! Writes go through an [`Appender`]: a transactional scope that buffers
//! samples until [`Appender::commit`] makes them visible, or
//! [`Appender::rollback`] discards them. Every appender must be resolved by
//! exactly one of the two.

pub mod labels;
pub mod memory;

use crate::error::Result;

pub use labels::{Label, Labels, METRIC_NAME};
pub use memory::MemoryStore;

/// Store-assigned identity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesRef(pub u64);

/// One data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Labels,
    pub timestamp_ms: i64,
    pub value: f64,
}

pub trait TimeSeriesStore: Send + Sync {
    /// Open a new write scope.
    fn appender(&self) -> Box<dyn Appender>;
}

pub trait Appender: Send {
    /// Stage a sample. Labels must already be canonical, which [`Labels`]
    /// guarantees.
    fn append(&mut self, labels: &Labels, timestamp_ms: i64, value: f64) -> Result<SeriesRef>;

    /// Make every staged sample visible.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every staged sample.
    fn rollback(self: Box<Self>) -> Result<()>;
}
