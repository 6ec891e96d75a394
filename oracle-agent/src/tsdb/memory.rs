//! In-memory [`TimeSeriesStore`].
//!
//! Keeps every series in a map keyed by its canonical labels. Appenders
//! buffer samples and publish them all at once on commit. Used for
//! development runs and by the dispute tracker's tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Appender, Labels, Sample, SeriesRef, TimeSeriesStore};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    refs: HashMap<Labels, SeriesRef>,
    series: HashMap<SeriesRef, Series>,
    next_ref: u64,
}

#[derive(Debug)]
struct Series {
    labels: Labels,
    points: Vec<(i64, f64)>,
}

impl Inner {
    fn get_or_create(&mut self, labels: &Labels) -> SeriesRef {
        if let Some(series_ref) = self.refs.get(labels) {
            return *series_ref;
        }
        self.next_ref += 1;
        let series_ref = SeriesRef(self.next_ref);
        self.refs.insert(labels.clone(), series_ref);
        self.series.insert(
            series_ref,
            Series {
                labels: labels.clone(),
                points: Vec::new(),
            },
        );
        series_ref
    }
}

/// Shared handle to an in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of series that hold at least one committed sample.
    pub fn series_count(&self) -> usize {
        self.lock()
            .series
            .values()
            .filter(|s| !s.points.is_empty())
            .count()
    }

    /// Total committed samples across all series.
    pub fn sample_count(&self) -> usize {
        self.lock().series.values().map(|s| s.points.len()).sum()
    }

    /// Committed points of the series identified by `labels`.
    pub fn points(&self, labels: &Labels) -> Vec<(i64, f64)> {
        let inner = self.lock();
        inner
            .refs
            .get(labels)
            .and_then(|r| inner.series.get(r))
            .map(|s| s.points.clone())
            .unwrap_or_default()
    }

    /// Committed samples whose `__name__` is `metric`, ordered by series
    /// then timestamp.
    pub fn select(&self, metric: &str) -> Vec<Sample> {
        let inner = self.lock();
        let mut matching: Vec<&Series> = inner
            .series
            .values()
            .filter(|s| s.labels.metric_name() == Some(metric))
            .collect();
        matching.sort_by(|a, b| a.labels.cmp(&b.labels));
        matching
            .into_iter()
            .flat_map(|s| {
                s.points.iter().map(|&(timestamp_ms, value)| Sample {
                    labels: s.labels.clone(),
                    timestamp_ms,
                    value,
                })
            })
            .collect()
    }
}

impl TimeSeriesStore for MemoryStore {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(MemoryAppender {
            store: self.clone(),
            staged: Vec::new(),
        })
    }
}

struct MemoryAppender {
    store: MemoryStore,
    staged: Vec<(SeriesRef, i64, f64)>,
}

impl Appender for MemoryAppender {
    fn append(&mut self, labels: &Labels, timestamp_ms: i64, value: f64) -> Result<SeriesRef> {
        if labels.metric_name().is_none_or(str::is_empty) {
            return Err(Error::Store(format!("series {labels} has no metric name")));
        }
        if value.is_nan() {
            return Err(Error::Store(format!("NaN sample for series {labels}")));
        }
        let series_ref = self.store.lock().get_or_create(labels);
        self.staged.push((series_ref, timestamp_ms, value));
        Ok(series_ref)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = self.store.lock();
        for (series_ref, timestamp_ms, value) in self.staged {
            let series = inner
                .series
                .get_mut(&series_ref)
                .ok_or_else(|| Error::Store(format!("unknown series ref {}", series_ref.0)))?;
            let at = series.points.partition_point(|&(ts, _)| ts <= timestamp_ms);
            series.points.insert(at, (timestamp_ms, value));
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
