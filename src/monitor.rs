//! Round-robin acquisition across several drives.
//!
//! Each axis owns its own transport and session; they are polled one after
//! another from a single loop. Decoded batches are accumulated into a rolling
//! window and handed to a [`TraceSink`] (a plotter, a logger, ...).

use std::thread;
use std::time::Duration;

use log::debug;

use crate::errors::Result;
use crate::scope::{SampleBatch, ScopeSession};

/// Seconds of history kept per axis.
pub const DEFAULT_WINDOW_SECS: f64 = 5.0;

/// Delay between successive status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Samples dropped at a time when the window overflows.
const TRIM_CHUNK: usize = 100;

/// Rolling `(value, timestamp)` history for one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTrace {
    values: Vec<f64>,
    timestamps: Vec<f64>,
    window_secs: f64,
    lowest: Option<f64>,
    highest: Option<f64>,
}

impl AxisTrace {
    pub fn new(window_secs: f64) -> Self {
        Self {
            values: Vec::new(),
            timestamps: Vec::new(),
            window_secs,
            lowest: None,
            highest: None,
        }
    }

    /// Append a batch, then drop the oldest samples while the span exceeds the window.
    pub fn push(&mut self, batch: &SampleBatch) {
        for sample in &batch.samples {
            self.values.push(sample.value);
            self.timestamps.push(sample.timestamp);
            self.lowest = Some(self.lowest.map_or(sample.value, |v| v.min(sample.value)));
            self.highest = Some(self.highest.map_or(sample.value, |v| v.max(sample.value)));
        }

        while self.values.len() > 1 && self.span() > self.window_secs {
            let n = TRIM_CHUNK.min(self.values.len() - 1);
            self.values.drain(..n);
            self.timestamps.drain(..n);
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Timestamps relative to the oldest retained sample.
    pub fn relative_timestamps(&self) -> Vec<f64> {
        let origin = self.timestamps.first().copied().unwrap_or_default();
        self.timestamps.iter().map(|t| t - origin).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Seconds between the oldest and newest retained sample.
    pub fn span(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Smallest value ever pushed, including samples since trimmed.
    pub fn lowest_seen(&self) -> Option<f64> {
        self.lowest
    }

    /// Largest value ever pushed, including samples since trimmed.
    pub fn highest_seen(&self) -> Option<f64> {
        self.highest
    }
}

/// Consumer of fresh traces.
pub trait TraceSink {
    fn update(&mut self, axis: &str, trace: &AxisTrace, batch: &SampleBatch);
}

impl<F> TraceSink for F
where
    F: FnMut(&str, &AxisTrace, &SampleBatch),
{
    fn update(&mut self, axis: &str, trace: &AxisTrace, batch: &SampleBatch) {
        self(axis, trace, batch)
    }
}

/// One named drive with its session and history.
pub struct Axis {
    pub name: String,
    pub session: ScopeSession,
    pub trace: AxisTrace,
}

/// Polls several scope sessions in turn.
pub struct Monitor {
    axes: Vec<Axis>,
    poll_interval: Duration,
}

impl Monitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            axes: Vec::new(),
            poll_interval,
        }
    }

    pub fn add_axis(&mut self, name: impl Into<String>, session: ScopeSession, window_secs: f64) {
        self.axes.push(Axis {
            name: name.into(),
            session,
            trace: AxisTrace::new(window_secs),
        });
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Trigger the first capture on every axis.
    pub fn start(&mut self) -> Result<()> {
        for axis in &mut self.axes {
            axis.session.trigger()?;
            debug!("{}: first capture triggered", axis.name);
        }
        Ok(())
    }

    /// Poll every axis once. Returns how many batches were delivered.
    ///
    /// A completed axis is re-triggered before its batch is recorded or handed
    /// to `sink`, so the next capture runs while the host works.
    pub fn poll_once(&mut self, sink: &mut dyn TraceSink) -> Result<usize> {
        self.poll_pass(sink, None)
    }

    /// One pass over the axes, stopping early once `limit` batches were delivered.
    fn poll_pass(&mut self, sink: &mut dyn TraceSink, limit: Option<usize>) -> Result<usize> {
        let mut delivered = 0usize;
        for axis in &mut self.axes {
            if limit.is_some_and(|limit| delivered >= limit) {
                break;
            }
            thread::sleep(self.poll_interval);

            let batch = axis.session.retrieve()?;
            if batch.is_empty() {
                continue;
            }
            axis.session.trigger()?;

            axis.trace.push(&batch);
            sink.update(&axis.name, &axis.trace, &batch);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Poll until exactly `max_batches` batches were delivered, or forever when `None`.
    pub fn run(&mut self, sink: &mut dyn TraceSink, max_batches: Option<usize>) -> Result<usize> {
        self.start()?;
        let mut delivered = 0usize;
        while max_batches.map_or(true, |max| delivered < max) {
            let remaining = max_batches.map(|max| max - delivered);
            delivered += self.poll_pass(sink, remaining)?;
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeSample;

    fn batch(start: f64, end: f64, n: usize, value: f64) -> SampleBatch {
        let samples = crate::scope::linspace(start, end, n)
            .into_iter()
            .map(|timestamp| ScopeSample { value, timestamp })
            .collect();
        SampleBatch {
            samples,
            started: start,
            finished: end,
            crc_ok: true,
            timing: None,
        }
    }

    #[test]
    fn trace_keeps_only_the_window() {
        let mut trace = AxisTrace::new(1.0);
        for i in 0..10 {
            let t = i as f64 * 0.5;
            trace.push(&batch(t, t + 0.4, 200, i as f64));
        }
        assert!(trace.span() <= 1.0);
        assert!(!trace.is_empty());
        assert_eq!(trace.highest_seen(), Some(9.0));
        assert_eq!(trace.lowest_seen(), Some(0.0));
        // trimmed history no longer holds the first batches
        assert!(trace.min().unwrap() >= 7.0);
    }

    #[test]
    fn trace_statistics() {
        let mut trace = AxisTrace::new(DEFAULT_WINDOW_SECS);
        assert_eq!(trace.mean(), None);
        let mut b = batch(100.0, 101.0, 3, 0.0);
        b.samples[0].value = -1.0;
        b.samples[2].value = 4.0;
        trace.push(&b);
        assert_eq!(trace.min(), Some(-1.0));
        assert_eq!(trace.max(), Some(4.0));
        assert_eq!(trace.mean(), Some(1.0));
        assert_eq!(trace.relative_timestamps(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn single_sample_never_trims_to_empty() {
        let mut trace = AxisTrace::new(0.0);
        trace.push(&batch(0.0, 10.0, 2, 1.0));
        assert_eq!(trace.len(), 1);
    }
}
