//! Lap timing for the acquisition loop.
//!
//! Each session owns its timers and hands out [`TimingSummary`] snapshots.

use std::fmt;
use std::time::{Duration, Instant};

/// Records the time between successive `lap()` calls.
#[derive(Debug, Clone, Default)]
pub struct LapTimer {
    previous: Option<Instant>,
    laps: Vec<Duration>,
}

impl LapTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the current lap without recording anything.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, at: Instant) {
        self.previous = Some(at);
    }

    /// Close the current lap. The first call on a fresh timer only starts it.
    pub fn lap(&mut self) -> Option<Duration> {
        self.lap_at(Instant::now())
    }

    pub fn lap_at(&mut self, at: Instant) -> Option<Duration> {
        let previous = self.previous.replace(at)?;
        let dt = at.saturating_duration_since(previous);
        self.laps.push(dt);
        Some(dt)
    }

    pub fn laps(&self) -> &[Duration] {
        &self.laps
    }

    pub fn clear(&mut self) {
        self.previous = None;
        self.laps.clear();
    }

    pub fn summary(&self) -> Option<TimingSummary> {
        let last = *self.laps.last()?;
        let min = *self.laps.iter().min()?;
        let max = *self.laps.iter().max()?;
        let total: Duration = self.laps.iter().sum();
        let avg = total / self.laps.len() as u32;
        Some(TimingSummary {
            last,
            min,
            avg,
            max,
            count: self.laps.len(),
        })
    }
}

/// last/min/avg/max over a timer's recorded laps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSummary {
    pub last: Duration,
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
    pub count: usize,
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        write!(
            f,
            "{:.2} {:.2} {:.2} {:.2}",
            ms(self.last),
            ms(self.min),
            ms(self.avg),
            ms(self.max)
        )
    }
}

/// Timing of one completed capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTiming {
    /// Trigger until the drive reported the capture complete.
    pub capture: Duration,
    /// Reading the sample frame.
    pub readout: Duration,
    /// Since the previous completed capture. `None` for the first.
    pub cycle: Option<Duration>,
    pub capture_stats: Option<TimingSummary>,
    pub readout_stats: Option<TimingSummary>,
    pub cycle_stats: Option<TimingSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lap_only_starts() {
        let mut t = LapTimer::new();
        let base = Instant::now();
        assert_eq!(t.lap_at(base), None);
        assert_eq!(t.lap_at(base + Duration::from_millis(10)), Some(Duration::from_millis(10)));
        assert_eq!(t.laps().len(), 1);
    }

    #[test]
    fn summary_reports_extremes() {
        let mut t = LapTimer::new();
        let base = Instant::now();
        t.start_at(base);
        for ms in [10u64, 40, 70] {
            t.lap_at(base + Duration::from_millis(ms));
        }
        // laps: 10, 30, 30
        let s = t.summary().unwrap();
        assert_eq!(s.last, Duration::from_millis(30));
        assert_eq!(s.min, Duration::from_millis(10));
        assert_eq!(s.max, Duration::from_millis(30));
        assert_eq!(s.count, 3);
        assert_eq!(s.to_string(), "30.00 10.00 23.33 30.00");
    }

    #[test]
    fn empty_timer_has_no_summary() {
        let mut t = LapTimer::new();
        assert!(t.summary().is_none());
        t.start();
        t.lap();
        t.clear();
        assert!(t.summary().is_none());
    }
}
