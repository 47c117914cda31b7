//! Scope acquisition of position following-error.
//!
//! A capture always returns 200 words, whatever its configured duration; the
//! duration only changes the sample spacing. The drive sends no timestamps, so
//! samples are spread evenly between the host-side trigger and completion times.
//!
//! # Overlapping captures
//!
//! Reading the 405-byte sample frame takes at least 85 ms at 38400 baud. To
//! keep that latency out of the sampling period, call [`ScopeSession::trigger`]
//! again right after a successful [`ScopeSession::retrieve`], before spending
//! time on the batch. The drive then samples while the host is busy.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::catalog::{
    self, RegisterCatalog, POSITION_ERROR_LIMIT, PULSES_PER_REVOLUTION, SCOPE_SAMPLES,
};
use crate::channel::CommandChannel;
use crate::command::FunctionCode;
use crate::errors::{DriverError, Result};
use crate::timing::{CycleTiming, LapTimer};

/// Samples in every capture.
pub const SAMPLE_COUNT: usize = SCOPE_SAMPLES as usize;

/// Total length of the sample frame: prefix, two bytes per sample, CRC.
pub const SAMPLE_FRAME_LEN: usize = 3 + SAMPLE_COUNT * 2 + 2;

/// One duration tick.
pub const TICK: Duration = Duration::from_millis(10);

/// 200 ms captures, about 330 ms per cycle including readout.
pub const DEFAULT_DURATION_TICKS: u16 = 20;

/// Last status byte once a capture is complete.
const STATUS_READY: u8 = 0x02;

/// Convert a raw sample word to a signed count.
///
/// The drive encodes negatives as the bitwise complement of the magnitude, so
/// `0x8000` is -32767 and `0xFFFF` is 0. This is not two's complement.
pub fn decode_word(word: u16) -> i32 {
    if word & 0x8000 != 0 {
        -((word ^ 0xFFFF) as i32)
    } else {
        word as i32
    }
}

/// Decode big-endian sample words. A trailing odd byte is ignored.
pub fn decode_counts(payload: &[u8]) -> Vec<i32> {
    payload
        .chunks_exact(2)
        .map(|pair| decode_word(u16::from_be_bytes([pair[0], pair[1]])))
        .collect()
}

/// `n` evenly spaced points from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Mechanical scaling from encoder counts to millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub leadscrew_pitch_mm: f64,
    pub pulses_per_revolution: u16,
    /// Following-error limit in encoder pulses.
    pub following_error_limit: u16,
}

impl Default for Calibration {
    fn default() -> Self {
        // 4000 pulse encoder on a 5 mm pitch ballscrew
        Self {
            leadscrew_pitch_mm: 5.0,
            pulses_per_revolution: 4000,
            following_error_limit: 1000,
        }
    }
}

impl Calibration {
    /// Millimeters per encoder pulse.
    pub fn step_scale(&self) -> f64 {
        self.leadscrew_pitch_mm / self.pulses_per_revolution as f64
    }

    pub fn to_mm(&self, counts: i32) -> f64 {
        counts as f64 * self.step_scale()
    }

    pub fn following_error_limit_mm(&self) -> f64 {
        self.following_error_limit as f64 * self.step_scale()
    }

    /// Take pulses/revolution and the error limit from a parameter read.
    ///
    /// Missing entries keep their current value, as does a zero pulse count.
    pub fn update_from_parameters(&mut self, values: &HashMap<String, u16>) {
        if let Some(&ppr) = values.get(PULSES_PER_REVOLUTION) {
            if ppr > 0 {
                self.pulses_per_revolution = ppr;
            } else {
                warn!("Ignoring zero pulses / revolution");
            }
        }
        if let Some(&limit) = values.get(POSITION_ERROR_LIMIT) {
            self.following_error_limit = limit;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSample {
    /// Following error in millimeters.
    pub value: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeState {
    #[default]
    Idle,
    Triggered,
    Polling,
    Draining,
}

/// Result of one `retrieve()` call. Empty while the capture is still running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    pub samples: Vec<ScopeSample>,
    /// Trigger time, seconds since the Unix epoch.
    pub started: f64,
    /// Completion time, seconds since the Unix epoch.
    pub finished: f64,
    /// False when the sample frame failed its CRC; samples are kept.
    pub crc_ok: bool,
    pub timing: Option<CycleTiming>,
}

impl SampleBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }
}

/// Drives the configure → trigger → poll → drain cycle for one drive.
///
/// Nothing runs in the background: the caller paces `retrieve()` calls.
pub struct ScopeSession {
    channel: CommandChannel,
    calibration: Calibration,
    state: ScopeState,
    duration_ticks: u16,
    /// Set by `trigger()`, cleared by `configure()` and `abort()`.
    armed: bool,
    triggered_wall: Option<SystemTime>,
    triggered_at: Option<Instant>,
    capture_timer: LapTimer,
    readout_timer: LapTimer,
    cycle_timer: LapTimer,
}

impl ScopeSession {
    pub fn new(channel: CommandChannel, calibration: Calibration) -> Self {
        Self {
            channel,
            calibration,
            state: ScopeState::Idle,
            duration_ticks: DEFAULT_DURATION_TICKS,
            armed: false,
            triggered_wall: None,
            triggered_at: None,
            capture_timer: LapTimer::new(),
            readout_timer: LapTimer::new(),
            cycle_timer: LapTimer::new(),
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn duration_ticks(&self) -> u16 {
        self.duration_ticks
    }

    pub fn duration(&self) -> Duration {
        TICK * self.duration_ticks as u32
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }

    pub fn into_channel(self) -> CommandChannel {
        self.channel
    }

    /// Read drive parameters and update the calibration from them.
    pub fn calibrate(&mut self, catalog: &RegisterCatalog) -> Result<Calibration> {
        let values = self.channel.read_parameters(catalog)?;
        self.calibration.update_from_parameters(&values);
        info!(
            "Step scale {} mm/step, following-error limit {:.3} mm",
            self.calibration.step_scale(),
            self.calibration.following_error_limit_mm()
        );
        Ok(self.calibration)
    }

    /// Set the capture duration in 10 ms ticks and enable the scope.
    ///
    /// May be called before every cycle. A capture still in progress is
    /// abandoned and the session returns to `Idle`.
    pub fn configure(&mut self, duration_ticks: u16) -> Result<()> {
        self.abort();
        let steps = catalog::scope_setup(duration_ticks);
        let acked = self.channel.execute_batch(&steps)?;
        if acked.len() != steps.len() {
            warn!("Scope setup: {} of {} writes acknowledged", acked.len(), steps.len());
        }
        self.duration_ticks = duration_ticks;
        debug!("Scope configured for {:?} captures", self.duration());
        Ok(())
    }

    /// Forget any capture in progress. No bytes are sent.
    pub fn abort(&mut self) {
        if !matches!(self.state, ScopeState::Idle) {
            info!("Abandoning capture while {:?}", self.state);
        }
        self.state = ScopeState::Idle;
        self.armed = false;
        self.triggered_wall = None;
        self.triggered_at = None;
    }

    /// Start a capture.
    pub fn trigger(&mut self) -> Result<()> {
        if !matches!(self.state, ScopeState::Idle) {
            debug!("Restarting capture from {:?}", self.state);
        }
        let now = Instant::now();
        self.triggered_wall = Some(SystemTime::now());
        self.triggered_at = Some(now);
        self.capture_timer.start_at(now);

        if self.channel.execute(&catalog::scope_begin())?.is_none() {
            warn!("Scope begin was not acknowledged");
        }
        self.state = ScopeState::Triggered;
        self.armed = true;
        Ok(())
    }

    /// Poll the capture and, once complete, read and decode it.
    ///
    /// Returns an empty batch while the capture is running or when a response
    /// was lost. After a lost sample frame the next call starts a new capture
    /// and also returns an empty batch, so a caller that only re-triggers on
    /// success keeps going. Fails with `NotReady` only if nothing was ever
    /// triggered.
    pub fn retrieve(&mut self) -> Result<SampleBatch> {
        let (Some(started_wall), Some(started_at)) = (self.triggered_wall, self.triggered_at)
        else {
            if !self.armed {
                return Err(DriverError::NotReady("no capture triggered".into()));
            }
            warn!("No capture in progress, triggering a new one");
            self.trigger()?;
            return Ok(SampleBatch::empty());
        };
        self.state = ScopeState::Polling;

        let Some(status) = self.channel.execute(&catalog::scope_status())? else {
            warn!("Empty scope status response");
            return Ok(SampleBatch::empty());
        };
        if status.last_byte() != Some(STATUS_READY) {
            return Ok(SampleBatch::empty());
        }

        let finished_wall = SystemTime::now();
        let finished_at = Instant::now();
        let capture = finished_at.saturating_duration_since(started_at);
        self.capture_timer.lap_at(finished_at);
        self.state = ScopeState::Draining;

        self.channel.send(&catalog::scope_end(SCOPE_SAMPLES))?;
        self.readout_timer.start();
        let response = self
            .channel
            .read_response(FunctionCode::ReadRegisters, SAMPLE_FRAME_LEN);
        let readout = self.readout_timer.lap().unwrap_or_default();
        self.state = ScopeState::Idle;
        self.triggered_wall = None;
        self.triggered_at = None;

        let Some(response) = response? else {
            warn!("Scope sample frame lost");
            return Ok(SampleBatch::empty());
        };

        let counts = decode_counts(&response.payload);
        let started = unix_seconds(started_wall);
        let finished = unix_seconds(finished_wall);
        let samples = counts
            .iter()
            .zip(linspace(started, finished, counts.len()))
            .map(|(&c, timestamp)| ScopeSample {
                value: self.calibration.to_mm(c),
                timestamp,
            })
            .collect();

        let cycle = self.cycle_timer.lap();
        let timing = CycleTiming {
            capture,
            readout,
            cycle,
            capture_stats: self.capture_timer.summary(),
            readout_stats: self.readout_timer.summary(),
            cycle_stats: self.cycle_timer.summary(),
        };
        debug!(
            "Capture: {} samples, capture {:?}, readout {:?}",
            counts.len(),
            capture,
            readout
        );

        Ok(SampleBatch {
            samples,
            started,
            finished,
            crc_ok: response.crc_ok,
            timing: Some(timing),
        })
    }
}
