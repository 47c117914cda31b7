//! Settings file.
//!
//! ```toml
//! [serial]
//! baud_rate = 38400
//! timeout_ms = 1000
//!
//! [scope]
//! duration_ticks = 20
//! poll_interval_ms = 1
//! window_secs = 5.0
//!
//! [mechanics]
//! leadscrew_pitch_mm = 5.0
//!
//! [axes]
//! z-axis = "/dev/ttyUSB0"
//! ```
//!
//! Every key is optional.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DriverError, Result};
use crate::monitor::{DEFAULT_POLL_INTERVAL, DEFAULT_WINDOW_SECS};
use crate::scope::{Calibration, DEFAULT_DURATION_TICKS};
use crate::transport::{SerialSettings, BAUD_RATE, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SerialConfig {
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Capture duration in 10 ms ticks.
    pub duration_ticks: u16,
    pub poll_interval_ms: u64,
    pub window_secs: f64,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            duration_ticks: DEFAULT_DURATION_TICKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl ScopeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Starting calibration; pulses and limit are refreshed from the drive when
/// parameters are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MechanicsConfig {
    pub leadscrew_pitch_mm: f64,
    pub pulses_per_revolution: u16,
    pub following_error_limit: u16,
}

impl Default for MechanicsConfig {
    fn default() -> Self {
        let cal = Calibration::default();
        Self {
            leadscrew_pitch_mm: cal.leadscrew_pitch_mm,
            pulses_per_revolution: cal.pulses_per_revolution,
            following_error_limit: cal.following_error_limit,
        }
    }
}

impl MechanicsConfig {
    pub fn calibration(&self) -> Calibration {
        Calibration {
            leadscrew_pitch_mm: self.leadscrew_pitch_mm,
            pulses_per_revolution: self.pulses_per_revolution,
            following_error_limit: self.following_error_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialConfig,
    pub scope: ScopeConfig,
    pub mechanics: MechanicsConfig,
    /// Axis name to serial port path.
    pub axes: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut axes = BTreeMap::new();
        axes.insert("z-axis".to_string(), "/dev/ttyUSB0".to_string());
        Self {
            serial: SerialConfig::default(),
            scope: ScopeConfig::default(),
            mechanics: MechanicsConfig::default(),
            axes,
        }
    }
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| DriverError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.mechanics.pulses_per_revolution == 0 {
            return Err(DriverError::Config(
                "mechanics.pulses_per_revolution must be non-zero".into(),
            ));
        }
        if self.scope.window_secs <= 0.0 {
            return Err(DriverError::Config("scope.window_secs must be positive".into()));
        }
        Ok(())
    }
}
