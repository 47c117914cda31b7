//! Driver for Leadshine EasyServo drives over their RS-232 tuning port.
//!
//! The drive speaks a Modbus-RTU dialect: 8-byte requests with a CRC16, and
//! responses whose byte-count field cannot be trusted. This crate provides the
//! frame codec, a blocking request/response channel, and a scope session that
//! captures position following-error in 200-sample buffers.
//!
//! # Timing
//!
//! The drive does not timestamp samples. Each capture is stamped with the host
//! wall-clock time at trigger and at completion, and the 200 samples are spread
//! evenly between the two. Re-trigger immediately after each successful
//! retrieve so the ~85-130 ms readout overlaps the next capture.
//!
//! # Example
//! ```ignore
//! let settings = SerialSettings::default();
//! let mut channel = CommandChannel::open("/dev/ttyUSB0", &settings)?;
//! if !channel.handshake()? {
//!     return Err(DriverError::HandshakeFailed);
//! }
//! let mut scope = ScopeSession::new(channel, Calibration::default());
//! scope.configure(20)?;
//! scope.trigger()?;
//! loop {
//!     std::thread::sleep(std::time::Duration::from_millis(1));
//!     let batch = scope.retrieve()?;
//!     if !batch.is_empty() {
//!         scope.trigger()?;
//!         println!("{} samples", batch.len());
//!     }
//! }
//! ```

pub mod catalog;
pub mod channel;
pub mod codec;
pub mod command;
pub mod config;
mod errors;
pub mod logging;
pub mod monitor;
pub mod scope;
pub mod timing;
pub mod transport;

pub use catalog::RegisterCatalog;
pub use channel::{Alarm, CommandChannel};
pub use codec::{Frame, HeaderKind};
pub use command::{BatchStep, Command, FunctionCode, Response};
pub use config::Settings;
pub use errors::*;
pub use monitor::{AxisTrace, Monitor, TraceSink};
pub use scope::{Calibration, SampleBatch, ScopeSample, ScopeSession, ScopeState};
pub use timing::{CycleTiming, LapTimer, TimingSummary};
pub use transport::{ScriptedTransport, SerialSettings, Transport};
