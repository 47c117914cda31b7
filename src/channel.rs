//! Request/response exchange with the drive.
//!
//! Every command is written in full and its response consumed (or timed out)
//! before the next one goes out; the link is strictly half-duplex.

use std::collections::HashMap;
use std::io::Write;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::catalog::{self, RegisterCatalog};
use crate::codec::read_frame;
use crate::command::{read_frame_len, BatchStep, Command, FunctionCode, Response};
use crate::errors::{DriverError, Result};
use crate::transport::{open_serial, SerialSettings, Transport};

/// Pause inserted for a [`BatchStep::Pause`].
pub const PACE_DELAY: Duration = Duration::from_millis(100);

/// Last payload byte of a healthy introduction reply.
const INTRODUCTION_REPLY: u8 = 0x82;

const ALARM_FOLLOWING_ERROR: [u8; 8] = [0x00, 0x20, 0x00, 0x20, 0x00, 0x02, 0x00, 0x20];
const ALARM_CLEAR: [u8; 8] = [0x00, 0x00, 0x00, 0x20, 0x00, 0x02, 0x00, 0x20];

/// Decoded alarm summary.
///
/// Only two states have been observed on real drives; anything else is
/// returned raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alarm {
    Clear,
    /// Position following error. The drive must be power cycled.
    PositionFollowingError,
    Unknown(Vec<u8>),
}

impl Alarm {
    pub fn from_payload(payload: &[u8]) -> Self {
        let tail_clear = payload.len() == 20 && payload[8..].iter().all(|&b| b == 0);
        match payload.get(..8) {
            Some(head) if tail_clear && head == ALARM_FOLLOWING_ERROR => {
                Alarm::PositionFollowingError
            }
            Some(head) if tail_clear && head == ALARM_CLEAR => Alarm::Clear,
            _ => Alarm::Unknown(payload.to_vec()),
        }
    }
}

/// Sends encoded commands over an exclusively owned transport.
pub struct CommandChannel {
    transport: Box<dyn Transport>,
    pace: Duration,
}

impl CommandChannel {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            pace: PACE_DELAY,
        }
    }

    /// Open a serial port with the drive's line settings.
    pub fn open(path: &str, settings: &SerialSettings) -> Result<Self> {
        let port = open_serial(path, settings)?;
        Ok(Self::from_boxed(Box::new(port)))
    }

    /// Override the delay used for batch pauses.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn pace(&self) -> Duration {
        self.pace
    }

    /// Send the introduction read and check the drive's answer.
    ///
    /// `Ok(false)` means nothing recognizable answered; callers treat it as fatal.
    pub fn handshake(&mut self) -> Result<bool> {
        let Some(response) = self.execute(&catalog::introduction())? else {
            warn!("No response to introduction");
            return Ok(false);
        };
        let ok = response.last_byte() == Some(INTRODUCTION_REPLY);
        if ok {
            info!("Drive answered introduction");
        } else {
            warn!("Unexpected introduction reply {:02X?}", response.payload);
        }
        Ok(ok)
    }

    /// Write one command without reading a response.
    ///
    /// A short write is fatal and never retried.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let frame = command.encode();
        debug!("-> {} {:02X?}", command.description, frame);
        let written = self.transport.write(&frame)?;
        if written != frame.len() {
            return Err(DriverError::IncompleteWrite {
                written,
                expected: frame.len(),
            });
        }
        self.transport.flush()?;
        Ok(())
    }

    /// Send a command and read its plain response.
    ///
    /// The frame length follows from the function code (7 bytes for a read,
    /// 8 for a write). A missing or odd-sized response is logged and returned
    /// as `Ok(None)`.
    pub fn execute(&mut self, command: &Command) -> Result<Option<Response>> {
        let function = Self::function_of(command)?;
        self.send(command)?;

        let Some(response) = self.read_response(function, function.response_len())? else {
            warn!("Empty response to {}", command.description);
            return Ok(None);
        };
        if response.payload.len() != function.payload_len() {
            warn!(
                "Unexpected response length {} to {} {:02X?}: {:02X?}",
                response.payload.len(),
                command.description,
                command.request,
                response.payload
            );
            return Ok(None);
        }
        Ok(Some(response))
    }

    /// Send a command whose response length the caller knows, e.g. a scope readout.
    pub fn execute_expecting(
        &mut self,
        command: &Command,
        expected_len: usize,
    ) -> Result<Option<Response>> {
        let function = Self::function_of(command)?;
        self.send(command)?;
        let response = self.read_response(function, expected_len)?;
        if response.is_none() {
            warn!("Empty response to {}", command.description);
        }
        Ok(response)
    }

    /// Read one response frame of `expected_len` bytes for `function`.
    pub fn read_response(
        &mut self,
        function: FunctionCode,
        expected_len: usize,
    ) -> Result<Option<Response>> {
        let Some(frame) = read_frame(&mut self.transport, expected_len)? else {
            return Ok(None);
        };
        if frame.function_code() != function.as_byte() {
            warn!(
                "Expected function {:#04X}, got {:#04X}",
                function.as_byte(),
                frame.function_code()
            );
            return Ok(None);
        }
        let crc_ok = frame.crc_ok();
        Ok(Some(Response {
            function,
            payload: frame.into_payload(),
            crc_ok,
        }))
    }

    /// Run commands in order and collect every decodable 16-bit value by description.
    ///
    /// A [`BatchStep::Pause`] sleeps for the pace delay without touching the port.
    pub fn execute_batch(&mut self, steps: &[BatchStep]) -> Result<HashMap<String, u16>> {
        let mut values = HashMap::new();
        for step in steps {
            match step {
                BatchStep::Pause => self.pause(),
                BatchStep::Run(command) => {
                    let Some(response) = self.execute(command)? else {
                        continue;
                    };
                    match response.value() {
                        Some(value) => {
                            debug!("{} = {}", command.description, value);
                            values.insert(command.description.clone(), value);
                        }
                        None => warn!("Unexpected length for {}", command.description),
                    }
                }
            }
        }
        Ok(values)
    }

    pub fn pause(&mut self) {
        thread::sleep(self.pace);
    }

    /// Read every command in `catalog` and return the values by description.
    pub fn read_parameters(&mut self, catalog: &RegisterCatalog) -> Result<HashMap<String, u16>> {
        let values = self.execute_batch(&catalog.batch())?;
        if values.len() != catalog.len() {
            warn!(
                "Read {} of {} parameters",
                values.len(),
                catalog.len()
            );
        }
        Ok(values)
    }

    /// Read and decode the alarm summary, then acknowledge it.
    ///
    /// `Ok(None)` when the summary did not arrive.
    pub fn read_alarms(&mut self) -> Result<Option<Alarm>> {
        let summary = catalog::alarm_summary();
        let expected_len = read_frame_len(catalog::ALARM_WORDS as usize);
        let response = self.execute_expecting(&summary, expected_len)?;

        // the acknowledgement answers with a plain read response
        if self.execute(&catalog::alarm_ack())?.is_none() {
            warn!("Alarm acknowledgement not answered, the line may be out of step");
        }

        let alarm = response.map(|r| Alarm::from_payload(&r.payload));
        match &alarm {
            Some(Alarm::PositionFollowingError) => {
                warn!("Alarm: position following error, power cycle the drive")
            }
            Some(Alarm::Clear) => info!("Alarm: none"),
            Some(Alarm::Unknown(raw)) => warn!("Alarm: unknown summary {:02X?}", raw),
            None => {}
        }
        Ok(alarm)
    }

    fn function_of(command: &Command) -> Result<FunctionCode> {
        command
            .function()
            .ok_or(DriverError::UnsupportedFunction(command.function_byte()))
    }
}
