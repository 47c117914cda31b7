//! Byte transports for the drive's RS-232 tuning port.
//!
//! The drive speaks strictly half-duplex request/response, so all reads here are
//! blocking with a bounded timeout. A timed-out read is reported as "no more
//! bytes" (`Ok(None)` / a short buffer) rather than an error.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};

use crate::errors::Result;

/// Default baud rate of the EasyServo tuning port.
pub const BAUD_RATE: u32 = 38_400;

/// Read timeout observed to be sufficient for every response, including the
/// 405-byte scope buffer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on bytes discarded while draining stale input after opening.
const MAX_DRAIN_BYTES: usize = 4096;

/// Trait for Read + Write + Send, allowing different transport backends.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Serial line parameters. Data format is fixed at 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Open a serial port configured for the drive and discard any stale input.
pub fn open_serial(path: &str, settings: &SerialSettings) -> Result<Box<dyn serialport::SerialPort>> {
    let mut port = serialport::new(path, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.timeout)
        .open()?;

    port.clear(ClearBuffer::All)?;
    // clear() does not reliably empty USB adapters' buffers
    let drained = drain_input(&mut port)?;
    if drained > 0 {
        debug!("Discarded {drained} stale bytes on {path}");
    }

    info!(
        "Opened {path} at {} baud, timeout {:?}",
        settings.baud_rate, settings.timeout
    );
    Ok(port)
}

/// Read and discard bytes until the source times out or runs dry.
pub fn drain_input<R: Read + ?Sized>(reader: &mut R) -> io::Result<usize> {
    let mut drained = 0usize;
    while drained < MAX_DRAIN_BYTES {
        match read_byte(reader)? {
            Some(_) => drained += 1,
            None => break,
        }
    }
    Ok(drained)
}

/// Read a single byte. `Ok(None)` means EOF or read timeout.
pub fn read_byte<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Read up to `len` bytes, stopping early on EOF or read timeout.
pub fn read_up_to<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0usize;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

// ============================================================================
// Scripted transport
// ============================================================================

#[derive(Debug, Default)]
struct Script {
    input: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    write_limit: Option<usize>,
}

/// In-memory transport that answers each write with the next queued reply.
///
/// Clones share the same script, so a test can keep one handle while the
/// session owns the other. Reading with no pending input behaves like a serial
/// read timeout.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a reply that becomes readable after the next write.
    pub fn push_reply(&self, bytes: impl Into<Vec<u8>>) -> &Self {
        self.script().replies.push_back(bytes.into());
        self
    }

    /// Make bytes readable immediately, independent of any write.
    pub fn push_input(&self, bytes: &[u8]) -> &Self {
        self.script().input.extend(bytes.iter().copied());
        self
    }

    /// Accept at most `limit` bytes per write, simulating a truncated write.
    pub fn limit_writes(&self, limit: usize) -> &Self {
        self.script().write_limit = Some(limit);
        self
    }

    /// Every write seen so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script().writes.clone()
    }

    /// Bytes still waiting to be read.
    pub fn pending_input(&self) -> usize {
        self.script().input.len()
    }

    /// Replies queued but not yet released by a write.
    pub fn pending_replies(&self) -> usize {
        self.script().replies.len()
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script();
        if script.input.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "scripted read timeout"));
        }
        let n = buf.len().min(script.input.len());
        for (slot, byte) in buf.iter_mut().zip(script.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut script = self.script();
        let n = script.write_limit.map_or(buf.len(), |limit| buf.len().min(limit));
        script.writes.push(buf[..n].to_vec());
        if let Some(reply) = script.replies.pop_front() {
            script.input.extend(reply);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
