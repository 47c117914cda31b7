//! Typed register commands and decoded responses.

use serde::{Deserialize, Serialize};

use crate::codec::{with_crc, DEVICE_ADDRESS, MIN_FRAME_LEN};

/// Length of a request before the CRC is appended.
pub const REQUEST_LEN: usize = 6;

/// Function codes the drive answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 0x03, read holding register(s).
    ReadRegisters = 0x03,
    /// 0x06, write a single register.
    WriteRegister = 0x06,
}

impl FunctionCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(FunctionCode::ReadRegisters),
            0x06 => Some(FunctionCode::WriteRegister),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Payload width of a plain response (prefix and CRC stripped).
    pub fn payload_len(self) -> usize {
        match self {
            FunctionCode::ReadRegisters => 2,
            FunctionCode::WriteRegister => 3,
        }
    }

    /// Total frame length of a plain response.
    pub fn response_len(self) -> usize {
        match self {
            FunctionCode::ReadRegisters => 7,
            FunctionCode::WriteRegister => 8,
        }
    }
}

/// One register request plus optional metadata for user-facing validation.
///
/// `default` and `range` are never consulted by the driver itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub description: String,
    #[serde(default)]
    pub default: Option<u16>,
    #[serde(default)]
    pub range: Option<(u16, u16)>,
    /// `[address, function, register_hi, register_lo, operand_hi, operand_lo]`
    pub request: [u8; REQUEST_LEN],
}

impl Command {
    pub fn new(description: impl Into<String>, request: [u8; REQUEST_LEN]) -> Self {
        Self {
            description: description.into(),
            default: None,
            range: None,
            request,
        }
    }

    /// Read `count` registers starting at `register`.
    pub fn read(description: impl Into<String>, register: u16, count: u16) -> Self {
        Self::new(
            description,
            Self::request_bytes(FunctionCode::ReadRegisters, register, count),
        )
    }

    /// Write `value` to `register`.
    pub fn write(description: impl Into<String>, register: u16, value: u16) -> Self {
        Self::new(
            description,
            Self::request_bytes(FunctionCode::WriteRegister, register, value),
        )
    }

    fn request_bytes(function: FunctionCode, register: u16, operand: u16) -> [u8; REQUEST_LEN] {
        let [reg_hi, reg_lo] = register.to_be_bytes();
        let [op_hi, op_lo] = operand.to_be_bytes();
        [DEVICE_ADDRESS, function.as_byte(), reg_hi, reg_lo, op_hi, op_lo]
    }

    pub fn with_default(mut self, default: u16) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, min: u16, max: u16) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn function_byte(&self) -> u8 {
        self.request[1]
    }

    pub fn function(&self) -> Option<FunctionCode> {
        FunctionCode::from_byte(self.function_byte())
    }

    pub fn register(&self) -> u16 {
        u16::from_be_bytes([self.request[2], self.request[3]])
    }

    /// Register count for reads, value for writes.
    pub fn operand(&self) -> u16 {
        u16::from_be_bytes([self.request[4], self.request[5]])
    }

    /// Request bytes with the CRC appended, ready for the wire.
    pub fn encode(&self) -> Vec<u8> {
        with_crc(&self.request)
    }
}

/// One step of a command batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStep {
    Run(Command),
    /// Give the drive time to settle; nothing is sent.
    Pause,
}

impl From<Command> for BatchStep {
    fn from(command: Command) -> Self {
        BatchStep::Run(command)
    }
}

/// Frame length for reading `words` 16-bit registers in one response.
pub fn read_frame_len(words: usize) -> usize {
    MIN_FRAME_LEN + words * 2
}

/// Decoded response payload (prefix and CRC stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub function: FunctionCode,
    pub payload: Vec<u8>,
    /// False when the trailing CRC did not match; the payload is kept anyway.
    pub crc_ok: bool,
}

impl Response {
    /// The 16-bit register value carried by a plain read or write response.
    ///
    /// For a write acknowledgement this is the echoed value (last two bytes).
    pub fn value(&self) -> Option<u16> {
        match (self.function, self.payload.as_slice()) {
            (FunctionCode::ReadRegisters, [hi, lo]) => Some(u16::from_be_bytes([*hi, *lo])),
            (FunctionCode::WriteRegister, [_, hi, lo]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Payload as big-endian words. A trailing odd byte is ignored.
    pub fn words(&self) -> impl Iterator<Item = u16> + '_ {
        self.payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }

    /// Last payload byte, used by status-style registers.
    pub fn last_byte(&self) -> Option<u8> {
        self.payload.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_bytes() {
        let cmd = Command::read("introduction", 0x00FD, 1);
        assert_eq!(cmd.request, [0x01, 0x03, 0x00, 0xFD, 0x00, 0x01]);
        assert_eq!(cmd.encode(), vec![0x01, 0x03, 0x00, 0xFD, 0x00, 0x01, 0x15, 0xFA]);

        let cmd = Command::write("scope duration", 0x00D0, 20);
        assert_eq!(cmd.request, [0x01, 0x06, 0x00, 0xD0, 0x00, 0x14]);
        assert_eq!(cmd.function(), Some(FunctionCode::WriteRegister));
        assert_eq!(cmd.register(), 0xD0);
        assert_eq!(cmd.operand(), 20);
    }

    #[test]
    fn plain_response_values() {
        let read = Response {
            function: FunctionCode::ReadRegisters,
            payload: vec![0x0F, 0xA0],
            crc_ok: true,
        };
        assert_eq!(read.value(), Some(4000));

        let write = Response {
            function: FunctionCode::WriteRegister,
            payload: vec![0xD0, 0x00, 0x14],
            crc_ok: true,
        };
        assert_eq!(write.value(), Some(20));
        assert_eq!(write.last_byte(), Some(0x14));

        let long = Response {
            function: FunctionCode::ReadRegisters,
            payload: vec![0x00, 0x01, 0x00, 0x02, 0x03],
            crc_ok: true,
        };
        assert_eq!(long.value(), None);
        assert_eq!(long.words().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn frame_lengths() {
        assert_eq!(read_frame_len(1), FunctionCode::ReadRegisters.response_len());
        assert_eq!(read_frame_len(200), 405);
    }
}
