use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("incomplete write: {written} of {expected} bytes")]
    IncompleteWrite { written: usize, expected: usize },
    #[error("handshake failed: no drive answered the introduction")]
    HandshakeFailed,
    #[error("unknown frame header {:02X?}", .0)]
    UnknownHeader([u8; 2]),
    #[error("invalid frame length {0}")]
    FrameLength(usize),
    #[error("unsupported function code {0:#04X}")]
    UnsupportedFunction(u8),
    #[error("device not ready: {0}")]
    NotReady(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("catalog error: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
