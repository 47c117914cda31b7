//! Frame codec for the drive's Modbus-RTU style protocol.
//!
//! Frame layout: `[address, function, ...payload..., crc_lo, crc_hi]`.
//!
//! Responses carry a third byte that looks like a Modbus byte count but does
//! not reliably match the real length. It is read and kept in the frame but
//! never used; callers always supply the total frame length they expect for
//! the command they sent.

use std::io::Read;

use crc::{Crc, CRC_16_MODBUS};
use log::{debug, warn};

use crate::errors::{DriverError, Result};
use crate::transport::{read_byte, read_up_to};

/// Address of the single drive on the link.
pub const DEVICE_ADDRESS: u8 = 0x01;

/// Header of a register-read response.
pub const HEADER_READ: [u8; 2] = [DEVICE_ADDRESS, 0x03];

/// Header of a write acknowledgement.
pub const HEADER_WRITE: [u8; 2] = [DEVICE_ADDRESS, 0x06];

/// Header plus the unreliable length byte.
pub const PREFIX_LEN: usize = 3;

pub const CRC_LEN: usize = 2;

/// Shortest frame that still has a prefix and a CRC.
pub const MIN_FRAME_LEN: usize = PREFIX_LEN + CRC_LEN;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Modbus CRC16 (poly 0xA001 reflected, init 0xFFFF), low byte first.
pub fn crc16(bytes: &[u8]) -> [u8; 2] {
    CRC_MODBUS.checksum(bytes).to_le_bytes()
}

/// Copy `bytes` and append their CRC.
pub fn with_crc(bytes: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(bytes.len() + CRC_LEN);
    frame.extend_from_slice(bytes);
    frame.extend_from_slice(&crc16(bytes));
    frame
}

/// Check the trailing CRC of a complete frame.
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < CRC_LEN {
        return false;
    }
    let (body, received) = frame.split_at(frame.len() - CRC_LEN);
    received == crc16(body)
}

/// Response kind identified from the first two bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Read,
    Write,
    Unknown,
}

impl HeaderKind {
    pub fn is_known(self) -> bool {
        self != HeaderKind::Unknown
    }
}

pub fn classify_header(bytes: &[u8]) -> HeaderKind {
    match bytes {
        [a, b, ..] if [*a, *b] == HEADER_READ => HeaderKind::Read,
        [a, b, ..] if [*a, *b] == HEADER_WRITE => HeaderKind::Write,
        _ => HeaderKind::Unknown,
    }
}

/// Where a frame was found in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPoint {
    /// Bytes dropped before the header.
    pub discarded: usize,
    pub header: [u8; 2],
    pub kind: HeaderKind,
}

/// Slide a two-byte window over `source` until it holds a known header.
///
/// Consumes the dropped bytes and the header itself. Returns `Ok(None)` when
/// the source runs dry (EOF or read timeout) first.
pub fn synchronize<R: Read + ?Sized>(source: &mut R) -> Result<Option<SyncPoint>> {
    let Some(first) = read_byte(source)? else {
        return Ok(None);
    };
    let mut window = [0u8, first];
    let mut discarded = 0usize;

    loop {
        let Some(next) = read_byte(source)? else {
            if discarded > 0 {
                warn!("Stream ended after discarding {discarded} bytes without a header");
            }
            return Ok(None);
        };
        window = [window[1], next];

        let kind = classify_header(&window);
        if kind.is_known() {
            if discarded > 0 {
                debug!("Resynchronized after discarding {discarded} bytes");
            }
            return Ok(Some(SyncPoint {
                discarded,
                header: window,
                kind,
            }));
        }

        debug!("Discarding byte {:#04X} while seeking header", window[0]);
        discarded += 1;
    }
}

/// A response frame with its integrity flag.
///
/// A CRC mismatch does not reject the frame: the payload is still available
/// and `crc_ok()` tells the caller whether to trust it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    kind: HeaderKind,
    crc_ok: bool,
}

impl Frame {
    /// Validate a complete raw frame.
    ///
    /// Fails on a frame shorter than [`MIN_FRAME_LEN`] or with an unknown header.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(DriverError::FrameLength(bytes.len()));
        }
        let kind = classify_header(&bytes);
        if !kind.is_known() {
            return Err(DriverError::UnknownHeader([bytes[0], bytes[1]]));
        }

        let crc_ok = verify_crc(&bytes);
        if !crc_ok {
            let (body, received) = bytes.split_at(bytes.len() - CRC_LEN);
            warn!(
                "CRC mismatch (received {:02X?}, calculated {:02X?}), keeping payload",
                received,
                crc16(body)
            );
        }

        Ok(Self {
            bytes,
            kind,
            crc_ok,
        })
    }

    pub fn kind(&self) -> HeaderKind {
        self.kind
    }

    pub fn function_code(&self) -> u8 {
        self.bytes[1]
    }

    /// The byte following the header. Not a trustworthy length.
    pub fn length_byte(&self) -> u8 {
        self.bytes[2]
    }

    /// Bytes between the three-byte prefix and the CRC.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PREFIX_LEN..self.bytes.len() - CRC_LEN]
    }

    pub fn into_payload(mut self) -> Vec<u8> {
        self.bytes.truncate(self.bytes.len() - CRC_LEN);
        self.bytes.split_off(PREFIX_LEN)
    }

    pub fn crc_ok(&self) -> bool {
        self.crc_ok
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Read one response of exactly `expected_len` bytes from `source`.
///
/// Returns `Ok(None)` on a timeout or short read. Garbage ahead of the header
/// is skipped.
pub fn read_frame<R: Read + ?Sized>(source: &mut R, expected_len: usize) -> Result<Option<Frame>> {
    if expected_len < MIN_FRAME_LEN {
        return Err(DriverError::FrameLength(expected_len));
    }

    let Some(sync) = synchronize(source)? else {
        debug!("No frame header before timeout");
        return Ok(None);
    };

    let Some(length_byte) = read_byte(source)? else {
        warn!("Zero-length read after header {:02X?}", sync.header);
        return Ok(None);
    };

    let mut bytes = Vec::with_capacity(expected_len);
    bytes.extend_from_slice(&sync.header);
    bytes.push(length_byte);
    bytes.extend(read_up_to(source, expected_len - bytes.len())?);

    if bytes.len() != expected_len {
        warn!(
            "Short frame: got {} of {} bytes (length byte {})",
            bytes.len(),
            expected_len,
            length_byte
        );
        return Ok(None);
    }

    debug!("<- {:02X?}", bytes);
    Frame::parse(bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn crc_matches_captured_frames() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0xFD, 0x00, 0x01]), [0x15, 0xFA]);
        assert_eq!(crc16(&[0x01, 0x06, 0x00, 0x00, 0x02, 0x85]), [0x49, 0x09]);
        assert_eq!(crc16(&[0x01, 0x06, 0x00, 0x02, 0x00, 0x00]), [0x28, 0x0A]);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x10, 0x00, 0x01]), [0x85, 0xCF]);
        assert_eq!(crc16(&[0x01, 0x03, 0x02, 0x00, 0x20]), [0xB9, 0x9C]);
    }

    #[test]
    fn crc_of_empty_input_is_init_value() {
        assert_eq!(crc16(&[]), [0xFF, 0xFF]);
    }

    #[test]
    fn appended_crc_verifies() {
        let samples: [&[u8]; 4] = [&[], &[0x00], &[0x01, 0x03, 0x02, 0x00, 0x82], &[0xFF; 64]];
        for body in samples {
            assert!(verify_crc(&with_crc(body)), "body {body:02X?}");
        }
    }

    #[test]
    fn corrupted_crc_fails() {
        let mut frame = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x82]);
        frame[4] ^= 0x01;
        assert!(!verify_crc(&frame));
        assert!(!verify_crc(&[0x01]));
    }

    #[test]
    fn classifies_headers() {
        assert_eq!(classify_header(&[0x01, 0x03]), HeaderKind::Read);
        assert_eq!(classify_header(&[0x01, 0x06, 0x00]), HeaderKind::Write);
        assert_eq!(classify_header(&[0x01, 0x10]), HeaderKind::Unknown);
        assert_eq!(classify_header(&[0x02, 0x03]), HeaderKind::Unknown);
        assert_eq!(classify_header(&[0x01]), HeaderKind::Unknown);
    }

    #[test]
    fn synchronize_skips_exactly_the_garbage() {
        for garbage_len in 0..12 {
            let mut stream = vec![0xAAu8; garbage_len];
            stream.extend_from_slice(&[0x01, 0x03, 0x02, 0x00, 0x82]);
            let mut cursor = Cursor::new(stream);

            let sync = synchronize(&mut cursor).unwrap().unwrap();
            assert_eq!(sync.discarded, garbage_len);
            assert_eq!(sync.kind, HeaderKind::Read);
            assert_eq!(cursor.position() as usize, garbage_len + 2);
        }
    }

    #[test]
    fn synchronize_handles_repeated_address_byte() {
        let mut cursor = Cursor::new(vec![0x01, 0x01, 0x01, 0x06, 0x00]);
        let sync = synchronize(&mut cursor).unwrap().unwrap();
        assert_eq!(sync.discarded, 2);
        assert_eq!(sync.kind, HeaderKind::Write);
    }

    #[test]
    fn synchronize_reports_end_of_stream() {
        assert_eq!(synchronize(&mut Cursor::new(Vec::new())).unwrap(), None);
        assert_eq!(synchronize(&mut Cursor::new(vec![0x01])).unwrap(), None);
        assert_eq!(synchronize(&mut Cursor::new(vec![0x55; 9])).unwrap(), None);
    }

    #[test]
    fn read_frame_ignores_length_byte() {
        // length byte claims 0x90 bytes, the caller knows it is 7 in total
        let frame = with_crc(&[0x01, 0x03, 0x90, 0x12, 0x34]);
        let got = read_frame(&mut Cursor::new(frame), 7).unwrap().unwrap();
        assert_eq!(got.length_byte(), 0x90);
        assert_eq!(got.payload(), &[0x12, 0x34]);
        assert!(got.crc_ok());
    }

    #[test]
    fn read_frame_keeps_payload_on_crc_mismatch() {
        let mut frame = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x82]);
        frame[6] ^= 0xFF;
        let got = read_frame(&mut Cursor::new(frame), 7).unwrap().unwrap();
        assert!(!got.crc_ok());
        assert_eq!(got.into_payload(), vec![0x00, 0x82]);
    }

    #[test]
    fn read_frame_short_read_is_none() {
        let frame = with_crc(&[0x01, 0x03, 0x02, 0x00, 0x82]);
        assert!(read_frame(&mut Cursor::new(frame[..5].to_vec()), 7).unwrap().is_none());
        assert!(read_frame(&mut Cursor::new(vec![0x01, 0x03]), 7).unwrap().is_none());
        assert!(read_frame(&mut Cursor::new(Vec::new()), 7).unwrap().is_none());
    }

    #[test]
    fn read_frame_rejects_impossible_length() {
        let err = read_frame(&mut Cursor::new(vec![0x01, 0x03]), 4).unwrap_err();
        assert!(matches!(err, DriverError::FrameLength(4)));
    }

    #[test]
    fn parse_rejects_unknown_header() {
        let err = Frame::parse(with_crc(&[0x01, 0x10, 0x00, 0x00])).unwrap_err();
        assert!(matches!(err, DriverError::UnknownHeader([0x01, 0x10])));
    }
}
