//! Frame header and stream codec.
//!
//! Every transport frame starts with a fixed header, all fields little-endian:
//!
//! ```text
//! byte 0      class      0 = data, 1 = command/response, 2 = event
//! byte 1      interface  logical interface id (0 = station, 1 = soft-AP)
//! bytes 2-3   length     payload length
//! bytes 4-5   offset     payload offset from frame start (always HEADER_LEN)
//! bytes 6-7   reserved   zero
//! ```
//!
//! The header is padded to a multiple of the 4-byte buffer alignment so the
//! payload starts aligned on the peripheral side.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 8;
pub const BUFFER_ALIGNMENT: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

pub const STATION_INTERFACE: u8 = 0;
pub const SOFTAP_INTERFACE: u8 = 1;

const _: () = assert!(HEADER_LEN % BUFFER_ALIGNMENT == 0);

/// Routing class carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameClass {
    Data = 0,
    CommandResponse = 1,
    Event = 2,
}

impl FrameClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::CommandResponse),
            2 => Some(Self::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown frame class {0}")]
    UnknownClass(u8),
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("declared payload length {declared} does not match {actual} bytes received")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("payload of {0} bytes exceeds frame limit")]
    PayloadTooLarge(usize),
    #[error("unexpected payload offset {0}")]
    BadOffset(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub class: FrameClass,
    pub interface: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(class: FrameClass, interface: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            class,
            interface,
            payload: payload.into(),
        }
    }

    /// Command request or response. Control traffic always uses the station interface id.
    pub fn command(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameClass::CommandResponse, STATION_INTERFACE, payload)
    }

    pub fn event(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameClass::Event, STATION_INTERFACE, payload)
    }

    pub fn data(interface: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameClass::Data, interface, payload)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(len));
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u8(self.class as u8);
        dst.put_u8(self.interface);
        dst.put_u16_le(len as u16);
        dst.put_u16_le(HEADER_LEN as u16);
        dst.put_u16_le(0);
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a single frame from a complete transport buffer.
    ///
    /// The declared length must match the bytes that follow the header exactly.
    pub fn decode(mut src: &[u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(src)?;
        src.advance(HEADER_LEN);

        if src.len() != header.len {
            return Err(FrameError::LengthMismatch {
                declared: header.len,
                actual: src.len(),
            });
        }

        let class =
            FrameClass::from_u8(header.class).ok_or(FrameError::UnknownClass(header.class))?;
        Ok(Self::new(class, header.interface, Bytes::copy_from_slice(src)))
    }
}

struct FrameHeader {
    class: u8,
    interface: u8,
    len: usize,
}

impl FrameHeader {
    fn parse(src: &[u8]) -> Result<Self, FrameError> {
        if src.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                available: src.len(),
            });
        }

        let offset = u16::from_le_bytes([src[4], src[5]]);
        if offset as usize != HEADER_LEN {
            return Err(FrameError::BadOffset(offset));
        }

        Ok(Self {
            class: src[0],
            interface: src[1],
            len: u16::from_le_bytes([src[2], src[3]]) as usize,
        })
    }
}

/// Splits an ordered byte stream into frames.
///
/// Frames with an unknown class are consumed and yielded as `Err(FrameError)`
/// items so one bad frame does not end the stream. A corrupt header offset
/// means the stream has lost sync and is reported as an I/O error.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, FrameError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let header = FrameHeader::parse(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let total = HEADER_LEN + header.len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(HEADER_LEN);
        let payload = frame.freeze();

        tracing::trace!(
            class = header.class,
            interface = header.interface,
            len = header.len,
            "Decoded frame"
        );

        match FrameClass::from_u8(header.class) {
            Some(class) => Ok(Some(Ok(Frame::new(class, header.interface, payload)))),
            None => Ok(Some(Err(FrameError::UnknownClass(header.class)))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!(
            class = ?frame.class,
            interface = frame.interface,
            len = frame.payload.len(),
            "Encoding frame"
        );
        frame
            .encode_into(dst)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}
