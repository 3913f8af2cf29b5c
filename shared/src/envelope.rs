//! Frame layout: `command:u8 | payload_len:u32 | payload`

use crate::codec::{CodecError, Reader, Writer, MAX_BODY_LEN};
use crate::command::Command;
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

/// Bytes before the payload: command id plus the length field
pub const HEADER_LEN: usize = 5;

/// Largest datagram a well-formed envelope can occupy
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_BODY_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram of {0} bytes is shorter than the frame header")]
    ShortHeader(usize),
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("declared payload length {0} exceeds the maximum body length")]
    TooLarge(usize),
    #[error("declared payload length {declared} but {actual} bytes follow the header")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("command {0} is not valid in this direction")]
    UnexpectedCommand(Command),
    #[error("{0} bytes left over after decoding the payload")]
    TrailingBytes(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// One protocol message: a command id and its length-prefixed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command: Command,
    payload: Bytes,
}

impl Envelope {
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        let payload = payload.into();
        if payload.len() > MAX_BODY_LEN {
            return Err(CodecError::Overflow {
                needed: payload.len(),
                written: 0,
            });
        }
        Ok(Self { command, payload })
    }

    pub fn empty(command: Command) -> Self {
        Self {
            command,
            payload: Bytes::new(),
        }
    }

    /// Wraps a finished writer; the writer already enforces the body limit
    pub fn from_writer(command: Command, writer: Writer) -> Self {
        Self {
            command,
            payload: writer.freeze(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.payload)
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.frame_len());
        frame.put_u8(self.command.as_byte());
        frame.put_u32(self.payload.len() as u32);
        frame.put_slice(&self.payload);
        frame
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        if datagram.is_empty() {
            return Err(DecodeError::Empty);
        }
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader(datagram.len()));
        }

        let mut buf = datagram;
        let command = Command::try_from(buf.get_u8()).map_err(DecodeError::UnknownCommand)?;

        let declared = buf.get_u32() as usize;
        if declared > MAX_BODY_LEN {
            return Err(DecodeError::TooLarge(declared));
        }

        let actual = buf.remaining();
        if declared != actual {
            return Err(DecodeError::LengthMismatch { declared, actual });
        }

        Ok(Self {
            command,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
