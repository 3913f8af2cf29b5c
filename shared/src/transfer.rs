//! Windowed reliable delivery over datagrams
//!
//! [`SendWindow`] and [`ReceiveBuffer`] are plain state machines driven by the
//! caller with explicit [`Instant`]s, so the retransmit rules can be tested
//! without sockets or sleeping. The sender keeps at most `window` frames in
//! flight and only moves on once every frame of the current window has been
//! acknowledged. A timeout retransmits just the frames still missing.

use crate::codec::{CodecError, Reader, WireDecode, WireEncode, Writer};
use crate::envelope::DecodeError;
use bytes::{Buf, BufMut};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const WINDOW_SIZE: usize = 5;
pub const TIMEOUT: Duration = Duration::from_millis(500);
pub const MAX_RETRIES: u32 = 5;
/// Payload bytes carried by one `FILE_DATA` frame
pub const FRAME_DATA_LEN: usize = 1024;
/// An acknowledgement datagram is exactly this long and carries no header
pub const ACK_LEN: usize = 8;
/// Largest payload either side agrees to move in one transfer
pub const MAX_TRANSFER_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("frame belongs to transfer {got}, expected {expected}")]
    WrongSession { expected: u32, got: u32 },
    #[error("sequence {seq} outside a transfer of {frames} frames")]
    OutOfRange { seq: u32, frames: u32 },
    #[error("header announces {declared} frames but the file length needs {expected}")]
    FrameCountMismatch { declared: u32, expected: u32 },
    #[error("frame {seq} carries {len} bytes at offset {offset}, which is not its place in the file")]
    Misplaced { seq: u32, offset: u32, len: usize },
    #[error("gave up after {retries} retransmissions with {acked}/{frames} frames acknowledged")]
    RetriesExhausted { acked: u32, frames: u32, retries: u32 },
    #[error("peer rejected the transfer ({code}): {message}")]
    Rejected { code: u8, message: String },
    #[error("transfer of {0} bytes exceeds the size limit")]
    TooLarge(u64),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("no traffic from the peer for {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub window: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub frame_len: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            window: WINDOW_SIZE,
            timeout: TIMEOUT,
            max_retries: MAX_RETRIES,
            frame_len: FRAME_DATA_LEN,
        }
    }
}

/// One chunk of a transfer, placed by `offset` within `file_length` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub session: u32,
    pub seq: u32,
    pub file_length: u32,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl WireEncode for DataFrame {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_u32(self.session)?;
        w.put_u32(self.seq)?;
        w.put_u32(self.file_length)?;
        w.put_u32(self.offset)?;
        w.put_u32(self.data.len() as u32)?;
        w.put_bytes(&self.data)
    }
}

impl WireDecode for DataFrame {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let session = r.get_u32()?;
        let seq = r.get_u32()?;
        let file_length = r.get_u32()?;
        let offset = r.get_u32()?;
        let len = r.get_u32()? as usize;
        let data = r.get_bytes(len)?.to_vec();
        Ok(DataFrame {
            session,
            seq,
            file_length,
            offset,
            data,
        })
    }
}

/// `(session, seq)` acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub session: u32,
    pub seq: u32,
}

impl Ack {
    pub fn to_bytes(self) -> [u8; ACK_LEN] {
        let mut out = [0u8; ACK_LEN];
        let mut buf = &mut out[..];
        buf.put_u32(self.session);
        buf.put_u32(self.seq);
        out
    }

    /// Only a datagram of exactly `ACK_LEN` bytes is an acknowledgement
    pub fn from_bytes(datagram: &[u8]) -> Option<Ack> {
        if datagram.len() != ACK_LEN {
            return None;
        }
        let mut buf = datagram;
        Some(Ack {
            session: buf.get_u32(),
            seq: buf.get_u32(),
        })
    }
}

/// What the caller should do after checking the retransmit timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The deadline has not passed, or nothing is in flight
    Pending,
    /// Send these frames again
    Retransmit(Vec<DataFrame>),
    /// Consecutive timeouts ran out
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub session: u32,
    pub frames: u32,
    pub acked: u32,
    pub bytes: u32,
    pub retries: u32,
}

/// Number of frames needed for `len` bytes; an empty payload still takes one
pub fn frame_count(len: usize, frame_len: usize) -> u32 {
    let frame_len = frame_len.max(1);
    len.div_ceil(frame_len).max(1) as u32
}

#[derive(Debug)]
pub struct SendWindow {
    session: u32,
    config: TransferConfig,
    payload: Vec<u8>,
    acked: Vec<bool>,
    acked_count: u32,
    base: u32,
    in_flight: bool,
    deadline: Option<Instant>,
    consecutive_timeouts: u32,
    retries: u32,
}

impl SendWindow {
    pub fn new(session: u32, payload: Vec<u8>, config: TransferConfig) -> Self {
        let frames = frame_count(payload.len(), config.frame_len);
        Self {
            session,
            config,
            payload,
            acked: vec![false; frames as usize],
            acked_count: 0,
            base: 0,
            in_flight: false,
            deadline: None,
            consecutive_timeouts: 0,
            retries: 0,
        }
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn frame_count(&self) -> u32 {
        self.acked.len() as u32
    }

    pub fn file_length(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn acked_frames(&self) -> u32 {
        self.acked_count
    }

    pub fn is_complete(&self) -> bool {
        self.acked_count == self.frame_count()
    }

    /// When the current window times out, if anything is in flight
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn window_end(&self) -> u32 {
        (self.base + self.config.window.max(1) as u32).min(self.frame_count())
    }

    fn frame(&self, seq: u32) -> DataFrame {
        let start = (seq as usize * self.config.frame_len).min(self.payload.len());
        let end = (start + self.config.frame_len).min(self.payload.len());
        DataFrame {
            session: self.session,
            seq,
            file_length: self.payload.len() as u32,
            offset: start as u32,
            data: self.payload[start..end].to_vec(),
        }
    }

    fn unacked_in_window(&self) -> Vec<DataFrame> {
        (self.base..self.window_end())
            .filter(|&seq| !self.acked[seq as usize])
            .map(|seq| self.frame(seq))
            .collect()
    }

    /// Frames of a window that has not been sent yet; empty while a window is
    /// in flight or once everything is acknowledged
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<DataFrame> {
        if self.in_flight || self.is_complete() {
            return Vec::new();
        }
        let frames = self.unacked_in_window();
        self.in_flight = true;
        self.deadline = Some(now + self.config.timeout);
        frames
    }

    /// Records an acknowledgement; returns whether it was new
    ///
    /// Completing the current window moves to the next one, which the next
    /// `poll_transmit` sends.
    pub fn on_ack(&mut self, ack: Ack) -> Result<bool, TransferError> {
        if ack.session != self.session {
            return Err(TransferError::WrongSession {
                expected: self.session,
                got: ack.session,
            });
        }
        let frames = self.frame_count();
        let slot = self
            .acked
            .get_mut(ack.seq as usize)
            .ok_or(TransferError::OutOfRange {
                seq: ack.seq,
                frames,
            })?;
        if *slot {
            return Ok(false);
        }
        *slot = true;
        self.acked_count += 1;

        while !self.is_complete() {
            let end = self.window_end();
            if !(self.base..end).all(|seq| self.acked[seq as usize]) {
                break;
            }
            self.base = end;
            self.in_flight = false;
            self.deadline = None;
            self.consecutive_timeouts = 0;
        }
        if self.is_complete() {
            self.deadline = None;
        }
        Ok(true)
    }

    pub fn on_timeout(&mut self, now: Instant) -> TimeoutOutcome {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return TimeoutOutcome::Pending,
        }
        if self.consecutive_timeouts >= self.config.max_retries {
            self.deadline = None;
            return TimeoutOutcome::Abandoned;
        }
        self.consecutive_timeouts += 1;
        self.retries += 1;
        self.deadline = Some(now + self.config.timeout);
        TimeoutOutcome::Retransmit(self.unacked_in_window())
    }

    pub fn report(&self) -> TransferReport {
        TransferReport {
            session: self.session,
            frames: self.frame_count(),
            acked: self.acked_count,
            bytes: self.payload.len() as u32,
            retries: self.retries,
        }
    }

    pub fn exhausted_error(&self) -> TransferError {
        TransferError::RetriesExhausted {
            acked: self.acked_count,
            frames: self.frame_count(),
            retries: self.retries,
        }
    }
}

/// Receiving side: reassembles frames by offset and acknowledges each one,
/// duplicates included, since the sender may have missed the first ack
#[derive(Debug)]
pub struct ReceiveBuffer {
    session: u32,
    frame_len: usize,
    data: Vec<u8>,
    received: Vec<bool>,
    received_count: u32,
}

impl ReceiveBuffer {
    pub fn new(session: u32, file_length: u32, frames: u32) -> Result<Self, TransferError> {
        Self::with_frame_len(session, file_length, frames, FRAME_DATA_LEN)
    }

    /// The announced frame count must be exactly what `file_length` needs at
    /// `frame_len` bytes per frame
    pub fn with_frame_len(
        session: u32,
        file_length: u32,
        frames: u32,
        frame_len: usize,
    ) -> Result<Self, TransferError> {
        if file_length > MAX_TRANSFER_LEN {
            return Err(TransferError::TooLarge(u64::from(file_length)));
        }
        let frame_len = frame_len.max(1);
        let expected = frame_count(file_length as usize, frame_len);
        if frames != expected {
            return Err(TransferError::FrameCountMismatch {
                declared: frames,
                expected,
            });
        }
        Ok(Self {
            session,
            frame_len,
            data: vec![0; file_length as usize],
            received: vec![false; frames as usize],
            received_count: 0,
        })
    }

    pub fn accept(&mut self, frame: &DataFrame) -> Result<Ack, TransferError> {
        if frame.session != self.session {
            return Err(TransferError::WrongSession {
                expected: self.session,
                got: frame.session,
            });
        }
        let frames = self.received.len() as u32;
        if frame.seq >= frames {
            return Err(TransferError::OutOfRange {
                seq: frame.seq,
                frames,
            });
        }
        // Each sequence number owns one fixed span, so a full set of frames
        // covers every byte
        let start = frame.seq as usize * self.frame_len;
        let end = (start + self.frame_len).min(self.data.len());
        if frame.offset as usize != start || frame.data.len() != end - start {
            return Err(TransferError::Misplaced {
                seq: frame.seq,
                offset: frame.offset,
                len: frame.data.len(),
            });
        }

        let seen = &mut self.received[frame.seq as usize];
        if !*seen {
            *seen = true;
            self.received_count += 1;
            self.data[start..end].copy_from_slice(&frame.data);
        }
        Ok(Ack {
            session: self.session,
            seq: frame.seq,
        })
    }

    pub fn received_frames(&self) -> u32 {
        self.received_count
    }

    pub fn is_complete(&self) -> bool {
        self.received_count as usize == self.received.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
