//! Frame synchronization and integrity checks
//!
//! The flight computer terminates every frame with the sync word
//! `A5 A5 A5 A5`. The 4 bytes immediately before the sync word are a CRC-32
//! over the payload:
//!
//! ```plain
//! | payload (n bytes) | crc32 (4 bytes, big-endian) | a5 a5 a5 a5 |
//! ```
//!
//! There is no escaping, so a sync word inside the payload (or the checksum)
//! ends the frame early. Such a frame fails the checksum and the reader
//! resynchronizes on the next sync word. A checksum ending in `a5` is
//! recognized as long as the whole run of `a5` bytes has been received: the
//! frame ends with the last byte of the run.

use std::{
    fmt::Debug,
    io::{
        ErrorKind,
        Read,
    },
};

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};

/// Marker terminating every frame.
pub const SYNC_WORD: [u8; 4] = [0xa5; 4];

/// Maximum length of a frame, including checksum and sync word.
pub const MAX_FRAME_LENGTH: usize = 74;

/// Length of the frame checksum
pub const CHECKSUM_LENGTH: usize = 4;

/// Bytes following the payload in every frame.
pub const TRAILER_LENGTH: usize = CHECKSUM_LENGTH + SYNC_WORD.len();

/// CRC-32/ISO-HDLC, same as zlib's `crc32`.
pub const CRC_32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// this can be larger for more efficient reads, although the underlying reader
/// is probably buffered.
const RECEIVE_BUFFER_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("frame of {length} bytes is too short to contain a checksum")]
    TooShort { length: usize },

    #[error("checksum mismatch: calculated {calculated:02x?}, received {received:02x?}")]
    ChecksumMismatch {
        calculated: [u8; CHECKSUM_LENGTH],
        received: [u8; CHECKSUM_LENGTH],
    },
}

/// Calculates the checksum the flight computer sends for `payload`.
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    CRC_32.checksum(payload).to_be_bytes()
}

/// A frame as received, including checksum and sync word.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Wraps raw frame bytes. These should end with the [`SYNC_WORD`].
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Builds a frame around `payload`, the way the flight computer does.
    pub fn encode(payload: &[u8]) -> Self {
        let mut bytes = BytesMut::with_capacity(payload.len() + TRAILER_LENGTH);
        bytes.put_slice(payload);
        bytes.put_slice(&checksum(payload));
        bytes.put_slice(&SYNC_WORD);
        Self {
            bytes: bytes.freeze(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The frame without checksum and sync word.
    pub fn payload(&self) -> Option<&[u8]> {
        let end = self.bytes.len().checked_sub(TRAILER_LENGTH)?;
        Some(&self.bytes[..end])
    }

    /// The checksum as sent by the flight computer.
    pub fn received_checksum(&self) -> Option<[u8; CHECKSUM_LENGTH]> {
        let start = self.bytes.len().checked_sub(TRAILER_LENGTH)?;
        self.bytes[start..start + CHECKSUM_LENGTH].try_into().ok()
    }

    /// Checks the payload against the received checksum and returns the
    /// payload if they match.
    pub fn verify(&self) -> Result<&[u8], IntegrityError> {
        let length = self.len();
        let (Some(payload), Some(received)) = (self.payload(), self.received_checksum())
        else {
            return Err(IntegrityError::TooShort { length });
        };

        let calculated = checksum(payload);
        if calculated == received {
            Ok(payload)
        }
        else {
            Err(IntegrityError::ChecksumMismatch {
                calculated,
                received,
            })
        }
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({:02x?})", &self.bytes[..])
    }
}

/// What a single [`FrameReader::read_frame`] call produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadEvent {
    /// Bytes up to and including a sync word.
    Frame(Frame),

    /// Bytes that were discarded, because no sync word was found within
    /// [`MAX_FRAME_LENGTH`] bytes, or the stream ended without one.
    Truncated(Bytes),

    /// The source timed out without producing data. Try again later.
    Idle,

    /// The source is exhausted.
    Eof,
}

/// Splits a byte stream into frames.
///
/// Reads from sources with a read timeout (e.g. serial ports) that return
/// [`ErrorKind::TimedOut`] or [`ErrorKind::WouldBlock`] are reported as
/// [`ReadEvent::Idle`]. Partially received frames are kept until the next
/// call.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    eof: bool,
}

impl<R> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(2 * MAX_FRAME_LENGTH),
            eof: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Number of bytes received that don't belong to a frame yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_buffered(&mut self) -> Option<ReadEvent> {
        let window = &self.buffer[..self.buffer.len().min(MAX_FRAME_LENGTH)];

        if let Some(position) = find_sync_word(window) {
            let bytes = self.buffer.split_to(position + SYNC_WORD.len()).freeze();
            return Some(ReadEvent::Frame(Frame { bytes }));
        }

        if self.buffer.len() >= MAX_FRAME_LENGTH {
            let bytes = self.buffer.split_to(MAX_FRAME_LENGTH).freeze();
            tracing::debug!(length = bytes.len(), "no sync word within maximum frame length");
            return Some(ReadEvent::Truncated(bytes));
        }

        None
    }
}

impl<R: Read> FrameReader<R> {
    /// Reads until a frame is complete, the source times out, or the source
    /// is exhausted.
    pub fn read_frame(&mut self) -> Result<ReadEvent, std::io::Error> {
        let mut receive_buffer = [0u8; RECEIVE_BUFFER_SIZE];

        loop {
            if let Some(event) = self.next_buffered() {
                return Ok(event);
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(ReadEvent::Eof);
                }
                let bytes = self.buffer.split().freeze();
                tracing::debug!(length = bytes.len(), "stream ended inside a frame");
                return Ok(ReadEvent::Truncated(bytes));
            }

            match self.reader.read(&mut receive_buffer) {
                Ok(0) => self.eof = true,
                Ok(num_bytes_read) => {
                    tracing::trace!(num_bytes_read, "received");
                    self.buffer.put_slice(&receive_buffer[..num_bytes_read]);
                }
                Err(error) if matches!(error.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(ReadEvent::Idle);
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<ReadEvent, std::io::Error>;

    /// Yields frames and truncated chunks until the end of the stream. Idle
    /// reads are not yielded, they end the iteration just like EOF does.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_frame() {
            Ok(ReadEvent::Eof | ReadEvent::Idle) => None,
            result => Some(result),
        }
    }
}

fn find_sync_word(haystack: &[u8]) -> Option<usize> {
    let position = haystack
        .windows(SYNC_WORD.len())
        .position(|window| window == SYNC_WORD)?;

    // only checksum bytes can be part of the run
    let run = haystack[position + SYNC_WORD.len()..]
        .iter()
        .take(CHECKSUM_LENGTH)
        .take_while(|byte| **byte == SYNC_WORD[0])
        .count();

    Some(position + run)
}
