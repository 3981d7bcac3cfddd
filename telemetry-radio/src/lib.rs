//! # Telemetry radio protocol
//!
//! Framing, integrity checks and payload decoding for the telemetry stream a
//! rocket flight computer sends over its radio link.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use telemetry_radio::{
//!     Decoder,
//!     FrameReader,
//!     ReadEvent,
//! };
//!
//! let file = std::fs::File::open("flight.tlm")?;
//! let mut decoder = Decoder::new();
//!
//! for event in FrameReader::new(file) {
//!     if let ReadEvent::Frame(frame) = event? {
//!         let payload = frame.verify()?;
//!         let (telemetry, _) = decoder.decode_telemetry(payload)?;
//!         println!("{}: {telemetry:?}", decoder.state());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod frame;
pub mod record;
pub mod telemetry;
mod util;

pub use crate::{
    decoder::Decoder,
    frame::{
        Frame,
        FrameReader,
        IntegrityError,
        MAX_FRAME_LENGTH,
        ReadEvent,
        SYNC_WORD,
    },
    record::{
        DecodeError,
        Record,
        RecordShape,
    },
    telemetry::{
        DecoderState,
        TelemetryMap,
        Value,
    },
};
