//! # Rocket telemetry ground receiver
//!
//! Receives telemetry from a flight computer through a serial radio bridge,
//! or replays it from backup files, and turns it into [`Message`]s.
//!
//! ```no_run
//! # fn main() -> Result<(), rocket_telemetry::Error> {
//! use rocket_telemetry::{
//!     BackupOptions,
//!     Reader,
//!     ReaderOptions,
//!     SerialOptions,
//!     Source,
//! };
//!
//! let (mut reader, mut messages) = Reader::new(ReaderOptions {
//!     backup: Some(BackupOptions::new("flight")),
//!     ..Default::default()
//! });
//! reader.start(Source::Serial(SerialOptions::new("/dev/ttyUSB0")))?;
//!
//! while reader.is_running() {
//!     for message in messages.drain() {
//!         println!("{}: {:?}", message.decoder_state, message.telemetry);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod card;
pub mod error;
pub mod modifier;
pub mod reader;
pub mod stats;

pub use telemetry_radio;

pub use crate::{
    backup::BackupOptions,
    error::Error,
    modifier::Modifiers,
    reader::{
        Message,
        MessageReceiver,
        Pacing,
        Reader,
        ReaderOptions,
        SerialOptions,
        Source,
        available_ports,
    },
    stats::StatisticsSnapshot,
};
