//! Backup files written while receiving
//!
//! For a base path `flight` these are:
//!
//! - `flight.tlm`: every byte received, as received. This can be replayed.
//! - `flight.csv`: the [transcript](transcript) of the flight.
//! - `flight.txt`: optional. One line per frame with its hex dump, and
//!   whether it passed the integrity check.

#[cfg(test)]
pub(crate) mod testing;
pub mod transcript;

use std::{
    fmt::Debug,
    fs::File,
    io::{
        Seek,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
};

use chrono::Local;
use telemetry_radio::{
    DecoderState,
    TelemetryMap,
};

use crate::{
    backup::transcript::{
        Transcript,
        Truncate,
    },
    error::Error,
};

pub const TLM_EXTENSION: &str = "tlm";
pub const CSV_EXTENSION: &str = "csv";
pub const LOG_EXTENSION: &str = "txt";

#[derive(Clone, Debug)]
pub struct BackupOptions {
    /// Path of the backup files, without extension.
    pub path: PathBuf,
    /// Write the diagnostic log.
    pub diagnostic_log: bool,
}

impl BackupOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            diagnostic_log: false,
        }
    }

    pub fn tlm_path(&self) -> PathBuf {
        self.path.with_extension(TLM_EXTENSION)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.path.with_extension(CSV_EXTENSION)
    }

    pub fn log_path(&self) -> PathBuf {
        self.path.with_extension(LOG_EXTENSION)
    }
}

/// Anything a backup file can be written to.
pub trait BackupSink: Write + Seek + Truncate + Send + Debug {}

impl<T: Write + Seek + Truncate + Send + Debug> BackupSink for T {}

#[derive(Debug)]
pub struct BackupWriter {
    tlm: Box<dyn BackupSink>,
    transcript: Transcript<Box<dyn BackupSink>>,
    log: Option<Box<dyn BackupSink>>,
    previous_decoder_state: DecoderState,
}

impl BackupWriter {
    pub fn new(
        tlm: Box<dyn BackupSink>,
        csv: Box<dyn BackupSink>,
        log: Option<Box<dyn BackupSink>>,
    ) -> Self {
        Self {
            tlm,
            transcript: Transcript::new(csv),
            log,
            previous_decoder_state: DecoderState::Offline,
        }
    }

    /// Creates the backup files, overwriting existing ones.
    pub fn create(options: &BackupOptions) -> Result<Self, Error> {
        let tlm = create_file(&options.tlm_path())?;
        let csv = create_file(&options.csv_path())?;
        let log = options
            .diagnostic_log
            .then(|| create_file(&options.log_path()))
            .transpose()?;

        tracing::debug!(path = %options.path.display(), "created backup files");

        Ok(Self::new(
            Box::new(tlm),
            Box::new(csv),
            log.map(|log| Box::new(log) as Box<dyn BackupSink>),
        ))
    }

    /// Appends bytes to the binary backup.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.tlm.write_all(bytes)?;
        self.tlm.flush()?;
        Ok(())
    }

    /// Adds a line to the diagnostic log, if enabled.
    pub fn log_frame(&mut self, bytes: &[u8], passed: bool) -> Result<(), Error> {
        if let Some(log) = self.log.as_mut() {
            writeln!(
                log,
                "{} {:>3} {} {}",
                Local::now().format("%H:%M:%S%.3f"),
                bytes.len(),
                hex::encode(bytes),
                if passed { "PASS" } else { "FAIL" },
            )?;
            log.flush()?;
        }
        Ok(())
    }

    /// Writes decoded telemetry to the transcript.
    pub fn write_telemetry(
        &mut self,
        decoder_state: DecoderState,
        telemetry: &TelemetryMap,
    ) -> Result<(), Error> {
        let previous_decoder_state =
            std::mem::replace(&mut self.previous_decoder_state, decoder_state);
        if previous_decoder_state != decoder_state {
            tracing::debug!(
                from = %previous_decoder_state,
                to = %decoder_state,
                csv = ?self.transcript.state(),
                "transcript section change"
            );
        }

        self.transcript.write(decoder_state, telemetry)
    }
}

fn create_file(path: &Path) -> Result<File, Error> {
    File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| {
            Error::FileOpen {
                path: path.to_owned(),
                source,
            }
        })
}
