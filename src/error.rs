use std::path::PathBuf;

use telemetry_radio::{
    DecodeError,
    DecoderState,
    IntegrityError,
};

use crate::backup::transcript::CsvSavingState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no sync word found in {length} bytes")]
    FrameTruncated { length: usize },

    #[error("frame failed integrity check")]
    ChecksumMismatch(#[from] IntegrityError),

    #[error("could not decode payload")]
    DecodeShape(#[from] DecodeError),

    #[error("backup file i/o error")]
    FileIo(#[from] std::io::Error),

    #[error("could not write CSV record")]
    Csv(#[from] csv::Error),

    #[error("could not open serial port {port}")]
    PortOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("could not list serial ports")]
    ListPorts(#[source] serialport::Error),

    #[error("could not open file: {}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup would overwrite the file being replayed: {}", path.display())]
    BackupOverwritesSource { path: PathBuf },

    #[error("reading from source failed")]
    SourceRead(#[source] std::io::Error),

    #[error("transcript can't go from {from:?} to {to}")]
    ForbiddenTransition {
        from: CsvSavingState,
        to: DecoderState,
    },

    #[error("reader is already running")]
    AlreadyRunning,
}
