//! Background readers
//!
//! A [`Reader`] runs one session at a time on its own thread. The session
//! reads from a [`Source`], decodes what it reads and sends a [`Message`] for
//! every frame (or SD-card line) that produced telemetry.

mod serial;
mod session;

use std::{
    fs::File,
    io::{
        BufReader,
        Read,
    },
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    thread,
    time::Duration,
};

use chrono::{
    DateTime,
    Local,
};
use parking_lot::RwLock;
use serde::Serialize;
use telemetry_radio::{
    DecoderState,
    FrameReader,
    TelemetryMap,
};
use tokio::sync::mpsc;

pub use crate::reader::serial::{
    BAUD_RATES,
    DEFAULT_BAUD_RATE,
    DEFAULT_TIMEOUT,
    SerialOptions,
    available_ports,
};
use crate::{
    backup::{
        BackupOptions,
        BackupWriter,
    },
    error::Error,
    modifier::Modifiers,
    reader::session::{
        Input,
        Session,
    },
    stats::{
        Statistics,
        StatisticsSnapshot,
    },
};

/// Interval the flight computer sends telemetry at.
pub const TLM_INTERVAL: Duration = Duration::from_millis(200);

/// Telemetry decoded from a single frame.
#[derive(Clone, Debug, Serialize)]
pub struct Message {
    pub telemetry: TelemetryMap,
    pub decoder_state: DecoderState,
    pub local_time: DateTime<Local>,
    /// Number of bytes the telemetry was decoded from.
    pub frame_size: usize,
}

/// How fast files are replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pacing {
    /// As fast as possible
    #[default]
    Off,
    /// Wait this long after every frame.
    Interval(Duration),
    /// Wait as long as the timestamps in the telemetry say.
    Timestamps,
}

#[derive(Clone, Debug)]
pub enum Source {
    /// Radio telemetry from a serial port
    Serial(SerialOptions),
    /// Replay of a binary backup (`.tlm`)
    RadioFile { path: PathBuf, pacing: Pacing },
    /// Replay of an SD-card transcript
    CardFile { path: PathBuf, pacing: Pacing },
}

#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    /// Where to back up radio telemetry, received or replayed. SD-card
    /// transcripts are never backed up.
    pub backup: Option<BackupOptions>,
    pub modifiers: Modifiers,
}

/// Receiving half of a [`Reader`]'s message queue.
#[derive(Debug)]
pub struct MessageReceiver {
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl MessageReceiver {
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Returns all messages that are queued right now.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[derive(Debug)]
pub struct Reader {
    options: ReaderOptions,
    messages: mpsc::UnboundedSender<Message>,
    running: Arc<AtomicBool>,
    statistics: Arc<Statistics>,
    decoder_state: Arc<RwLock<DecoderState>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Reader {
    pub fn new(options: ReaderOptions) -> (Self, MessageReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let reader = Self {
            options,
            messages: sender,
            running: Default::default(),
            statistics: Default::default(),
            decoder_state: Default::default(),
            thread: None,
        };
        (reader, MessageReceiver { receiver })
    }

    /// Starts a new session reading from `source`.
    ///
    /// The source (and backup files) are opened before this returns, so
    /// failing to open them is reported here.
    pub fn start(&mut self, source: Source) -> Result<(), Error> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        // reap the last session, if it ended by itself
        self.stop();

        tracing::debug!(?source, "starting reader");

        let (input, backup) = match source {
            Source::Serial(serial) => {
                let frames = FrameReader::new(serial.open()?);
                (
                    Input::Radio {
                        frames,
                        pacing: Pacing::Off,
                    },
                    self.create_backup()?,
                )
            }
            Source::RadioFile { path, pacing } => {
                if let Some(backup) = &self.options.backup {
                    if same_file(&path, &backup.tlm_path()) {
                        return Err(Error::BackupOverwritesSource { path });
                    }
                }
                let file = open_file(path)?;
                (
                    Input::Radio {
                        frames: FrameReader::new(
                            Box::new(BufReader::new(file)) as Box<dyn Read + Send>
                        ),
                        pacing,
                    },
                    self.create_backup()?,
                )
            }
            Source::CardFile { path, pacing } => {
                let file = open_file(path)?;
                (
                    Input::Card {
                        lines: BufReader::new(file),
                        pacing,
                    },
                    None,
                )
            }
        };

        let session = Session::new(self.options.modifiers, backup, self.messages.clone());
        self.running = session.running();
        self.statistics = session.statistics();
        self.decoder_state = session.decoder_state();
        self.thread = Some(session.spawn(input));

        Ok(())
    }

    fn create_backup(&self) -> Result<Option<BackupWriter>, Error> {
        self.options
            .backup
            .as_ref()
            .map(BackupWriter::create)
            .transpose()
    }

    /// Stops the running session and waits for it to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("reader thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Counters of the current (or last) session.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn decoder_state(&self) -> DecoderState {
        *self.decoder_state.read()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_file(path: PathBuf) -> Result<File, Error> {
    File::open(&path).map_err(|source| Error::FileOpen { path, source })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
