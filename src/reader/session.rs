use std::{
    fs::File,
    io::{
        BufRead,
        BufReader,
        Read,
    },
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

use chrono::Local;
use parking_lot::RwLock;
use telemetry_radio::{
    Decoder,
    DecoderState,
    Frame,
    FrameReader,
    ReadEvent,
    TelemetryMap,
    Value,
    record::merge_records,
};
use tokio::sync::mpsc;

use crate::{
    backup::BackupWriter,
    card::CardDecoder,
    error::Error,
    modifier::Modifiers,
    reader::{
        Message,
        Pacing,
    },
    stats::Statistics,
};

/// How long to wait before polling an idle source again.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) enum Input {
    Radio {
        frames: FrameReader<Box<dyn Read + Send>>,
        pacing: Pacing,
    },
    Card {
        lines: BufReader<File>,
        pacing: Pacing,
    },
}

/// State of a single run of a reader thread.
pub(crate) struct Session {
    decoder: Decoder,
    modifiers: Modifiers,
    backup: Option<BackupWriter>,
    statistics: Arc<Statistics>,
    decoder_state: Arc<RwLock<DecoderState>>,
    running: Arc<AtomicBool>,
    messages: mpsc::UnboundedSender<Message>,
}

impl Session {
    pub fn new(
        modifiers: Modifiers,
        backup: Option<BackupWriter>,
        messages: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            decoder: Decoder::new(),
            modifiers,
            backup,
            statistics: Default::default(),
            decoder_state: Default::default(),
            running: Arc::new(AtomicBool::new(true)),
            messages,
        }
    }

    pub fn statistics(&self) -> Arc<Statistics> {
        self.statistics.clone()
    }

    pub fn decoder_state(&self) -> Arc<RwLock<DecoderState>> {
        self.decoder_state.clone()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn spawn(self, input: Input) -> thread::JoinHandle<()> {
        thread::spawn(move || self.run(input))
    }

    pub fn run(mut self, input: Input) {
        match input {
            Input::Radio { mut frames, pacing } => {
                let _guard = tracing::debug_span!("radio session").entered();
                tracing::debug!(?pacing, "session started");
                self.run_radio(&mut frames, pacing);
            }
            Input::Card { lines, pacing } => {
                let _guard = tracing::debug_span!("card session").entered();
                tracing::debug!(?pacing, "session started");
                self.run_card(lines, pacing);
            }
        }

        self.running.store(false, Ordering::Relaxed);
        tracing::debug!(statistics = ?self.statistics.snapshot(), "session ended");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn run_radio<R: Read>(&mut self, frames: &mut FrameReader<R>, pacing: Pacing) {
        let mut last_flight_time = None;

        while self.is_running() {
            let message = match frames.read_frame() {
                Ok(ReadEvent::Frame(frame)) => self.receive_frame(&frame),
                Ok(ReadEvent::Truncated(bytes)) => {
                    self.receive_truncated(&bytes);
                    None
                }
                Ok(ReadEvent::Idle) => {
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
                Ok(ReadEvent::Eof) => {
                    tracing::debug!("end of stream");
                    break;
                }
                Err(error) => {
                    let error = Error::SourceRead(error);
                    tracing::error!(?error, "read failed");
                    break;
                }
            };

            let delay = match pacing {
                Pacing::Off => None,
                Pacing::Interval(interval) => Some(interval),
                Pacing::Timestamps => {
                    message
                        .as_ref()
                        .and_then(|message| flight_time(&message.telemetry))
                        .and_then(|flight_time| {
                            let delay = flight_time_delay(last_flight_time, flight_time);
                            last_flight_time = Some(flight_time);
                            delay
                        })
                }
            };

            if let Some(message) = message {
                if !self.send(message) {
                    break;
                }
            }

            if let Some(delay) = delay {
                self.sleep(delay);
            }
        }
    }

    fn receive_frame(&mut self, frame: &Frame) -> Option<Message> {
        self.statistics.add_bytes_received(frame.len());
        self.backup(|backup| backup.write_raw(frame.as_bytes()));

        match self.decode_frame(frame) {
            Ok(message) => Some(message),
            Err(error) => {
                self.statistics.add_bad_packet(frame.len());
                tracing::debug!(?error, ?frame, "dropping frame");
                None
            }
        }
    }

    fn decode_frame(&mut self, frame: &Frame) -> Result<Message, Error> {
        let verified = frame.verify();
        self.backup(|backup| backup.log_frame(frame.as_bytes(), verified.is_ok()));
        let payload = verified?;

        let records = self.decoder.decode(payload)?;
        let decoder_state = self.decoder.state();
        *self.decoder_state.write() = decoder_state;
        self.statistics.add_messages_decoded(records.len());

        let telemetry = self.modifiers.modify(merge_records(&records));
        self.backup(|backup| backup.write_telemetry(decoder_state, &telemetry));

        Ok(Message {
            telemetry,
            decoder_state,
            local_time: Local::now(),
            frame_size: frame.len(),
        })
    }

    fn receive_truncated(&mut self, bytes: &[u8]) {
        self.statistics.add_bytes_received(bytes.len());
        self.statistics.add_bad_packet(bytes.len());
        self.backup(|backup| {
            backup.write_raw(bytes)?;
            backup.log_frame(bytes, false)
        });

        let error = Error::FrameTruncated {
            length: bytes.len(),
        };
        tracing::debug!(?error, "dropping bytes");
    }

    fn run_card<R: BufRead>(&mut self, mut lines: R, pacing: Pacing) {
        let mut decoder = CardDecoder::new();
        let mut last_time = None;
        let mut line = vec![];

        while self.is_running() {
            line.clear();
            match lines.read_until(b'\n', &mut line) {
                Ok(0) => {
                    tracing::debug!("end of file");
                    break;
                }
                Ok(num_bytes_read) => {
                    self.statistics.add_bytes_received(num_bytes_read);
                    self.statistics.add_messages_decoded(1);
                }
                Err(error) => {
                    let error = Error::SourceRead(error);
                    tracing::error!(?error, "read failed");
                    break;
                }
            }

            let Some(telemetry) = decoder.decode_line(&String::from_utf8_lossy(&line))
            else {
                continue;
            };

            let decoder_state = decoder.state();
            *self.decoder_state.write() = decoder_state;
            let telemetry = self.modifiers.modify(telemetry);

            let delay = match pacing {
                Pacing::Off => None,
                Pacing::Interval(interval) => Some(interval),
                Pacing::Timestamps => {
                    telemetry
                        .get("time")
                        .and_then(Value::as_f64)
                        .and_then(|time| {
                            let delay = last_time
                                .map(|last: f64| time - last)
                                .filter(|seconds| *seconds > 0.0)
                                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());
                            last_time = Some(time);
                            delay
                        })
                }
            };

            let message = Message {
                telemetry,
                decoder_state,
                local_time: Local::now(),
                frame_size: line.len(),
            };
            if !self.send(message) {
                break;
            }

            if let Some(delay) = delay {
                self.sleep(delay);
            }
        }
    }

    /// Returns `false` if nobody is listening anymore.
    fn send(&self, message: Message) -> bool {
        if self.messages.send(message).is_err() {
            tracing::debug!("message receiver dropped");
            false
        }
        else {
            true
        }
    }

    /// Sleeps, but wakes up early when the session is stopped.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn backup(&mut self, f: impl FnOnce(&mut BackupWriter) -> Result<(), Error>) {
        let Some(backup) = &mut self.backup
        else {
            return;
        };

        match f(backup) {
            Ok(()) => {}
            Err(error @ Error::ForbiddenTransition { .. }) => {
                tracing::warn!(%error, "transcript ended");
            }
            Err(error) => {
                self.statistics.add_file_io_error();
                tracing::error!(?error, "backup write failed");
            }
        }
    }
}

/// Time between two flight timestamps.
///
/// The flight time wraps around, so a small step backwards looks like a huge
/// step forward. Steps of more than half the range are taken as the flight
/// time starting over (e.g. a second flight) and don't delay.
fn flight_time_delay(last: Option<u16>, flight_time: u16) -> Option<Duration> {
    let milliseconds = flight_time.wrapping_sub(last?);
    (milliseconds <= u16::MAX / 2).then(|| Duration::from_millis(milliseconds.into()))
}

fn flight_time(telemetry: &TelemetryMap) -> Option<u16> {
    telemetry
        .get("flight_time")
        .and_then(Value::as_i64)
        .and_then(|flight_time| u16::try_from(flight_time).ok())
}
