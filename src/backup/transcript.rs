//! The CSV transcript of a flight.
//!
//! The transcript has up to 3 sections, each with its own header: preflight,
//! in-flight and postflight. The flight computer repeats preflight and
//! postflight reports, and only the latest one is worth keeping, so those
//! sections are rewritten in place: the writer remembers where the section's
//! row starts, and truncates the file there before writing the new row.
//!
//! Once the postflight section was started, the transcript is finished.
//! Anything but another postflight report ends it for good.

use std::{
    fs::File,
    io::{
        Cursor,
        Seek,
        SeekFrom,
        Write,
    },
};

use chrono::Local;
use telemetry_radio::{
    DecoderState,
    TelemetryMap,
    record::{
        InFlightMetadata,
        PostFlightRecord,
        PreFlightRecord,
        SampleRecord,
    },
};

use crate::error::Error;

/// Sinks that can be cut off at some length.
pub trait Truncate {
    fn truncate(&mut self, length: u64) -> Result<(), std::io::Error>;
}

impl Truncate for File {
    fn truncate(&mut self, length: u64) -> Result<(), std::io::Error> {
        self.set_len(length)
    }
}

impl<T: Truncate + ?Sized> Truncate for Box<T> {
    fn truncate(&mut self, length: u64) -> Result<(), std::io::Error> {
        (**self).truncate(length)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, length: u64) -> Result<(), std::io::Error> {
        let length = usize::try_from(length).map_err(std::io::Error::other)?;
        self.get_mut().truncate(length);
        Ok(())
    }
}

/// Which section of the transcript is being written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CsvSavingState {
    #[default]
    Offline,
    PreFlight,
    InFlight,
    PostFlight,
    /// Nothing will be written anymore.
    Ended,
}

/// What to do with the transcript when a record for some [`DecoderState`]
/// arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscriptAction {
    /// Truncate the transcript to nothing, then write the preflight header
    /// and row.
    StartPreFlight,
    /// Replace the last preflight row.
    RewritePreFlight,
    /// Write the in-flight header and a row.
    StartInFlight,
    AppendRow,
    /// Write the postflight header and a row.
    StartPostFlight,
    /// Replace the last postflight row.
    RewritePostFlight,
    /// Record isn't written.
    Skip,
    /// The transcript ends without writing this record.
    End,
}

impl TranscriptAction {
    pub fn next(from: CsvSavingState, to: DecoderState) -> Self {
        use CsvSavingState as Csv;
        use DecoderState as Decoder;

        match (from, to) {
            (Csv::Ended, _) => Self::Skip,
            (Csv::PostFlight, Decoder::PostFlight) => Self::RewritePostFlight,
            (Csv::PostFlight, _) => Self::End,
            (
                _,
                Decoder::Offline
                | Decoder::Error
                | Decoder::Launch
                | Decoder::Land
                | Decoder::Maxes,
            ) => Self::Skip,
            (Csv::Offline | Csv::InFlight, Decoder::PreFlight) => Self::StartPreFlight,
            (Csv::PreFlight, Decoder::PreFlight) => Self::RewritePreFlight,
            (Csv::Offline | Csv::PreFlight, Decoder::InFlight) => Self::StartInFlight,
            (Csv::InFlight, Decoder::InFlight) => Self::AppendRow,
            (Csv::Offline | Csv::PreFlight | Csv::InFlight, Decoder::PostFlight) => {
                Self::StartPostFlight
            }
        }
    }

    /// The state after taking this action.
    pub fn saving_state(&self, from: CsvSavingState) -> CsvSavingState {
        match self {
            Self::StartPreFlight | Self::RewritePreFlight => CsvSavingState::PreFlight,
            Self::StartInFlight | Self::AppendRow => CsvSavingState::InFlight,
            Self::StartPostFlight | Self::RewritePostFlight => CsvSavingState::PostFlight,
            Self::Skip => from,
            Self::End => CsvSavingState::Ended,
        }
    }
}

pub fn preflight_header() -> Vec<&'static str> {
    let mut header = PreFlightRecord::KEYS.to_vec();
    header.extend(["date", "time"]);
    header
}

pub fn inflight_header() -> Vec<&'static str> {
    let mut header = SampleRecord::KEYS.to_vec();
    header.extend(InFlightMetadata::KEYS);
    header
}

pub fn postflight_header() -> Vec<&'static str> {
    PostFlightRecord::KEYS.to_vec()
}

#[derive(Debug)]
pub struct Transcript<W> {
    sink: W,
    state: CsvSavingState,
    preflight_record_offset: u64,
    postflight_record_offset: u64,
}

impl<W> Transcript<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            state: CsvSavingState::default(),
            preflight_record_offset: 0,
            postflight_record_offset: 0,
        }
    }

    pub fn state(&self) -> CsvSavingState {
        self.state
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write + Seek + Truncate> Transcript<W> {
    /// Writes the telemetry of a record that put the decoder into
    /// `decoder_state`.
    ///
    /// Returns [`Error::ForbiddenTransition`] once, when the transcript
    /// ends. If writing fails, whatever was written for this record is cut
    /// off again and the transcript stays in the state it was in.
    pub fn write(
        &mut self,
        decoder_state: DecoderState,
        telemetry: &TelemetryMap,
    ) -> Result<(), Error> {
        let from = self.state;
        let action = TranscriptAction::next(from, decoder_state);
        tracing::trace!(?from, to = %decoder_state, ?action, "transcript transition");

        let mut rows = Rows::new();
        let mut record_offset = None;
        let offset = match action {
            TranscriptAction::StartPreFlight => {
                rows.push(preflight_header())?;
                record_offset = Some(rows.len()?);
                rows.push(preflight_row(telemetry))?;
                0
            }
            TranscriptAction::RewritePreFlight => {
                rows.push(preflight_row(telemetry))?;
                self.preflight_record_offset
            }
            TranscriptAction::StartInFlight => {
                rows.push(inflight_header())?;
                rows.push(row_values(&inflight_header(), telemetry))?;
                self.sink.stream_position()?
            }
            TranscriptAction::AppendRow => {
                rows.push(row_values(&inflight_header(), telemetry))?;
                self.sink.stream_position()?
            }
            TranscriptAction::StartPostFlight => {
                let offset = self.sink.stream_position()?;
                rows.push(postflight_header())?;
                record_offset = Some(offset + rows.len()?);
                rows.push(row_values(&postflight_header(), telemetry))?;
                offset
            }
            TranscriptAction::RewritePostFlight => {
                rows.push(row_values(&postflight_header(), telemetry))?;
                self.postflight_record_offset
            }
            TranscriptAction::Skip => return Ok(()),
            TranscriptAction::End => {
                self.state = CsvSavingState::Ended;
                return Err(Error::ForbiddenTransition {
                    from,
                    to: decoder_state,
                });
            }
        };

        if let Err(error) = self.write_at(offset, &rows.into_bytes()?) {
            if let Err(error) = self.cut(offset) {
                tracing::warn!(?error, offset, "could not cut off partial write");
            }
            return Err(error);
        }

        match (action, record_offset) {
            (TranscriptAction::StartPreFlight, Some(offset)) => {
                self.preflight_record_offset = offset;
            }
            (TranscriptAction::StartPostFlight, Some(offset)) => {
                self.postflight_record_offset = offset;
            }
            _ => {}
        }
        self.state = action.saving_state(from);
        Ok(())
    }

    /// Replaces everything from `offset` on with `bytes`.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), Error> {
        self.cut(offset)?;
        self.sink.write_all(bytes)?;
        self.sink.flush()?;
        Ok(())
    }

    fn cut(&mut self, offset: u64) -> Result<(), Error> {
        self.sink.seek(SeekFrom::Start(offset))?;
        self.sink.truncate(offset)?;
        Ok(())
    }
}

/// CSV rows rendered in memory, so they reach the sink in a single write.
struct Rows {
    writer: csv::Writer<Vec<u8>>,
}

impl Rows {
    fn new() -> Self {
        Self {
            writer: csv::WriterBuilder::new().flexible(true).from_writer(vec![]),
        }
    }

    fn push<I>(&mut self, record: I) -> Result<(), Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.writer.write_record(record)?;
        Ok(())
    }

    /// Number of bytes rendered so far.
    fn len(&mut self) -> Result<u64, Error> {
        self.writer.flush()?;
        Ok(self.writer.get_ref().len() as u64)
    }

    fn into_bytes(self) -> Result<Vec<u8>, Error> {
        self.writer
            .into_inner()
            .map_err(|error| Error::FileIo(error.into_error()))
    }
}

fn preflight_row(telemetry: &TelemetryMap) -> Vec<String> {
    let now = Local::now();
    let mut row = row_values(PreFlightRecord::KEYS, telemetry);
    row.push(now.format("%Y-%m-%d").to_string());
    row.push(now.format("%H:%M:%S").to_string());
    row
}

/// Missing fields are written as empty cells.
fn row_values(keys: &[&str], telemetry: &TelemetryMap) -> Vec<String> {
    keys.iter()
        .map(|key| {
            telemetry
                .get(key)
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use telemetry_radio::{
        DecoderState,
        TelemetryMap,
    };

    use crate::{
        backup::{
            testing::FailingSink,
            transcript::{
                CsvSavingState,
                Transcript,
                TranscriptAction,
                inflight_header,
                postflight_header,
                preflight_header,
            },
        },
        error::Error,
    };

    fn preflight(satellites: i64) -> TelemetryMap {
        let mut telemetry = TelemetryMap::new();
        telemetry.insert("event", 0u8);
        telemetry.insert("gnss_fix", true);
        telemetry.insert("rocket_name", "Kestrel");
        telemetry.insert("satellites", satellites);
        telemetry
    }

    fn inflight(flight_time: i64) -> TelemetryMap {
        [("event", 1), ("flight_time", flight_time), ("altitude", 100)]
            .into_iter()
            .collect()
    }

    fn postflight(max_altitude: i64) -> TelemetryMap {
        [("event", 26), ("max_altitude", max_altitude)]
            .into_iter()
            .collect()
    }

    fn rows(transcript: Transcript<Cursor<Vec<u8>>>) -> Vec<Vec<String>> {
        parse_rows(&transcript.into_inner().into_inner())
    }

    fn parse_rows(bytes: &[u8]) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes)
            .records()
            .map(|record| record.unwrap().iter().map(ToOwned::to_owned).collect())
            .collect()
    }

    #[test]
    fn it_allows_only_postflight_after_postflight() {
        for to in [
            DecoderState::Offline,
            DecoderState::PreFlight,
            DecoderState::InFlight,
            DecoderState::Error,
            DecoderState::Maxes,
        ] {
            assert_eq!(TranscriptAction::next(CsvSavingState::PostFlight, to), TranscriptAction::End);
        }
        assert_eq!(
            TranscriptAction::next(CsvSavingState::PostFlight, DecoderState::PostFlight),
            TranscriptAction::RewritePostFlight
        );
        assert_eq!(
            TranscriptAction::next(CsvSavingState::Ended, DecoderState::PostFlight),
            TranscriptAction::Skip
        );
        assert_eq!(
            TranscriptAction::next(CsvSavingState::InFlight, DecoderState::Error),
            TranscriptAction::Skip
        );
    }

    #[test]
    fn it_keeps_only_the_last_preflight_report() {
        let mut transcript = Transcript::new(Cursor::new(vec![]));
        transcript.write(DecoderState::PreFlight, &preflight(3)).unwrap();
        transcript.write(DecoderState::PreFlight, &preflight(7)).unwrap();

        let rows = rows(transcript);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], preflight_header());
        assert_eq!(rows[1].len(), preflight_header().len());
        assert_eq!(rows[1][0], "0");
        assert_eq!(rows[1][1], "true");
        assert_eq!(rows[1][3], "Kestrel");
        assert_eq!(rows[1][8], "7");
    }

    #[test]
    fn it_keeps_only_the_last_postflight_report() {
        let mut transcript = Transcript::new(Cursor::new(vec![]));
        transcript.write(DecoderState::InFlight, &inflight(100)).unwrap();
        transcript.write(DecoderState::PostFlight, &postflight(1000)).unwrap();
        transcript.write(DecoderState::PostFlight, &postflight(1200)).unwrap();
        transcript.write(DecoderState::PostFlight, &postflight(1500)).unwrap();

        let rows = rows(transcript);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2], postflight_header());
        assert_eq!(rows[3][0], "26");
        assert_eq!(rows[3][1], "1500");
    }

    #[test]
    fn it_writes_a_whole_flight() {
        let mut transcript = Transcript::new(Cursor::new(vec![]));
        transcript.write(DecoderState::PreFlight, &preflight(3)).unwrap();
        transcript.write(DecoderState::PreFlight, &preflight(4)).unwrap();
        for flight_time in [100, 150, 200] {
            transcript
                .write(DecoderState::InFlight, &inflight(flight_time))
                .unwrap();
        }
        transcript.write(DecoderState::PostFlight, &postflight(1500)).unwrap();
        assert_eq!(transcript.state(), CsvSavingState::PostFlight);

        let rows = rows(transcript);
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0], preflight_header());
        assert_eq!(rows[1][8], "4");
        assert_eq!(rows[2], inflight_header());
        assert_eq!(
            rows[3..6]
                .iter()
                .map(|row| row[1].as_str())
                .collect::<Vec<_>>(),
            ["100", "150", "200"]
        );
        assert_eq!(rows[6], postflight_header());
        assert_eq!(rows[7][1], "1500");
    }

    #[test]
    fn it_ends_after_leaving_postflight() {
        let mut transcript = Transcript::new(Cursor::new(vec![]));
        transcript.write(DecoderState::PostFlight, &postflight(1500)).unwrap();

        assert!(matches!(
            transcript.write(DecoderState::InFlight, &inflight(100)),
            Err(Error::ForbiddenTransition {
                from: CsvSavingState::PostFlight,
                to: DecoderState::InFlight,
            })
        ));
        assert_eq!(transcript.state(), CsvSavingState::Ended);

        // reported once, then silently skipped
        transcript.write(DecoderState::PostFlight, &postflight(1600)).unwrap();
        transcript.write(DecoderState::InFlight, &inflight(200)).unwrap();

        let rows = rows(transcript);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], "1500");
    }

    #[test]
    fn it_restarts_when_the_flight_computer_goes_back_to_preflight() {
        let mut transcript = Transcript::new(Cursor::new(vec![]));
        transcript.write(DecoderState::PreFlight, &preflight(3)).unwrap();
        transcript.write(DecoderState::InFlight, &inflight(100)).unwrap();
        transcript.write(DecoderState::PreFlight, &preflight(9)).unwrap();

        let rows = rows(transcript);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], preflight_header());
        assert_eq!(rows[1][8], "9");
    }

    #[test]
    fn it_leaves_nothing_behind_when_a_write_fails() {
        let sink = FailingSink::failing_on(2);
        let mut transcript = Transcript::new(sink.clone());
        transcript.write(DecoderState::PreFlight, &preflight(3)).unwrap();

        assert!(matches!(
            transcript.write(DecoderState::InFlight, &inflight(100)),
            Err(Error::FileIo(_))
        ));
        assert_eq!(transcript.state(), CsvSavingState::PreFlight);

        transcript.write(DecoderState::InFlight, &inflight(150)).unwrap();
        transcript.write(DecoderState::InFlight, &inflight(200)).unwrap();

        let rows = parse_rows(&sink.contents());
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], preflight_header());
        assert_eq!(rows[2], inflight_header());
        assert_eq!(
            rows.iter()
                .filter(|row| **row == inflight_header())
                .count(),
            1
        );
        assert_eq!(rows[3][1], "150");
        assert_eq!(rows[4][1], "200");
    }

    #[test]
    fn it_keeps_the_postflight_offset_after_a_failed_start() {
        let sink = FailingSink::failing_on(2);
        let mut transcript = Transcript::new(sink.clone());
        transcript.write(DecoderState::InFlight, &inflight(100)).unwrap();

        assert!(transcript
            .write(DecoderState::PostFlight, &postflight(1000))
            .is_err());
        transcript.write(DecoderState::PostFlight, &postflight(1200)).unwrap();
        transcript.write(DecoderState::PostFlight, &postflight(1500)).unwrap();

        let rows = parse_rows(&sink.contents());
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2], postflight_header());
        assert_eq!(rows[3][1], "1500");
    }
}
