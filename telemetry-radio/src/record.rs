//! Record shapes sent by the flight computer
//!
//! The first byte of every payload is the event code, which selects one of
//! the shapes below. All multi-byte fields are little-endian and packed.
//!
//! ```plain
//! preflight   (43 bytes): event u8, gnss_fix u8, continuity u8, rocket_name [u8; 20],
//!                         baro_altitude u16, gnss_altitude u16, gnss_latitude f32,
//!                         gnss_longitude f32, satellites u16, callsign [u8; 6]
//! inflight    (64+ bytes): 4 x sample (13 bytes), then
//!                         packet_number u16, gnss_altitude u16, gnss_latitude f32,
//!                         gnss_longitude f32, callsign (whatever is left, up to 6 bytes)
//!   sample    (13 bytes): event u8, flight_time u16, velocity i16, altitude i16, roll i16,
//!                         off_vertical i16, acceleration i16
//! postflight  (26 bytes): event u8, max_altitude u16, max_velocity u16, max_g u16,
//!                         max_gnss_altitude u16, gnss_fix u8, gnss_altitude u16,
//!                         gnss_latitude f32, gnss_longitude f32, callsign [u8; 6]
//! error        (1 byte):  event u8
//! ```

use std::io::Write;

use byteorder::{
    LittleEndian,
    WriteBytesExt,
};
use bytes::Buf;

use crate::{
    telemetry::{
        DecoderState,
        TelemetryMap,
    },
    util::{
        BufReadBytesExt,
        get_padded_bytes,
        trimmed_length,
    },
};

pub const ROCKET_NAME_LENGTH: usize = 20;
pub const CALLSIGN_LENGTH: usize = 6;

/// Length of a preflight payload
pub const PREFLIGHT_LENGTH: usize = 43;

/// Length of a single in-flight sample
pub const SAMPLE_LENGTH: usize = 13;

/// Number of samples in an in-flight payload
pub const SAMPLES_PER_BUNDLE: usize = 4;

/// Length of the in-flight metadata trailer without the callsign.
pub const INFLIGHT_METADATA_LENGTH: usize = 12;

/// Minimum length of an in-flight payload
pub const INFLIGHT_LENGTH: usize = SAMPLES_PER_BUNDLE * SAMPLE_LENGTH + INFLIGHT_METADATA_LENGTH;

/// Length of a postflight payload
pub const POSTFLIGHT_LENGTH: usize = 26;

/// Length of an error payload
pub const ERROR_LENGTH: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload doesn't contain an event code")]
    Empty,

    #[error(
        "expected {expected_length} bytes for {shape:?} record, but payload is only {buffer_length} bytes long"
    )]
    Truncated {
        shape: RecordShape,
        expected_length: usize,
        buffer_length: usize,
    },
}

/// The payload layout selected by an event code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordShape {
    PreFlight,
    InFlight,
    PostFlight,
    Error,
}

impl RecordShape {
    /// Every event code maps to exactly one shape. Codes 28 and 32 are the
    /// power loss events. Codes above 32 aren't assigned by the firmware and
    /// are treated as errors too.
    pub fn from_event(event: u8) -> Self {
        match event {
            0 | 30 => Self::PreFlight,
            1..=25 => Self::InFlight,
            26 | 27 | 29 | 31 => Self::PostFlight,
            28 | 32..=u8::MAX => Self::Error,
        }
    }

    /// Minimum number of payload bytes this shape needs.
    pub fn payload_length(&self) -> usize {
        match self {
            Self::PreFlight => PREFLIGHT_LENGTH,
            Self::InFlight => INFLIGHT_LENGTH,
            Self::PostFlight => POSTFLIGHT_LENGTH,
            Self::Error => ERROR_LENGTH,
        }
    }

    pub fn decoder_state(&self) -> DecoderState {
        match self {
            Self::PreFlight => DecoderState::PreFlight,
            Self::InFlight => DecoderState::InFlight,
            Self::PostFlight => DecoderState::PostFlight,
            Self::Error => DecoderState::Error,
        }
    }

    /// Decodes a payload of this shape.
    ///
    /// In-flight payloads produce 5 records: the 4 samples, followed by the
    /// metadata trailer. All other shapes produce exactly 1 record.
    pub fn decode<B: Buf>(&self, buffer: &mut B) -> Result<Vec<Record>, DecodeError> {
        let buffer_length = buffer.remaining();
        let expected_length = self.payload_length();
        if buffer_length < expected_length {
            return Err(DecodeError::Truncated {
                shape: *self,
                expected_length,
                buffer_length,
            });
        }

        let records = match self {
            Self::PreFlight => vec![Record::PreFlight(PreFlightRecord::decode(buffer))],
            Self::InFlight => {
                let mut records = Vec::with_capacity(SAMPLES_PER_BUNDLE + 1);
                for _ in 0..SAMPLES_PER_BUNDLE {
                    records.push(Record::Sample(SampleRecord::decode(buffer)));
                }
                records.push(Record::InFlightMetadata(InFlightMetadata::decode(buffer)));
                records
            }
            Self::PostFlight => vec![Record::PostFlight(PostFlightRecord::decode(buffer))],
            Self::Error => {
                vec![Record::Error(ErrorRecord {
                    event: buffer.get_u8(),
                })]
            }
        };

        let remaining = buffer.remaining();
        if remaining > 0 {
            tracing::trace!(remaining, shape = ?self, "ignoring trailing payload bytes");
            buffer.advance(remaining);
        }

        Ok(records)
    }
}

/// Decodes a complete payload, selecting the shape from its first byte.
pub fn decode_payload(payload: &[u8]) -> Result<(RecordShape, Vec<Record>), DecodeError> {
    let event = *payload.first().ok_or(DecodeError::Empty)?;
    let shape = RecordShape::from_event(event);
    let records = shape.decode(&mut &payload[..])?;
    Ok((shape, records))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Record {
    PreFlight(PreFlightRecord),
    Sample(SampleRecord),
    InFlightMetadata(InFlightMetadata),
    PostFlight(PostFlightRecord),
    Error(ErrorRecord),
}

impl Record {
    /// The event code, if this record carries one.
    pub fn event(&self) -> Option<u8> {
        match self {
            Self::PreFlight(record) => Some(record.event),
            Self::Sample(record) => Some(record.event),
            Self::InFlightMetadata(_) => None,
            Self::PostFlight(record) => Some(record.event),
            Self::Error(record) => Some(record.event),
        }
    }

    /// Writes this record's fields into `telemetry`, replacing fields with the
    /// same name.
    pub fn merge_into(&self, telemetry: &mut TelemetryMap) {
        match self {
            Self::PreFlight(record) => record.merge_into(telemetry),
            Self::Sample(record) => record.merge_into(telemetry),
            Self::InFlightMetadata(record) => record.merge_into(telemetry),
            Self::PostFlight(record) => record.merge_into(telemetry),
            Self::Error(record) => telemetry.insert("event", record.event),
        }
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        match self {
            Self::PreFlight(record) => record.encode(writer),
            Self::Sample(record) => record.encode(writer),
            Self::InFlightMetadata(record) => record.encode(writer),
            Self::PostFlight(record) => record.encode(writer),
            Self::Error(record) => writer.write_u8(record.event),
        }
    }
}

/// Merges records in order, later records overwriting fields of earlier ones.
pub fn merge_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> TelemetryMap {
    let mut telemetry = TelemetryMap::new();
    for record in records {
        record.merge_into(&mut telemetry);
    }
    telemetry
}

/// Pad status report sent while the rocket waits on the pad.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreFlightRecord {
    pub event: u8,
    pub gnss_fix: u8,
    /// Pyro continuity code, see the continuity table in the modifier pipeline.
    pub continuity: u8,
    pub rocket_name: [u8; ROCKET_NAME_LENGTH],
    pub baro_altitude: u16,
    pub gnss_altitude: u16,
    pub gnss_latitude: f32,
    pub gnss_longitude: f32,
    pub satellites: u16,
    pub callsign: [u8; CALLSIGN_LENGTH],
}

impl PreFlightRecord {
    pub const KEYS: &'static [&'static str] = &[
        "event",
        "gnss_fix",
        "continuity",
        "rocket_name",
        "baro_altitude",
        "gnss_altitude",
        "gnss_latitude",
        "gnss_longitude",
        "satellites",
        "callsign",
    ];

    fn decode<B: Buf>(buffer: &mut B) -> Self {
        Self {
            event: buffer.get_u8(),
            gnss_fix: buffer.get_u8(),
            continuity: buffer.get_u8(),
            rocket_name: buffer.get_bytes(),
            baro_altitude: buffer.get_u16_le(),
            gnss_altitude: buffer.get_u16_le(),
            gnss_latitude: buffer.get_f32_le(),
            gnss_longitude: buffer.get_f32_le(),
            satellites: buffer.get_u16_le(),
            callsign: buffer.get_bytes(),
        }
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u8(self.event)?;
        writer.write_u8(self.gnss_fix)?;
        writer.write_u8(self.continuity)?;
        writer.write_all(&self.rocket_name)?;
        writer.write_u16::<LittleEndian>(self.baro_altitude)?;
        writer.write_u16::<LittleEndian>(self.gnss_altitude)?;
        writer.write_f32::<LittleEndian>(self.gnss_latitude)?;
        writer.write_f32::<LittleEndian>(self.gnss_longitude)?;
        writer.write_u16::<LittleEndian>(self.satellites)?;
        writer.write_all(&self.callsign)?;
        Ok(())
    }

    fn merge_into(&self, telemetry: &mut TelemetryMap) {
        telemetry.insert("event", self.event);
        telemetry.insert("gnss_fix", self.gnss_fix);
        telemetry.insert("continuity", self.continuity);
        telemetry.insert("rocket_name", self.rocket_name);
        telemetry.insert("baro_altitude", self.baro_altitude);
        telemetry.insert("gnss_altitude", self.gnss_altitude);
        telemetry.insert("gnss_latitude", self.gnss_latitude);
        telemetry.insert("gnss_longitude", self.gnss_longitude);
        telemetry.insert("satellites", self.satellites);
        telemetry.insert("callsign", self.callsign);
    }
}

/// One snapshot of the flight, 4 of these are sent per in-flight payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleRecord {
    pub event: u8,
    /// Time since launch in milliseconds. Wraps around.
    pub flight_time: u16,
    pub velocity: i16,
    pub altitude: i16,
    pub roll: i16,
    pub off_vertical: i16,
    /// Raw accelerometer counts
    pub acceleration: i16,
}

impl SampleRecord {
    pub const KEYS: &'static [&'static str] = &[
        "event",
        "flight_time",
        "velocity",
        "altitude",
        "roll",
        "off_vertical",
        "acceleration",
    ];

    fn decode<B: Buf>(buffer: &mut B) -> Self {
        Self {
            event: buffer.get_u8(),
            flight_time: buffer.get_u16_le(),
            velocity: buffer.get_i16_le(),
            altitude: buffer.get_i16_le(),
            roll: buffer.get_i16_le(),
            off_vertical: buffer.get_i16_le(),
            acceleration: buffer.get_i16_le(),
        }
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u8(self.event)?;
        writer.write_u16::<LittleEndian>(self.flight_time)?;
        writer.write_i16::<LittleEndian>(self.velocity)?;
        writer.write_i16::<LittleEndian>(self.altitude)?;
        writer.write_i16::<LittleEndian>(self.roll)?;
        writer.write_i16::<LittleEndian>(self.off_vertical)?;
        writer.write_i16::<LittleEndian>(self.acceleration)?;
        Ok(())
    }

    fn merge_into(&self, telemetry: &mut TelemetryMap) {
        telemetry.insert("event", self.event);
        telemetry.insert("flight_time", self.flight_time);
        telemetry.insert("velocity", self.velocity);
        telemetry.insert("altitude", self.altitude);
        telemetry.insert("roll", self.roll);
        telemetry.insert("off_vertical", self.off_vertical);
        telemetry.insert("acceleration", self.acceleration);
    }
}

/// Trailer of an in-flight payload.
///
/// The frame length limit leaves room for only the first 2 callsign
/// characters, so the callsign is whatever follows the fixed fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InFlightMetadata {
    pub packet_number: u16,
    pub gnss_altitude: u16,
    pub gnss_latitude: f32,
    pub gnss_longitude: f32,
    pub callsign: [u8; CALLSIGN_LENGTH],
}

impl InFlightMetadata {
    pub const KEYS: &'static [&'static str] = &[
        "packet_number",
        "gnss_altitude",
        "gnss_latitude",
        "gnss_longitude",
        "callsign",
    ];

    fn decode<B: Buf>(buffer: &mut B) -> Self {
        Self {
            packet_number: buffer.get_u16_le(),
            gnss_altitude: buffer.get_u16_le(),
            gnss_latitude: buffer.get_f32_le(),
            gnss_longitude: buffer.get_f32_le(),
            callsign: get_padded_bytes(buffer),
        }
    }

    /// Encodes the trailer. Only the callsign bytes before the NUL padding
    /// are written.
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u16::<LittleEndian>(self.packet_number)?;
        writer.write_u16::<LittleEndian>(self.gnss_altitude)?;
        writer.write_f32::<LittleEndian>(self.gnss_latitude)?;
        writer.write_f32::<LittleEndian>(self.gnss_longitude)?;
        writer.write_all(&self.callsign[..trimmed_length(&self.callsign)])?;
        Ok(())
    }

    fn merge_into(&self, telemetry: &mut TelemetryMap) {
        telemetry.insert("packet_number", self.packet_number);
        telemetry.insert("gnss_altitude", self.gnss_altitude);
        telemetry.insert("gnss_latitude", self.gnss_latitude);
        telemetry.insert("gnss_longitude", self.gnss_longitude);
        telemetry.insert("callsign", self.callsign);
    }
}

/// Flight summary, repeated after landing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostFlightRecord {
    pub event: u8,
    pub max_altitude: u16,
    pub max_velocity: u16,
    pub max_g: u16,
    pub max_gnss_altitude: u16,
    pub gnss_fix: u8,
    pub gnss_altitude: u16,
    pub gnss_latitude: f32,
    pub gnss_longitude: f32,
    pub callsign: [u8; CALLSIGN_LENGTH],
}

impl PostFlightRecord {
    pub const KEYS: &'static [&'static str] = &[
        "event",
        "max_altitude",
        "max_velocity",
        "max_g",
        "max_gnss_altitude",
        "gnss_fix",
        "gnss_altitude",
        "gnss_latitude",
        "gnss_longitude",
        "callsign",
    ];

    fn decode<B: Buf>(buffer: &mut B) -> Self {
        Self {
            event: buffer.get_u8(),
            max_altitude: buffer.get_u16_le(),
            max_velocity: buffer.get_u16_le(),
            max_g: buffer.get_u16_le(),
            max_gnss_altitude: buffer.get_u16_le(),
            gnss_fix: buffer.get_u8(),
            gnss_altitude: buffer.get_u16_le(),
            gnss_latitude: buffer.get_f32_le(),
            gnss_longitude: buffer.get_f32_le(),
            callsign: buffer.get_bytes(),
        }
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
        writer.write_u8(self.event)?;
        writer.write_u16::<LittleEndian>(self.max_altitude)?;
        writer.write_u16::<LittleEndian>(self.max_velocity)?;
        writer.write_u16::<LittleEndian>(self.max_g)?;
        writer.write_u16::<LittleEndian>(self.max_gnss_altitude)?;
        writer.write_u8(self.gnss_fix)?;
        writer.write_u16::<LittleEndian>(self.gnss_altitude)?;
        writer.write_f32::<LittleEndian>(self.gnss_latitude)?;
        writer.write_f32::<LittleEndian>(self.gnss_longitude)?;
        writer.write_all(&self.callsign)?;
        Ok(())
    }

    fn merge_into(&self, telemetry: &mut TelemetryMap) {
        telemetry.insert("event", self.event);
        telemetry.insert("max_altitude", self.max_altitude);
        telemetry.insert("max_velocity", self.max_velocity);
        telemetry.insert("max_g", self.max_g);
        telemetry.insert("max_gnss_altitude", self.max_gnss_altitude);
        telemetry.insert("gnss_fix", self.gnss_fix);
        telemetry.insert("gnss_altitude", self.gnss_altitude);
        telemetry.insert("gnss_latitude", self.gnss_latitude);
        telemetry.insert("gnss_longitude", self.gnss_longitude);
        telemetry.insert("callsign", self.callsign);
    }
}

/// Power loss / restart notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub event: u8,
}

impl ErrorRecord {
    pub const KEYS: &'static [&'static str] = &["event"];
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::{
        record::{
            DecodeError,
            INFLIGHT_LENGTH,
            InFlightMetadata,
            POSTFLIGHT_LENGTH,
            PREFLIGHT_LENGTH,
            PostFlightRecord,
            PreFlightRecord,
            Record,
            RecordShape,
            SampleRecord,
            decode_payload,
            merge_records,
        },
        telemetry::Value,
    };

    fn preflight() -> PreFlightRecord {
        let mut rocket_name = [0; 20];
        rocket_name[..20].copy_from_slice(b"Test Flight Rocket 1");
        PreFlightRecord {
            event: 0,
            gnss_fix: 1,
            continuity: 2,
            rocket_name,
            baro_altitude: 120,
            gnss_altitude: 220,
            gnss_latitude: 45.79166,
            gnss_longitude: 0.59956,
            satellites: 3,
            callsign: *b"QQ0523",
        }
    }

    fn sample(event: u8, flight_time: u16) -> SampleRecord {
        SampleRecord {
            event,
            flight_time,
            velocity: 200,
            altitude: 300,
            roll: 1200,
            off_vertical: 2200,
            acceleration: 505,
        }
    }

    #[test]
    fn it_routes_every_event_code_to_one_shape() {
        let mut counts = [0usize; 4];
        for event in 0..=u8::MAX {
            let index = match RecordShape::from_event(event) {
                RecordShape::PreFlight => 0,
                RecordShape::InFlight => 1,
                RecordShape::PostFlight => 2,
                RecordShape::Error => 3,
            };
            counts[index] += 1;
        }
        assert_eq!(counts, [2, 25, 4, 225]);
        assert_eq!(counts.iter().sum::<usize>(), 256);

        assert_eq!(RecordShape::from_event(28), RecordShape::Error);
        assert_eq!(RecordShape::from_event(32), RecordShape::Error);
        assert_eq!(RecordShape::from_event(26), RecordShape::PostFlight);
    }

    #[test]
    fn it_decodes_or_rejects_every_event_code() {
        // a payload long enough for any shape must decode for every event code
        for event in 0..=u8::MAX {
            let mut payload = vec![0u8; INFLIGHT_LENGTH];
            payload[0] = event;
            let (shape, records) = decode_payload(&payload).unwrap();
            assert_eq!(shape, RecordShape::from_event(event));
            assert!(!records.is_empty());
        }
    }

    #[test]
    fn it_round_trips_a_preflight_record() {
        let record = preflight();
        let mut payload = vec![];
        record.encode(&mut payload).unwrap();
        assert_eq!(payload.len(), PREFLIGHT_LENGTH);

        let (shape, records) = decode_payload(&payload).unwrap();
        assert_eq!(shape, RecordShape::PreFlight);
        let [Record::PreFlight(decoded)] = &records[..]
        else {
            panic!("unexpected records: {records:?}");
        };
        assert_eq!(decoded.event, record.event);
        assert_eq!(decoded.rocket_name, record.rocket_name);
        assert_eq!(decoded.callsign, record.callsign);
        assert_eq!(decoded.satellites, 3);
        assert_relative_eq!(decoded.gnss_latitude, 45.79166, epsilon = 1e-6);
        assert_relative_eq!(decoded.gnss_longitude, 0.59956, epsilon = 1e-6);
    }

    #[test]
    fn it_decodes_an_inflight_bundle_into_five_records() {
        let mut payload = vec![];
        for i in 0..4 {
            sample(1, 500 + i * 50).encode(&mut payload).unwrap();
        }
        InFlightMetadata {
            packet_number: 10,
            gnss_altitude: 220,
            gnss_latitude: 45.7916,
            gnss_longitude: 0.5995,
            callsign: *b"Q\0\0\0\0\0",
        }
        .encode(&mut payload)
        .unwrap();
        assert_eq!(payload.len(), 65);

        let (shape, records) = decode_payload(&payload).unwrap();
        assert_eq!(shape, RecordShape::InFlight);
        assert_eq!(records.len(), 5);
        assert!(
            records[..4]
                .iter()
                .all(|record| matches!(record, Record::Sample(_)))
        );
        let Record::InFlightMetadata(metadata) = records[4]
        else {
            panic!("expected metadata, got {:?}", records[4]);
        };
        assert_eq!(metadata.packet_number, 10);
        assert_eq!(&metadata.callsign, b"Q\0\0\0\0\0");

        // the last sample wins when merging
        let telemetry = merge_records(&records);
        assert_eq!(telemetry.get("flight_time"), Some(&Value::Int(650)));
        assert_eq!(telemetry.get("packet_number"), Some(&Value::Int(10)));
    }

    #[test]
    fn it_decodes_a_postflight_record() {
        let record = PostFlightRecord {
            event: 26,
            max_altitude: 100,
            max_velocity: 200,
            max_g: 3,
            max_gnss_altitude: 1000,
            gnss_fix: 1,
            gnss_altitude: 1001,
            gnss_latitude: 45.79166,
            gnss_longitude: 0.59956,
            callsign: *b"QQ0523",
        };
        let mut payload = vec![];
        record.encode(&mut payload).unwrap();
        assert_eq!(payload.len(), POSTFLIGHT_LENGTH);

        let (_, records) = decode_payload(&payload).unwrap();
        assert_eq!(records, vec![Record::PostFlight(record)]);
    }

    #[test]
    fn it_rejects_truncated_payloads() {
        let mut payload = vec![];
        preflight().encode(&mut payload).unwrap();
        payload.truncate(PREFLIGHT_LENGTH - 1);

        match decode_payload(&payload) {
            Err(DecodeError::Truncated {
                shape: RecordShape::PreFlight,
                expected_length: PREFLIGHT_LENGTH,
                buffer_length,
            }) => assert_eq!(buffer_length, PREFLIGHT_LENGTH - 1),
            result => panic!("unexpected result: {result:?}"),
        }

        assert!(matches!(decode_payload(&[]), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_payload(&[5; 52]),
            Err(DecodeError::Truncated {
                shape: RecordShape::InFlight,
                ..
            })
        ));
    }
}
