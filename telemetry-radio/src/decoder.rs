use crate::{
    record::{
        DecodeError,
        Record,
        decode_payload,
        merge_records,
    },
    telemetry::{
        DecoderState,
        TelemetryMap,
    },
};

/// Stateful payload decoder.
///
/// Tracks the flight phase of the last payload that decoded successfully.
#[derive(Debug, Default)]
pub struct Decoder {
    state: DecoderState,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decodes a verified payload into its records.
    ///
    /// The decoder state is left untouched if this fails.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let (shape, records) = decode_payload(payload)?;

        let state = shape.decoder_state();
        if state != self.state {
            let event = records.first().and_then(Record::event);
            tracing::debug!(previous = %self.state, %state, ?event, "decoder state changed");
        }
        self.state = state;

        Ok(records)
    }

    /// Decodes a payload and merges its records into a single map.
    ///
    /// Returns the number of records decoded along with the map.
    pub fn decode_telemetry(
        &mut self,
        payload: &[u8],
    ) -> Result<(TelemetryMap, usize), DecodeError> {
        let records = self.decode(payload)?;
        Ok((merge_records(&records), records.len()))
    }
}
