//! Flight computer SD-card transcripts
//!
//! The SD card holds comma separated text with two kinds of rows: key rows
//! naming the columns, and value rows. There is no row type marker. A key
//! row is recognized by a column name only it contains, and the values that
//! follow are read with those keys until the next key row.
//!
//! The first column of the flight key row is the rocket's name, although the
//! values in that column are timestamps.

use telemetry_radio::{
    DecoderState,
    TelemetryMap,
    Value,
};

/// Column names identifying each kind of key row.
const KEY_ROW_MARKERS: [(DecoderState, &str); 5] = [
    (DecoderState::InFlight, "fltEvents"),
    (DecoderState::Maxes, "Max Baro Alt"),
    (DecoderState::Launch, "launch date"),
    (DecoderState::Land, "landing date"),
    (DecoderState::PostFlight, "Rocket Name"),
];

/// Normalizes a column name, e.g. ` Max Baro Alt` becomes `Max_Baro_Alt`.
pub fn format_key(key: &str) -> String {
    key.trim().replace(' ', "_")
}

/// Parses a single cell into the narrowest fitting value.
pub fn parse_value(value: &str) -> Value {
    if let Ok(value) = value.parse::<i64>() {
        Value::Int(value)
    }
    else if let Ok(value) = value.parse::<f64>() {
        Value::Float(value)
    }
    else {
        Value::Text(value.to_owned())
    }
}

#[derive(Debug)]
pub struct CardDecoder {
    state: DecoderState,
    keys: Option<Vec<String>>,
}

impl Default for CardDecoder {
    fn default() -> Self {
        Self {
            state: DecoderState::InFlight,
            keys: None,
        }
    }
}

impl CardDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decodes a single line.
    ///
    /// Returns `None` for lines that don't produce telemetry: lines with fewer
    /// than 2 columns, key rows other than the flight key row, and values
    /// before the first key row.
    pub fn decode_line(&mut self, line: &str) -> Option<TelemetryMap> {
        let items = line
            .trim_end_matches(['\r', '\n'])
            .split(',')
            .collect::<Vec<_>>();
        if items.len() < 2 {
            return None;
        }

        // most lines are flight values, so check for these first
        if self.state == DecoderState::InFlight && is_numeric(items[0]) {
            return self.decode_values(&items);
        }

        for (state, marker) in KEY_ROW_MARKERS {
            if items.iter().any(|item| item.trim() == marker) {
                tracing::debug!(%state, "key row");
                self.state = state;

                let mut keys = items
                    .iter()
                    .filter(|key| !key.trim().is_empty())
                    .map(|key| format_key(key))
                    .collect::<Vec<_>>();

                if state == DecoderState::InFlight {
                    let name = items[0].trim();
                    if let Some(first) = keys.first_mut() {
                        *first = "time".to_owned();
                    }
                    self.keys = Some(keys);
                    return Some([("name", name)].into_iter().collect());
                }

                self.keys = Some(keys);
                return None;
            }
        }

        // not a key row, so it's values for the last key row
        self.decode_values(&items)
    }

    fn decode_values(&self, values: &[&str]) -> Option<TelemetryMap> {
        let keys = self.keys.as_ref()?;
        Some(
            keys.iter()
                .zip(values)
                .map(|(key, value)| (key, value.trim()))
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| (key.clone(), parse_value(value)))
                .collect(),
        )
    }
}

fn is_numeric(item: &str) -> bool {
    !item.is_empty() && item.chars().all(|c| c.is_ascii_digit())
}
