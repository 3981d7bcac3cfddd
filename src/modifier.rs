//! Conversions applied to decoded telemetry before it's handed to consumers.
//!
//! The flight computer sends raw sensor counts, fixed-width byte strings and
//! numeric codes. [`Modifiers::modify`] turns them into display units and
//! names. Derived fields (`event_name`, `continuity_name`) are inserted right
//! after the field they're derived from.

use telemetry_radio::{
    TelemetryMap,
    Value,
};

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Accelerometer counts per g
pub const DEFAULT_ACCEL_RESOLUTION: f64 = 1024.0;

/// SD-card timestamps count microseconds.
pub const TIMESTAMP_RESOLUTION: f64 = 1_000_000.0;

pub const EVENT_NAMES: [&str; 33] = [
    "Preflight",
    "Liftoff",
    "Booster Burnout",
    "Apogee Detected",
    "Firing Apogee Pyro",
    "Separation Detected",
    "Firing Mains",
    "Under Chute",
    "Ejecting Booster",
    "Firing 2nd Stage",
    "2nd Stage Ignition",
    "2nd Stage Burnout",
    "Firing Airstart1",
    "Airstart 1 Ignition",
    "Airstart 1 Burnout",
    "Firing Airstart2",
    "Airstart 2 Ignition",
    "Airstart 2 Burnout",
    "NoFire: Rotn Limit",
    "NoFire: Alt Limit",
    "NoFire: Rotn/Alt Lmt",
    "Booster Apogee",
    "Booster Apogee Fire",
    "Booster Separation",
    "Booster Main Deploy",
    "Booster Under Chute",
    "Time Limit Exceeded",
    "Touchdown!",
    "Power Loss! Restart",
    "Booster Touchdown",
    "Booster Preflight",
    "Booster Time Limit",
    "Booster Pwr Restart",
];

pub const CONTINUITY_NAMES: [&str; 10] = [
    "No Pyros Detected!",
    "No Continuity Pyro 1",
    "No Continuity Pyro 2",
    "No Continuity Pyro 3",
    "No Continuity Pyro 4",
    "All 3 Pyros Detected",
    "All 4 Pyros Detected",
    "Pyro Apogee Only",
    "Pyro Mains Only",
    "Pyro Mains & Apogee",
];

pub fn event_name(event: i64) -> Option<&'static str> {
    usize::try_from(event)
        .ok()
        .and_then(|index| EVENT_NAMES.get(index))
        .copied()
}

pub fn continuity_name(continuity: i64) -> Option<&'static str> {
    usize::try_from(continuity)
        .ok()
        .and_then(|index| CONTINUITY_NAMES.get(index))
        .copied()
}

/// Decodes a fixed-width, NUL-padded byte string.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

#[derive(Clone, Copy, Debug)]
pub struct Modifiers {
    /// Accelerometer counts per g
    pub accel_resolution: f64,
}

impl Default for Modifiers {
    fn default() -> Self {
        Self {
            accel_resolution: DEFAULT_ACCEL_RESOLUTION,
        }
    }
}

impl Modifiers {
    pub fn new(accel_resolution: f64) -> Self {
        Self { accel_resolution }
    }

    pub fn modify(&self, telemetry: TelemetryMap) -> TelemetryMap {
        let mut modified = TelemetryMap::new();

        for (key, value) in telemetry {
            match key.as_str() {
                "acceleration" => {
                    let value = convert_f64(value, |raw| {
                        raw / self.accel_resolution * STANDARD_GRAVITY
                    });
                    modified.insert(key, value);
                }
                "accelX" | "accelY" | "accelZ" => {
                    let value = convert_f64(value, |raw| raw / self.accel_resolution);
                    modified.insert(key, value);
                }
                "time" => {
                    let value = convert_f64(value, |raw| raw / TIMESTAMP_RESOLUTION);
                    modified.insert(key, value);
                }
                "rocket_name" | "callsign" => {
                    let value = match value {
                        Value::Bytes(bytes) => Value::Text(bytes_to_text(&bytes)),
                        value => value,
                    };
                    modified.insert(key, value);
                }
                "gnss_fix" => {
                    let value = match value.as_i64() {
                        Some(fix) => Value::Bool(fix != 0),
                        None => value,
                    };
                    modified.insert(key, value);
                }
                "event" => {
                    let name = value.as_i64().and_then(event_name);
                    modified.insert(key, value);
                    if let Some(name) = name {
                        modified.insert("event_name", name);
                    }
                }
                "continuity" => {
                    let name = value.as_i64().and_then(continuity_name);
                    modified.insert(key, value);
                    if let Some(name) = name {
                        modified.insert("continuity_name", name);
                    }
                }
                _ => modified.insert(key, value),
            }
        }

        modified
    }
}

/// Applies `f` to numeric values, leaving anything else untouched.
fn convert_f64(value: Value, f: impl FnOnce(f64) -> f64) -> Value {
    let numeric = match &value {
        Value::Text(text) => text.trim().parse::<f64>().ok(),
        value => value.as_f64(),
    };
    match numeric {
        Some(numeric) => Value::Float(f(numeric)),
        None => value,
    }
}
