// Newline-delimited JSON codec for the worker protocol
use crate::domain::command::Command;
use crate::domain::error::DecodeError;
use crate::domain::telemetry::TelemetryRecord;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Largest magnitude still written as an integer literal (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Serialize)]
struct GainsWire {
    #[serde(rename = "Kp", serialize_with = "compact_number")]
    kp: f64,
    #[serde(rename = "Ki", serialize_with = "compact_number")]
    ki: f64,
    #[serde(rename = "Kd", serialize_with = "compact_number")]
    kd: f64,
}

#[derive(Serialize)]
#[serde(tag = "command_type", rename_all = "snake_case")]
enum ControlWire {
    Start,
    Stop,
    Reset,
    SetSetpoint {
        #[serde(serialize_with = "compact_number")]
        value: f64,
    },
}

/// Integral values go out without a fractional part (`150`, not `150.0`).
fn compact_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Serializes a command to one compact JSON object followed by `\n`.
pub fn encode_command(command: &Command) -> serde_json::Result<Vec<u8>> {
    let mut bytes = match command {
        Command::Gains(gains) => serde_json::to_vec(&GainsWire {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
        })?,
        Command::Start => serde_json::to_vec(&ControlWire::Start)?,
        Command::Stop => serde_json::to_vec(&ControlWire::Stop)?,
        Command::Reset => serde_json::to_vec(&ControlWire::Reset)?,
        Command::Setpoint { value } => {
            serde_json::to_vec(&ControlWire::SetSetpoint { value: *value })?
        }
    };
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes one telemetry line. Validates shape only; any numeric value is
/// accepted and unknown keys are ignored.
pub fn decode_line(line: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| DecodeError::MalformedSyntax(e.to_string()))?;

    let Value::Object(object) = value else {
        return Err(DecodeError::MalformedSyntax(
            "expected a JSON object".to_string(),
        ));
    };

    Ok(TelemetryRecord {
        timestamp: number_field(&object, "timestamp")?,
        pressure: number_field(&object, "pressure")?,
        valve_angle: number_field(&object, "valve_angle")?,
        motor_current: number_field(&object, "motor_current")?,
        setpoint: number_field(&object, "setpoint")?,
    })
}

fn number_field(object: &Map<String, Value>, key: &'static str) -> Result<f64, DecodeError> {
    object
        .get(key)
        .ok_or(DecodeError::MissingField(key))?
        .as_f64()
        .ok_or(DecodeError::NonNumericField(key))
}
