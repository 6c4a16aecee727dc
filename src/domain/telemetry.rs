// Telemetry domain models
use serde::Serialize;

/// One decoded telemetry sample from the worker process.
///
/// Only the wire codec builds these, and only from a line carrying all five
/// numeric fields, so a record is never partial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: f64,
    pub pressure: f64,
    pub valve_angle: f64,
    pub motor_current: f64,
    pub setpoint: f64,
}

impl TelemetryRecord {
    pub fn new(
        timestamp: f64,
        pressure: f64,
        valve_angle: f64,
        motor_current: f64,
        setpoint: f64,
    ) -> Self {
        Self {
            timestamp,
            pressure,
            valve_angle,
            motor_current,
            setpoint,
        }
    }

    /// Control error in bar (`setpoint - pressure`).
    pub fn error(&self) -> f64 {
        self.setpoint - self.pressure
    }

    pub fn status(&self, tolerance: f64) -> LoopStatus {
        LoopStatus::classify(self.error(), tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Stable,
    Warning,
}

impl LoopStatus {
    /// The tolerance bound is inclusive: `|error| == tolerance` is still stable.
    pub fn classify(error: f64, tolerance: f64) -> Self {
        if error.abs() <= tolerance {
            LoopStatus::Stable
        } else {
            LoopStatus::Warning
        }
    }
}

/// A single plotted series derived from the record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    Pressure,
    ValveAngle,
    MotorCurrent,
    Setpoint,
}

impl Series {
    pub fn value_of(&self, record: &TelemetryRecord) -> f64 {
        match self {
            Series::Pressure => record.pressure,
            Series::ValveAngle => record.valve_angle,
            Series::MotorCurrent => record.motor_current,
            Series::Setpoint => record.setpoint,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pressure" => Some(Series::Pressure),
            "valve_angle" => Some(Series::ValveAngle),
            "motor_current" => Some(Series::MotorCurrent),
            "setpoint" => Some(Series::Setpoint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: f64,
    pub value: f64,
}
