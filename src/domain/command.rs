// Outbound command domain models
use crate::domain::error::LinkError;
use serde::Deserialize;

/// PID gains pushed to the worker. Serialized once and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GainCommand {
    #[serde(rename = "Kp")]
    pub kp: f64,
    #[serde(rename = "Ki")]
    pub ki: f64,
    #[serde(rename = "Kd")]
    pub kd: f64,
}

impl GainCommand {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Result<Self, LinkError> {
        let gains = Self { kp, ki, kd };
        gains.validate()?;
        Ok(gains)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        for (name, value) in [("Kp", self.kp), ("Ki", self.ki), ("Kd", self.kd)] {
            if !value.is_finite() || value < 0.0 {
                return Err(LinkError::InvalidCommand(format!(
                    "gain {name} must be a finite value >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Gains(GainCommand),
    Start,
    Stop,
    Reset,
    Setpoint { value: f64 },
}

impl Command {
    /// Checks the payload before anything touches the worker's stdin.
    pub fn validate(&self) -> Result<(), LinkError> {
        match self {
            Command::Gains(gains) => gains.validate(),
            Command::Setpoint { value } if !value.is_finite() => Err(LinkError::InvalidCommand(
                format!("setpoint must be finite, got {value}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Gains(_) => "gains",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::Setpoint { .. } => "set_setpoint",
        }
    }
}

impl From<GainCommand> for Command {
    fn from(gains: GainCommand) -> Self {
        Command::Gains(gains)
    }
}
