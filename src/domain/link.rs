// Worker process lifecycle and event models
use crate::domain::telemetry::TelemetryRecord;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Process-level fault classes reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    FailedToStart,
    Crashed,
    Timedout,
    WriteError,
    ReadError,
    Unknown,
}

impl FaultKind {
    /// Whether the fault leaves the session unusable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FaultKind::Timedout)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FaultKind::FailedToStart => "worker process failed to start",
            FaultKind::Crashed => "worker process crashed",
            FaultKind::Timedout => "worker process timed out",
            FaultKind::WriteError => "write error to worker process",
            FaultKind::ReadError => "read error from worker process",
            FaultKind::Unknown => "unknown worker process error",
        };
        f.write_str(text)
    }
}

/// Everything the link publishes, in stream order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Telemetry(TelemetryRecord),
    Fault { kind: FaultKind, message: String },
}

impl LinkEvent {
    pub fn fault(kind: FaultKind, message: impl Into<String>) -> Self {
        LinkEvent::Fault {
            kind,
            message: message.into(),
        }
    }
}
