// Error taxonomy for the telemetry link
use thiserror::Error;

/// Per-line decode faults. Always recovered locally by the stream reader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed telemetry line: {0}")]
    MalformedSyntax(String),

    #[error("telemetry line missing required field `{0}`")]
    MissingField(&'static str),

    #[error("telemetry field `{0}` is not a number")]
    NonNumericField(&'static str),
}

/// Faults surfaced to the caller of the telemetry link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Every launch candidate failed; carries the last attempt's diagnostic.
    #[error("failed to start worker process: {last_error}")]
    StartupFailure { last_error: String },

    #[error("worker process is not running")]
    NotRunning,

    #[error("write to worker process failed: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
