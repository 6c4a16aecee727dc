// Domain layer - telemetry, commands, lifecycle and the display window
pub mod command;
pub mod error;
pub mod link;
pub mod telemetry;
pub mod window;
