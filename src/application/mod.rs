// Application layer - the telemetry client facade and its consumers
pub mod telemetry_client;
pub mod telemetry_consumer;
