// Application state for HTTP handlers
use crate::application::telemetry_client::TelemetryClient;
use crate::application::telemetry_consumer::BroadcastConsumer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<TelemetryClient>,
    pub events: Arc<BroadcastConsumer>,
    pub tolerance: f64,
}
