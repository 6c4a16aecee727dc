// Main entry point - Dependency injection and server setup
use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pressure_link::application::telemetry_client::{ClientOptions, TelemetryClient};
use pressure_link::application::telemetry_consumer::BroadcastConsumer;
use pressure_link::infrastructure::config::load_settings;
use pressure_link::presentation::app_state::AppState;
use pressure_link::presentation::handlers::{
    health_check, reset_link, send_command, start_link, stop_link, telemetry_events,
    telemetry_status, telemetry_window,
};

const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let settings = load_settings()?;

    // Create the telemetry link and its broadcast consumer
    let client = Arc::new(TelemetryClient::new(ClientOptions::from_settings(&settings)));
    let events = Arc::new(BroadcastConsumer::new(EVENT_BUFFER));
    client.subscribe(events.clone());

    if settings.session.autostart {
        if let Err(e) = client.start().await {
            tracing::error!("autostart failed: {}", e);
        }
    }

    // Create application state
    let state = Arc::new(AppState {
        client: client.clone(),
        events,
        tolerance: settings.status.tolerance,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/telemetry/window", get(telemetry_window))
        .route("/telemetry/status", get(telemetry_status))
        .route("/telemetry/events", get(telemetry_events))
        .route("/link/start", post(start_link))
        .route("/link/stop", post(stop_link))
        .route("/link/reset", post(reset_link))
        .route("/link/commands", post(send_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = settings.server.bind.parse()?;
    tracing::info!("Starting pressure-link service on {}", addr);

    // Event streams never end on their own, so shut down without draining them.
    let server = axum::serve(tokio::net::TcpListener::bind(addr).await?, router).into_future();
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal() => tracing::info!("shutdown requested"),
    }

    client.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
