// HTTP request handlers
use crate::domain::command::Command;
use crate::domain::error::LinkError;
use crate::domain::link::ProcessState;
use crate::domain::telemetry::{LoopStatus, Series, SeriesPoint, TelemetryRecord};
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::infrastructure::ndjson_stream::stream_from_receiver;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct WindowQuery {
    pub series: Option<String>,
}

#[derive(Serialize)]
pub struct WindowView {
    pub window_seconds: f64,
    pub range: (f64, f64),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<TelemetryRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<SeriesPoint>>,
}

#[derive(Serialize)]
pub struct StatusView {
    pub state: ProcessState,
    pub started_at: Option<String>,
    pub samples: usize,
    pub latest: Option<TelemetryRecord>,
    pub error: Option<f64>,
    pub status: Option<LoopStatus>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps link errors onto HTTP status codes.
pub struct ApiError(LinkError);

impl From<LinkError> for ApiError {
    fn from(e: LinkError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LinkError::NotRunning => StatusCode::CONFLICT,
            LinkError::InvalidCommand(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkError::StartupFailure { .. } | LinkError::WriteError(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Current window contents, or one projected series with `?series=`
pub async fn telemetry_window(
    Query(query): Query<WindowQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let series = match query.series.as_deref() {
        Some(name) => match Series::parse(name) {
            Some(series) => Some(series),
            None => {
                let body = ErrorBody {
                    error: format!("unknown series `{name}`"),
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
        },
        None => None,
    };

    let view = state.client.with_window(|window| WindowView {
        window_seconds: window.window(),
        range: window.visible_range(),
        records: series.is_none().then(|| window.snapshot()),
        points: series.map(|s| window.series(s)),
    });

    match json_response(&view, accepts_brotli(&headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Link state plus the latest sample and its control error
pub async fn telemetry_status(State(state): State<Arc<AppState>>) -> Json<StatusView> {
    let (samples, latest) = state
        .client
        .with_window(|window| (window.len(), window.latest().copied()));
    let started_at = state.client.started_at().await.map(|t| t.to_rfc3339());

    Json(StatusView {
        state: state.client.state(),
        started_at,
        samples,
        latest,
        error: latest.map(|r| r.error()),
        status: latest.map(|r| r.status(state.tolerance)),
    })
}

/// Live event stream (chunked NDJSON)
pub async fn telemetry_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    stream_from_receiver(state.events.subscribe())
}

pub async fn start_link(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.client.start().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_link(State(state): State<Arc<AppState>>) -> StatusCode {
    state.client.stop().await;
    StatusCode::NO_CONTENT
}

pub async fn reset_link(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.client.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> Result<StatusCode, ApiError> {
    state.client.send(&command).await?;
    Ok(StatusCode::ACCEPTED)
}
