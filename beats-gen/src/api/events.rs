//! Server-Sent Events stream of generation lifecycle events

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use beats_common::sse::create_event_sse_stream;

use crate::config::MODULE_NAME;
use crate::AppState;

/// GET /events
///
/// Streams `GenerationStarted`, `GenerationCompleted` and `GenerationFailed`
/// events with periodic heartbeats. Events carry job ids and kinds only,
/// never parameters or script output.
pub async fn event_stream(State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!(
        subscribers = state.event_bus.subscriber_count(),
        "New SSE client connected"
    );
    create_event_sse_stream(MODULE_NAME, &state.event_bus)
}

/// Build event stream routes
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
