//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::Serialize;

use super::greetings::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub live_entities: usize,
    pub feed_subscribers: usize,
}

/// GET /health: reports liveness and how many entities are loaded.
pub async fn check<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        live_entities: state.greetings.registry().live_entities().await,
        feed_subscribers: state.topic.subscriber_count(),
    })
}
