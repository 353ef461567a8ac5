//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers descriptions for the service's metrics.
pub fn describe() {
    metrics::describe_counter!(
        "greeting_commands_total",
        "Greeting commands received, by command"
    );
    metrics::describe_counter!(
        "entity_commands_total",
        "Commands processed by entity actors, by entity type"
    );
    metrics::describe_counter!("events_persisted_total", "Events appended by entity actors");
    metrics::describe_counter!(
        "persist_failures_total",
        "Appends that failed or timed out; the entity stopped without replying"
    );
    metrics::describe_counter!(
        "change_feed_events_published_total",
        "Feed items published to the topic"
    );
    metrics::describe_counter!(
        "change_feed_restarts_total",
        "Times the feed producer stopped and was restarted"
    );
    metrics::describe_counter!(
        "event_store_events_appended_total",
        "Events written to the event store"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
