//! HTTP API server with observability for the greeting service.
//!
//! Provides REST endpoints for greeting entities and a server-sent event
//! stream of greeting changes, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use change_feed::{ChangeFeedPublisher, InMemoryOffsetStore, InMemoryTopic, TopicProducer};
use domain::GreetingService;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::greetings::AppState;

/// Consumer name the topic producer commits its offset under.
pub const FEED_CONSUMER: &str = "greeting-topic";

/// Producer that feeds the in-process topic behind the stream endpoint.
pub type GreetingTopicProducer<S> = TopicProducer<S, InMemoryOffsetStore, InMemoryTopic>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/api/hello/{id}",
            get(routes::greetings::hello::<S>).post(routes::greetings::use_greeting::<S>),
        )
        .route("/api/greetings/stream", get(routes::greetings::stream::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state and the producer feeding its topic.
///
/// The producer is returned unstarted; the caller decides whether to catch
/// it up and run it in the background.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: &Config,
) -> (Arc<AppState<S>>, GreetingTopicProducer<S>) {
    let greetings = GreetingService::new(event_store.clone(), config.runtime.clone());
    let publisher = ChangeFeedPublisher::new(event_store, config.feed.clone());
    let topic = InMemoryTopic::default();

    let producer = TopicProducer::new(
        publisher.clone(),
        InMemoryOffsetStore::new(),
        topic.clone(),
        FEED_CONSUMER,
    );

    let state = Arc::new(AppState {
        greetings,
        publisher,
        topic,
    });

    (state, producer)
}
