//! Greeting endpoints and the change feed stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use change_feed::{ChangeFeedPublisher, FeedItem, FeedStream, InMemoryTopic};
use common::EntityId;
use domain::{Confirmation, Greeting, GreetingService};
use event_store::{EventStore, Offset};
use futures_util::{Stream, StreamExt, future};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub greetings: GreetingService<S>,
    pub publisher: ChangeFeedPublisher<S>,
    pub topic: InMemoryTopic,
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

// -- Request types --

#[derive(Deserialize)]
pub struct HelloParams {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct UseGreetingRequest {
    pub message: String,
}

#[derive(Deserialize)]
pub struct StreamParams {
    pub from: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct DoneResponse {
    pub status: &'static str,
}

// -- Handlers --

/// GET /api/hello/{id}: greets `?name=`, or the id itself when absent.
#[tracing::instrument(skip(state, params))]
pub async fn hello<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(params): Query<HelloParams>,
) -> Result<Json<Greeting>, ApiError> {
    let name = params.name.unwrap_or_else(|| id.clone());
    let greeting = state.greetings.hello(&EntityId::new(id), &name).await?;
    Ok(Json(greeting))
}

/// POST /api/hello/{id}: changes the entity's greeting message.
#[tracing::instrument(skip(state, req))]
pub async fn use_greeting<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UseGreetingRequest>,
) -> Result<Json<DoneResponse>, ApiError> {
    match state
        .greetings
        .use_greeting(&EntityId::new(id), &req.message)
        .await?
    {
        Confirmation::Accepted => Ok(Json(DoneResponse { status: "done" })),
        Confirmation::Rejected { reason } => Err(ApiError::BadRequest(reason)),
    }
}

/// GET /api/greetings/stream: greeting changes as server-sent events.
///
/// Each event's id is its offset. With `?from=N` the stream replays from
/// offset `N`; with a `Last-Event-ID` header it resumes after that offset;
/// otherwise it carries only events published from now on.
pub async fn stream<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Sse<KeepAliveStream<SseStream>> {
    let feed = match start_offset(&params, &headers) {
        Some(from) => {
            tracing::debug!(%from, "replaying change feed");
            state.publisher.events(from)
        }
        None => state.topic.stream(&state.publisher),
    };
    let stream: SseStream = Box::pin(until_error(feed).map(to_sse_event));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn start_offset(params: &StreamParams, headers: &HeaderMap) -> Option<Offset> {
    let from = match params.from {
        Some(from) => Offset::new(from),
        None => headers
            .get("last-event-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|last| Offset::new(last).next())?,
    };
    Some(from.max(Offset::BEGINNING))
}

/// Yields feed items until the first error, which is logged.
fn until_error(feed: FeedStream) -> Pin<Box<dyn Stream<Item = FeedItem> + Send>> {
    let items = feed
        .inspect(|item| {
            if let Err(e) = item {
                tracing::error!(error = %e, "change feed stream failed");
            }
        })
        .take_while(|item| future::ready(item.is_ok()))
        .filter_map(|item| future::ready(item.ok()));
    Box::pin(items)
}

fn to_sse_event(item: FeedItem) -> Result<Event, Infallible> {
    let event = Event::default().id(item.offset.to_string());
    Ok(match event.json_data(&item.event) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, offset = %item.offset, "failed to encode feed event");
            Event::default()
                .id(item.offset.to_string())
                .comment("encoding error")
        }
    })
}
