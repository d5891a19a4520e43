//! Per-connection SSE bridge from the broadcaster to a client.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use crate::handlers::ApiContext;

/// Handler for `GET /api/live`.
///
/// Registers a fresh subscriber, then streams each broadcast event as a
/// `data: <json>` frame. When the client disconnects (or the subscriber is
/// evicted for falling behind) the subscription drops, which unregisters
/// the channel.
pub async fn live_events(
    State(ctx): State<ApiContext>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = ctx.broadcaster.subscribe().await;

    let stream = subscription.filter_map(|event| async move {
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(SseEvent::default().data(json))),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize event for sse");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
