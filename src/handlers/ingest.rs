//! Ingest pipeline: decode, stamp, persist, publish.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::ApiContext;
use crate::model::Event;
use crate::store::EventStore;

/// Inbound event body.
///
/// Decoding is strict: unknown top-level fields are rejected. `id` and
/// `timestamp` are accepted so well-meaning clients can send them, but
/// whatever they contain is discarded; the pipeline stamps its own.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct IngestPayload {
    #[serde(rename = "id")]
    _id: IgnoredAny,
    #[serde(rename = "timestamp")]
    _timestamp: IgnoredAny,
    level: String,
    service: String,
    name: String,
    trace_id: String,
    data: Option<Map<String, Value>>,
}

/// Handler for `POST /ingest`.
///
/// On append failure the event is not published; publishing itself is
/// best-effort and never fails the request.
pub async fn ingest(State(ctx): State<ApiContext>, body: Bytes) -> Result<StatusCode, AppError> {
    let payload: IngestPayload = serde_json::from_slice(&body)
        .map_err(|err| AppError::InvalidRequest(format!("invalid JSON body: {}", err)))?;

    let event = Event {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        level: payload.level,
        service: payload.service,
        name: payload.name,
        trace_id: payload.trace_id,
        data: payload.data,
    };

    let snapshot = ctx.app.snapshot();
    snapshot.store.append(&event).await?;

    ctx.broadcaster.publish(event).await;

    Ok(StatusCode::ACCEPTED)
}
