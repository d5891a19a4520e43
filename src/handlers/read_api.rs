//! Read endpoints: thin adapters from HTTP query to one storage call each.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::handlers::ApiContext;
use crate::model::{Event, ErrorsByService, ServiceInfo, Stats, ThroughputPoint, TraceSummary};
use crate::store::EventStore;

fn default_events_limit() -> i64 {
    100
}

fn default_traces_limit() -> i64 {
    50
}

fn default_search_limit() -> i64 {
    50
}

fn default_hours() -> i64 {
    24
}

/// Non-positive overrides fall back to the default.
fn positive_or(value: i64, fallback: i64) -> i64 {
    if value > 0 {
        value
    } else {
        fallback
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    #[serde(default = "default_events_limit")]
    pub limit: i64,
}

/// GET /api/events
pub async fn list_events(
    State(ctx): State<ApiContext>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<Event>>, AppError> {
    let limit = positive_or(params.limit, default_events_limit());
    let store = ctx.app.snapshot().store;
    Ok(Json(store.recent(limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct TraceEventsParams {
    #[serde(default)]
    pub trace_id: String,
}

/// GET /api/trace-events
pub async fn trace_events(
    State(ctx): State<ApiContext>,
    Query(params): Query<TraceEventsParams>,
) -> Result<Json<Vec<Event>>, AppError> {
    if params.trace_id.is_empty() {
        return Err(AppError::InvalidRequest(
            "trace_id parameter is required".to_string(),
        ));
    }

    let store = ctx.app.snapshot().store;
    Ok(Json(store.get_events_by_trace_id(&params.trace_id).await?))
}

/// GET /api/stats
pub async fn stats(State(ctx): State<ApiContext>) -> Result<Json<Stats>, AppError> {
    let store = ctx.app.snapshot().store;
    Ok(Json(store.get_stats().await?))
}

/// GET /api/services
pub async fn services(State(ctx): State<ApiContext>) -> Result<Json<Vec<ServiceInfo>>, AppError> {
    let store = ctx.app.snapshot().store;
    Ok(Json(store.get_services().await?))
}

#[derive(Debug, Deserialize)]
pub struct HoursParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

/// GET /api/errors-by-service
pub async fn errors_by_service(
    State(ctx): State<ApiContext>,
    Query(params): Query<HoursParams>,
) -> Result<Json<Vec<ErrorsByService>>, AppError> {
    let hours = positive_or(params.hours, default_hours());
    let store = ctx.app.snapshot().store;
    Ok(Json(store.get_errors_by_service(hours).await?))
}

#[derive(Debug, Deserialize)]
pub struct TracesParams {
    #[serde(default = "default_traces_limit")]
    pub limit: i64,
}

/// GET /api/traces
pub async fn traces(
    State(ctx): State<ApiContext>,
    Query(params): Query<TracesParams>,
) -> Result<Json<Vec<TraceSummary>>, AppError> {
    let limit = positive_or(params.limit, default_traces_limit());
    let store = ctx.app.snapshot().store;
    Ok(Json(store.get_traces(limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

/// GET /api/search
///
/// An empty query returns an empty array without touching the store.
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Event>>, AppError> {
    if params.q.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let limit = positive_or(params.limit, default_search_limit());
    let store = ctx.app.snapshot().store;
    Ok(Json(store.search_events(&params.q, limit).await?))
}

/// GET /api/throughput
pub async fn throughput(
    State(ctx): State<ApiContext>,
    Query(params): Query<HoursParams>,
) -> Result<Json<Vec<ThroughputPoint>>, AppError> {
    let hours = positive_or(params.hours, default_hours());
    let store = ctx.app.snapshot().store;
    Ok(Json(store.get_throughput(hours).await?))
}

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub demo_enabled: bool,
    pub version: String,
}

/// GET /api/status
pub async fn status(State(ctx): State<ApiContext>) -> Json<ServerStatus> {
    Json(ServerStatus {
        demo_enabled: ctx.demo_enabled,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_defaults() {
        let params: EventsParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit, 100);

        let params: TracesParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit, 50);

        let params: SearchParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit, 50);
        assert_eq!(params.q, "");

        let params: HoursParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.hours, 24);
    }

    #[test]
    fn test_positive_or() {
        assert_eq!(positive_or(10, 100), 10);
        assert_eq!(positive_or(0, 100), 100);
        assert_eq!(positive_or(-5, 100), 100);
    }
}
