//! Composite store used while a migration is in flight: writes go to both
//! backends, reads are served from the primary.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::AppError;
use crate::model::{Event, ErrorsByService, ServiceInfo, Stats, ThroughputPoint, TraceSummary};
use crate::store::EventStore;

/// Writes to `primary` first and mirrors to `secondary`.
///
/// A primary failure fails the append and the secondary is not attempted.
/// A secondary failure is logged and suppressed: divergence is recoverable
/// by backfill and must not block ingest.
pub struct DualWriteStore {
    primary: Arc<dyn EventStore>,
    secondary: Arc<dyn EventStore>,
}

impl DualWriteStore {
    pub fn new(primary: Arc<dyn EventStore>, secondary: Arc<dyn EventStore>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> Arc<dyn EventStore> {
        self.primary.clone()
    }

    pub fn secondary(&self) -> Arc<dyn EventStore> {
        self.secondary.clone()
    }
}

#[async_trait]
impl EventStore for DualWriteStore {
    async fn append(&self, event: &Event) -> Result<(), AppError> {
        self.primary.append(event).await?;

        if let Err(err) = self.secondary.append(event).await {
            warn!(error = %err, event_id = %event.id, "failed to write to secondary store");
        }

        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<Event>, AppError> {
        self.primary.recent(limit).await
    }

    async fn get_stats(&self) -> Result<Stats, AppError> {
        self.primary.get_stats().await
    }

    async fn get_services(&self) -> Result<Vec<ServiceInfo>, AppError> {
        self.primary.get_services().await
    }

    async fn get_errors_by_service(&self, hours: i64) -> Result<Vec<ErrorsByService>, AppError> {
        self.primary.get_errors_by_service(hours).await
    }

    async fn get_traces(&self, limit: i64) -> Result<Vec<TraceSummary>, AppError> {
        self.primary.get_traces(limit).await
    }

    async fn get_events_by_trace_id(&self, trace_id: &str) -> Result<Vec<Event>, AppError> {
        self.primary.get_events_by_trace_id(trace_id).await
    }

    async fn search_events(&self, query: &str, limit: i64) -> Result<Vec<Event>, AppError> {
        self.primary.search_events(query, limit).await
    }

    async fn get_throughput(&self, hours: i64) -> Result<Vec<ThroughputPoint>, AppError> {
        self.primary.get_throughput(hours).await
    }

    async fn close(&self) -> Result<(), AppError> {
        // Always attempt both; surface the first failure.
        let primary_result = self.primary.close().await;
        let secondary_result = self.secondary.close().await;
        primary_result.and(secondary_result)
    }

    fn as_dual_write(&self) -> Option<&DualWriteStore> {
        Some(self)
    }
}
