//! Storage layer: the capability contract every backend satisfies, the
//! phase of the online-migration state machine, and URL-based backend
//! dispatch.

pub mod dual_write;
pub mod migrations;
pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::{Event, ErrorsByService, ServiceInfo, Stats, ThroughputPoint, TraceSummary};

pub use dual_write::DualWriteStore;
pub use migrations::Migrator;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// The capability set the runtime core depends on.
///
/// Implemented by both concrete backends and the dual-write composite; the
/// core only ever holds an `Arc<dyn EventStore>`. Every read returns an
/// empty sequence rather than an error when nothing matches.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event. `id` and `timestamp` are already set.
    async fn append(&self, event: &Event) -> Result<(), AppError>;

    /// The most recent `limit` events, ascending by timestamp at the boundary.
    async fn recent(&self, limit: i64) -> Result<Vec<Event>, AppError>;

    async fn get_stats(&self) -> Result<Stats, AppError>;

    /// Per-service rollups ordered by last activity, newest first.
    async fn get_services(&self) -> Result<Vec<ServiceInfo>, AppError>;

    /// Error counts per service within the last `hours`, largest first.
    async fn get_errors_by_service(&self, hours: i64) -> Result<Vec<ErrorsByService>, AppError>;

    /// Trace summaries grouped by `(trace_id, service)`, newest first.
    async fn get_traces(&self, limit: i64) -> Result<Vec<TraceSummary>, AppError>;

    /// All events of one trace, ascending by timestamp.
    async fn get_events_by_trace_id(&self, trace_id: &str) -> Result<Vec<Event>, AppError>;

    /// Case-insensitive substring match over name, service and trace id,
    /// newest first. Callers short-circuit empty queries before reaching
    /// the store.
    async fn search_events(&self, query: &str, limit: i64) -> Result<Vec<Event>, AppError>;

    /// Hourly event counts covering the last `hours` (24 when `hours <= 0`),
    /// including zero-count buckets.
    async fn get_throughput(&self, hours: i64) -> Result<Vec<ThroughputPoint>, AppError>;

    /// Release backend resources. Best-effort and idempotent.
    async fn close(&self) -> Result<(), AppError>;

    /// Downcast hook for the orchestrator's promotion step; only the
    /// dual-write composite returns `Some`.
    fn as_dual_write(&self) -> Option<&DualWriteStore> {
        None
    }
}

/// Role configuration of the storage layer.
///
/// Transitions are driven exclusively by the orchestrator:
/// `single_primary -> dual_write -> single_secondary`, forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePhase {
    SinglePrimary,
    DualWrite,
    SingleSecondary,
}

impl StoragePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePrimary => "single_primary",
            Self::DualWrite => "dual_write",
            Self::SingleSecondary => "single_secondary",
        }
    }
}

impl fmt::Display for StoragePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoragePhase {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_primary" => Ok(Self::SinglePrimary),
            "dual_write" => Ok(Self::DualWrite),
            "single_secondary" => Ok(Self::SingleSecondary),
            other => Err(AppError::InvalidRequest(format!(
                "unknown storage phase: {}",
                other
            ))),
        }
    }
}

/// Supported backend dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Pick the dialect from a connection URL. Anything that is not a
    /// Postgres URL is treated as an SQLite path or URL.
    pub fn from_url(url: &str) -> Result<Self, AppError> {
        if url.trim().is_empty() {
            return Err(AppError::Config("empty database url".to_string()));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("sqlite:") || !url.contains("://") {
            Ok(Self::Sqlite)
        } else {
            Err(AppError::Config(format!("unsupported database url: {}", url)))
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Open the backend matching the URL's dialect.
pub async fn connect(url: &str) -> Result<Arc<dyn EventStore>, AppError> {
    match Dialect::from_url(url)? {
        Dialect::Sqlite => Ok(Arc::new(SqliteStore::connect(url).await?)),
        Dialect::Postgres => Ok(Arc::new(PostgresStore::connect(url).await?)),
    }
}
