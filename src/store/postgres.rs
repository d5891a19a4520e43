//! Postgres storage backend.
//!
//! The migration target: same schema and contract as the SQLite adapter
//! with the dialect differences handled here (ILIKE search, FILTER
//! aggregates, BOOL_OR, interval arithmetic for windows, generate_series
//! for hourly buckets so empty bins are emitted).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::model::{Event, ErrorsByService, ServiceInfo, Stats, ThroughputPoint, TraceSummary};
use crate::store::EventStore;

/// Postgres-backed event store.
pub struct PostgresStore {
    pool: PgPool,
}

pub(crate) async fn connect_pool(url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await?;

    Ok(pool)
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let pool = connect_pool(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn event_from_row(row: &PgRow) -> Result<Event, AppError> {
    let raw_data: Option<String> = row.try_get("data")?;
    let data = match raw_data {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
        _ => None,
    };

    Ok(Event {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        level: row.try_get("level")?,
        service: row.try_get("service")?,
        name: row.try_get("name")?,
        trace_id: row.try_get("trace_id")?,
        data,
    })
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn append(&self, event: &Event) -> Result<(), AppError> {
        let data = match &event.data {
            Some(map) => Some(serde_json::to_string(map)?),
            None => None,
        };

        sqlx::query(
            "INSERT INTO events (id, timestamp, level, service, name, trace_id, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&event.id)
        .bind(event.timestamp)
        .bind(&event.level)
        .bind(&event.service)
        .bind(&event.name)
        .bind(&event.trace_id)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<Event>, AppError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, level, service, name, trace_id, data
             FROM events
             ORDER BY timestamp DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(event_from_row(row)?);
        }

        // Fetched newest-first; the contract is ascending at the boundary.
        events.reverse();
        Ok(events)
    }

    async fn get_stats(&self) -> Result<Stats, AppError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total_events,
                COUNT(*) FILTER (WHERE level = 'error') AS error_events,
                COUNT(DISTINCT service) AS active_services
             FROM events",
        )
        .fetch_one(&self.pool)
        .await?;

        let total_events: i64 = row.try_get("total_events")?;
        let error_events: i64 = row.try_get("error_events")?;
        let active_services: i64 = row.try_get("active_services")?;

        let error_rate = if total_events > 0 {
            error_events as f64 / total_events as f64 * 100.0
        } else {
            0.0
        };

        Ok(Stats {
            total_events,
            error_rate,
            active_services,
        })
    }

    async fn get_services(&self) -> Result<Vec<ServiceInfo>, AppError> {
        let rows = sqlx::query(
            "SELECT
                service,
                COUNT(*) FILTER (WHERE level = 'error') AS error_count,
                MAX(timestamp) AS last_activity,
                COUNT(*) AS event_count
             FROM events
             GROUP BY service
             ORDER BY last_activity DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut services = Vec::with_capacity(rows.len());
        for row in &rows {
            services.push(ServiceInfo {
                name: row.try_get("service")?,
                error_count: row.try_get("error_count")?,
                last_activity: row.try_get("last_activity")?,
                event_count: row.try_get("event_count")?,
            });
        }

        Ok(services)
    }

    async fn get_errors_by_service(&self, hours: i64) -> Result<Vec<ErrorsByService>, AppError> {
        let rows = sqlx::query(
            "SELECT service, COUNT(*) AS count
             FROM events
             WHERE level = 'error'
               AND timestamp >= NOW() - INTERVAL '1 hour' * $1
             GROUP BY service
             ORDER BY count DESC",
        )
        .bind(hours)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(ErrorsByService {
                service: row.try_get("service")?,
                count: row.try_get("count")?,
            });
        }

        Ok(results)
    }

    async fn get_traces(&self, limit: i64) -> Result<Vec<TraceSummary>, AppError> {
        let rows = sqlx::query(
            "SELECT
                trace_id,
                string_agg(name, ', ') AS names,
                service,
                COUNT(*) AS span_count,
                MIN(timestamp) AS start_time,
                MAX(timestamp) AS end_time,
                BOOL_OR(level = 'error') AS has_error
             FROM events
             GROUP BY trace_id, service
             ORDER BY start_time DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut traces = Vec::with_capacity(rows.len());
        for row in &rows {
            let start_time: DateTime<Utc> = row.try_get("start_time")?;
            let end_time: DateTime<Utc> = row.try_get("end_time")?;

            traces.push(TraceSummary {
                id: row.try_get("trace_id")?,
                name: row.try_get("names")?,
                service: row.try_get("service")?,
                duration: (end_time - start_time).num_milliseconds(),
                spans: row.try_get("span_count")?,
                timestamp: start_time,
                has_error: row.try_get("has_error")?,
            });
        }

        Ok(traces)
    }

    async fn get_events_by_trace_id(&self, trace_id: &str) -> Result<Vec<Event>, AppError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, level, service, name, trace_id, data
             FROM events
             WHERE trace_id = $1
             ORDER BY timestamp ASC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(event_from_row(row)?);
        }

        Ok(events)
    }

    async fn search_events(&self, query: &str, limit: i64) -> Result<Vec<Event>, AppError> {
        let like = format!("%{}%", query);

        let rows = sqlx::query(
            "SELECT id, timestamp, level, service, name, trace_id, data
             FROM events
             WHERE name ILIKE $1
                OR service ILIKE $1
                OR trace_id ILIKE $1
             ORDER BY timestamp DESC
             LIMIT $2",
        )
        .bind(&like)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(event_from_row(row)?);
        }

        Ok(events)
    }

    async fn get_throughput(&self, hours: i64) -> Result<Vec<ThroughputPoint>, AppError> {
        let hours = if hours <= 0 { 24 } else { hours };

        let rows = sqlx::query(
            "SELECT
                to_char(b.bucket, 'HH24:00') AS time,
                COUNT(e.id) AS events
             FROM generate_series(
                date_trunc('hour', NOW()) - INTERVAL '1 hour' * ($1 - 1),
                date_trunc('hour', NOW()),
                INTERVAL '1 hour'
             ) AS b(bucket)
             LEFT JOIN events e
                ON e.timestamp >= b.bucket
               AND e.timestamp < b.bucket + INTERVAL '1 hour'
             GROUP BY b.bucket
             ORDER BY b.bucket ASC",
        )
        .bind(hours)
        .fetch_all(&self.pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in &rows {
            points.push(ThroughputPoint {
                time: row.try_get("time")?,
                events: row.try_get("events")?,
            });
        }

        Ok(points)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.pool.close().await;
        Ok(())
    }
}
