//! SQLite storage backend.
//!
//! The default primary store: a single-file database opened in WAL mode so
//! reads proceed concurrently with the single writer. Hourly throughput
//! buckets are emulated with a recursive counter table since SQLite has no
//! generate_series, and `has_error` uses a SUM(CASE ...) in place of a
//! boolean OR-aggregate.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::AppError;
use crate::model::{Event, ErrorsByService, ServiceInfo, Stats, ThroughputPoint, TraceSummary};
use crate::store::EventStore;

/// SQLite-backed event store.
pub struct SqliteStore {
    pool: SqlitePool,
}

pub(crate) async fn connect_pool(url: &str) -> Result<SqlitePool, AppError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    // Every connection to an in-memory URL is a distinct database, so the
    // pool must stay at a single connection for those.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    Ok(pool)
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`.
    ///
    /// The schema is managed separately via [`crate::store::migrations`].
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let pool = connect_pool(url).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests and the startup path, which
    /// runs migrations on the pool before handing it over).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn event_from_row(row: &SqliteRow) -> Result<Event, AppError> {
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
impl EventStore for SqliteStore {
    async fn append(&self, event: &Event) -> Result<(), AppError> {
        let data = match &event.data {
            Some(map) => Some(serde_json::to_string(map)?),
            None => None,
        };

        sqlx::query(
            "INSERT INTO events (id, timestamp, level, service, name, trace_id, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
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
             LIMIT ?",
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
        let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        let error_events: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE level = 'error'")
                .fetch_one(&self.pool)
                .await?;

        let active_services: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT service) FROM events")
                .fetch_one(&self.pool)
                .await?;

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
                COUNT(CASE WHEN level = 'error' THEN 1 END) AS error_count,
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
        // datetime() canonicalizes the stored text so the comparison is not
        // sensitive to the driver's timestamp format.
        let rows = sqlx::query(
            "SELECT service, COUNT(*) AS count
             FROM events
             WHERE level = 'error' AND datetime(timestamp) >= datetime('now', '-' || ? || ' hours')
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
                GROUP_CONCAT(name, ', ') AS names,
                service,
                COUNT(*) AS span_count,
                MIN(timestamp) AS start_time,
                MAX(timestamp) AS end_time,
                CASE WHEN SUM(CASE WHEN level = 'error' THEN 1 ELSE 0 END) > 0
                     THEN 1 ELSE 0 END AS has_error
             FROM events
             GROUP BY trace_id, service
             ORDER BY start_time DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut traces = Vec::with_capacity(rows.len());
        for row in &rows {
            let start_time: DateTime<Utc> = row.try_get("start_time")?;
            let end_time: DateTime<Utc> = row.try_get("end_time")?;
            let has_error: i64 = row.try_get("has_error")?;

            traces.push(TraceSummary {
                id: row.try_get("trace_id")?,
                name: row.try_get("names")?,
                service: row.try_get("service")?,
                duration: (end_time - start_time).num_milliseconds(),
                spans: row.try_get("span_count")?,
                timestamp: start_time,
                has_error: has_error != 0,
            });
        }

        Ok(traces)
    }

    async fn get_events_by_trace_id(&self, trace_id: &str) -> Result<Vec<Event>, AppError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, level, service, name, trace_id, data
             FROM events
             WHERE trace_id = ?
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
             WHERE name LIKE ? OR service LIKE ? OR trace_id LIKE ?
             ORDER BY timestamp DESC
             LIMIT ?",
        )
        .bind(&like)
        .bind(&like)
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
            "WITH RECURSIVE offsets(n) AS (
                SELECT 0
                UNION ALL
                SELECT n + 1 FROM offsets WHERE n + 1 < ?
             )
             SELECT
                strftime('%H:00', b.hour_start) AS time,
                COUNT(e.id) AS events
             FROM (
                SELECT strftime('%Y-%m-%d %H:00:00', datetime('now', '-' || n || ' hours')) AS hour_start
                FROM offsets
             ) b
             LEFT JOIN events e
                ON datetime(e.timestamp) >= b.hour_start
               AND datetime(e.timestamp) < datetime(b.hour_start, '+1 hour')
             GROUP BY b.hour_start
             ORDER BY b.hour_start ASC",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrations;
    use chrono::Duration as ChronoDuration;
    use serde_json::{json, Map};

    async fn create_test_store() -> SqliteStore {
        let pool = connect_pool("sqlite::memory:").await.unwrap();
        migrations::run_sqlite(&pool).await.unwrap();
        SqliteStore::from_pool(pool)
    }

    fn make_event(id: &str, service: &str, name: &str, trace_id: &str, level: &str) -> Event {
        Event {
            id: id.to_string(),
            timestamp: Utc::now(),
            level: level.to_string(),
            service: service.to_string(),
            name: name.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_recent() {
        let store = create_test_store().await;

        store
            .append(&make_event("e1", "api", "GET /users", "t1", "info"))
            .await
            .unwrap();

        let events = store.recent(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e1");
        assert_eq!(events[0].service, "api");
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_id() {
        let store = create_test_store().await;
        let event = make_event("e1", "api", "GET /users", "t1", "info");

        store.append(&event).await.unwrap();
        assert!(store.append(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_recent_ascending_and_bounded() {
        let store = create_test_store().await;
        let base = Utc::now();

        for i in 0..5 {
            let mut event = make_event(&format!("e{}", i), "api", "req", &format!("t{}", i), "info");
            event.timestamp = base + ChronoDuration::seconds(i);
            store.append(&event).await.unwrap();
        }

        let events = store.recent(3).await.unwrap();
        assert_eq!(events.len(), 3);
        // The three newest, oldest of them first.
        assert_eq!(events[0].id, "e2");
        assert_eq!(events[1].id, "e3");
        assert_eq!(events[2].id, "e4");
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_data_round_trip() {
        let store = create_test_store().await;

        let mut data = Map::new();
        data.insert("status_code".to_string(), json!(200.0));
        data.insert("tags".to_string(), json!(["slow", "retried"]));
        data.insert("ctx".to_string(), json!({"user": "alice", "depth": 2.0}));

        let mut event = make_event("e1", "api", "GET /users", "t1", "info");
        event.data = Some(data.clone());
        store.append(&event).await.unwrap();

        let events = store.recent(1).await.unwrap();
        assert_eq!(events[0].data.as_ref(), Some(&data));
    }

    #[tokio::test]
    async fn test_absent_data_round_trips_as_absent() {
        let store = create_test_store().await;
        store
            .append(&make_event("e1", "api", "GET /users", "t1", "info"))
            .await
            .unwrap();

        let events = store.recent(1).await.unwrap();
        assert!(events[0].data.is_none());

        let raw: Option<String> = sqlx::query_scalar("SELECT data FROM events WHERE id = 'e1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert!(raw.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = create_test_store().await;
        assert_eq!(
            store.get_stats().await.unwrap(),
            Stats {
                total_events: 0,
                error_rate: 0.0,
                active_services: 0
            }
        );

        store
            .append(&make_event("e1", "api", "req", "t1", "info"))
            .await
            .unwrap();
        store
            .append(&make_event("e2", "api", "req", "t2", "error"))
            .await
            .unwrap();
        store
            .append(&make_event("e3", "worker", "job", "t3", "info"))
            .await
            .unwrap();
        store
            .append(&make_event("e4", "worker", "job", "t4", "error"))
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.active_services, 2);
        assert!((stats.error_rate - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_services_ordered_by_last_activity() {
        let store = create_test_store().await;
        let base = Utc::now();

        let mut old = make_event("e1", "worker", "job", "t1", "error");
        old.timestamp = base - ChronoDuration::hours(2);
        store.append(&old).await.unwrap();

        let mut fresh = make_event("e2", "api", "req", "t2", "info");
        fresh.timestamp = base;
        store.append(&fresh).await.unwrap();

        let services = store.get_services().await.unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "api");
        assert_eq!(services[0].event_count, 1);
        assert_eq!(services[0].error_count, 0);
        assert_eq!(services[1].name, "worker");
        assert_eq!(services[1].error_count, 1);
    }

    #[tokio::test]
    async fn test_errors_by_service_window() {
        let store = create_test_store().await;
        let base = Utc::now();

        store
            .append(&make_event("e1", "payment", "charge", "t1", "error"))
            .await
            .unwrap();
        store
            .append(&make_event("e2", "payment", "refund", "t2", "error"))
            .await
            .unwrap();
        store
            .append(&make_event("e3", "api", "req", "t3", "error"))
            .await
            .unwrap();
        // Outside the window and wrong level: both excluded.
        let mut stale = make_event("e4", "api", "req", "t4", "error");
        stale.timestamp = base - ChronoDuration::hours(48);
        store.append(&stale).await.unwrap();
        store
            .append(&make_event("e5", "api", "req", "t5", "info"))
            .await
            .unwrap();

        let errors = store.get_errors_by_service(24).await.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].service, "payment");
        assert_eq!(errors[0].count, 2);
        assert_eq!(errors[1].service, "api");
        assert_eq!(errors[1].count, 1);
    }

    #[tokio::test]
    async fn test_errors_by_service_excludes_same_day_outside_window() {
        let store = create_test_store().await;
        let base = Utc::now();

        store
            .append(&make_event("fresh", "api", "req", "t1", "error"))
            .await
            .unwrap();
        // Only a few hours old, so frequently on the same calendar day as
        // the fresh event, but outside a one-hour window.
        let mut earlier = make_event("earlier", "api", "req", "t2", "error");
        earlier.timestamp = base - ChronoDuration::hours(3);
        store.append(&earlier).await.unwrap();

        let errors = store.get_errors_by_service(1).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].service, "api");
        assert_eq!(errors[0].count, 1);
    }

    #[tokio::test]
    async fn test_traces_grouping() {
        let store = create_test_store().await;
        let base = Utc::now();

        let mut root = make_event("e1", "api", "GET /orders", "trace-a", "info");
        root.timestamp = base;
        store.append(&root).await.unwrap();

        let mut child = make_event("e2", "api", "db query", "trace-a", "error");
        child.timestamp = base + ChronoDuration::milliseconds(250);
        store.append(&child).await.unwrap();

        let mut other = make_event("e3", "worker", "job", "trace-b", "info");
        other.timestamp = base + ChronoDuration::seconds(1);
        store.append(&other).await.unwrap();

        let traces = store.get_traces(10).await.unwrap();
        assert_eq!(traces.len(), 2);

        // Newest trace (by earliest span) first.
        assert_eq!(traces[0].id, "trace-b");
        assert!(!traces[0].has_error);

        assert_eq!(traces[1].id, "trace-a");
        assert_eq!(traces[1].spans, 2);
        assert_eq!(traces[1].duration, 250);
        assert!(traces[1].has_error);
        assert!(traces[1].name.contains("GET /orders"));
        assert!(traces[1].name.contains("db query"));
    }

    #[tokio::test]
    async fn test_events_by_trace_id_ascending() {
        let store = create_test_store().await;
        let base = Utc::now();

        for (i, offset) in [2i64, 0, 1].iter().enumerate() {
            let mut event = make_event(&format!("e{}", i), "api", "req", "trace-a", "info");
            event.timestamp = base + ChronoDuration::seconds(*offset);
            store.append(&event).await.unwrap();
        }
        store
            .append(&make_event("other", "api", "req", "trace-b", "info"))
            .await
            .unwrap();

        let events = store.get_events_by_trace_id("trace-a").await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let missing = store.get_events_by_trace_id("nope").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_search_matches_name_service_and_trace() {
        let store = create_test_store().await;

        store
            .append(&make_event("e1", "auth", "login", "trace-1", "info"))
            .await
            .unwrap();
        store
            .append(&make_event("e2", "api", "request", "trace-2", "info"))
            .await
            .unwrap();
        store
            .append(&make_event("e3", "worker", "process", "trace-1", "error"))
            .await
            .unwrap();

        let by_name = store.search_events("login", 50).await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, "e1");

        let by_service = store.search_events("AUTH", 50).await.unwrap();
        assert_eq!(by_service.len(), 1);

        let by_trace = store.search_events("trace-1", 50).await.unwrap();
        assert_eq!(by_trace.len(), 2);

        let limited = store.search_events("trace", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_throughput_bucket_count() {
        let store = create_test_store().await;

        let event = make_event("e1", "api", "req", "t1", "info");
        store.append(&event).await.unwrap();

        let points = store.get_throughput(5).await.unwrap();
        assert_eq!(points.len(), 5);

        // The event is counted in its own hour's bucket and nowhere else.
        let event_hour = event.timestamp.format("%H:00").to_string();
        let bucket = points
            .iter()
            .find(|p| p.time == event_hour)
            .expect("event hour missing from bucket list");
        assert_eq!(bucket.events, 1);
        assert_eq!(points.iter().map(|p| p.events).sum::<i64>(), 1);

        // Non-positive windows coerce to 24 buckets.
        assert_eq!(store.get_throughput(0).await.unwrap().len(), 24);
        assert_eq!(store.get_throughput(-3).await.unwrap().len(), 24);

        // Windows above a day are honored too.
        assert_eq!(store.get_throughput(30).await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = create_test_store().await;
        store.close().await.unwrap();
        store.close().await.unwrap();
    }
}
