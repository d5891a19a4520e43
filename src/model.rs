//! Canonical telemetry records and the read models derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single telemetry event, the atomic unit of ingest, storage and broadcast.
///
/// `id` and `timestamp` are assigned by the ingest pipeline; client-supplied
/// values for them are discarded. `data` is a free-form JSON mapping carried
/// through storage as JSON text and omitted from the wire format when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub service: String,
    pub name: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

/// Aggregate counters over the whole event table.
///
/// `error_rate` is a percentage (`100 * errors / total`), zero when the
/// table is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_events: i64,
    pub error_rate: f64,
    pub active_services: i64,
}

/// Per-service rollup, ordered by most recent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub error_count: i64,
    pub last_activity: DateTime<Utc>,
    pub event_count: i64,
}

/// Error count per service within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorsByService {
    pub service: String,
    pub count: i64,
}

/// Summary of one `(trace_id, service)` group.
///
/// `duration` is milliseconds between the earliest and latest span,
/// `timestamp` is the earliest span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub id: String,
    pub name: String,
    pub service: String,
    pub duration: i64,
    pub spans: i64,
    pub timestamp: DateTime<Utc>,
    pub has_error: bool,
}

/// Events counted into one hourly bucket; `time` is the bucket label
/// (`"HH:00"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputPoint {
    pub time: String,
    pub events: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_omits_absent_data() {
        let event = Event {
            id: "e1".to_string(),
            timestamp: Utc::now(),
            level: "info".to_string(),
            service: "api".to_string(),
            name: "GET /users".to_string(),
            trace_id: "t1".to_string(),
            data: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_event_json_round_trip_with_data() {
        let mut data = Map::new();
        data.insert("status_code".to_string(), json!(200));
        data.insert("nested".to_string(), json!({"a": [1, 2, 3]}));

        let event = Event {
            id: "e2".to_string(),
            timestamp: Utc::now(),
            level: "error".to_string(),
            service: "worker".to_string(),
            name: "ProcessPayment".to_string(),
            trace_id: "t2".to_string(),
            data: Some(data),
        };

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }
}
