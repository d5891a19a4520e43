//! Synthetic demo-data generation.
//!
//! Seeds a day of historical events, then runs one emit loop per simulated
//! service. Each emit retries the append a few times with linear backoff
//! before giving up; an event is only published to the live feed after a
//! successful append. Unlike the ingest pipeline, which never retries,
//! this generator tolerates transient storage contention.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::app_state::AtomicAppState;
use crate::live::Broadcaster;
use crate::model::Event;
use crate::store::EventStore;

const APPEND_ATTEMPTS: u32 = 3;

/// Seed historical data and spawn the generator loops.
pub fn start(app: Arc<AtomicAppState>, broadcaster: Arc<Broadcaster>) {
    tokio::spawn({
        let app = app.clone();
        async move {
            seed_historical(&app).await;
        }
    });

    tokio::spawn(api_loop(app.clone(), broadcaster.clone()));
    tokio::spawn(worker_loop(app.clone(), broadcaster.clone()));
    tokio::spawn(webhook_loop(app.clone(), broadcaster.clone()));
    tokio::spawn(auth_loop(app.clone(), broadcaster.clone()));
    tokio::spawn(payment_loop(app, broadcaster));
}

const SERVICES: &[&str] = &["api", "worker", "webhook", "cron", "scheduler", "auth", "payment"];
const ENDPOINTS: &[&str] = &[
    "GET /users",
    "POST /login",
    "GET /orders",
    "POST /webhook",
    "ProcessPayment",
    "SendNotification",
    "CleanupSessions",
    "ScheduleTask",
    "ValidateToken",
    "ChargeCard",
];

async fn seed_historical(app: &AtomicAppState) {
    let now = Utc::now();

    for _ in 0..200 {
        let age = rand_range(0, 86_400);
        let past = now - chrono::Duration::seconds(age);

        let trace_id = Uuid::new_v4().to_string();
        let service = pick(SERVICES);
        let endpoint = pick(ENDPOINTS);
        let level = if chance(0.15) { "error" } else { "info" };

        emit(app, None, service, endpoint, &trace_id, level, past).await;

        if chance(0.6) {
            let follow_up = past + chrono::Duration::milliseconds(rand_range(0, 500));
            emit(app, None, service, "db operation", &trace_id, level, follow_up).await;
        }
    }
}

async fn api_loop(app: Arc<AtomicAppState>, broadcaster: Arc<Broadcaster>) {
    let endpoints = ["GET /users", "POST /login", "GET /orders", "PUT /profile", "DELETE /session"];
    loop {
        let trace_id = Uuid::new_v4().to_string();
        let endpoint = pick(&endpoints);

        emit_now(&app, &broadcaster, "api", endpoint, &trace_id, "info").await;
        sleep(jitter(50, 100)).await;

        let level = if chance(0.1) { "error" } else { "info" };
        emit_now(&app, &broadcaster, "api", "db query", &trace_id, level).await;

        sleep(jitter(200, 800)).await;
    }
}

async fn worker_loop(app: Arc<AtomicAppState>, broadcaster: Arc<Broadcaster>) {
    let tasks = ["ProcessPayment", "SendEmail", "GenerateReport", "CleanupData"];
    loop {
        let trace_id = Uuid::new_v4().to_string();
        let task = pick(&tasks);

        emit_now(&app, &broadcaster, "worker", task, &trace_id, "info").await;
        sleep(jitter(100, 200)).await;

        let level = if chance(0.2) { "error" } else { "info" };
        emit_now(&app, &broadcaster, "worker", "db update", &trace_id, level).await;

        sleep(jitter(500, 1_500)).await;
    }
}

async fn webhook_loop(app: Arc<AtomicAppState>, broadcaster: Arc<Broadcaster>) {
    let events = ["POST /webhook/payment", "POST /webhook/order", "POST /webhook/user"];
    loop {
        let trace_id = Uuid::new_v4().to_string();
        let event = pick(&events);

        emit_now(&app, &broadcaster, "webhook", event, &trace_id, "info").await;
        sleep(jitter(200, 500)).await;

        if chance(0.15) {
            emit_now(&app, &broadcaster, "webhook", "process webhook", &trace_id, "error").await;
        }

        sleep(jitter(1_000, 3_000)).await;
    }
}

async fn auth_loop(app: Arc<AtomicAppState>, broadcaster: Arc<Broadcaster>) {
    let events = ["ValidateToken", "RefreshToken", "PasswordReset", "UserLogin"];
    loop {
        let trace_id = Uuid::new_v4().to_string();
        let event = pick(&events);

        emit_now(&app, &broadcaster, "auth", event, &trace_id, "info").await;
        sleep(jitter(100, 300)).await;

        if chance(0.12) {
            emit_now(&app, &broadcaster, "auth", "db lookup", &trace_id, "error").await;
        }

        sleep(jitter(1_000, 2_000)).await;
    }
}

async fn payment_loop(app: Arc<AtomicAppState>, broadcaster: Arc<Broadcaster>) {
    let events = ["ChargeCard", "RefundPayment", "ValidatePayment", "ProcessRefund"];
    loop {
        let trace_id = Uuid::new_v4().to_string();
        let event = pick(&events);

        emit_now(&app, &broadcaster, "payment", event, &trace_id, "info").await;
        sleep(jitter(150, 350)).await;

        if chance(0.25) {
            emit_now(&app, &broadcaster, "payment", "payment gateway", &trace_id, "error").await;
        }

        sleep(jitter(800, 2_000)).await;
    }
}

async fn emit_now(
    app: &AtomicAppState,
    broadcaster: &Broadcaster,
    service: &str,
    name: &str,
    trace_id: &str,
    level: &str,
) {
    emit(app, Some(broadcaster), service, name, trace_id, level, Utc::now()).await;
}

async fn emit(
    app: &AtomicAppState,
    broadcaster: Option<&Broadcaster>,
    service: &str,
    name: &str,
    trace_id: &str,
    level: &str,
    timestamp: DateTime<Utc>,
) {
    let event = Event {
        id: Uuid::new_v4().to_string(),
        timestamp,
        level: level.to_string(),
        service: service.to_string(),
        name: name.to_string(),
        trace_id: trace_id.to_string(),
        data: if chance(0.7) {
            Some(custom_data(service, name))
        } else {
            None
        },
    };

    for attempt in 0..APPEND_ATTEMPTS {
        match app.snapshot().store.append(&event).await {
            Ok(()) => {
                if let Some(broadcaster) = broadcaster {
                    broadcaster.publish(event.clone()).await;
                }
                return;
            }
            Err(err) => {
                if attempt + 1 == APPEND_ATTEMPTS {
                    warn!(error = %err, "failed to append demo event after retries");
                    return;
                }
                sleep(Duration::from_millis(10 * u64::from(attempt + 1))).await;
            }
        }
    }
}

fn custom_data(service: &str, name: &str) -> Map<String, Value> {
    let mut data = Map::new();

    match service {
        "api" => {
            let (method, path) = name.split_once(' ').unwrap_or(("GET", name));
            data.insert("method".to_string(), json!(method));
            data.insert("path".to_string(), json!(path));
            data.insert("user_id".to_string(), json!(format!("user_{}", rand_range(0, 1_000))));
            data.insert("status_code".to_string(), json!(200));
        }
        "worker" => {
            data.insert("amount".to_string(), json!(rand_range(0, 10_000) as f64 / 100.0));
            data.insert("currency".to_string(), json!("USD"));
            data.insert(
                "processing_time_ms".to_string(),
                json!(rand_range(100, 5_100)),
            );
        }
        "payment" => {
            data.insert("amount".to_string(), json!(rand_range(0, 50_000) as f64 / 100.0));
            data.insert("currency".to_string(), json!(pick(&["USD", "EUR", "GBP"])));
            data.insert("gateway".to_string(), json!(pick(&["stripe", "paypal", "braintree"])));
            if chance(0.2) {
                data.insert(
                    "error_code".to_string(),
                    json!(format!("ERR_{}", rand_range(0, 1_000))),
                );
            }
        }
        "auth" => {
            data.insert("auth_type".to_string(), json!(pick(&["jwt", "oauth", "basic", "session"])));
            data.insert("user_id".to_string(), json!(format!("user_{}", rand_range(0, 10_000))));
            if chance(0.1) {
                data.insert("suspicious_activity".to_string(), json!(true));
            }
        }
        "webhook" => {
            data.insert("source".to_string(), json!(pick(&["stripe", "github", "slack", "twilio"])));
            data.insert("payload_size".to_string(), json!(rand_range(100, 10_100)));
            data.insert("signature_valid".to_string(), json!(!chance(0.05)));
        }
        _ => {
            data.insert("duration_ms".to_string(), json!(rand_range(10, 10_010)));
            data.insert("resource_count".to_string(), json!(rand_range(1, 101)));
        }
    }

    data.insert(
        "request_id".to_string(),
        json!(format!("req_{}", Uuid::new_v4().simple())),
    );

    data
}

fn pick<'a>(items: &[&'a str]) -> &'a str {
    items[rand::thread_rng().gen_range(0..items.len())]
}

fn chance(probability: f64) -> bool {
    rand::thread_rng().gen_bool(probability)
}

fn rand_range(low: i64, high: i64) -> i64 {
    rand::thread_rng().gen_range(low..high)
}

fn jitter(base_ms: u64, spread_ms: u64) -> Duration {
    Duration::from_millis(base_ms + rand::thread_rng().gen_range(0..spread_ms))
}
