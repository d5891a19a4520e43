use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    app_state::AtomicAppState,
    config::Config,
    demo,
    handlers::{self, ApiContext},
    live::{self, Broadcaster},
    orchestrator::Orchestrator,
    signals::setup_signal_handlers,
    store::{migrations, sqlite, EventStore, Migrator, SqliteStore, StoragePhase},
};

/// How long in-flight requests get to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Start the telemetry collector
///
/// This function:
/// 1. Opens the primary store and brings its schema up to date
/// 2. Publishes the initial `{store, phase}` snapshot
/// 3. Spawns the live broadcaster (and the demo generator if enabled)
/// 4. Serves the API with graceful shutdown support
/// 5. Closes the active store once draining finishes
pub async fn start_server(config: Config) -> Result<()> {
    let pool = sqlite::connect_pool(&config.storage.primary_url)
        .await
        .context("failed to open primary store")?;
    migrations::run_sqlite(&pool)
        .await
        .context("failed to migrate primary store")?;

    let store: Arc<dyn EventStore> = Arc::new(SqliteStore::from_pool(pool));
    let app = Arc::new(AtomicAppState::new(store, StoragePhase::SinglePrimary));

    let broadcaster = Arc::new(Broadcaster::new());

    if config.demo.enabled {
        info!("demo mode enabled - generating sample telemetry data");
        demo::start(app.clone(), broadcaster.clone());
    }

    let migrator = Migrator::new(&config.storage.secondary_url);
    let orchestrator = Arc::new(Mutex::new(Orchestrator::new(app.clone(), migrator)));

    let ctx = ApiContext {
        app: app.clone(),
        broadcaster,
        orchestrator,
        demo_enabled: config.demo.enabled,
    };
    let router = create_router(ctx);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut drain_rx = shutdown_tx.subscribe();
    let mut deadline_rx = shutdown_tx.subscribe();

    info!("server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = drain_rx.recv().await;
                info!("shutdown signal received, draining connections");
            })
            .await
    });

    tokio::select! {
        result = &mut server_task => {
            signal_handle.abort();
            result.context("server task panicked")?.context("server error")?;
        }
        _ = deadline_rx.recv() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await {
                Ok(result) => {
                    result.context("server task panicked")?.context("server error")?;
                }
                Err(_) => {
                    warn!("shutdown deadline exceeded, aborting remaining connections");
                    server_task.abort();
                }
            }
            let _ = signal_handle.await;
        }
    }

    let snapshot = app.snapshot();
    if let Err(err) = snapshot.store.close().await {
        warn!(error = %err, "failed to close store");
    }

    info!("server stopped gracefully");
    Ok(())
}

/// Create the axum router with all routes and middleware
pub fn create_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/ingest", post(handlers::ingest::ingest))
        .route("/api/events", get(handlers::read_api::list_events))
        .route("/api/trace-events", get(handlers::read_api::trace_events))
        .route("/api/stats", get(handlers::read_api::stats))
        .route("/api/services", get(handlers::read_api::services))
        .route(
            "/api/errors-by-service",
            get(handlers::read_api::errors_by_service),
        )
        .route("/api/traces", get(handlers::read_api::traces))
        .route("/api/search", get(handlers::read_api::search))
        .route("/api/throughput", get(handlers::read_api::throughput))
        .route("/api/status", get(handlers::read_api::status))
        .route("/api/live", get(live::sse::live_events))
        .route("/api/migrate", post(handlers::admin::migrate))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
}
