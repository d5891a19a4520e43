//! Admin surface for driving the storage migration.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::handlers::ApiContext;
use crate::store::StoragePhase;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrateRequest {
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct MigrateResponse {
    pub status: String,
    pub phase: StoragePhase,
}

/// Handler for `POST /api/migrate`.
///
/// Parses the target phase and hands it to the orchestrator. The mutex on
/// the orchestrator serializes concurrent calls; the transition itself is
/// validated inside.
pub async fn migrate(
    State(ctx): State<ApiContext>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<MigrateResponse>, AppError> {
    let target: StoragePhase = request.target.parse()?;

    let orchestrator = ctx.orchestrator.lock().await;
    orchestrator.migrate_to(target).await?;

    Ok(Json(MigrateResponse {
        status: "ok".to_string(),
        phase: ctx.app.phase(),
    }))
}
