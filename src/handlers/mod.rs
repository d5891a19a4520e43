//! HTTP handlers and their shared state.

pub mod admin;
pub mod ingest;
pub mod read_api;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::app_state::AtomicAppState;
use crate::live::Broadcaster;
use crate::orchestrator::Orchestrator;

/// State shared by every route.
///
/// The orchestrator sits behind a mutex because its calls are not safe
/// against each other; everything else is read through atomically.
#[derive(Clone)]
pub struct ApiContext {
    pub app: Arc<AtomicAppState>,
    pub broadcaster: Arc<Broadcaster>,
    pub orchestrator: Arc<Mutex<Orchestrator>>,
    pub demo_enabled: bool,
}
