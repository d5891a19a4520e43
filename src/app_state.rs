//! Atomic application-state snapshot.
//!
//! Holds the `{store, phase}` pair behind an atomic swap so request
//! handlers can copy the pair out and read through the store without any
//! lock on the critical path. The orchestrator is the only writer; a
//! switchover becomes visible to every reader that snapshots after the
//! single `set`.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::store::{EventStore, StoragePhase};

/// One atomically-read copy of the application state.
#[derive(Clone)]
pub struct AppSnapshot {
    pub store: Arc<dyn EventStore>,
    pub phase: StoragePhase,
}

/// Guarded owner of the current `{store, phase}` pair.
pub struct AtomicAppState {
    snap: ArcSwap<AppSnapshot>,
}

impl AtomicAppState {
    pub fn new(store: Arc<dyn EventStore>, phase: StoragePhase) -> Self {
        Self {
            snap: ArcSwap::from_pointee(AppSnapshot { store, phase }),
        }
    }

    /// Both values, read atomically. The returned store handle stays usable
    /// without holding anything; the swap is a pointer load.
    pub fn snapshot(&self) -> AppSnapshot {
        self.snap.load().as_ref().clone()
    }

    pub fn phase(&self) -> StoragePhase {
        self.snap.load().phase
    }

    /// Atomically replace both values.
    pub fn set(&self, store: Arc<dyn EventStore>, phase: StoragePhase) {
        self.snap.store(Arc::new(AppSnapshot { store, phase }));
    }
}
