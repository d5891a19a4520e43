//! Drives the storage layer through its online-migration state machine.
//!
//! Legal arrows: `single_primary -> dual_write -> single_secondary`,
//! forward only. Any other transition fails and leaves the state untouched.
//! Calls are not safe against concurrent calls; the host serializes them
//! (the HTTP surface does so behind a mutex).

use std::sync::Arc;

use tracing::info;

use crate::app_state::AtomicAppState;
use crate::error::AppError;
use crate::store::{self, Dialect, DualWriteStore, EventStore, Migrator, StoragePhase};

pub struct Orchestrator {
    app: Arc<AtomicAppState>,
    migrator: Migrator,
}

impl Orchestrator {
    pub fn new(app: Arc<AtomicAppState>, migrator: Migrator) -> Self {
        Self { app, migrator }
    }

    /// Move the storage layer to `target`. A no-op when already there.
    pub async fn migrate_to(&self, target: StoragePhase) -> Result<(), AppError> {
        let current = self.app.phase();

        if current == target {
            return Ok(());
        }

        match current {
            StoragePhase::SinglePrimary => {
                if target != StoragePhase::DualWrite {
                    return Err(AppError::IllegalTransition {
                        from: current,
                        to: target,
                    });
                }
                self.switch_to_dual_write().await
            }
            StoragePhase::DualWrite => {
                if target != StoragePhase::SingleSecondary {
                    return Err(AppError::IllegalTransition {
                        from: current,
                        to: target,
                    });
                }
                self.promote_secondary()
            }
            StoragePhase::SingleSecondary => Err(AppError::IllegalTransition {
                from: current,
                to: target,
            }),
        }
    }

    /// Open the configured secondary, bring its schema up to date, and swap
    /// the dual-write composite in with a single set.
    async fn switch_to_dual_write(&self) -> Result<(), AppError> {
        let primary = self.app.snapshot().store;

        let dialect = Dialect::from_url(self.migrator.url())?;
        let secondary = store::connect(self.migrator.url()).await?;
        self.migrator.migrate(dialect).await?;

        let dual = Arc::new(DualWriteStore::new(primary, secondary));
        self.app.set(dual, StoragePhase::DualWrite);

        info!(dialect = %dialect, "switched to dual-write");
        Ok(())
    }

    /// Drop the old primary by swapping in the composite's secondary alone.
    fn promote_secondary(&self) -> Result<(), AppError> {
        let snapshot = self.app.snapshot();

        let dual = snapshot.store.as_dual_write().ok_or(AppError::ExpectedDualWrite)?;
        let secondary = dual.secondary();

        self.app.set(secondary, StoragePhase::SingleSecondary);

        info!("promoted secondary to sole store");
        Ok(())
    }
}
