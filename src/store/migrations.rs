//! Ordered, dialect-aware schema migrations.
//!
//! Migrations are applied in list order inside a single transaction and are
//! never tracked across runs, so every migration must be idempotent. On any
//! failure the transaction rolls back and the schema is left untouched.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Sqlite, SqlitePool, Transaction};

use crate::error::AppError;
use crate::store::Dialect;

/// One schema change with an `apply` per supported dialect.
#[async_trait]
pub trait Migration: Send + Sync {
    fn id(&self) -> &'static str;

    async fn up_sqlite(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<(), sqlx::Error>;

    async fn up_postgres(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error>;
}

/// The full migration list, in application order.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![Box::new(CreateEventsTable), Box::new(AddEventDataColumn)]
}

struct CreateEventsTable;

#[async_trait]
impl Migration for CreateEventsTable {
    fn id(&self) -> &'static str {
        "001_create_events_table"
    }

    async fn up_sqlite(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                timestamp DATETIME NOT NULL,
                level TEXT NOT NULL,
                service TEXT NOT NULL,
                name TEXT NOT NULL,
                trace_id TEXT NOT NULL
            )",
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn up_postgres(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                level TEXT NOT NULL,
                service TEXT NOT NULL,
                name TEXT NOT NULL,
                trace_id TEXT NOT NULL
            )",
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

struct AddEventDataColumn;

#[async_trait]
impl Migration for AddEventDataColumn {
    fn id(&self) -> &'static str {
        "002_add_event_data_column"
    }

    async fn up_sqlite(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<(), sqlx::Error> {
        // SQLite has no ADD COLUMN IF NOT EXISTS; probe the table instead.
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('events') WHERE name = 'data'",
        )
        .fetch_one(&mut **tx)
        .await?;

        if existing == 0 {
            sqlx::query("ALTER TABLE events ADD COLUMN data TEXT")
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn up_postgres(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        sqlx::query("ALTER TABLE events ADD COLUMN IF NOT EXISTS data TEXT")
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// Apply the full migration list to an SQLite pool in one transaction.
pub async fn run_sqlite(pool: &SqlitePool) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for migration in all() {
        migration
            .up_sqlite(&mut tx)
            .await
            .map_err(|err| AppError::Migration(format!("{}: {}", migration.id(), err)))?;
    }
    tx.commit().await?;
    Ok(())
}

/// Apply the full migration list to a Postgres pool in one transaction.
pub async fn run_postgres(pool: &PgPool) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for migration in all() {
        migration
            .up_postgres(&mut tx)
            .await
            .map_err(|err| AppError::Migration(format!("{}: {}", migration.id(), err)))?;
    }
    tx.commit().await?;
    Ok(())
}

/// Applies migrations over a fresh connection to a configured backend.
///
/// Used by the orchestrator to prepare the secondary before dual-writing
/// starts; the connection is opened for the target dialect and closed once
/// the list has committed.
#[derive(Debug, Clone)]
pub struct Migrator {
    url: String,
}

impl Migrator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn migrate(&self, dialect: Dialect) -> Result<(), AppError> {
        match dialect {
            Dialect::Sqlite => {
                let pool = super::sqlite::connect_pool(&self.url).await?;
                let result = run_sqlite(&pool).await;
                pool.close().await;
                result
            }
            Dialect::Postgres => {
                let pool = super::postgres::connect_pool(&self.url).await?;
                let result = run_postgres(&pool).await;
                pool.close().await;
                result
            }
        }
    }
}
