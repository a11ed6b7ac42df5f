//! Database access for obra-interop
//!
//! Pipeline tables live next to the shared `settings` table in one SQLite
//! file. The record tables stand in for the surrounding application's store.

pub mod ledger;
pub mod records;
pub mod settlements;

pub use ledger::{LedgerStore, SqliteLedger};
pub use records::{RecordStore, SqliteRecordStore, SubmissionReceipt};
pub use settlements::{SettlementStore, SqliteSettlementStore};

use chrono::NaiveDate;
use obra_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Storage format for calendar dates
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Open the database at `db_path` and create pipeline tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = obra_common::db::init_database(db_path).await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// In-memory database with every table, for tests and dry runs
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = obra_common::db::init_memory_database().await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // Append-only: nothing in this crate issues UPDATE or DELETE against it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS integration_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            direction TEXT NOT NULL CHECK (direction IN ('outbound', 'inbound')),
            record_type TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            reference_id TEXT,
            correlation_id TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('success', 'error', 'pending', 'partial_success')),
            protocol TEXT,
            error_message TEXT,
            records_processed INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            records_errored INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_ledger_tenant_created ON integration_ledger(tenant_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_ledger_correlation ON integration_ledger(correlation_id)",
        "CREATE INDEX IF NOT EXISTS idx_ledger_reference ON integration_ledger(tenant_id, record_type, reference_id)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contracts (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            external_id TEXT,
            stage TEXT NOT NULL,
            number TEXT,
            year INTEGER,
            supplier_document TEXT,
            supplier_name TEXT,
            object TEXT,
            modality TEXT,
            value_cents INTEGER,
            signed_on TEXT,
            start_date TEXT,
            end_date TEXT,
            regulator_status TEXT,
            protocol TEXT,
            submitted_at TEXT,
            PRIMARY KEY (tenant_id, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            external_id TEXT,
            stage TEXT NOT NULL,
            contract_external_id TEXT,
            sequence INTEGER,
            period_start TEXT,
            period_end TEXT,
            measured_value_cents INTEGER,
            percent_complete INTEGER,
            regulator_status TEXT,
            protocol TEXT,
            submitted_at TEXT,
            PRIMARY KEY (tenant_id, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS works_status (
            id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            external_id TEXT,
            stage TEXT NOT NULL,
            works_external_id TEXT,
            status_code TEXT,
            physical_progress INTEGER,
            reference_date TEXT,
            justification TEXT,
            regulator_status TEXT,
            protocol TEXT,
            submitted_at TEXT,
            PRIMARY KEY (tenant_id, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settlements (
            tenant_id TEXT NOT NULL,
            natural_key TEXT NOT NULL,
            revision INTEGER NOT NULL,
            contract_external_id TEXT,
            commitment_number TEXT,
            amount_cents INTEGER NOT NULL,
            settled_on TEXT NOT NULL,
            creditor_document TEXT,
            description TEXT,
            imported_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (tenant_id, natural_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) fn parse_date(column: &str, value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
        })
        .transpose()
}

pub(crate) fn format_date(value: Option<NaiveDate>) -> Option<String> {
    value.map(|d| d.format(DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let pool = init_memory_pool().await.unwrap();
        create_tables(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "contracts",
                "integration_ledger",
                "measurements",
                "settings",
                "settlements",
                "works_status"
            ]
        );
    }

    #[tokio::test]
    async fn test_init_database_pool_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("obra.db");

        let pool = init_database_pool(&path).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
