//! Settlement storage
//!
//! Inbound rows are matched on `(tenant_id, natural_key)` and only replaced by
//! a strictly higher revision, which makes replaying a page a no-op.

use async_trait::async_trait;
use obra_common::time::{now, to_storage};
use obra_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::{format_date, parse_date};
use crate::models::{SettlementRow, TenantContext, UpsertOutcome};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Storage boundary for imported settlements
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Insert, update or skip one row; transactional per call
    async fn upsert_external_row(
        &self,
        ctx: &TenantContext,
        row: &SettlementRow,
    ) -> Result<UpsertOutcome>;
}

/// Settlement store over the `settlements` table
#[derive(Clone)]
pub struct SqliteSettlementStore {
    pool: SqlitePool,
}

impl SqliteSettlementStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant_id: &str, natural_key: &str) -> Result<Option<SettlementRow>> {
        let row = sqlx::query(
            r#"
            SELECT natural_key, revision, contract_external_id, commitment_number,
                   amount_cents, settled_on, creditor_document, description
            FROM settlements
            WHERE tenant_id = ? AND natural_key = ?
            "#,
        )
        .bind(tenant_id)
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let settled_on = parse_date("settled_on", Some(row.get::<String, _>("settled_on")))?
                .ok_or_else(|| Error::Internal("settled_on is empty".to_string()))?;
            Ok(SettlementRow {
                natural_key: row.get("natural_key"),
                revision: row.get("revision"),
                contract_external_id: row.get("contract_external_id"),
                commitment_number: row.get("commitment_number"),
                amount_cents: row.get("amount_cents"),
                settled_on,
                creditor_document: row.get("creditor_document"),
                description: row.get("description"),
            })
        })
        .transpose()
    }

    pub async fn count(&self, tenant_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM settlements WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn upsert_once(&self, tenant_id: &str, row: &SettlementRow) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT revision FROM settlements WHERE tenant_id = ? AND natural_key = ?",
        )
        .bind(tenant_id)
        .bind(&row.natural_key)
        .fetch_optional(&mut *tx)
        .await?;

        let timestamp = to_storage(&now());
        let settled_on = format_date(Some(row.settled_on));

        let outcome = match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO settlements (
                        tenant_id, natural_key, revision, contract_external_id,
                        commitment_number, amount_cents, settled_on, creditor_document,
                        description, imported_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(tenant_id)
                .bind(&row.natural_key)
                .bind(row.revision)
                .bind(&row.contract_external_id)
                .bind(&row.commitment_number)
                .bind(row.amount_cents)
                .bind(&settled_on)
                .bind(&row.creditor_document)
                .bind(&row.description)
                .bind(&timestamp)
                .bind(&timestamp)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            }
            Some(stored) if row.revision > stored => {
                sqlx::query(
                    r#"
                    UPDATE settlements SET
                        revision = ?, contract_external_id = ?, commitment_number = ?,
                        amount_cents = ?, settled_on = ?, creditor_document = ?,
                        description = ?, updated_at = ?
                    WHERE tenant_id = ? AND natural_key = ?
                    "#,
                )
                .bind(row.revision)
                .bind(&row.contract_external_id)
                .bind(&row.commitment_number)
                .bind(row.amount_cents)
                .bind(&settled_on)
                .bind(&row.creditor_document)
                .bind(&row.description)
                .bind(&timestamp)
                .bind(tenant_id)
                .bind(&row.natural_key)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
            Some(_) => UpsertOutcome::Skipped,
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl SettlementStore for SqliteSettlementStore {
    async fn upsert_external_row(
        &self,
        ctx: &TenantContext,
        row: &SettlementRow,
    ) -> Result<UpsertOutcome> {
        retry_on_lock("settlement upsert", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.upsert_once(&ctx.tenant_id, row)
        })
        .await
    }
}
