//! Integration ledger persistence
//!
//! Append-only audit history of every outbound submission and inbound import
//! run. The only write is [`LedgerStore::append`]; corrections are new
//! entries. Concurrent appenders are serialized by SQLite, with lock
//! contention absorbed by [`retry_on_lock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obra_common::time::{from_storage, to_storage};
use obra_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{
    Direction, DirectionStats, IntegrationLedgerEntry, LedgerFilter, LedgerPage, LedgerStats,
    LedgerStatus, NewLedgerEntry,
};
use crate::pagination::calculate_pagination;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Read and append access to the ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one entry, returning its id
    async fn append(&self, entry: NewLedgerEntry) -> Result<i64>;

    /// One page of entries matching `filter`, newest first
    async fn query(&self, filter: &LedgerFilter) -> Result<LedgerPage>;

    /// Dashboard figures, optionally scoped to a tenant and a start time
    async fn stats(&self, tenant_id: Option<&str>, since: Option<DateTime<Utc>>)
        -> Result<LedgerStats>;
}

/// Ledger over the `integration_ledger` table
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, direction, record_type, tenant_id, reference_id, correlation_id,
           status, protocol, error_message, records_processed, records_updated,
           records_errored, duration_ms, created_at, detail
    FROM integration_ledger
"#;

/// WHERE clause plus its bind values, in order
struct Conditions {
    clauses: Vec<&'static str>,
    binds: Vec<String>,
}

impl Conditions {
    fn new() -> Self {
        Self {
            clauses: Vec::new(),
            binds: Vec::new(),
        }
    }

    fn push(&mut self, clause: &'static str, value: String) {
        self.clauses.push(clause);
        self.binds.push(value);
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn from_filter(filter: &LedgerFilter) -> Self {
        let mut conditions = Self::new();
        if let Some(tenant_id) = &filter.tenant_id {
            conditions.push("tenant_id = ?", tenant_id.clone());
        }
        if let Some(direction) = filter.direction {
            conditions.push("direction = ?", direction.as_str().to_string());
        }
        if let Some(record_type) = filter.record_type {
            conditions.push("record_type = ?", record_type.as_str().to_string());
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?", status.as_str().to_string());
        }
        if let Some(correlation_id) = filter.correlation_id {
            conditions.push("correlation_id = ?", correlation_id.to_string());
        }
        if let Some(from) = &filter.from {
            conditions.push("created_at >= ?", to_storage(from));
        }
        if let Some(to) = &filter.to {
            conditions.push("created_at < ?", to_storage(to));
        }
        conditions
    }
}

fn internal(column: &str, err: impl std::fmt::Display) -> Error {
    Error::Internal(format!("Failed to parse ledger {}: {}", column, err))
}

fn entry_from_row(row: &SqliteRow) -> Result<IntegrationLedgerEntry> {
    let direction: String = row.get("direction");
    let record_type: String = row.get("record_type");
    let status: String = row.get("status");
    let correlation_id: String = row.get("correlation_id");
    let created_at: String = row.get("created_at");
    let detail: String = row.get("detail");

    Ok(IntegrationLedgerEntry {
        id: row.get("id"),
        direction: direction.parse().map_err(|e| internal("direction", e))?,
        record_type: record_type.parse().map_err(|e| internal("record_type", e))?,
        tenant_id: row.get("tenant_id"),
        reference_id: row.get("reference_id"),
        correlation_id: Uuid::parse_str(&correlation_id)
            .map_err(|e| internal("correlation_id", e))?,
        status: status.parse().map_err(|e| internal("status", e))?,
        protocol: row.get("protocol"),
        error_message: row.get("error_message"),
        records_processed: row.get("records_processed"),
        records_updated: row.get("records_updated"),
        records_errored: row.get("records_errored"),
        duration_ms: row.get("duration_ms"),
        created_at: from_storage(&created_at)?,
        detail: serde_json::from_str(&detail).map_err(|e| internal("detail", e))?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn append(&self, entry: NewLedgerEntry) -> Result<i64> {
        let correlation_id = entry.correlation_id.to_string();
        let created_at = to_storage(&entry.created_at);
        let detail = serde_json::to_string(&entry.detail)
            .map_err(|e| Error::Internal(format!("Failed to serialize ledger detail: {}", e)))?;
        let pool = &self.pool;
        let entry = &entry;
        let correlation_id = &correlation_id;
        let created_at = &created_at;
        let detail = &detail;

        let id = retry_on_lock("ledger append", self.max_lock_wait_ms, || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO integration_ledger (
                    direction, record_type, tenant_id, reference_id, correlation_id,
                    status, protocol, error_message, records_processed, records_updated,
                    records_errored, duration_ms, created_at, detail
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.direction.as_str())
            .bind(entry.record_type.as_str())
            .bind(&entry.tenant_id)
            .bind(&entry.reference_id)
            .bind(correlation_id)
            .bind(entry.status.as_str())
            .bind(&entry.protocol)
            .bind(&entry.error_message)
            .bind(entry.records_processed)
            .bind(entry.records_updated)
            .bind(entry.records_errored)
            .bind(entry.duration_ms)
            .bind(created_at)
            .bind(detail)
            .execute(pool)
            .await
            .map_err(Error::Database)?;

            Ok(result.last_insert_rowid())
        })
        .await?;

        tracing::debug!(
            ledger_id = id,
            direction = entry.direction.as_str(),
            status = entry.status.as_str(),
            correlation_id = %entry.correlation_id,
            "Ledger entry appended"
        );

        Ok(id)
    }

    async fn query(&self, filter: &LedgerFilter) -> Result<LedgerPage> {
        let conditions = Conditions::from_filter(filter);
        let where_sql = conditions.sql();

        let count_sql = format!("SELECT COUNT(*) FROM integration_ledger{}", where_sql);
        let mut count_query = sqlx::query_scalar::<Sqlite, i64>(&count_sql);
        for value in &conditions.binds {
            count_query = count_query.bind(value);
        }
        let total_results = count_query.fetch_one(&self.pool).await?;

        let pagination =
            calculate_pagination(total_results, filter.requested_page(), filter.page_size());

        let page_sql = format!(
            "{}{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_sql
        );
        let mut page_query = sqlx::query::<Sqlite>(&page_sql);
        for value in &conditions.binds {
            page_query = page_query.bind(value);
        }
        let rows = page_query
            .bind(pagination.page_size)
            .bind(pagination.offset)
            .fetch_all(&self.pool)
            .await?;

        let entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(LedgerPage {
            entries,
            page: pagination.page,
            page_size: pagination.page_size,
            total_results,
            total_pages: pagination.total_pages,
        })
    }

    async fn stats(
        &self,
        tenant_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<LedgerStats> {
        let mut scope = Conditions::new();
        if let Some(tenant_id) = tenant_id {
            scope.push("tenant_id = ?", tenant_id.to_string());
        }
        if let Some(since) = &since {
            scope.push("created_at >= ?", to_storage(since));
        }
        let scope_sql = if scope.clauses.is_empty() {
            String::new()
        } else {
            format!(" AND {}", scope.clauses.join(" AND "))
        };

        // Outbound: per-record attempts. Inbound: one row per import run.
        let counts_sql = format!(
            r#"
            SELECT direction, status, COUNT(*) AS entries,
                   COALESCE(SUM(records_processed), 0) AS processed,
                   COALESCE(SUM(records_errored), 0) AS errored
            FROM integration_ledger
            WHERE ((direction = 'outbound' AND reference_id IS NOT NULL)
                   OR direction = 'inbound'){}
            GROUP BY direction, status
            "#,
            scope_sql
        );
        let mut counts_query = sqlx::query::<Sqlite>(&counts_sql);
        for value in &scope.binds {
            counts_query = counts_query.bind(value);
        }
        let rows = counts_query.fetch_all(&self.pool).await?;

        let mut outbound = DirectionStats::empty(Direction::Outbound);
        let mut inbound = DirectionStats::empty(Direction::Inbound);

        for row in &rows {
            let direction: String = row.get("direction");
            let status: String = row.get("status");
            let entries: i64 = row.get("entries");

            let stats = match direction.parse::<Direction>().map_err(|e| internal("direction", e))? {
                Direction::Outbound => &mut outbound,
                Direction::Inbound => &mut inbound,
            };
            stats.total_entries += entries;
            stats.records_processed += row.get::<i64, _>("processed");
            stats.records_errored += row.get::<i64, _>("errored");
            match status.parse::<LedgerStatus>().map_err(|e| internal("status", e))? {
                LedgerStatus::Success => stats.success += entries,
                LedgerStatus::PartialSuccess => stats.partial_success += entries,
                LedgerStatus::Error => stats.error += entries,
                LedgerStatus::Pending => stats.pending += entries,
            }
        }

        // Batches opened but never closed
        let open_sql = format!(
            r#"
            SELECT COUNT(*) FROM integration_ledger AS opened
            WHERE direction = 'outbound' AND status = 'pending' AND reference_id IS NULL{}
              AND NOT EXISTS (
                  SELECT 1 FROM integration_ledger AS closed
                  WHERE closed.correlation_id = opened.correlation_id
                    AND closed.reference_id IS NULL
                    AND closed.status != 'pending'
              )
            "#,
            scope_sql
        );
        let mut open_query = sqlx::query_scalar::<Sqlite, i64>(&open_sql);
        for value in &scope.binds {
            open_query = open_query.bind(value);
        }
        outbound.pending += open_query.fetch_one(&self.pool).await?;

        // Records whose latest attempt failed; current state, so `since` does not apply
        let backlog_tenant = if tenant_id.is_some() {
            " AND latest.tenant_id = ?"
        } else {
            ""
        };
        let backlog_sql = format!(
            r#"
            SELECT COUNT(*) FROM integration_ledger AS latest
            WHERE latest.direction = 'outbound'
              AND latest.reference_id IS NOT NULL
              AND latest.status = 'error'{}
              AND latest.id = (
                  SELECT MAX(other.id) FROM integration_ledger AS other
                  WHERE other.direction = 'outbound'
                    AND other.tenant_id = latest.tenant_id
                    AND other.record_type = latest.record_type
                    AND other.reference_id = latest.reference_id
              )
            "#,
            backlog_tenant
        );
        let mut backlog_query = sqlx::query_scalar::<Sqlite, i64>(&backlog_sql);
        if let Some(tenant_id) = tenant_id {
            backlog_query = backlog_query.bind(tenant_id);
        }
        let outbound_backlog = backlog_query.fetch_one(&self.pool).await?;

        Ok(LedgerStats {
            since,
            outbound: outbound.finish(),
            inbound: inbound.finish(),
            outbound_backlog,
        })
    }
}
