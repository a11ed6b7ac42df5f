//! Outbound record storage
//!
//! The pipeline borrows records from the application's store for one batch;
//! the only write back is the Regulator receipt of a successful submission.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obra_common::time::to_storage;
use obra_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

use super::{format_date, parse_date};
use crate::models::{
    ContractRecord, MeasurementRecord, Record, RecordStage, RecordType, RegulatorStatus,
    TenantContext, WorksStatusRecord,
};

/// Regulator receipt stored alongside a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub protocol: String,
    pub regulator_status: RegulatorStatus,
    pub submitted_at: DateTime<Utc>,
}

/// Storage boundary for outbound records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load the tenant's records of `record_type` whose ids are in `ids`
    ///
    /// Ids with no stored record are simply absent from the result.
    async fn load_records(
        &self,
        ctx: &TenantContext,
        record_type: RecordType,
        ids: &[String],
    ) -> Result<Vec<Record>>;

    /// Remember the Regulator's receipt for a submitted record
    async fn record_submission(
        &self,
        ctx: &TenantContext,
        record_type: RecordType,
        record_id: &str,
        receipt: &SubmissionReceipt,
    ) -> Result<()>;
}

fn table_for(record_type: RecordType) -> &'static str {
    match record_type {
        RecordType::Contract => "contracts",
        RecordType::Measurement => "measurements",
        RecordType::WorksStatus => "works_status",
    }
}

/// Record store over the `contracts`, `measurements` and `works_status` tables
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_contract(&self, record: &ContractRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contracts (
                id, tenant_id, external_id, stage, number, year, supplier_document,
                supplier_name, object, modality, value_cents, signed_on, start_date, end_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.external_id)
        .bind(record.stage.as_str())
        .bind(&record.number)
        .bind(record.year)
        .bind(&record.supplier_document)
        .bind(&record.supplier_name)
        .bind(&record.object)
        .bind(&record.modality)
        .bind(record.value_cents)
        .bind(format_date(record.signed_on))
        .bind(format_date(record.start_date))
        .bind(format_date(record.end_date))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_measurement(&self, record: &MeasurementRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO measurements (
                id, tenant_id, external_id, stage, contract_external_id, sequence,
                period_start, period_end, measured_value_cents, percent_complete
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.external_id)
        .bind(record.stage.as_str())
        .bind(&record.contract_external_id)
        .bind(record.sequence)
        .bind(format_date(record.period_start))
        .bind(format_date(record.period_end))
        .bind(record.measured_value_cents)
        .bind(record.percent_complete)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_works_status(&self, record: &WorksStatusRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO works_status (
                id, tenant_id, external_id, stage, works_external_id, status_code,
                physical_progress, reference_date, justification
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.external_id)
        .bind(record.stage.as_str())
        .bind(&record.works_external_id)
        .bind(&record.status_code)
        .bind(record.physical_progress)
        .bind(format_date(record.reference_date))
        .bind(&record.justification)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, record: &Record) -> Result<()> {
        match record {
            Record::Contract(r) => self.insert_contract(r).await,
            Record::Measurement(r) => self.insert_measurement(r).await,
            Record::WorksStatus(r) => self.insert_works_status(r).await,
        }
    }

    /// Stored Regulator receipt, if the record has been submitted
    pub async fn submission_receipt(
        &self,
        tenant_id: &str,
        record_type: RecordType,
        record_id: &str,
    ) -> Result<Option<SubmissionReceipt>> {
        let sql = format!(
            "SELECT protocol, regulator_status, submitted_at FROM {} \
             WHERE tenant_id = ? AND id = ? AND protocol IS NOT NULL",
            table_for(record_type)
        );
        let row = sqlx::query::<Sqlite>(&sql)
            .bind(tenant_id)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let status: String = row.get("regulator_status");
            let submitted_at: String = row.get("submitted_at");
            Ok(SubmissionReceipt {
                protocol: row.get("protocol"),
                regulator_status: status.parse().map_err(Error::Internal)?,
                submitted_at: obra_common::time::from_storage(&submitted_at)?,
            })
        })
        .transpose()
    }
}

fn stage_from_row(row: &SqliteRow) -> Result<RecordStage> {
    let stage: String = row.get("stage");
    stage.parse().map_err(Error::Internal)
}

fn record_from_row(record_type: RecordType, row: &SqliteRow) -> Result<Record> {
    let record = match record_type {
        RecordType::Contract => Record::Contract(ContractRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            external_id: row.get("external_id"),
            stage: stage_from_row(row)?,
            number: row.get("number"),
            year: row.get("year"),
            supplier_document: row.get("supplier_document"),
            supplier_name: row.get("supplier_name"),
            object: row.get("object"),
            modality: row.get("modality"),
            value_cents: row.get("value_cents"),
            signed_on: parse_date("signed_on", row.get("signed_on"))?,
            start_date: parse_date("start_date", row.get("start_date"))?,
            end_date: parse_date("end_date", row.get("end_date"))?,
        }),
        RecordType::Measurement => Record::Measurement(MeasurementRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            external_id: row.get("external_id"),
            stage: stage_from_row(row)?,
            contract_external_id: row.get("contract_external_id"),
            sequence: row.get("sequence"),
            period_start: parse_date("period_start", row.get("period_start"))?,
            period_end: parse_date("period_end", row.get("period_end"))?,
            measured_value_cents: row.get("measured_value_cents"),
            percent_complete: row.get("percent_complete"),
        }),
        RecordType::WorksStatus => Record::WorksStatus(WorksStatusRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            external_id: row.get("external_id"),
            stage: stage_from_row(row)?,
            works_external_id: row.get("works_external_id"),
            status_code: row.get("status_code"),
            physical_progress: row.get("physical_progress"),
            reference_date: parse_date("reference_date", row.get("reference_date"))?,
            justification: row.get("justification"),
        }),
    };
    Ok(record)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load_records(
        &self,
        ctx: &TenantContext,
        record_type: RecordType,
        ids: &[String],
    ) -> Result<Vec<Record>> {
        let mut unique: Vec<&String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; unique.len()].join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE tenant_id = ? AND id IN ({})",
            table_for(record_type),
            placeholders
        );

        let mut query = sqlx::query::<Sqlite>(&sql).bind(&ctx.tenant_id);
        for id in &unique {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| record_from_row(record_type, row))
            .collect()
    }

    async fn record_submission(
        &self,
        ctx: &TenantContext,
        record_type: RecordType,
        record_id: &str,
        receipt: &SubmissionReceipt,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET protocol = ?, regulator_status = ?, submitted_at = ? \
             WHERE tenant_id = ? AND id = ?",
            table_for(record_type)
        );
        let result = sqlx::query::<Sqlite>(&sql)
            .bind(&receipt.protocol)
            .bind(receipt.regulator_status.as_str())
            .bind(to_storage(&receipt.submitted_at))
            .bind(&ctx.tenant_id)
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "{} {} for tenant {}",
                record_type, record_id, ctx.tenant_id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::RegulatorCredentials;
    use chrono::NaiveDate;

    fn ctx(tenant_id: &str) -> TenantContext {
        TenantContext::new(
            tenant_id,
            RegulatorCredentials {
                username: "operador".to_string(),
                token: "token".to_string(),
            },
        )
    }

    fn works_status(id: &str, tenant_id: &str) -> WorksStatusRecord {
        WorksStatusRecord {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            external_id: Some(format!("EXT-{}", id)),
            stage: RecordStage::PendingApproval,
            works_external_id: Some("OB-1".to_string()),
            status_code: Some("em_andamento".to_string()),
            physical_progress: Some(35),
            reference_date: NaiveDate::from_ymd_opt(2024, 4, 30),
            justification: None,
        }
    }

    #[tokio::test]
    async fn test_load_records_is_tenant_scoped() {
        let store = SqliteRecordStore::new(init_memory_pool().await.unwrap());
        store.insert_works_status(&works_status("w-1", "pref-01")).await.unwrap();
        store.insert_works_status(&works_status("w-2", "pref-02")).await.unwrap();

        let ids = vec!["w-1".to_string(), "w-2".to_string(), "w-1".to_string()];
        let records = store
            .load_records(&ctx("pref-01"), RecordType::WorksStatus, &ids)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0], Record::WorksStatus(works_status("w-1", "pref-01")));
    }

    #[tokio::test]
    async fn test_load_records_with_no_ids() {
        let store = SqliteRecordStore::new(init_memory_pool().await.unwrap());
        let records = store
            .load_records(&ctx("pref-01"), RecordType::Contract, &[])
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_record_submission_stores_receipt() {
        let store = SqliteRecordStore::new(init_memory_pool().await.unwrap());
        store.insert_works_status(&works_status("w-1", "pref-01")).await.unwrap();

        let receipt = SubmissionReceipt {
            protocol: "TCE-77".to_string(),
            regulator_status: RegulatorStatus::AwaitingProcessing,
            submitted_at: obra_common::time::now(),
        };
        store
            .record_submission(&ctx("pref-01"), RecordType::WorksStatus, "w-1", &receipt)
            .await
            .unwrap();

        let stored = store
            .submission_receipt("pref-01", RecordType::WorksStatus, "w-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.protocol, "TCE-77");
        assert_eq!(stored.regulator_status, RegulatorStatus::AwaitingProcessing);

        let err = store
            .record_submission(&ctx("pref-01"), RecordType::WorksStatus, "w-9", &receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
