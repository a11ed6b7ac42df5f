//! Integration ledger entries and queries
//!
//! The ledger is append-only: entries are built as [`NewLedgerEntry`], written
//! once, and read back as [`IntegrationLedgerEntry`]. Corrections are new
//! entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::outcome::{SubmissionOutcome, SubmissionStatus};
use super::record::RecordType;

/// Default page size for ledger queries
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Upper bound on ledger page size
pub const MAX_PAGE_SIZE: i64 = 500;

/// Exchange direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbound" => Ok(Direction::Outbound),
            "inbound" => Ok(Direction::Inbound),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Record type column of the ledger, covering both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRecordType {
    Contract,
    Measurement,
    WorksStatus,
    Settlement,
}

impl LedgerRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerRecordType::Contract => "contract",
            LedgerRecordType::Measurement => "measurement",
            LedgerRecordType::WorksStatus => "works_status",
            LedgerRecordType::Settlement => "settlement",
        }
    }
}

impl From<RecordType> for LedgerRecordType {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::Contract => LedgerRecordType::Contract,
            RecordType::Measurement => LedgerRecordType::Measurement,
            RecordType::WorksStatus => LedgerRecordType::WorksStatus,
        }
    }
}

impl FromStr for LedgerRecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contract" => Ok(LedgerRecordType::Contract),
            "measurement" => Ok(LedgerRecordType::Measurement),
            "works_status" => Ok(LedgerRecordType::WorksStatus),
            "settlement" => Ok(LedgerRecordType::Settlement),
            other => Err(format!("unknown ledger record type '{}'", other)),
        }
    }
}

/// Ledger entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Success,
    Error,
    Pending,
    PartialSuccess,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Success => "success",
            LedgerStatus::Error => "error",
            LedgerStatus::Pending => "pending",
            LedgerStatus::PartialSuccess => "partial_success",
        }
    }

    /// Classify a completed run from its counters
    ///
    /// `Error` when every processed item failed, `PartialSuccess` when some
    /// did, `Success` otherwise (including an empty run). Runs aborted before
    /// processing anything are built as `Error` by the caller.
    pub fn from_counts(processed: i64, errored: i64) -> Self {
        if errored == 0 {
            LedgerStatus::Success
        } else if errored < processed {
            LedgerStatus::PartialSuccess
        } else {
            LedgerStatus::Error
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LedgerStatus::Success),
            "error" => Ok(LedgerStatus::Error),
            "pending" => Ok(LedgerStatus::Pending),
            "partial_success" => Ok(LedgerStatus::PartialSuccess),
            other => Err(format!("unknown ledger status '{}'", other)),
        }
    }
}

impl From<SubmissionStatus> for LedgerStatus {
    fn from(value: SubmissionStatus) -> Self {
        match value {
            SubmissionStatus::Success => LedgerStatus::Success,
            SubmissionStatus::Error => LedgerStatus::Error,
        }
    }
}

/// Ledger entry before it has been appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub direction: Direction,
    pub record_type: LedgerRecordType,
    pub tenant_id: String,
    /// Record id for per-record entries; `None` for run summaries
    pub reference_id: Option<String>,
    /// Batch id or import run id shared by related entries
    pub correlation_id: Uuid,
    pub status: LedgerStatus,
    pub protocol: Option<String>,
    pub error_message: Option<String>,
    pub records_processed: i64,
    pub records_updated: i64,
    pub records_errored: i64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

impl NewLedgerEntry {
    /// Per-record entry for one outbound submission attempt
    pub fn outbound_record(
        tenant_id: &str,
        batch_id: Uuid,
        outcome: &SubmissionOutcome,
        duration_ms: i64,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            direction: Direction::Outbound,
            record_type: outcome.record_type.into(),
            tenant_id: tenant_id.to_string(),
            reference_id: Some(outcome.record_id.clone()),
            correlation_id: batch_id,
            status: outcome.status.into(),
            protocol: outcome.protocol.clone(),
            error_message: outcome.error_message.clone(),
            records_processed: 1,
            records_updated: 0,
            records_errored: if outcome.is_success() { 0 } else { 1 },
            duration_ms,
            created_at: outcome.attempted_at,
            detail,
        }
    }

    /// Summary entry closing an outbound batch
    pub fn outbound_summary(
        tenant_id: &str,
        batch_id: Uuid,
        record_type: RecordType,
        processed: i64,
        errored: i64,
        duration_ms: i64,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            direction: Direction::Outbound,
            record_type: record_type.into(),
            tenant_id: tenant_id.to_string(),
            reference_id: None,
            correlation_id: batch_id,
            status: LedgerStatus::from_counts(processed, errored),
            protocol: None,
            error_message: None,
            records_processed: processed,
            records_updated: 0,
            records_errored: errored,
            duration_ms,
            created_at: Utc::now(),
            detail,
        }
    }

    /// Attach the id assigned by the store
    pub fn into_entry(self, id: i64) -> IntegrationLedgerEntry {
        IntegrationLedgerEntry {
            id,
            direction: self.direction,
            record_type: self.record_type,
            tenant_id: self.tenant_id,
            reference_id: self.reference_id,
            correlation_id: self.correlation_id,
            status: self.status,
            protocol: self.protocol,
            error_message: self.error_message,
            records_processed: self.records_processed,
            records_updated: self.records_updated,
            records_errored: self.records_errored,
            duration_ms: self.duration_ms,
            created_at: self.created_at,
            detail: self.detail,
        }
    }
}

/// Persisted unit of audit history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationLedgerEntry {
    pub id: i64,
    pub direction: Direction,
    pub record_type: LedgerRecordType,
    pub tenant_id: String,
    pub reference_id: Option<String>,
    pub correlation_id: Uuid,
    pub status: LedgerStatus,
    pub protocol: Option<String>,
    pub error_message: Option<String>,
    pub records_processed: i64,
    pub records_updated: i64,
    pub records_errored: i64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

/// Ledger query filters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub tenant_id: Option<String>,
    pub direction: Option<Direction>,
    pub record_type: Option<LedgerRecordType>,
    pub status: Option<LedgerStatus>,
    pub correlation_id: Option<Uuid>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
    /// 1-indexed page number
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl LedgerFilter {
    pub fn page_size(&self) -> i64 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn requested_page(&self) -> i64 {
        self.page.unwrap_or(1)
    }
}

/// One page of ledger entries, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<IntegrationLedgerEntry>,
    pub page: i64,
    pub page_size: i64,
    pub total_results: i64,
    pub total_pages: i64,
}

/// Aggregate counts for one direction
///
/// Outbound figures count per-record submission attempts, with `pending`
/// holding batches opened but not yet closed. Inbound figures count import
/// runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionStats {
    pub direction: Direction,
    pub total_entries: i64,
    pub success: i64,
    pub partial_success: i64,
    pub error: i64,
    pub pending: i64,
    pub records_processed: i64,
    pub records_errored: i64,
    /// Share of settled entries that ended in `Success`
    pub success_rate: f64,
}

impl DirectionStats {
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            total_entries: 0,
            success: 0,
            partial_success: 0,
            error: 0,
            pending: 0,
            records_processed: 0,
            records_errored: 0,
            success_rate: 0.0,
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        let settled = self.success + self.partial_success + self.error;
        self.success_rate = if settled > 0 {
            self.success as f64 / settled as f64
        } else {
            0.0
        };
        self
    }
}

/// Dashboard statistics over the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub since: Option<DateTime<Utc>>,
    pub outbound: DirectionStats,
    pub inbound: DirectionStats,
    /// Records whose most recent outbound attempt failed
    pub outbound_backlog: i64,
}
