//! Outbound records borrowed from the surrounding application
//!
//! Each record type is its own struct; `Record` is the closed union the
//! validator and mapper match on exhaustively.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigurationError, EligibilityError};

/// Record types accepted by the Regulator for outbound submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Contract,
    Measurement,
    WorksStatus,
}

impl RecordType {
    pub const ALL: [RecordType; 3] = [
        RecordType::Contract,
        RecordType::Measurement,
        RecordType::WorksStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Contract => "contract",
            RecordType::Measurement => "measurement",
            RecordType::WorksStatus => "works_status",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contract" => Ok(RecordType::Contract),
            "measurement" => Ok(RecordType::Measurement),
            "works_status" => Ok(RecordType::WorksStatus),
            other => Err(ConfigurationError::UnknownRecordType(other.to_string())),
        }
    }
}

/// Local approval lifecycle of a record
///
/// Unrelated to what the Regulator thinks of the record; see [`RegulatorStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    Draft,
    PendingApproval,
    Approved,
    Cancelled,
}

impl RecordStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStage::Draft => "draft",
            RecordStage::PendingApproval => "pending_approval",
            RecordStage::Approved => "approved",
            RecordStage::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RecordStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RecordStage::Draft),
            "pending_approval" => Ok(RecordStage::PendingApproval),
            "approved" => Ok(RecordStage::Approved),
            "cancelled" => Ok(RecordStage::Cancelled),
            other => Err(format!("unknown record stage '{}'", other)),
        }
    }
}

/// Processing state of a record on the Regulator's side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulatorStatus {
    /// Submitted, awaiting the Regulator's processing
    AwaitingProcessing,
    Accepted,
    Rejected,
}

impl RegulatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegulatorStatus::AwaitingProcessing => "awaiting_processing",
            RegulatorStatus::Accepted => "accepted",
            RegulatorStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for RegulatorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_processing" => Ok(RegulatorStatus::AwaitingProcessing),
            "accepted" => Ok(RegulatorStatus::Accepted),
            "rejected" => Ok(RegulatorStatus::Rejected),
            other => Err(format!("unknown regulator status '{}'", other)),
        }
    }
}

/// Credentials presented to the Regulator
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorCredentials {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for RegulatorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegulatorCredentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Explicit tenant context passed into every pipeline call
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub credentials: RegulatorCredentials,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, credentials: RegulatorCredentials) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            credentials,
        }
    }

    /// Context for work that never reaches the Regulator (advisory validation)
    pub fn local(tenant_id: impl Into<String>) -> Self {
        Self::new(
            tenant_id,
            RegulatorCredentials {
                username: String::new(),
                token: String::new(),
            },
        )
    }
}

/// A single field value as seen by rules and the mapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
}

impl FieldValue {
    /// Empty text counts as missing
    pub fn is_blank(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.trim().is_empty())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Date(_) => "date",
        }
    }
}

/// Result of looking a field up by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLookup {
    /// The record type has no field with this name
    Absent,
    /// The field exists; its value may be empty
    Present(Option<FieldValue>),
}

impl FieldLookup {
    /// The value, treating blank text as missing
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            FieldLookup::Present(Some(value)) if !value.is_blank() => Some(value),
            _ => None,
        }
    }
}

fn text(value: &Option<String>) -> FieldLookup {
    FieldLookup::Present(value.clone().map(FieldValue::Text))
}

fn integer(value: Option<i64>) -> FieldLookup {
    FieldLookup::Present(value.map(FieldValue::Integer))
}

fn date(value: Option<NaiveDate>) -> FieldLookup {
    FieldLookup::Present(value.map(FieldValue::Date))
}

/// Contract signed with a supplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: String,
    pub tenant_id: String,
    pub external_id: Option<String>,
    pub stage: RecordStage,
    pub number: Option<String>,
    pub year: Option<i64>,
    /// CPF (11 digits) or CNPJ (14 digits)
    pub supplier_document: Option<String>,
    pub supplier_name: Option<String>,
    pub object: Option<String>,
    pub modality: Option<String>,
    pub value_cents: Option<i64>,
    pub signed_on: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Periodic measurement of executed work under a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: String,
    pub tenant_id: String,
    pub external_id: Option<String>,
    pub stage: RecordStage,
    pub contract_external_id: Option<String>,
    pub sequence: Option<i64>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub measured_value_cents: Option<i64>,
    pub percent_complete: Option<i64>,
}

/// Physical status report of a public work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksStatusRecord {
    pub id: String,
    pub tenant_id: String,
    pub external_id: Option<String>,
    pub stage: RecordStage,
    pub works_external_id: Option<String>,
    pub status_code: Option<String>,
    pub physical_progress: Option<i64>,
    pub reference_date: Option<NaiveDate>,
    pub justification: Option<String>,
}

/// Outbound record, one variant per record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum Record {
    Contract(ContractRecord),
    Measurement(MeasurementRecord),
    WorksStatus(WorksStatusRecord),
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Contract(_) => RecordType::Contract,
            Record::Measurement(_) => RecordType::Measurement,
            Record::WorksStatus(_) => RecordType::WorksStatus,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Contract(r) => &r.id,
            Record::Measurement(r) => &r.id,
            Record::WorksStatus(r) => &r.id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            Record::Contract(r) => &r.tenant_id,
            Record::Measurement(r) => &r.tenant_id,
            Record::WorksStatus(r) => &r.tenant_id,
        }
    }

    pub fn stage(&self) -> RecordStage {
        match self {
            Record::Contract(r) => r.stage,
            Record::Measurement(r) => r.stage,
            Record::WorksStatus(r) => r.stage,
        }
    }

    fn external_id(&self) -> &Option<String> {
        match self {
            Record::Contract(r) => &r.external_id,
            Record::Measurement(r) => &r.external_id,
            Record::WorksStatus(r) => &r.external_id,
        }
    }

    /// Check the local lifecycle stage allows outbound submission
    ///
    /// Measurements must be approved; contracts and status reports may also go
    /// out while pending approval. Drafts and cancelled records never do.
    pub fn check_eligible(&self) -> Result<(), EligibilityError> {
        let stage = self.stage();
        let eligible = match self {
            Record::Measurement(_) => stage == RecordStage::Approved,
            Record::Contract(_) | Record::WorksStatus(_) => {
                matches!(stage, RecordStage::PendingApproval | RecordStage::Approved)
            }
        };

        if eligible {
            Ok(())
        } else {
            Err(EligibilityError {
                record_id: self.id().to_string(),
                record_type: self.record_type(),
                stage,
            })
        }
    }

    /// Look a domain field up by name
    pub fn field(&self, name: &str) -> FieldLookup {
        if name == "external_id" {
            return text(self.external_id());
        }

        match self {
            Record::Contract(r) => match name {
                "number" => text(&r.number),
                "year" => integer(r.year),
                "supplier_document" => text(&r.supplier_document),
                "supplier_name" => text(&r.supplier_name),
                "object" => text(&r.object),
                "modality" => text(&r.modality),
                "value_cents" => integer(r.value_cents),
                "signed_on" => date(r.signed_on),
                "start_date" => date(r.start_date),
                "end_date" => date(r.end_date),
                _ => FieldLookup::Absent,
            },
            Record::Measurement(r) => match name {
                "contract_external_id" => text(&r.contract_external_id),
                "sequence" => integer(r.sequence),
                "period_start" => date(r.period_start),
                "period_end" => date(r.period_end),
                "measured_value_cents" => integer(r.measured_value_cents),
                "percent_complete" => integer(r.percent_complete),
                _ => FieldLookup::Absent,
            },
            Record::WorksStatus(r) => match name {
                "works_external_id" => text(&r.works_external_id),
                "status_code" => text(&r.status_code),
                "physical_progress" => integer(r.physical_progress),
                "reference_date" => date(r.reference_date),
                "justification" => text(&r.justification),
                _ => FieldLookup::Absent,
            },
        }
    }
}
