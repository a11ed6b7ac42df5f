//! Per-record submission outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{RecordType, RegulatorStatus};

/// Submission status as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Success,
    Error,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Success => "success",
            SubmissionStatus::Error => "error",
        }
    }
}

/// Why a record ended in `Error`
///
/// Persisted in ledger detail so the audit trail tells "record invalid" apart
/// from "valid but the Regulator call failed" without replaying anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Requested id not present in storage
    NotFound,
    /// Local lifecycle stage does not allow submission
    Ineligible,
    /// Blocked by strict validation gating
    Validation,
    /// Record could not be expressed in the wire format
    Mapping,
    /// Network, timeout, non-success status or malformed response
    Transport,
}

/// Result of one submission attempt for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub record_id: String,
    pub record_type: RecordType,
    pub status: SubmissionStatus,
    /// Regulator confirmation identifier
    pub protocol: Option<String>,
    pub error_message: Option<String>,
    pub failure: Option<FailureKind>,
    /// Regulator-side state reported with a successful submission
    pub regulator_status: Option<RegulatorStatus>,
    /// 1-based attempt number
    pub attempt: u32,
    pub attempted_at: DateTime<Utc>,
}

impl SubmissionOutcome {
    pub fn success(
        record_id: impl Into<String>,
        record_type: RecordType,
        protocol: impl Into<String>,
        regulator_status: RegulatorStatus,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            record_type,
            status: SubmissionStatus::Success,
            protocol: Some(protocol.into()),
            error_message: None,
            failure: None,
            regulator_status: Some(regulator_status),
            attempt: 1,
            attempted_at: Utc::now(),
        }
    }

    pub fn failure(
        record_id: impl Into<String>,
        record_type: RecordType,
        failure: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            record_type,
            status: SubmissionStatus::Error,
            protocol: None,
            error_message: Some(message.into()),
            failure: Some(failure),
            regulator_status: None,
            attempt: 1,
            attempted_at: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == SubmissionStatus::Success
    }

    /// Transport failures are the only ones worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.failure == Some(FailureKind::Transport)
    }
}
