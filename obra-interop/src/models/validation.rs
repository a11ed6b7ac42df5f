//! Validation pass results

use serde::{Deserialize, Serialize};

use super::record::RecordType;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// One problem found on one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
    pub severity: IssueSeverity,
}

impl FieldIssue {
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: IssueSeverity::Error,
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: IssueSeverity::Warning,
        }
    }
}

/// Outcome of validating one record
///
/// `valid` is derived from `errors` at construction; warnings never affect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub record_id: String,
    pub record_type: RecordType,
    pub valid: bool,
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
}

impl ValidationResult {
    /// Build a result, splitting issues by severity
    pub fn from_issues(
        record_id: impl Into<String>,
        record_type: RecordType,
        issues: Vec<FieldIssue>,
    ) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.severity == IssueSeverity::Error);

        Self {
            record_id: record_id.into(),
            record_type,
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// One-line summary of the error fields, for logs and ledger messages
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|issue| format!("{}: {}", issue.field, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
