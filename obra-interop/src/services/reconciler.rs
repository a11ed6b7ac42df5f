//! Import reconciler
//!
//! Pages through the Regulator's settlements and merges them into local
//! storage. One bad row never aborts a page; one run always produces exactly
//! one inbound ledger entry.
//!
//! # Classification
//! - `new`: no local row with the natural key
//! - `updated`: local row had a strictly lower revision
//! - `skipped`: local row already at this revision or newer (replays land here)
//! - `errored`: structurally invalid row, or the store rejected it
//!
//! # Status
//! Derived from the counters, except that a run which could not process a
//! single row because the source failed is `Error` with the transport message.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::settlement_source::SettlementSource;
use crate::db::{LedgerStore, SettlementStore};
use crate::error::{PipelineError, TransportError};
use crate::models::{
    Direction, IntegrationLedgerEntry, LedgerRecordType, LedgerStatus, NewLedgerEntry, RowIssue,
    SettlementRow, TenantContext, UpsertOutcome,
};

/// Default bound on pages fetched in one run
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Row issues kept verbatim in ledger detail
const MAX_RECORDED_ISSUES: usize = 100;

/// Working set of one import run
#[derive(Debug, Default)]
pub struct ImportBatch {
    pub run_id: Uuid,
    pub new: i64,
    pub updated: i64,
    pub skipped: i64,
    pub errored: i64,
    pub pages: usize,
    pub issues: Vec<RowIssue>,
    /// Cursor of the last page fully processed
    pub last_cursor: Option<String>,
}

impl ImportBatch {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            ..Default::default()
        }
    }

    pub fn processed(&self) -> i64 {
        self.new + self.updated + self.skipped + self.errored
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.new += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn record_error(&mut self, issue: RowIssue) {
        self.errored += 1;
        if self.issues.len() < MAX_RECORDED_ISSUES {
            self.issues.push(issue);
        }
    }

    /// Ledger status for the finished run
    pub fn status(&self, fetch_error: Option<&TransportError>) -> LedgerStatus {
        if fetch_error.is_some() && self.processed() == 0 {
            LedgerStatus::Error
        } else {
            LedgerStatus::from_counts(self.processed(), self.errored)
        }
    }
}

/// Why a run stopped before the source ran out of pages
enum Interruption {
    Fetch {
        error: TransportError,
        resume_cursor: Option<String>,
    },
    PageLimit {
        resume_cursor: Option<String>,
    },
}

/// Runs inbound settlement imports
pub struct ImportReconciler {
    store: Arc<dyn SettlementStore>,
    ledger: Arc<dyn LedgerStore>,
    max_pages: usize,
}

impl ImportReconciler {
    pub fn new(store: Arc<dyn SettlementStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            ledger,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Run one import starting at `since_cursor`
    ///
    /// Only a failure to write the ledger entry escapes as an error.
    pub async fn run_import(
        &self,
        ctx: &TenantContext,
        source: &dyn SettlementSource,
        since_cursor: Option<String>,
    ) -> Result<IntegrationLedgerEntry, PipelineError> {
        let started = Instant::now();
        let mut batch = ImportBatch::new();
        let mut cursor = since_cursor.clone();
        let mut interruption = None;

        info!(
            run_id = %batch.run_id,
            tenant_id = %ctx.tenant_id,
            since_cursor = since_cursor.as_deref(),
            "Starting settlement import"
        );

        loop {
            if batch.pages >= self.max_pages {
                warn!(
                    run_id = %batch.run_id,
                    max_pages = self.max_pages,
                    "Page limit reached; remaining pages left for the next run"
                );
                interruption = Some(Interruption::PageLimit {
                    resume_cursor: cursor.clone(),
                });
                break;
            }

            let page = match source.fetch_page(ctx, cursor.as_deref()).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(
                        run_id = %batch.run_id,
                        page = batch.pages + 1,
                        error = %error,
                        "Settlement page fetch failed"
                    );
                    interruption = Some(Interruption::Fetch {
                        error,
                        resume_cursor: cursor.clone(),
                    });
                    break;
                }
            };

            batch.pages += 1;
            for (index, raw) in page.rows.iter().enumerate() {
                self.reconcile_row(ctx, &mut batch, index, raw).await;
            }

            batch.last_cursor = cursor.take();
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let fetch_error = match &interruption {
            Some(Interruption::Fetch { error, .. }) => Some(error),
            _ => None,
        };
        let status = batch.status(fetch_error);
        let error_message = fetch_error.map(|e| e.to_string());
        let (incomplete, resume_cursor) = match &interruption {
            Some(Interruption::Fetch { resume_cursor, .. })
            | Some(Interruption::PageLimit { resume_cursor }) => (true, resume_cursor.clone()),
            None => (false, None),
        };

        let entry = NewLedgerEntry {
            direction: Direction::Inbound,
            record_type: LedgerRecordType::Settlement,
            tenant_id: ctx.tenant_id.clone(),
            reference_id: None,
            correlation_id: batch.run_id,
            status,
            protocol: None,
            error_message,
            records_processed: batch.processed(),
            records_updated: batch.updated,
            records_errored: batch.errored,
            duration_ms: started.elapsed().as_millis() as i64,
            created_at: obra_common::time::now(),
            detail: json!({
                "new": batch.new,
                "updated": batch.updated,
                "skipped": batch.skipped,
                "errored": batch.errored,
                "pages": batch.pages,
                "since_cursor": since_cursor,
                "last_cursor": batch.last_cursor,
                "incomplete": incomplete,
                "page_limit_reached": matches!(interruption, Some(Interruption::PageLimit { .. })),
                "resume_cursor": resume_cursor,
                "issues": batch.issues,
            }),
        };

        let id = self.ledger.append(entry.clone()).await?;
        let entry = entry.into_entry(id);

        info!(
            run_id = %batch.run_id,
            status = entry.status.as_str(),
            processed = entry.records_processed,
            new = batch.new,
            updated = batch.updated,
            skipped = batch.skipped,
            errored = batch.errored,
            pages = batch.pages,
            "Settlement import finished"
        );

        Ok(entry)
    }

    async fn reconcile_row(
        &self,
        ctx: &TenantContext,
        batch: &mut ImportBatch,
        index: usize,
        raw: &serde_json::Value,
    ) {
        let page = batch.pages;
        let row = match SettlementRow::from_wire(raw) {
            Ok(row) => row,
            Err(message) => {
                batch.record_error(RowIssue {
                    page,
                    index,
                    natural_key: SettlementRow::natural_key_of(raw),
                    message,
                });
                return;
            }
        };

        match self.store.upsert_external_row(ctx, &row).await {
            Ok(outcome) => batch.record(outcome),
            Err(err) => {
                warn!(
                    run_id = %batch.run_id,
                    natural_key = %row.natural_key,
                    error = %err,
                    "Failed to upsert settlement"
                );
                batch.record_error(RowIssue {
                    page,
                    index,
                    natural_key: Some(row.natural_key.clone()),
                    message: format!("storage error: {}", err),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_distinguishes_unreachable_from_empty() {
        let batch = ImportBatch::new();
        assert_eq!(batch.status(None), LedgerStatus::Success);

        let error = TransportError::Connection("refused".to_string());
        assert_eq!(batch.status(Some(&error)), LedgerStatus::Error);
    }

    #[test]
    fn test_later_page_failure_keeps_row_counts() {
        let mut batch = ImportBatch::new();
        batch.record(UpsertOutcome::Inserted);
        batch.record(UpsertOutcome::Skipped);

        let error = TransportError::Timeout(1000);
        assert_eq!(batch.status(Some(&error)), LedgerStatus::Success);

        batch.record_error(RowIssue {
            page: 1,
            index: 2,
            natural_key: None,
            message: "missing required fields: chave".to_string(),
        });
        assert_eq!(batch.status(Some(&error)), LedgerStatus::PartialSuccess);
        assert_eq!(batch.processed(), 3);
    }

    #[test]
    fn test_issue_list_is_bounded() {
        let mut batch = ImportBatch::new();
        for index in 0..(MAX_RECORDED_ISSUES + 5) {
            batch.record_error(RowIssue {
                page: 1,
                index,
                natural_key: None,
                message: "bad row".to_string(),
            });
        }
        assert_eq!(batch.errored as usize, MAX_RECORDED_ISSUES + 5);
        assert_eq!(batch.issues.len(), MAX_RECORDED_ISSUES);
    }
}
