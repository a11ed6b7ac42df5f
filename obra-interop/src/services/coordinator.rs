//! Batch submission coordinator
//!
//! Orchestrates validate → map → submit for a selected set of records of one
//! type, strictly one record at a time, and writes the audit trail.
//!
//! # Bookkeeping
//! - A `pending` entry opens the batch once records are loaded.
//! - Every submission attempt gets its own per-record entry
//!   (`reference_id = record id`, `correlation_id = batch id`).
//! - A summary entry (`reference_id = None`) closes the batch. A batch
//!   cancelled before its first record closes as `error`. If the summary
//!   cannot be written the outcomes are still returned, flagged by
//!   `summary_persisted = false`, and the batch stays `pending` in the ledger.
//!
//! # Failure semantics
//! - Unknown rule set, or a rule set that does not fit the record type:
//!   [`PipelineError::Configuration`], nothing recorded.
//! - Records cannot be loaded: [`PipelineError::Batch`], nothing recorded.
//! - Anything wrong with one record is recorded as an `Error` outcome and the
//!   batch moves on to the next record.
//!
//! Cancellation is checked between records only; a record already handed to
//! the gateway is finished and recorded before the batch stops.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gateway::SubmissionGateway;
use super::mapper::{map_record, map_with_schema, WireSchema};
use super::validator::validate;
use crate::db::{LedgerStore, RecordStore, SubmissionReceipt};
use crate::error::PipelineError;
use crate::models::{
    FailureKind, IntegrationLedgerEntry, LedgerStatus, NewLedgerEntry, Record, RecordType,
    SubmissionOutcome, TenantContext, ValidationResult,
};
use crate::rules::RuleRegistry;

/// Per-batch policy knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    /// When false, validation is advisory and every eligible record is submitted
    pub require_valid_before_submit: bool,
    /// Bound on each gateway call
    pub submit_timeout: Duration,
    /// Gateway attempts per record; only transport failures are retried
    pub max_attempts: u32,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            require_valid_before_submit: false,
            submit_timeout: Duration::from_secs(30),
            max_attempts: 1,
        }
    }
}

/// Records selected for one batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub batch_id: Uuid,
    pub record_type: RecordType,
    /// Processed in this order; duplicates are processed per occurrence
    pub record_ids: Vec<String>,
}

impl BatchRequest {
    pub fn new(record_type: RecordType, record_ids: Vec<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            record_type,
            record_ids,
        }
    }
}

/// Progress report sent after each record
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub completed: usize,
    pub total: usize,
    /// 0.0 - 100.0
    pub percentage: f64,
    pub outcome: SubmissionOutcome,
}

/// Result of a finished (or cancelled) batch
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    /// Final outcome per attempted record, in processing order
    pub outcomes: Vec<SubmissionOutcome>,
    /// The closing ledger entry
    pub summary: IntegrationLedgerEntry,
    /// False when the closing entry could not be written; `summary.id` is then 0
    pub summary_persisted: bool,
    pub cancelled: bool,
}

/// Coordinates outbound batches
pub struct BatchCoordinator {
    records: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn SubmissionGateway>,
    rules: Arc<RuleRegistry>,
    /// Wire layouts replacing the standard one for their record type
    schemas: HashMap<RecordType, WireSchema>,
}

/// Per-batch state threaded through record processing
struct BatchRun<'a> {
    ctx: &'a TenantContext,
    batch_id: Uuid,
    record_type: RecordType,
    policy: &'a BatchPolicy,
    ledger_write_failures: usize,
}

impl BatchCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn SubmissionGateway>,
        rules: Arc<RuleRegistry>,
    ) -> Self {
        Self {
            records,
            ledger,
            gateway,
            rules,
            schemas: HashMap::new(),
        }
    }

    /// Map records of the given types with these layouts instead of the standard ones
    pub fn with_schemas(mut self, schemas: HashMap<RecordType, WireSchema>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Run one batch to completion or cancellation
    ///
    /// Progress is reported on `progress` after every record; a dropped
    /// receiver does not affect the batch.
    pub async fn run_batch(
        &self,
        ctx: &TenantContext,
        request: &BatchRequest,
        policy: &BatchPolicy,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<BatchProgress>>,
    ) -> Result<BatchSummary, PipelineError> {
        let started = Instant::now();
        let batch_id = request.batch_id;
        let record_type = request.record_type;
        let total = request.record_ids.len();

        self.rules.rule_set(record_type)?;

        let loaded = self.load(ctx, record_type, &request.record_ids).await?;

        // Validation is pure; run it up front so a broken rule set aborts
        // before anything is submitted or recorded
        let mut validations = HashMap::with_capacity(loaded.len());
        for (id, record) in &loaded {
            validations.insert(id.clone(), validate(record, &self.rules)?);
        }

        info!(
            batch_id = %batch_id,
            tenant_id = %ctx.tenant_id,
            record_type = %record_type,
            total,
            found = loaded.len(),
            require_valid_before_submit = policy.require_valid_before_submit,
            "Starting outbound batch"
        );

        let opening = NewLedgerEntry {
            status: LedgerStatus::Pending,
            ..NewLedgerEntry::outbound_summary(
                &ctx.tenant_id,
                batch_id,
                record_type,
                0,
                0,
                0,
                json!({
                    "phase": "started",
                    "batch_id": batch_id,
                    "total": total,
                    "require_valid_before_submit": policy.require_valid_before_submit,
                }),
            )
        };
        self.ledger.append(opening).await?;

        let mut run = BatchRun {
            ctx,
            batch_id,
            record_type,
            policy,
            ledger_write_failures: 0,
        };
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = false;

        for record_id in &request.record_ids {
            if cancel.is_cancelled() {
                info!(
                    batch_id = %batch_id,
                    attempted = outcomes.len(),
                    total,
                    "Batch cancelled between records"
                );
                cancelled = true;
                break;
            }

            let outcome = self
                .process_record(
                    &mut run,
                    record_id,
                    loaded.get(record_id),
                    validations.get(record_id),
                )
                .await;

            let completed = outcomes.len() + 1;
            if let Some(tx) = &progress {
                let report = BatchProgress {
                    batch_id,
                    completed,
                    total,
                    percentage: completed as f64 / total as f64 * 100.0,
                    outcome: outcome.clone(),
                };
                if tx.send(report).await.is_err() {
                    debug!(batch_id = %batch_id, "Progress receiver dropped");
                }
            }

            outcomes.push(outcome);
            tokio::task::yield_now().await;
        }

        let processed = outcomes.len() as i64;
        let errored = outcomes.iter().filter(|o| !o.is_success()).count() as i64;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut summary = NewLedgerEntry::outbound_summary(
            &ctx.tenant_id,
            batch_id,
            record_type,
            processed,
            errored,
            duration_ms,
            json!({
                "phase": "completed",
                "batch_id": batch_id,
                "total": total,
                "cancelled": cancelled,
                "not_attempted": total - outcomes.len(),
                "require_valid_before_submit": policy.require_valid_before_submit,
                "ledger_write_failures": run.ledger_write_failures,
            }),
        );
        if cancelled && outcomes.is_empty() && total > 0 {
            summary.status = LedgerStatus::Error;
            summary.error_message = Some("cancelled before any record was attempted".to_string());
        }

        // Per-record entries are already written; losing the summary must not
        // lose the outcomes
        let (summary, summary_persisted) = match self.ledger.append(summary.clone()).await {
            Ok(id) => (summary.into_entry(id), true),
            Err(err) => {
                warn!(
                    batch_id = %batch_id,
                    error = %err,
                    "Failed to append batch summary; batch stays open in the ledger"
                );
                (summary.into_entry(0), false)
            }
        };

        info!(
            batch_id = %batch_id,
            status = summary.status.as_str(),
            processed,
            errored,
            cancelled,
            duration_ms,
            "Outbound batch finished"
        );

        Ok(BatchSummary {
            batch_id,
            outcomes,
            summary,
            summary_persisted,
            cancelled,
        })
    }

    /// Advisory validation: one result per stored record, nothing submitted or recorded
    pub async fn validate_batch(
        &self,
        ctx: &TenantContext,
        record_type: RecordType,
        record_ids: &[String],
    ) -> Result<Vec<ValidationResult>, PipelineError> {
        self.rules.rule_set(record_type)?;
        let loaded = self.load(ctx, record_type, record_ids).await?;

        let mut seen = Vec::new();
        let mut results = Vec::new();
        for id in record_ids {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            if let Some(record) = loaded.get(id) {
                results.push(validate(record, &self.rules)?);
            }
        }
        Ok(results)
    }

    async fn load(
        &self,
        ctx: &TenantContext,
        record_type: RecordType,
        record_ids: &[String],
    ) -> Result<HashMap<String, Record>, PipelineError> {
        let records = self
            .records
            .load_records(ctx, record_type, record_ids)
            .await
            .map_err(|e| {
                PipelineError::Batch(format!("failed to load {} records: {}", record_type, e))
            })?;

        Ok(records
            .into_iter()
            .map(|record| (record.id().to_string(), record))
            .collect())
    }

    /// Drive one record to its final outcome, recording every attempt
    async fn process_record(
        &self,
        run: &mut BatchRun<'_>,
        record_id: &str,
        record: Option<&Record>,
        validation: Option<&ValidationResult>,
    ) -> SubmissionOutcome {
        let started = Instant::now();

        let (record, validation) = match (record, validation) {
            (Some(record), Some(validation)) => (record, validation),
            _ => {
                let outcome = SubmissionOutcome::failure(
                    record_id,
                    run.record_type,
                    FailureKind::NotFound,
                    "record not found",
                );
                self.record_attempt(run, &outcome, started, None).await;
                return outcome;
            }
        };

        if let Err(err) = record.check_eligible() {
            let outcome = SubmissionOutcome::failure(
                record_id,
                run.record_type,
                FailureKind::Ineligible,
                err.to_string(),
            );
            self.record_attempt(run, &outcome, started, Some(validation)).await;
            return outcome;
        }

        if !validation.valid {
            debug!(
                batch_id = %run.batch_id,
                record_id,
                errors = %validation.error_summary(),
                "Record failed validation"
            );
            if run.policy.require_valid_before_submit {
                let outcome = SubmissionOutcome::failure(
                    record_id,
                    run.record_type,
                    FailureKind::Validation,
                    "validation failed",
                );
                self.record_attempt(run, &outcome, started, Some(validation)).await;
                return outcome;
            }
        }

        let mapped = match self.schemas.get(&run.record_type) {
            Some(schema) => map_with_schema(record, schema),
            None => map_record(record),
        };
        let payload = match mapped {
            Ok(payload) => payload,
            Err(err) => {
                warn!(batch_id = %run.batch_id, record_id, error = %err, "Mapping failed");
                let outcome = SubmissionOutcome::failure(
                    record_id,
                    run.record_type,
                    FailureKind::Mapping,
                    format!("mapping error: {}", err),
                );
                self.record_attempt(run, &outcome, started, Some(validation)).await;
                return outcome;
            }
        };

        let max_attempts = run.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let attempt_started = Instant::now();
            let outcome = self
                .gateway
                .submit(&payload, &run.ctx.credentials, run.policy.submit_timeout)
                .await
                .with_attempt(attempt);
            self.record_attempt(run, &outcome, attempt_started, Some(validation))
                .await;

            if outcome.is_success() {
                self.remember_receipt(run, &outcome).await;
                return outcome;
            }
            if !outcome.is_retryable() || attempt >= max_attempts {
                return outcome;
            }

            debug!(
                batch_id = %run.batch_id,
                record_id,
                attempt,
                max_attempts,
                "Retrying submission after transport failure"
            );
            attempt += 1;
        }
    }

    /// Append the per-record entry; a failed append is logged and counted
    async fn record_attempt(
        &self,
        run: &mut BatchRun<'_>,
        outcome: &SubmissionOutcome,
        started: Instant,
        validation: Option<&ValidationResult>,
    ) {
        let detail = json!({
            "batch_id": run.batch_id,
            "attempt": outcome.attempt,
            "failure": outcome.failure,
            "regulator_status": outcome.regulator_status,
            "valid": validation.map(|v| v.valid),
            "validation_errors": validation.map(|v| &v.errors),
            "warnings": validation.map_or(0, |v| v.warnings.len()),
        });
        let entry = NewLedgerEntry::outbound_record(
            &run.ctx.tenant_id,
            run.batch_id,
            outcome,
            started.elapsed().as_millis() as i64,
            detail,
        );

        if let Err(err) = self.ledger.append(entry).await {
            run.ledger_write_failures += 1;
            warn!(
                batch_id = %run.batch_id,
                record_id = %outcome.record_id,
                error = %err,
                "Failed to append ledger entry"
            );
        }
    }

    async fn remember_receipt(&self, run: &BatchRun<'_>, outcome: &SubmissionOutcome) {
        let (Some(protocol), Some(regulator_status)) =
            (outcome.protocol.clone(), outcome.regulator_status)
        else {
            return;
        };
        let receipt = SubmissionReceipt {
            protocol,
            regulator_status,
            submitted_at: outcome.attempted_at,
        };

        if let Err(err) = self
            .records
            .record_submission(run.ctx, run.record_type, &outcome.record_id, &receipt)
            .await
        {
            warn!(
                batch_id = %run.batch_id,
                record_id = %outcome.record_id,
                error = %err,
                "Failed to store Regulator receipt"
            );
        }
    }
}
