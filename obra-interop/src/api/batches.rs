//! Outbound batch trigger
//!
//! POST /interop/batches, POST /interop/batches/:batch_id/cancel
//!
//! The batch runs in a background task; the request only waits for the checks
//! that can reject it up front (tenant, record type, rule set, credentials).

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use obra_common::events::ObraEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::tenant_id;
use crate::config::{batch_policy, resolve_credentials};
use crate::error::{ApiError, ApiResult};
use crate::models::{RecordType, TenantContext};
use crate::services::{BatchPolicy, BatchProgress, BatchRequest};
use crate::AppState;

/// Progress messages buffered between the coordinator and the event bus
const PROGRESS_BUFFER: usize = 64;

/// POST /interop/batches request
#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    pub record_type: String,
    pub record_ids: Vec<String>,
    /// Overrides `[regulator] require_valid_before_submit` for this batch
    #[serde(default)]
    pub require_valid_before_submit: Option<bool>,
}

/// POST /interop/batches response
#[derive(Debug, Serialize, Deserialize)]
pub struct StartBatchResponse {
    pub batch_id: Uuid,
    pub record_type: RecordType,
    pub total: usize,
}

/// POST /interop/batches/:batch_id/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelBatchResponse {
    pub batch_id: Uuid,
    pub cancelled: bool,
}

/// POST /interop/batches
///
/// Returns 202 Accepted with the batch id; progress follows on the SSE stream.
pub async fn start_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartBatchRequest>,
) -> ApiResult<(StatusCode, Json<StartBatchResponse>)> {
    let tenant_id = tenant_id(&headers)?;
    let record_type: RecordType = request.record_type.parse()?;
    state.rules.rule_set(record_type)?;

    let credentials = resolve_credentials(&state.db, &state.config, &tenant_id).await?;
    let ctx = TenantContext::new(tenant_id, credentials);
    let policy = batch_policy(&state.config.regulator, request.require_valid_before_submit);
    let batch = BatchRequest::new(record_type, request.record_ids);

    let response = StartBatchResponse {
        batch_id: batch.batch_id,
        record_type,
        total: batch.record_ids.len(),
    };

    let cancel = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(batch.batch_id, cancel.clone());

    tracing::info!(
        batch_id = %batch.batch_id,
        tenant_id = %ctx.tenant_id,
        record_type = %record_type,
        total = response.total,
        "Outbound batch accepted"
    );

    let task_state = state.clone();
    tokio::spawn(async move {
        execute_batch(task_state, ctx, batch, policy, cancel).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Run a batch, mirroring its progress onto the event bus
async fn execute_batch(
    state: AppState,
    ctx: TenantContext,
    batch: BatchRequest,
    policy: BatchPolicy,
    cancel: CancellationToken,
) {
    let batch_id = batch.batch_id;

    state.event_bus.emit_lossy(ObraEvent::BatchStarted {
        batch_id,
        tenant_id: ctx.tenant_id.clone(),
        record_type: batch.record_type.to_string(),
        total: batch.record_ids.len(),
        timestamp: Utc::now(),
    });

    let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
    let forwarder = tokio::spawn(forward_progress(state.clone(), rx));

    let result = state
        .coordinator
        .run_batch(&ctx, &batch, &policy, &cancel, Some(tx))
        .await;

    // The sender went away with run_batch; drain what is left before closing
    if let Err(e) = forwarder.await {
        tracing::warn!(batch_id = %batch_id, error = %e, "Progress forwarder failed");
    }

    match result {
        Ok(summary) => {
            if !summary.summary_persisted {
                state
                    .record_error(format!("batch {} summary was not recorded", batch_id))
                    .await;
            }
            state.event_bus.emit_lossy(ObraEvent::BatchCompleted {
                batch_id,
                status: summary.summary.status.to_string(),
                records_processed: summary.summary.records_processed,
                records_errored: summary.summary.records_errored,
                cancelled: summary.cancelled,
                timestamp: Utc::now(),
            });
        }
        Err(e) => {
            tracing::error!(batch_id = %batch_id, error = %e, "Outbound batch failed");
            state.record_error(e.to_string()).await;
            state.event_bus.emit_lossy(ObraEvent::BatchFailed {
                batch_id,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    state.cancellation_tokens.write().await.remove(&batch_id);
}

async fn forward_progress(state: AppState, mut rx: mpsc::Receiver<BatchProgress>) {
    while let Some(progress) = rx.recv().await {
        state.event_bus.emit_lossy(ObraEvent::BatchProgress {
            batch_id: progress.batch_id,
            record_id: progress.outcome.record_id.clone(),
            status: progress.outcome.status.as_str().to_string(),
            completed: progress.completed,
            total: progress.total,
            percentage: progress.percentage,
            error_message: progress.outcome.error_message.clone(),
            timestamp: progress.outcome.attempted_at,
        });
    }
}

/// POST /interop/batches/:batch_id/cancel
///
/// Stops the batch before its next record; the record in flight is finished.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<CancelBatchResponse>> {
    let tokens = state.cancellation_tokens.read().await;
    let token = tokens
        .get(&batch_id)
        .ok_or_else(|| ApiError::NotFound(format!("No running batch {}", batch_id)))?;

    token.cancel();
    tracing::info!(batch_id = %batch_id, "Batch cancellation requested");

    Ok(Json(CancelBatchResponse {
        batch_id,
        cancelled: true,
    }))
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/interop/batches", post(start_batch))
        .route("/interop/batches/:batch_id/cancel", post(cancel_batch))
}
