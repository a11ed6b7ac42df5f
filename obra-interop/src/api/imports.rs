//! Inbound import trigger
//!
//! POST /interop/imports runs one settlement import to completion and returns
//! its ledger entry.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use chrono::Utc;
use obra_common::events::ObraEvent;
use serde::Deserialize;

use super::tenant_id;
use crate::config::resolve_credentials;
use crate::error::ApiResult;
use crate::models::{IntegrationLedgerEntry, TenantContext};
use crate::AppState;

/// POST /interop/imports request
#[derive(Debug, Default, Deserialize)]
pub struct StartImportRequest {
    /// Resume point, usually `detail.resume_cursor` of an incomplete run
    #[serde(default)]
    pub since_cursor: Option<String>,
}

/// POST /interop/imports
pub async fn run_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartImportRequest>,
) -> ApiResult<Json<IntegrationLedgerEntry>> {
    let tenant_id = tenant_id(&headers)?;
    let credentials = resolve_credentials(&state.db, &state.config, &tenant_id).await?;
    let ctx = TenantContext::new(tenant_id, credentials);

    let result = state
        .reconciler
        .run_import(&ctx, state.source.as_ref(), request.since_cursor)
        .await;

    match result {
        Ok(entry) => {
            if let Some(message) = &entry.error_message {
                state.record_error(message.clone()).await;
            }
            state.event_bus.emit_lossy(ObraEvent::ImportCompleted {
                run_id: entry.correlation_id,
                tenant_id: ctx.tenant_id.clone(),
                status: entry.status.to_string(),
                records_processed: entry.records_processed,
                records_updated: entry.records_updated,
                records_errored: entry.records_errored,
                timestamp: Utc::now(),
            });
            Ok(Json(entry))
        }
        Err(e) => {
            tracing::error!(tenant_id = %ctx.tenant_id, error = %e, "Settlement import failed");
            state.record_error(e.to_string()).await;
            state.event_bus.emit_lossy(ObraEvent::ImportFailed {
                tenant_id: ctx.tenant_id.clone(),
                error: e.to_string(),
                timestamp: Utc::now(),
            });
            Err(e.into())
        }
    }
}

/// Build import routes
pub fn import_routes() -> Router<AppState> {
    Router::new().route("/interop/imports", post(run_import))
}
