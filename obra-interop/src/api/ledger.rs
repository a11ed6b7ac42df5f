//! Ledger read surface
//!
//! GET /interop/ledger, GET /interop/ledger/stats

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::models::{LedgerFilter, LedgerPage, LedgerStats};
use crate::AppState;

/// GET /interop/ledger/stats query
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub tenant_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// GET /interop/ledger
///
/// Filters: tenant_id, direction, record_type, status, correlation_id,
/// from (inclusive), to (exclusive), page, page_size. Newest first.
pub async fn query_ledger(
    State(state): State<AppState>,
    Query(filter): Query<LedgerFilter>,
) -> ApiResult<Json<LedgerPage>> {
    let page = state.ledger.query(&filter).await?;
    Ok(Json(page))
}

/// GET /interop/ledger/stats
pub async fn ledger_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<LedgerStats>> {
    let stats = state
        .ledger
        .stats(query.tenant_id.as_deref(), query.since)
        .await?;
    Ok(Json(stats))
}

/// Build ledger routes
pub fn ledger_routes() -> Router<AppState> {
    Router::new()
        .route("/interop/ledger", get(query_ledger))
        .route("/interop/ledger/stats", get(ledger_stats))
}
