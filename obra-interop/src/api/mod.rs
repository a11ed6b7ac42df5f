//! HTTP API handlers for obra-interop
//!
//! Trigger surface (batches, imports, advisory validation) plus the read
//! surface over the ledger and the SSE progress stream.

pub mod batches;
pub mod health;
pub mod imports;
pub mod ledger;
pub mod sse;
pub mod validation;

pub use batches::batch_routes;
pub use health::health_routes;
pub use imports::import_routes;
pub use ledger::ledger_routes;
pub use sse::event_stream;
pub use validation::validation_routes;

use axum::http::HeaderMap;

use crate::error::{ApiError, ApiResult};

/// Header carrying the tenant every trigger acts for
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant id from the request headers
pub(crate) fn tenant_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {} header", TENANT_HEADER)))
}
