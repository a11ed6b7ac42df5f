//! Advisory validation
//!
//! POST /interop/validate runs the rule set over stored records without
//! submitting or recording anything.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use super::tenant_id;
use crate::error::ApiResult;
use crate::models::{RecordType, TenantContext, ValidationResult};
use crate::AppState;

/// POST /interop/validate request
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub record_type: String,
    pub record_ids: Vec<String>,
}

/// POST /interop/validate response
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub record_type: RecordType,
    pub valid: usize,
    pub invalid: usize,
    /// Requested ids with no stored record
    pub not_found: Vec<String>,
    pub results: Vec<ValidationResult>,
}

/// POST /interop/validate
pub async fn validate_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    let ctx = TenantContext::local(tenant_id(&headers)?);
    let record_type: RecordType = request.record_type.parse()?;

    let results = state
        .coordinator
        .validate_batch(&ctx, record_type, &request.record_ids)
        .await?;

    let mut not_found: Vec<String> = Vec::new();
    for id in &request.record_ids {
        let known = results.iter().any(|r| &r.record_id == id);
        if !known && !not_found.contains(id) {
            not_found.push(id.clone());
        }
    }

    let valid = results.iter().filter(|r| r.valid).count();
    Ok(Json(ValidateResponse {
        record_type,
        valid,
        invalid: results.len() - valid,
        not_found,
        results,
    }))
}

/// Build validation routes
pub fn validation_routes() -> Router<AppState> {
    Router::new().route("/interop/validate", post(validate_records))
}
