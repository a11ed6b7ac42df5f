//! Submission gateway
//!
//! Sends one mapped payload to the Regulator and reports a
//! [`SubmissionOutcome`]. Exactly one network attempt per call; retry policy
//! belongs to the coordinator.
//!
//! Every transport problem (timeout, connection failure, non-2xx status, a
//! 2xx body without a `protocolo`) is folded into an `Error` outcome tagged
//! [`FailureKind::Transport`]. Callers branch on `status` only.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::mapper::WirePayload;
use super::rate_limiter::RateLimiter;
use crate::error::TransportError;
use crate::models::{FailureKind, RegulatorCredentials, RegulatorStatus, SubmissionOutcome};

const USER_AGENT: &str = concat!("obra-interop/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in outcome messages
const MAX_ERROR_BODY: usize = 300;

/// Boundary to the Regulator's submission API
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    /// Submit one payload, bounded by `timeout`
    async fn submit(
        &self,
        payload: &WirePayload,
        credentials: &RegulatorCredentials,
        timeout: Duration,
    ) -> SubmissionOutcome;
}

/// reqwest-backed gateway
pub struct HttpSubmissionGateway {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpSubmissionGateway {
    pub fn new(base_url: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    async fn send(
        &self,
        payload: &WirePayload,
        credentials: &RegulatorCredentials,
    ) -> Result<Receipt, TransportError> {
        let url = format!("{}/{}", self.base_url, payload.endpoint());
        debug!(
            record_id = %payload.reference_id,
            url = %url,
            "Submitting record to Regulator"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&credentials.token)
            .header("X-Usuario", &credentials.username)
            .json(&payload.body)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_message_from_body(&text),
            });
        }

        parse_receipt(&text)
    }
}

#[async_trait]
impl SubmissionGateway for HttpSubmissionGateway {
    async fn submit(
        &self,
        payload: &WirePayload,
        credentials: &RegulatorCredentials,
        timeout: Duration,
    ) -> SubmissionOutcome {
        self.rate_limiter.wait().await;

        let result = match tokio::time::timeout(timeout, self.send(payload, credentials)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Ok(receipt) => SubmissionOutcome::success(
                payload.reference_id.clone(),
                payload.record_type,
                receipt.protocol,
                receipt.regulator_status,
            ),
            Err(err) => {
                warn!(
                    record_id = %payload.reference_id,
                    error = %err,
                    "Regulator submission failed"
                );
                SubmissionOutcome::failure(
                    payload.reference_id.clone(),
                    payload.record_type,
                    FailureKind::Transport,
                    err.to_string(),
                )
            }
        }
    }
}

/// Accepted submission as reported by the Regulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub protocol: String,
    pub regulator_status: RegulatorStatus,
}

/// Parse a 2xx body; a body without a `protocolo` string is malformed
pub fn parse_receipt(body: &str) -> Result<Receipt, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let protocol = value
        .get("protocolo")
        .and_then(Value::as_str)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| TransportError::MalformedResponse("missing protocolo".to_string()))?;

    let regulator_status = match value.get("situacao").and_then(Value::as_str) {
        Some("aceito") => RegulatorStatus::Accepted,
        Some("rejeitado") => RegulatorStatus::Rejected,
        _ => RegulatorStatus::AwaitingProcessing,
    };

    Ok(Receipt {
        protocol: protocol.trim().to_string(),
        regulator_status,
    })
}

/// Prefer the Regulator's `mensagem` field, else a trimmed slice of the body
fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.get("mensagem").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    body.trim().chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_requires_protocol() {
        let receipt = parse_receipt(r#"{"protocolo": "TCE-2024-000123"}"#).unwrap();
        assert_eq!(receipt.protocol, "TCE-2024-000123");
        assert_eq!(receipt.regulator_status, RegulatorStatus::AwaitingProcessing);

        assert_eq!(
            parse_receipt(r#"{"status": "ok"}"#).unwrap_err(),
            TransportError::MalformedResponse("missing protocolo".to_string())
        );
        assert!(parse_receipt(r#"{"protocolo": 42}"#).is_err());
        assert!(parse_receipt("<html>").is_err());
    }

    #[test]
    fn test_receipt_reads_regulator_status() {
        let receipt = parse_receipt(r#"{"protocolo": "P-1", "situacao": "aceito"}"#).unwrap();
        assert_eq!(receipt.regulator_status, RegulatorStatus::Accepted);
    }

    #[test]
    fn test_error_message_prefers_mensagem() {
        assert_eq!(
            error_message_from_body(r#"{"mensagem": "CNPJ inválido"}"#),
            "CNPJ inválido"
        );
        assert_eq!(error_message_from_body("  Bad Gateway \n"), "Bad Gateway");
    }
}
