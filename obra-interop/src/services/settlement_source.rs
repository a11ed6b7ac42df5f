//! Paginated settlement source
//!
//! The Regulator answers `GET /liquidacoes?cursor=…` with
//! `{ "registros": [...], "proximo_cursor": "…" | null }`. A reachable source
//! with nothing new returns an empty `registros` array; any other shape is a
//! transport failure, never an empty page.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::rate_limiter::RateLimiter;
use crate::error::TransportError;
use crate::models::{SourcePage, TenantContext};

/// External source of settlement rows
#[async_trait]
pub trait SettlementSource: Send + Sync {
    /// Fetch the page starting at `cursor` (`None` for the first page)
    async fn fetch_page(
        &self,
        ctx: &TenantContext,
        cursor: Option<&str>,
    ) -> Result<SourcePage, TransportError>;
}

/// reqwest-backed settlement source
pub struct HttpSettlementSource {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl HttpSettlementSource {
    pub fn new(
        base_url: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("obra-interop/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter,
            timeout,
        })
    }

    async fn get(&self, ctx: &TenantContext, cursor: Option<&str>) -> Result<SourcePage, TransportError> {
        let url = format!("{}/liquidacoes", self.base_url);
        debug!(tenant_id = %ctx.tenant_id, url = %url, cursor, "Fetching settlement page");

        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(&ctx.credentials.token)
            .header("X-Usuario", &ctx.credentials.username);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request
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
                message: text.trim().chars().take(300).collect(),
            });
        }

        parse_page(&text)
    }
}

#[async_trait]
impl SettlementSource for HttpSettlementSource {
    async fn fetch_page(
        &self,
        ctx: &TenantContext,
        cursor: Option<&str>,
    ) -> Result<SourcePage, TransportError> {
        self.rate_limiter.wait().await;

        match tokio::time::timeout(self.timeout, self.get(ctx, cursor)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Parse a page body; a missing `registros` array is malformed
pub fn parse_page(body: &str) -> Result<SourcePage, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let rows = value
        .get("registros")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| TransportError::MalformedResponse("missing registros array".to_string()))?;

    let next_cursor = value
        .get("proximo_cursor")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(SourcePage { rows, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page_is_not_an_error() {
        let page = parse_page(r#"{"registros": [], "proximo_cursor": null}"#).unwrap();
        assert!(page.rows.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_page_with_cursor() {
        let page =
            parse_page(r#"{"registros": [{"chave": "L-1"}], "proximo_cursor": "abc"}"#).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_rows_is_malformed() {
        assert_eq!(
            parse_page(r#"{"erro": "indisponivel"}"#).unwrap_err(),
            TransportError::MalformedResponse("missing registros array".to_string())
        );
        assert!(matches!(
            parse_page("Service Unavailable"),
            Err(TransportError::MalformedResponse(_))
        ));
    }
}
