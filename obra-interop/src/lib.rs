//! obra-interop library interface
//!
//! Exchanges public-works records with the external audit Regulator: outbound
//! batch submission, inbound settlement import, and the integration ledger
//! that records both.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pagination;
pub mod rules;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use obra_common::config::TomlConfig;
use obra_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{LedgerStore, SqliteLedger, SqliteRecordStore, SqliteSettlementStore};
use crate::error::TransportError;
use crate::rules::RuleRegistry;
use crate::services::{
    BatchCoordinator, HttpSettlementSource, HttpSubmissionGateway, ImportReconciler, RateLimiter,
    SettlementSource, SubmissionGateway,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Bootstrap configuration
    pub config: Arc<TomlConfig>,
    pub rules: Arc<RuleRegistry>,
    pub ledger: Arc<dyn LedgerStore>,
    pub coordinator: Arc<BatchCoordinator>,
    pub reconciler: Arc<ImportReconciler>,
    pub source: Arc<dyn SettlementSource>,
    /// Cancellation tokens for running batches
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// State over explicit Regulator boundaries
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: TomlConfig,
        gateway: Arc<dyn SubmissionGateway>,
        source: Arc<dyn SettlementSource>,
    ) -> Self {
        let rules = Arc::new(RuleRegistry::standard());
        let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(db.clone()));
        let coordinator = BatchCoordinator::new(
            Arc::new(SqliteRecordStore::new(db.clone())),
            ledger.clone(),
            gateway,
            rules.clone(),
        );
        let reconciler = ImportReconciler::new(
            Arc::new(SqliteSettlementStore::new(db.clone())),
            ledger.clone(),
        )
        .with_max_pages(config.regulator.import_max_pages as usize);

        Self {
            db,
            event_bus,
            config: Arc::new(config),
            rules,
            ledger,
            coordinator: Arc::new(coordinator),
            reconciler: Arc::new(reconciler),
            source,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// State talking to the configured Regulator over HTTP
    ///
    /// Submissions and page fetches share one rate limiter.
    pub fn from_config(
        db: SqlitePool,
        event_bus: EventBus,
        config: TomlConfig,
    ) -> Result<Self, TransportError> {
        let regulator = &config.regulator;
        let rate_limiter = Arc::new(RateLimiter::new(regulator.min_interval_ms));
        let gateway = HttpSubmissionGateway::new(&regulator.base_url, rate_limiter.clone())?;
        let source = HttpSettlementSource::new(
            &regulator.base_url,
            rate_limiter,
            Duration::from_millis(regulator.timeout_ms),
        )?;

        Ok(Self::new(
            db,
            event_bus,
            config,
            Arc::new(gateway),
            Arc::new(source),
        ))
    }

    pub(crate) async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::batch_routes())
        .merge(api::validation_routes())
        .merge(api::import_routes())
        .merge(api::ledger_routes())
        .route("/interop/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
