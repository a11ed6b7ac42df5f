//! Test Helper Utilities
//!
//! In-memory storage, record fixtures, and scripted Regulator fakes shared by
//! the obra-interop integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use obra_interop::db::{init_memory_pool, LedgerStore, SqliteLedger, SqliteRecordStore};
use obra_interop::error::TransportError;
use obra_interop::models::{
    ContractRecord, FailureKind, LedgerFilter, LedgerPage, LedgerStats, LedgerStatus,
    MeasurementRecord, NewLedgerEntry, RecordStage, RegulatorCredentials, RegulatorStatus,
    SourcePage, SubmissionOutcome, TenantContext,
};
use obra_interop::rules::RuleRegistry;
use obra_interop::services::{BatchCoordinator, SettlementSource, SubmissionGateway, WirePayload};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TENANT: &str = "pref-01";

pub fn ctx() -> TenantContext {
    TenantContext::new(
        TENANT,
        RegulatorCredentials {
            username: "operador".to_string(),
            token: "token-123".to_string(),
        },
    )
}

pub async fn memory_pool() -> SqlitePool {
    init_memory_pool().await.expect("in-memory database")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Contract that passes every error-level rule
pub fn valid_contract(id: &str) -> ContractRecord {
    ContractRecord {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        external_id: Some(format!("EXT-{}", id)),
        stage: RecordStage::Approved,
        number: Some(format!("CT-{}/2024", id.to_uppercase())),
        year: Some(2024),
        supplier_document: Some("12.345.678/0001-90".to_string()),
        supplier_name: Some("Construtora Horizonte Ltda".to_string()),
        object: Some("Pavimentação da Rua das Flores".to_string()),
        modality: Some("concorrencia".to_string()),
        value_cents: Some(125_000_00),
        signed_on: Some(date(2024, 2, 1)),
        start_date: Some(date(2024, 2, 15)),
        end_date: Some(date(2024, 12, 31)),
    }
}

/// Contract missing its supplier document
pub fn invalid_contract(id: &str) -> ContractRecord {
    ContractRecord {
        supplier_document: None,
        ..valid_contract(id)
    }
}

pub fn valid_measurement(id: &str) -> MeasurementRecord {
    MeasurementRecord {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        external_id: Some(format!("MED-{}", id)),
        stage: RecordStage::Approved,
        contract_external_id: Some("CT-12/2024".to_string()),
        sequence: Some(1),
        period_start: Some(date(2024, 3, 1)),
        period_end: Some(date(2024, 3, 31)),
        measured_value_cents: Some(10_500_00),
        percent_complete: Some(12),
    }
}

/// Seed contracts into a fresh record store
pub async fn seed_contracts(pool: &SqlitePool, contracts: &[ContractRecord]) -> SqliteRecordStore {
    let store = SqliteRecordStore::new(pool.clone());
    for contract in contracts {
        store.insert_contract(contract).await.expect("seed contract");
    }
    store
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Coordinator over real SQLite stores and the given gateway
pub fn coordinator(pool: &SqlitePool, gateway: Arc<dyn SubmissionGateway>) -> BatchCoordinator {
    BatchCoordinator::new(
        Arc::new(SqliteRecordStore::new(pool.clone())),
        Arc::new(SqliteLedger::new(pool.clone())),
        gateway,
        Arc::new(RuleRegistry::standard()),
    )
}

pub async fn ledger_entries(pool: &SqlitePool, filter: LedgerFilter) -> LedgerPage {
    SqliteLedger::new(pool.clone())
        .query(&filter)
        .await
        .expect("ledger query")
}

/// Scripted reply of the fake gateway
#[derive(Debug, Clone)]
pub enum Reply {
    Accept(String),
    Reject(String),
    Unreachable,
}

/// Gateway fake answering per record id; unscripted records are accepted
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    submitted: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(self, record_id: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(record_id.to_string(), replies.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionGateway for ScriptedGateway {
    async fn submit(
        &self,
        payload: &WirePayload,
        _credentials: &RegulatorCredentials,
        _timeout: Duration,
    ) -> SubmissionOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted
            .lock()
            .unwrap()
            .push(payload.reference_id.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&payload.reference_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Reply::Accept(format!("PROT-{:04}", call)));

        match reply {
            Reply::Accept(protocol) => SubmissionOutcome::success(
                payload.reference_id.clone(),
                payload.record_type,
                protocol,
                RegulatorStatus::AwaitingProcessing,
            ),
            Reply::Reject(message) => SubmissionOutcome::failure(
                payload.reference_id.clone(),
                payload.record_type,
                FailureKind::Transport,
                TransportError::Status {
                    status: 422,
                    message,
                }
                .to_string(),
            ),
            Reply::Unreachable => SubmissionOutcome::failure(
                payload.reference_id.clone(),
                payload.record_type,
                FailureKind::Transport,
                TransportError::Connection("connection refused".to_string()).to_string(),
            ),
        }
    }
}

/// Settlement source fake serving pages keyed by cursor
///
/// A cursor with no page scripted fails with a connection error.
#[derive(Default)]
pub struct ScriptedSource {
    pages: HashMap<Option<String>, Result<SourcePage, TransportError>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, cursor: Option<&str>, rows: Vec<Value>, next: Option<&str>) -> Self {
        self.pages.insert(
            cursor.map(str::to_string),
            Ok(SourcePage {
                rows,
                next_cursor: next.map(str::to_string),
            }),
        );
        self
    }

    pub fn failing(mut self, cursor: Option<&str>, error: TransportError) -> Self {
        self.pages.insert(cursor.map(str::to_string), Err(error));
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _ctx: &TenantContext,
        cursor: Option<&str>,
    ) -> Result<SourcePage, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(&cursor.map(str::to_string))
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::Connection(format!(
                    "no page scripted for cursor {:?}",
                    cursor
                )))
            })
    }
}

/// Raw settlement row as the Regulator sends it
pub fn settlement(key: &str, revision: i64, amount: &str) -> Value {
    json!({
        "chave": key,
        "revisao": revision,
        "valor": amount,
        "data_liquidacao": "15/03/2024",
        "contrato": "CT-12/2024",
        "empenho": "2024NE000123",
        "historico": "Pagamento da medição"
    })
}

/// Ledger whose writes always fail
pub struct FailingLedger;

#[async_trait]
impl LedgerStore for FailingLedger {
    async fn append(&self, _entry: NewLedgerEntry) -> obra_common::Result<i64> {
        Err(obra_common::Error::Internal("ledger offline".to_string()))
    }

    async fn query(&self, _filter: &LedgerFilter) -> obra_common::Result<LedgerPage> {
        Err(obra_common::Error::Internal("ledger offline".to_string()))
    }

    async fn stats(
        &self,
        _tenant_id: Option<&str>,
        _since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> obra_common::Result<LedgerStats> {
        Err(obra_common::Error::Internal("ledger offline".to_string()))
    }
}

/// Real ledger that refuses closing batch summaries
pub struct SummaryRejectingLedger {
    inner: SqliteLedger,
}

impl SummaryRejectingLedger {
    pub fn new(pool: &SqlitePool) -> Self {
        Self {
            inner: SqliteLedger::new(pool.clone()),
        }
    }
}

#[async_trait]
impl LedgerStore for SummaryRejectingLedger {
    async fn append(&self, entry: NewLedgerEntry) -> obra_common::Result<i64> {
        if entry.reference_id.is_none() && entry.status != LedgerStatus::Pending {
            return Err(obra_common::Error::Internal("disk full".to_string()));
        }
        self.inner.append(entry).await
    }

    async fn query(&self, filter: &LedgerFilter) -> obra_common::Result<LedgerPage> {
        self.inner.query(filter).await
    }

    async fn stats(
        &self,
        tenant_id: Option<&str>,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> obra_common::Result<LedgerStats> {
        self.inner.stats(tenant_id, since).await
    }
}
