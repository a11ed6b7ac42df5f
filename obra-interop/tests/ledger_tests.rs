//! Integration tests for the integration ledger store

mod helpers;

use chrono::{Duration, TimeZone, Utc};
use helpers::*;
use obra_interop::db::{LedgerStore, SqliteLedger};
use obra_interop::models::{
    Direction, FailureKind, LedgerFilter, LedgerRecordType, LedgerStatus, NewLedgerEntry,
    RecordType, SubmissionOutcome,
};
use serde_json::json;
use uuid::Uuid;

fn base_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

fn record_entry(
    tenant: &str,
    batch_id: Uuid,
    record_id: &str,
    success: bool,
    minutes: i64,
) -> NewLedgerEntry {
    let outcome = if success {
        SubmissionOutcome::success(
            record_id,
            RecordType::Contract,
            format!("P-{}", record_id),
            obra_interop::models::RegulatorStatus::AwaitingProcessing,
        )
    } else {
        SubmissionOutcome::failure(
            record_id,
            RecordType::Contract,
            FailureKind::Transport,
            "connection failed: refused",
        )
    };
    NewLedgerEntry {
        tenant_id: tenant.to_string(),
        created_at: base_time() + Duration::minutes(minutes),
        ..NewLedgerEntry::outbound_record(tenant, batch_id, &outcome, 5, json!({}))
    }
}

fn import_entry(tenant: &str, status: LedgerStatus, minutes: i64) -> NewLedgerEntry {
    NewLedgerEntry {
        direction: Direction::Inbound,
        record_type: LedgerRecordType::Settlement,
        tenant_id: tenant.to_string(),
        reference_id: None,
        correlation_id: Uuid::new_v4(),
        status,
        protocol: None,
        error_message: None,
        records_processed: 10,
        records_updated: 1,
        records_errored: if status == LedgerStatus::Success { 0 } else { 2 },
        duration_ms: 40,
        created_at: base_time() + Duration::minutes(minutes),
        detail: json!({ "new": 7 }),
    }
}

#[tokio::test]
async fn test_append_assigns_increasing_ids() {
    let ledger = SqliteLedger::new(memory_pool().await);
    let batch = Uuid::new_v4();

    let first = ledger.append(record_entry(TENANT, batch, "c1", true, 0)).await.unwrap();
    let second = ledger.append(record_entry(TENANT, batch, "c2", true, 0)).await.unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_query_newest_first_with_paging() {
    let ledger = SqliteLedger::new(memory_pool().await);
    let batch = Uuid::new_v4();
    for i in 0..5 {
        ledger
            .append(record_entry(TENANT, batch, &format!("c{}", i), true, i))
            .await
            .unwrap();
    }

    let page = ledger
        .query(&LedgerFilter {
            page: Some(1),
            page_size: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total_results, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].reference_id.as_deref(), Some("c4"));
    assert_eq!(page.entries[1].reference_id.as_deref(), Some("c3"));

    // Past the end clamps to the last page
    let last = ledger
        .query(&LedgerFilter {
            page: Some(99),
            page_size: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(last.page, 3);
    assert_eq!(last.entries.len(), 1);
    assert_eq!(last.entries[0].reference_id.as_deref(), Some("c0"));
}

#[tokio::test]
async fn test_query_filters() {
    let ledger = SqliteLedger::new(memory_pool().await);
    let batch = Uuid::new_v4();
    ledger.append(record_entry(TENANT, batch, "c1", true, 0)).await.unwrap();
    ledger.append(record_entry(TENANT, batch, "c2", false, 10)).await.unwrap();
    ledger.append(record_entry("pref-02", Uuid::new_v4(), "c9", true, 20)).await.unwrap();
    ledger.append(import_entry(TENANT, LedgerStatus::Success, 30)).await.unwrap();

    let by_tenant = ledger
        .query(&LedgerFilter {
            tenant_id: Some(TENANT.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_tenant.total_results, 3);

    let failures = ledger
        .query(&LedgerFilter {
            status: Some(LedgerStatus::Error),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failures.total_results, 1);
    assert_eq!(failures.entries[0].reference_id.as_deref(), Some("c2"));
    assert_eq!(
        failures.entries[0].error_message.as_deref(),
        Some("connection failed: refused")
    );

    let inbound = ledger
        .query(&LedgerFilter {
            direction: Some(Direction::Inbound),
            record_type: Some(LedgerRecordType::Settlement),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(inbound.total_results, 1);
    assert_eq!(inbound.entries[0].detail["new"], 7);

    let by_batch = ledger
        .query(&LedgerFilter {
            correlation_id: Some(batch),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_batch.total_results, 2);

    // from is inclusive, to is exclusive
    let window = ledger
        .query(&LedgerFilter {
            from: Some(base_time() + Duration::minutes(10)),
            to: Some(base_time() + Duration::minutes(30)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(window.total_results, 2);
}

#[tokio::test]
async fn test_entry_round_trips_through_storage() {
    let ledger = SqliteLedger::new(memory_pool().await);
    let entry = record_entry(TENANT, Uuid::new_v4(), "c1", true, 0);

    let id = ledger.append(entry.clone()).await.unwrap();
    let page = ledger.query(&LedgerFilter::default()).await.unwrap();

    assert_eq!(page.entries[0], entry.into_entry(id));
}

#[tokio::test]
async fn test_stats_by_direction() {
    let ledger = SqliteLedger::new(memory_pool().await);
    let batch = Uuid::new_v4();
    ledger.append(record_entry(TENANT, batch, "c1", true, 0)).await.unwrap();
    ledger.append(record_entry(TENANT, batch, "c2", true, 1)).await.unwrap();
    ledger.append(record_entry(TENANT, batch, "c3", false, 2)).await.unwrap();
    ledger.append(import_entry(TENANT, LedgerStatus::Success, 3)).await.unwrap();
    ledger.append(import_entry(TENANT, LedgerStatus::PartialSuccess, 4)).await.unwrap();

    let stats = ledger.stats(Some(TENANT), None).await.unwrap();

    assert_eq!(stats.outbound.total_entries, 3);
    assert_eq!(stats.outbound.success, 2);
    assert_eq!(stats.outbound.error, 1);
    assert!((stats.outbound.success_rate - 2.0 / 3.0).abs() < 1e-9);

    assert_eq!(stats.inbound.total_entries, 2);
    assert_eq!(stats.inbound.partial_success, 1);
    assert_eq!(stats.inbound.records_processed, 20);
    assert_eq!(stats.inbound.records_errored, 2);

    let later = ledger
        .stats(Some(TENANT), Some(base_time() + Duration::minutes(3)))
        .await
        .unwrap();
    assert_eq!(later.outbound.total_entries, 0);
    assert_eq!(later.inbound.total_entries, 2);

    let other = ledger.stats(Some("pref-02"), None).await.unwrap();
    assert_eq!(other.outbound.total_entries, 0);
    assert_eq!(other.outbound.success_rate, 0.0);
}

#[tokio::test]
async fn test_stats_backlog_tracks_latest_attempt() {
    let ledger = SqliteLedger::new(memory_pool().await);
    let first_batch = Uuid::new_v4();
    let retry_batch = Uuid::new_v4();

    ledger.append(record_entry(TENANT, first_batch, "c1", false, 0)).await.unwrap();
    ledger.append(record_entry(TENANT, first_batch, "c2", false, 1)).await.unwrap();
    // c1 went through on a later batch; c2 is still failing
    ledger.append(record_entry(TENANT, retry_batch, "c1", true, 5)).await.unwrap();

    let stats = ledger.stats(Some(TENANT), None).await.unwrap();
    assert_eq!(stats.outbound_backlog, 1);
}

#[tokio::test]
async fn test_stats_counts_open_batches_as_pending() {
    let pool = memory_pool().await;
    let ledger = SqliteLedger::new(pool.clone());
    let open_batch = Uuid::new_v4();
    let closed_batch = Uuid::new_v4();

    for batch in [open_batch, closed_batch] {
        let opening = NewLedgerEntry {
            status: LedgerStatus::Pending,
            ..NewLedgerEntry::outbound_summary(
                TENANT,
                batch,
                RecordType::Contract,
                0,
                0,
                0,
                json!({ "phase": "started" }),
            )
        };
        ledger.append(opening).await.unwrap();
    }
    ledger
        .append(NewLedgerEntry::outbound_summary(
            TENANT,
            closed_batch,
            RecordType::Contract,
            0,
            0,
            3,
            json!({ "phase": "completed" }),
        ))
        .await
        .unwrap();

    let stats = ledger.stats(Some(TENANT), None).await.unwrap();
    assert_eq!(stats.outbound.pending, 1);
    // Summaries are not attempts
    assert_eq!(stats.outbound.total_entries, 0);
}
