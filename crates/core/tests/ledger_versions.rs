//! Ballot ledger integration tests.
//!
//! Run against an in-memory SQLite database with the real migrations, so
//! the partial unique index on `(table_id, version)` arbitrates racing
//! submissions exactly as it does in production.

#![allow(clippy::unwrap_used)]

use escrutinio_common::{AppError, config::LedgerConfig};
use escrutinio_core::{AggregationService, BallotLedgerService, SubmitTallyInput};
use escrutinio_db::entities::ballot_record::BallotStatus;
use escrutinio_db::repositories::{BallotRecordRepository, VoterRepository};
use escrutinio_db::test_utils::TestDatabase;
use serde_json::{Value, json};

struct Harness {
    _db: TestDatabase,
    repo: BallotRecordRepository,
    ledger: BallotLedgerService,
    aggregation: AggregationService,
}

async fn harness(max_append_attempts: u32) -> Harness {
    let db = TestDatabase::in_memory().await.unwrap();
    let repo = BallotRecordRepository::new(db.shared());
    let ledger = BallotLedgerService::new(
        repo.clone(),
        &LedgerConfig {
            max_append_attempts,
            list_max_limit: 200,
        },
    );
    let aggregation = AggregationService::new(repo.clone(), VoterRepository::new(db.shared()));

    Harness {
        _db: db,
        repo,
        ledger,
        aggregation,
    }
}

fn tally(value: Value) -> SubmitTallyInput {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_resubmission_appends_linked_version() {
    let h = harness(5).await;

    let first = h
        .ledger
        .submit_tally(tally(json!({"tableId": "001", "votesByCandidate": {"A": 10, "B": 5}})))
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.record.version, 1);
    assert_eq!(first.record.status, BallotStatus::Closed);
    assert_eq!(first.record.total, 15);
    assert!(first.record.previous_version_id.is_none());

    let second = h
        .ledger
        .submit_tally(tally(json!({"tableId": "001", "votesByCandidate": {"A": 12, "B": 5}})))
        .await
        .unwrap();
    assert!(second.created);
    assert_eq!(second.record.version, 2);
    assert_eq!(second.record.total, 17);
    assert_eq!(
        second.record.previous_version_id.as_deref(),
        Some(first.record.id.as_str())
    );

    let previous = h.repo.find_previous(&second.record).await.unwrap().unwrap();
    assert_eq!(previous.id, first.record.id);

    let versions = h.ledger.list_versions("001").await.unwrap();
    let numbers: Vec<i32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![2, 1]);

    let current = h.ledger.get_current("001").await.unwrap();
    assert_eq!(current.id, second.record.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_submissions_on_empty_table() {
    let h = harness(5).await;

    let handles: Vec<_> = [10, 20]
        .into_iter()
        .map(|votes| {
            let ledger = h.ledger.clone();
            tokio::spawn(async move {
                ledger
                    .submit_tally(tally(json!({"mesaId": "007", "votos": {"A": votes}})))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().unwrap().created);
    }

    let versions = h.ledger.list_versions("007").await.unwrap();
    let numbers: Vec<i32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![2, 1]);
    assert_eq!(
        versions[0].previous_version_id.as_deref(),
        Some(versions[1].id.as_str())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_versions_stay_contiguous_under_contention() {
    let writers = 8;
    let h = harness(writers + 2).await;

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let ledger = h.ledger.clone();
            tokio::spawn(async move {
                ledger
                    .submit_tally(tally(json!({"tableId": "042", "total": i})))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let mut numbers: Vec<i32> = h
        .ledger
        .list_versions("042")
        .await
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    numbers.sort_unstable();

    assert_eq!(numbers, (1..=8).collect::<Vec<i32>>());
}

#[tokio::test]
async fn test_photo_on_empty_table_opens_version_completed_in_place() {
    let h = harness(5).await;

    h.ledger
        .attach_photo("003", "data:image/png;base64,aGVsbG8=")
        .await
        .unwrap();

    let opened = h.ledger.get_current("003").await.unwrap();
    assert_eq!(opened.version, 1);
    assert_eq!(opened.status, BallotStatus::Open);
    assert_eq!(opened.total, 0);

    let submission = h
        .ledger
        .submit_tally(tally(json!({"tableId": "003", "votesByCandidate": {"A": 4}})))
        .await
        .unwrap();
    assert!(!submission.created);
    assert_eq!(submission.record.id, opened.id);
    assert_eq!(submission.record.version, 1);
    assert_eq!(submission.record.status, BallotStatus::Closed);
    assert_eq!(submission.record.total, 4);

    let (bytes, content_type) = h.ledger.get_photo("003").await.unwrap();
    assert_eq!(bytes, b"hello");
    assert_eq!(content_type, "image/png");
}

#[tokio::test]
async fn test_close_then_resubmit_appends() {
    let h = harness(5).await;

    h.ledger.attach_photo("004", "aGVsbG8=").await.unwrap();

    let closed = h.ledger.close_table("004").await.unwrap();
    assert_eq!(closed.status, BallotStatus::Closed);

    let again = h.ledger.close_table("004").await.unwrap();
    assert_eq!(again.id, closed.id);
    assert_eq!(again.status, BallotStatus::Closed);

    let submission = h
        .ledger
        .submit_tally(tally(json!({"tableId": "004", "votos": {"A": 1}})))
        .await
        .unwrap();
    assert!(submission.created);
    assert_eq!(submission.record.version, 2);

    let err = h.ledger.close_table("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_totals_ignore_superseded_and_open_versions() {
    let h = harness(5).await;

    for body in [
        json!({"tableId": "001", "detailLines": [
            {"partyId": "A", "name": "Azul", "votes": 10},
            {"partyId": "B", "name": "Blanca", "votes": 5}
        ]}),
        json!({"tableId": "001", "detailLines": [
            {"partyId": "A", "name": "Azul", "votes": 3},
            {"partyId": "B", "name": "Blanca", "votes": 5}
        ]}),
        json!({"tableId": "002", "detalle": [
            {"partyId": "A", "nombre": "Azul", "votos": "1"},
            {"partyId": "B", "nombre": "Blanca", "votos": 2}
        ]}),
    ] {
        h.ledger.submit_tally(tally(body)).await.unwrap();
    }
    // Open record holding only a photo.
    h.ledger.attach_photo("003", "aGVsbG8=").await.unwrap();

    let totals = h.aggregation.totals_by_party().await.unwrap();
    let flat: Vec<(&str, i64)> = totals
        .iter()
        .map(|t| (t.party_id.as_str(), t.total_votes))
        .collect();

    assert_eq!(flat, vec![("B", 7), ("A", 4)]);
    assert_eq!(totals[0].name, "Blanca");
}

#[tokio::test]
async fn test_list_current_pages_by_table() {
    let h = harness(5).await;

    for table in ["001", "002", "003"] {
        h.ledger
            .submit_tally(tally(json!({"tableId": table, "total": 1})))
            .await
            .unwrap();
    }
    h.ledger
        .submit_tally(tally(json!({"tableId": "003", "total": 2})))
        .await
        .unwrap();
    h.ledger.attach_photo("003", "aGVsbG8=").await.unwrap();

    let first = h.ledger.list_current(Some(1), Some(2)).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.pages, 2);
    let tables: Vec<&str> = first.records.iter().map(|r| r.table_id.as_str()).collect();
    assert_eq!(tables, vec!["001", "002"]);

    let second = h.ledger.list_current(Some(2), Some(2)).await.unwrap();
    assert_eq!(second.records.len(), 1);
    assert_eq!(second.records[0].table_id, "003");
    assert_eq!(second.records[0].version, 2);
    assert!(second.records[0].has_photo);
    assert!(!first.records[0].has_photo);
}

#[tokio::test]
async fn test_unknown_table_has_no_versions() {
    let h = harness(5).await;

    assert!(h.ledger.list_versions("nope").await.unwrap().is_empty());
    assert!(matches!(
        h.ledger.get_current("nope").await.unwrap_err(),
        AppError::NotFound(_)
    ));
}
