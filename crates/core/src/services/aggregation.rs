//! Read-only aggregation over the ledger and the voter roll.

use std::collections::BTreeMap;

use escrutinio_common::{AppError, AppResult};
use escrutinio_db::entities::ballot_record::BallotStatus;
use escrutinio_db::repositories::{BallotRecordRepository, BallotRecordSummary, VoterRepository};
use serde::Serialize;
use tracing::warn;

use super::ledger::DetailLine;
use super::registry::TableStats;

/// Votes for one party across all closed current tallies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyTotal {
    pub party_id: String,
    pub name: String,
    pub total_votes: i64,
}

/// Roll turnout next to the current tally of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOverview {
    pub table_id: String,
    pub registered: u64,
    pub voted: u64,
    pub pending: u64,
    pub current_version: Option<i32>,
    pub status: Option<BallotStatus>,
    pub tally_total: Option<i64>,
    pub has_photo: bool,
    /// Tally total minus voters marked as voted.
    pub discrepancy: Option<i64>,
}

/// Sum detail lines per party.
///
/// Only closed records count. Records must be ordered by table ID so the
/// representative name is the first non-empty one in that order.
#[must_use]
pub fn sum_by_party(records: &[BallotRecordSummary]) -> Vec<PartyTotal> {
    let mut totals: BTreeMap<String, PartyTotal> = BTreeMap::new();

    for record in records.iter().filter(|r| r.status.is_closed()) {
        let lines: Vec<DetailLine> = match serde_json::from_value(record.detail_lines.clone()) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(table_id = %record.table_id, error = %e, "Skipping unreadable detail lines");
                continue;
            }
        };

        for line in lines.into_iter().filter(|l| !l.party_id.is_empty()) {
            let entry = totals
                .entry(line.party_id.clone())
                .or_insert_with(|| PartyTotal {
                    party_id: line.party_id,
                    name: String::new(),
                    total_votes: 0,
                });
            if entry.name.is_empty() {
                entry.name = line.name;
            }
            entry.total_votes = entry.total_votes.saturating_add(line.votes);
        }
    }

    let mut out: Vec<PartyTotal> = totals.into_values().collect();
    // BTreeMap order breaks ties by party ID.
    out.sort_by(|a, b| b.total_votes.cmp(&a.total_votes));
    out
}

/// Service for cross-table aggregates.
#[derive(Clone)]
pub struct AggregationService {
    ballot_repo: BallotRecordRepository,
    voter_repo: VoterRepository,
}

impl AggregationService {
    /// Create a new aggregation service.
    #[must_use]
    pub const fn new(ballot_repo: BallotRecordRepository, voter_repo: VoterRepository) -> Self {
        Self {
            ballot_repo,
            voter_repo,
        }
    }

    /// Party totals over the current version of every table, highest first.
    pub async fn totals_by_party(&self) -> AppResult<Vec<PartyTotal>> {
        let current = self.ballot_repo.find_all_current().await?;
        Ok(sum_by_party(&current))
    }

    /// Registry turnout and the current tally of one table.
    pub async fn table_overview(&self, table_id: &str) -> AppResult<TableOverview> {
        let states = self.voter_repo.find_vote_states(table_id).await?;
        let current = self.ballot_repo.find_current(table_id).await?;

        if states.is_empty() && current.is_none() {
            return Err(AppError::NotFound(format!("Unknown table {table_id}")));
        }

        let stats = TableStats::from_states(&states);
        let voted = i64::try_from(stats.voted).unwrap_or(i64::MAX);

        Ok(TableOverview {
            table_id: table_id.to_string(),
            registered: stats.total,
            voted: stats.voted,
            pending: stats.pending,
            current_version: current.as_ref().map(|r| r.version),
            status: current.as_ref().map(|r| r.status),
            tally_total: current.as_ref().map(|r| r.total),
            has_photo: current.as_ref().is_some_and(|r| r.photo_data.is_some()),
            discrepancy: current.as_ref().map(|r| r.total - voted),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use escrutinio_db::entities::ballot_record;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn summary(table_id: &str, status: BallotStatus, lines: Value) -> BallotRecordSummary {
        let now = Utc::now().into();
        BallotRecordSummary {
            id: format!("{table_id}-rec"),
            table_id: table_id.to_string(),
            version: 1,
            previous_version_id: None,
            status,
            votes_by_candidate: json!({}),
            detail_lines: lines,
            total: 0,
            photo_content_type: None,
            photo_uploaded_at: None,
            saved_at: now,
            created_at: now,
            has_photo: false,
        }
    }

    #[test]
    fn test_sum_by_party_groups_and_orders() {
        let records = vec![
            summary(
                "001",
                BallotStatus::Closed,
                json!([
                    {"partyId": "B", "name": "", "votes": 5},
                    {"partyId": "A", "name": "Azul", "votes": 10}
                ]),
            ),
            summary(
                "002",
                BallotStatus::Closed,
                json!([
                    {"partyId": "B", "name": "Blanca", "votes": 5},
                    {"partyId": "A", "name": "Otra", "votes": 0},
                    {"partyId": "C", "name": "Celeste", "votes": 10}
                ]),
            ),
        ];

        let totals = sum_by_party(&records);

        assert_eq!(
            totals,
            vec![
                PartyTotal {
                    party_id: "A".to_string(),
                    name: "Azul".to_string(),
                    total_votes: 10
                },
                PartyTotal {
                    party_id: "B".to_string(),
                    name: "Blanca".to_string(),
                    total_votes: 10
                },
                PartyTotal {
                    party_id: "C".to_string(),
                    name: "Celeste".to_string(),
                    total_votes: 10
                },
            ]
        );
    }

    #[test]
    fn test_sum_by_party_skips_open_records() {
        let records = vec![summary(
            "001",
            BallotStatus::Open,
            json!([{"partyId": "A", "name": "Azul", "votes": 10}]),
        )];

        assert!(sum_by_party(&records).is_empty());
    }

    #[tokio::test]
    async fn test_overview_of_unknown_table() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([
                    Vec::<ballot_record::Model>::new(),
                    Vec::<ballot_record::Model>::new(),
                ])
                .into_connection(),
        );
        let svc = AggregationService::new(
            BallotRecordRepository::new(db.clone()),
            VoterRepository::new(db),
        );

        let err = svc.table_overview("404").await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }
}
