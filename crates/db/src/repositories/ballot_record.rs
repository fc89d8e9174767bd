//! Ballot record repository.
//!
//! Records are never updated in place once a later version exists. The two
//! writes that can race, appending a version and completing an open one,
//! are single statements whose outcome the database decides.

use std::sync::Arc;

use chrono::Utc;
use escrutinio_common::AppResult;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    sea_query::{Alias, Expr, Query, SimpleExpr},
};
use serde::Serialize;

use crate::entities::{
    BallotRecord,
    ballot_record::{self, BallotStatus, PreviousVersionLink},
};
use crate::{db_error, is_unique_violation};

/// A ballot record without its photo bytes.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult, Serialize)]
pub struct BallotRecordSummary {
    /// Record ID.
    pub id: String,
    /// Polling table.
    pub table_id: String,
    /// Version within the table, starting at 1.
    pub version: i32,
    /// The version this one replaced.
    pub previous_version_id: Option<String>,
    /// Lifecycle status.
    pub status: BallotStatus,
    /// Votes keyed by candidate.
    pub votes_by_candidate: serde_json::Value,
    /// Per-party detail lines.
    pub detail_lines: serde_json::Value,
    /// Total votes.
    pub total: i64,
    /// MIME type of the photo, if any.
    pub photo_content_type: Option<String>,
    /// When the photo was attached.
    pub photo_uploaded_at: Option<chrono::DateTime<chrono::FixedOffset>>,
    /// Last write.
    pub saved_at: chrono::DateTime<chrono::FixedOffset>,
    /// Creation time.
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
    /// Whether photo bytes are stored.
    pub has_photo: bool,
}

impl From<ballot_record::Model> for BallotRecordSummary {
    fn from(model: ballot_record::Model) -> Self {
        Self {
            has_photo: model.photo_data.is_some(),
            id: model.id,
            table_id: model.table_id,
            version: model.version,
            previous_version_id: model.previous_version_id,
            status: model.status,
            votes_by_candidate: model.votes_by_candidate,
            detail_lines: model.detail_lines,
            total: model.total,
            photo_content_type: model.photo_content_type,
            photo_uploaded_at: model.photo_uploaded_at,
            saved_at: model.saved_at,
            created_at: model.created_at,
        }
    }
}

/// The tally fields a submission writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyFields {
    /// Votes keyed by candidate.
    pub votes_by_candidate: serde_json::Value,
    /// Sanitized detail lines.
    pub detail_lines: serde_json::Value,
    /// Total votes.
    pub total: i64,
}

/// Repository for ballot record operations.
#[derive(Clone)]
pub struct BallotRecordRepository {
    db: Arc<DatabaseConnection>,
}

impl BallotRecordRepository {
    /// Create a new ballot record repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn live() -> SimpleExpr {
        ballot_record::Column::IsDeleted.eq(false)
    }

    /// No live row of the same table carries a higher version.
    fn not_superseded() -> SimpleExpr {
        use ballot_record::Column;

        let newer = Alias::new("newer");
        Expr::exists(
            Query::select()
                .expr(Expr::val(1))
                .from_as(BallotRecord, newer.clone())
                .and_where(
                    Expr::col((newer.clone(), Column::TableId))
                        .equals((BallotRecord, Column::TableId)),
                )
                .and_where(
                    Expr::col((newer.clone(), Column::Version))
                        .gt(Expr::col((BallotRecord, Column::Version))),
                )
                .and_where(Expr::col((newer, Column::IsDeleted)).eq(false))
                .to_owned(),
        )
        .not()
    }

    fn summary_query() -> sea_orm::Select<BallotRecord> {
        use ballot_record::Column;

        BallotRecord::find()
            .select_only()
            .columns([
                Column::Id,
                Column::TableId,
                Column::Version,
                Column::PreviousVersionId,
                Column::Status,
                Column::VotesByCandidate,
                Column::DetailLines,
                Column::Total,
                Column::PhotoContentType,
                Column::PhotoUploadedAt,
                Column::SavedAt,
                Column::CreatedAt,
            ])
            .column_as(Expr::col(Column::PhotoData).is_not_null(), "has_photo")
            .filter(Self::live())
    }

    /// Keep the first row per table. Rows must be ordered by table, then
    /// version descending.
    fn first_per_table(rows: Vec<BallotRecordSummary>) -> Vec<BallotRecordSummary> {
        let mut out: Vec<BallotRecordSummary> = Vec::new();
        for row in rows {
            if out.last().is_some_and(|last| last.table_id == row.table_id) {
                continue;
            }
            out.push(row);
        }
        out
    }

    /// Find a record by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<ballot_record::Model>> {
        BallotRecord::find_by_id(id)
            .filter(Self::live())
            .one(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Find the current record of a table: its highest live version.
    pub async fn find_current(&self, table_id: &str) -> AppResult<Option<ballot_record::Model>> {
        BallotRecord::find()
            .filter(ballot_record::Column::TableId.eq(table_id))
            .filter(Self::live())
            .order_by_desc(ballot_record::Column::Version)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Find the version a record superseded.
    pub async fn find_previous(
        &self,
        model: &ballot_record::Model,
    ) -> AppResult<Option<ballot_record::Model>> {
        model
            .find_linked(PreviousVersionLink)
            .one(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// All live versions of a table, newest first, without photo bytes.
    pub async fn find_versions(&self, table_id: &str) -> AppResult<Vec<BallotRecordSummary>> {
        Self::summary_query()
            .filter(ballot_record::Column::TableId.eq(table_id))
            .order_by_desc(ballot_record::Column::Version)
            .into_model::<BallotRecordSummary>()
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Count tables with at least one live record.
    pub async fn count_tables(&self) -> AppResult<u64> {
        BallotRecord::find()
            .select_only()
            .column(ballot_record::Column::TableId)
            .distinct()
            .filter(Self::live())
            .count(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// A page of table IDs with live records, in ascending order.
    pub async fn find_table_ids(&self, offset: u64, limit: u64) -> AppResult<Vec<String>> {
        BallotRecord::find()
            .select_only()
            .column(ballot_record::Column::TableId)
            .distinct()
            .filter(Self::live())
            .order_by_asc(ballot_record::Column::TableId)
            .offset(offset)
            .limit(limit)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// The current record of each given table, ordered by table ID.
    pub async fn find_current_for_tables(
        &self,
        table_ids: &[String],
    ) -> AppResult<Vec<BallotRecordSummary>> {
        if table_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = Self::summary_query()
            .filter(ballot_record::Column::TableId.is_in(table_ids.iter().cloned()))
            .order_by_asc(ballot_record::Column::TableId)
            .order_by_desc(ballot_record::Column::Version)
            .into_model::<BallotRecordSummary>()
            .all(self.db.as_ref())
            .await
            .map_err(db_error)?;

        Ok(Self::first_per_table(rows))
    }

    /// The current record of every table, ordered by table ID.
    pub async fn find_all_current(&self) -> AppResult<Vec<BallotRecordSummary>> {
        let rows = Self::summary_query()
            .order_by_asc(ballot_record::Column::TableId)
            .order_by_desc(ballot_record::Column::Version)
            .into_model::<BallotRecordSummary>()
            .all(self.db.as_ref())
            .await
            .map_err(db_error)?;

        Ok(Self::first_per_table(rows))
    }

    /// Insert a new version.
    ///
    /// Returns `None` when another writer already holds this
    /// `(table_id, version)` slot.
    pub async fn try_append(
        &self,
        model: ballot_record::ActiveModel,
    ) -> AppResult<Option<ballot_record::Model>> {
        match model.insert(self.db.as_ref()).await {
            Ok(inserted) => Ok(Some(inserted)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(db_error(e)),
        }
    }

    /// Write a tally into a record that is still open and close it.
    ///
    /// The precondition (live, not closed) is part of the UPDATE filter.
    /// Returns `None` if the record was closed or removed in the meantime.
    pub async fn complete_open(
        &self,
        id: &str,
        tally: TallyFields,
    ) -> AppResult<Option<ballot_record::Model>> {
        use ballot_record::Column;

        let result = BallotRecord::update_many()
            .col_expr(Column::VotesByCandidate, Expr::value(tally.votes_by_candidate))
            .col_expr(Column::DetailLines, Expr::value(tally.detail_lines))
            .col_expr(Column::Total, Expr::value(tally.total))
            .col_expr(Column::Status, Expr::value(BallotStatus::Closed))
            .col_expr(Column::SavedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.ne(BallotStatus::Closed))
            .filter(Self::live())
            .filter(Self::not_superseded())
            .exec(self.db.as_ref())
            .await
            .map_err(db_error)?;

        if result.rows_affected == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    /// Close a record. Closing an already closed record changes nothing.
    pub async fn mark_closed(&self, id: &str) -> AppResult<Option<ballot_record::Model>> {
        use ballot_record::Column;

        BallotRecord::update_many()
            .col_expr(Column::Status, Expr::value(BallotStatus::Closed))
            .col_expr(Column::SavedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.ne(BallotStatus::Closed))
            .filter(Self::live())
            .filter(Self::not_superseded())
            .exec(self.db.as_ref())
            .await
            .map_err(db_error)?;

        self.find_by_id(id).await
    }

    /// Attach a photo to a record, replacing any previous one.
    ///
    /// Returns `false` once a later version exists, so the caller can
    /// re-read the current one.
    pub async fn set_photo(&self, id: &str, data: Vec<u8>, content_type: &str) -> AppResult<bool> {
        use ballot_record::Column;

        let now = Utc::now();
        let result = BallotRecord::update_many()
            .col_expr(Column::PhotoData, Expr::value(data))
            .col_expr(Column::PhotoContentType, Expr::value(content_type))
            .col_expr(Column::PhotoUploadedAt, Expr::value(now))
            .col_expr(Column::SavedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Self::live())
            .filter(Self::not_superseded())
            .exec(self.db.as_ref())
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected > 0)
    }
}
