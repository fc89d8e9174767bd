//! Ballot record entity: one row per polling-table tally version.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tally version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum BallotStatus {
    /// Awaiting a tally.
    #[sea_orm(string_value = "open")]
    Open,
    /// Tally final for this version.
    #[sea_orm(string_value = "closed")]
    Closed,
    /// Reopened for correction.
    #[sea_orm(string_value = "reopened")]
    Reopened,
}

impl BallotStatus {
    /// Whether a submission may still complete this record in place.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// One version of a table's tally.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ballot_record")]
pub struct Model {
    /// Record ID.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Polling table this tally belongs to. Shared by every version.
    #[sea_orm(indexed)]
    pub table_id: String,

    /// 1-based revision number, contiguous per table.
    pub version: i32,

    /// The version this one supersedes.
    pub previous_version_id: Option<String>,

    /// Open until a tally is written or the table is closed.
    pub status: BallotStatus,

    /// Candidate/party key to sanitized vote count.
    pub votes_by_candidate: Json,

    /// Ordered `{partyId, name, votes}` breakdown.
    pub detail_lines: Json,

    /// Client total, or the sum of the sanitized votes.
    pub total: i64,

    /// Photo of the paper tally.
    #[sea_orm(column_type = "Blob", nullable)]
    #[serde(skip)]
    pub photo_data: Option<Vec<u8>>,

    /// MIME type of the photo.
    pub photo_content_type: Option<String>,

    /// When the photo was attached.
    pub photo_uploaded_at: Option<DateTimeWithTimeZone>,

    /// Last mutation of this version.
    pub saved_at: DateTimeWithTimeZone,

    /// Soft delete flag. Deleted rows leave the unique index.
    pub is_deleted: bool,

    /// When the version was created.
    pub created_at: DateTimeWithTimeZone,
}

/// Back-reference to the superseded version.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::PreviousVersionId",
        to = "Column::Id"
    )]
    PreviousVersion,
}

/// Walks from a version to the one it superseded.
pub struct PreviousVersionLink;

impl Linked for PreviousVersionLink {
    type FromEntity = Entity;
    type ToEntity = Entity;

    fn link(&self) -> Vec<RelationDef> {
        vec![Relation::PreviousVersion.def()]
    }
}

impl ActiveModelBehavior for ActiveModel {}
