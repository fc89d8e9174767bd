//! Voter repository.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use escrutinio_common::AppResult;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    sea_query::{Expr, LikeExpr},
};

use crate::db_error;
use crate::entities::{
    Voter,
    voter::{self, GenderCategory, VoteSource},
};

/// The fields written when a vote is recorded.
#[derive(Debug, Clone)]
pub struct VoteMark {
    /// When the vote was cast.
    pub voted_at: DateTime<FixedOffset>,
    /// Operator who recorded it.
    pub voted_by: Option<String>,
    /// How the mark arrived.
    pub source: VoteSource,
    /// Recording device.
    pub device_id: Option<String>,
    /// Replaces the stored note when set.
    pub note: Option<String>,
    /// Replaces the challenged flag when set.
    pub challenged: Option<bool>,
    /// Replaces the assisted flag when set.
    pub assisted: Option<bool>,
}

/// Search criteria for the voter roll. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct VoterFilter {
    /// Exact polling table.
    pub table_id: Option<String>,
    /// Exact national ID.
    pub national_id: Option<String>,
    /// Matched as a substring of the stored, upper-cased name.
    pub name_contains: Option<String>,
    /// Voted state.
    pub has_voted: Option<bool>,
}

/// Escape character for name patterns.
const LIKE_ESCAPE: char = '!';

/// A `LIKE` pattern matching `fragment` literally anywhere in the value.
fn contains_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl VoterFilter {
    fn condition(&self) -> Condition {
        let mut cond = Condition::all().add(voter::Column::IsDeleted.eq(false));

        if let Some(table_id) = &self.table_id {
            cond = cond.add(voter::Column::TableId.eq(table_id.as_str()));
        }
        if let Some(national_id) = &self.national_id {
            cond = cond.add(voter::Column::NationalId.eq(national_id.as_str()));
        }
        if let Some(name) = &self.name_contains {
            let pattern =
                LikeExpr::new(contains_pattern(&name.to_uppercase())).escape(LIKE_ESCAPE);
            cond = cond.add(voter::Column::Name.like(pattern));
        }
        if let Some(has_voted) = self.has_voted {
            cond = cond.add(voter::Column::HasVoted.eq(has_voted));
        }

        cond
    }
}

/// Voter repository for database operations.
#[derive(Clone)]
pub struct VoterRepository {
    db: Arc<DatabaseConnection>,
}

impl VoterRepository {
    /// Create a new voter repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a live voter by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<voter::Model>> {
        Voter::find_by_id(id)
            .filter(voter::Column::IsDeleted.eq(false))
            .one(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Find a live voter by national ID.
    pub async fn find_by_national_id(&self, national_id: &str) -> AppResult<Option<voter::Model>> {
        Voter::find()
            .filter(voter::Column::NationalId.eq(national_id))
            .filter(voter::Column::IsDeleted.eq(false))
            .one(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Insert a voter. Unique index rejections surface as conflicts.
    pub async fn create(&self, model: voter::ActiveModel) -> AppResult<voter::Model> {
        model.insert(self.db.as_ref()).await.map_err(db_error)
    }

    /// Update a voter.
    pub async fn update(&self, model: voter::ActiveModel) -> AppResult<voter::Model> {
        model.update(self.db.as_ref()).await.map_err(db_error)
    }

    /// Record a vote.
    ///
    /// A single UPDATE whose filter requires the voter to be live and not yet
    /// voted. Returns `None` when that precondition did not hold.
    pub async fn mark_voted(&self, id: &str, mark: VoteMark) -> AppResult<Option<voter::Model>> {
        use voter::Column;

        let mut update = Voter::update_many()
            .col_expr(Column::HasVoted, Expr::value(true))
            .col_expr(Column::VotedAt, Expr::value(mark.voted_at))
            .col_expr(Column::VotedBy, Expr::value(mark.voted_by))
            .col_expr(Column::VoteSource, Expr::value(mark.source))
            .col_expr(Column::VoteDeviceId, Expr::value(mark.device_id))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()));

        if let Some(note) = mark.note {
            update = update.col_expr(Column::Note, Expr::value(note));
        }
        if let Some(challenged) = mark.challenged {
            update = update.col_expr(Column::Challenged, Expr::value(challenged));
        }
        if let Some(assisted) = mark.assisted {
            update = update.col_expr(Column::Assisted, Expr::value(assisted));
        }

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::IsDeleted.eq(false))
            .filter(Column::HasVoted.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(db_error)?;

        if result.rows_affected == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }

    /// Soft-delete a voter. Returns `false` if no live voter had this ID.
    pub async fn soft_delete(&self, id: &str) -> AppResult<bool> {
        let result = Voter::update_many()
            .col_expr(voter::Column::IsDeleted, Expr::value(true))
            .col_expr(voter::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(voter::Column::Id.eq(id))
            .filter(voter::Column::IsDeleted.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected > 0)
    }

    /// Live voters of a table in roll order.
    pub async fn find_by_table(&self, table_id: &str) -> AppResult<Vec<voter::Model>> {
        Voter::find()
            .filter(voter::Column::TableId.eq(table_id))
            .filter(voter::Column::IsDeleted.eq(false))
            .order_by_asc(voter::Column::OrderNumber)
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// Voters matching the filter in the given order. `page` is
    /// `(offset, limit)`; `None` returns every match.
    pub async fn search(
        &self,
        filter: &VoterFilter,
        order: &[(voter::Column, Order)],
        page: Option<(u64, u64)>,
    ) -> AppResult<Vec<voter::Model>> {
        let mut query = Voter::find().filter(filter.condition());
        for (column, direction) in order {
            query = query.order_by(*column, direction.clone());
        }
        query = query.order_by_asc(voter::Column::Id);
        if let Some((offset, limit)) = page {
            query = query.offset(offset).limit(limit);
        }

        query.all(self.db.as_ref()).await.map_err(db_error)
    }

    /// Count voters matching the filter.
    pub async fn count(&self, filter: &VoterFilter) -> AppResult<u64> {
        Voter::find()
            .filter(filter.condition())
            .count(self.db.as_ref())
            .await
            .map_err(db_error)
    }

    /// `(has_voted, gender)` for every live voter of a table.
    pub async fn find_vote_states(
        &self,
        table_id: &str,
    ) -> AppResult<Vec<(bool, GenderCategory)>> {
        Voter::find()
            .select_only()
            .column(voter::Column::HasVoted)
            .column(voter::Column::Gender)
            .filter(voter::Column::TableId.eq(table_id))
            .filter(voter::Column::IsDeleted.eq(false))
            .into_tuple::<(bool, GenderCategory)>()
            .all(self.db.as_ref())
            .await
            .map_err(db_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_voter(id: &str, has_voted: bool) -> voter::Model {
        voter::Model {
            id: id.to_string(),
            table_id: "001".to_string(),
            order_number: 1,
            national_id: "30111222".to_string(),
            name: "PEREZ JUAN".to_string(),
            gender: GenderCategory::Male,
            has_voted,
            voted_at: has_voted.then(|| Utc::now().into()),
            voted_by: None,
            vote_source: VoteSource::Manual,
            vote_device_id: None,
            note: None,
            challenged: false,
            assisted: false,
            is_deleted: false,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn mark() -> VoteMark {
        VoteMark {
            voted_at: Utc::now().into(),
            voted_by: Some("operator1".to_string()),
            source: VoteSource::Manual,
            device_id: None,
            note: None,
            challenged: None,
            assisted: None,
        }
    }

    #[tokio::test]
    async fn test_mark_voted_returns_updated_voter() {
        let voted = create_test_voter("v1", true);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .append_query_results([[voted.clone()]])
                .into_connection(),
        );

        let repo = VoterRepository::new(db);
        let result = repo.mark_voted("v1", mark()).await.unwrap().unwrap();

        assert!(result.has_voted);
    }

    #[tokio::test]
    async fn test_mark_voted_precondition_failed() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = VoterRepository::new(db);
        let result = repo.mark_voted("v1", mark()).await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_missing_voter() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = VoterRepository::new(db);

        assert!(!repo.soft_delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_table() {
        let first = create_test_voter("v1", false);
        let mut second = create_test_voter("v2", true);
        second.order_number = 2;
        second.national_id = "30111223".to_string();

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[first, second]])
                .into_connection(),
        );

        let repo = VoterRepository::new(db);
        let voters = repo.find_by_table("001").await.unwrap();

        assert_eq!(voters.len(), 2);
        assert_eq!(voters[1].order_number, 2);
    }

    #[test]
    fn test_filter_always_excludes_deleted() {
        use sea_orm::QueryTrait;

        let filter = VoterFilter {
            name_contains: Some("perez".to_string()),
            ..Default::default()
        };
        let sql = Voter::find()
            .filter(filter.condition())
            .build(DatabaseBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#""is_deleted" = FALSE"#));
        assert!(sql.contains("%PEREZ%"));
    }

    #[test]
    fn test_name_wildcards_match_literally() {
        assert_eq!(contains_pattern("PEREZ"), "%PEREZ%");
        assert_eq!(contains_pattern("%"), "%!%%");
        assert_eq!(contains_pattern("A_B!"), "%A!_B!!%");
    }
}
