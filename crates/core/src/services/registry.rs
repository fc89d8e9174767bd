//! Voter registry service.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use escrutinio_common::{AppError, AppResult, IdGenerator};
use escrutinio_db::entities::voter::{self, GenderCategory, VoteSource};
use escrutinio_db::repositories::{VoteMark, VoterFilter, VoterRepository};
use sea_orm::{Order, Set};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::input::{bool_like, int_like, string_or_number};

const DEFAULT_PAGE_SIZE: u64 = 100;
const MAX_PAGE_SIZE: u64 = 1000;
const DEFAULT_SORT: &str = "tableId,orderNumber";

/// Voter fields accepted on create and update. Anything else is ignored.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoterInput {
    #[serde(default, alias = "mesa", deserialize_with = "string_or_number")]
    #[validate(length(max = 64))]
    pub table_id: Option<String>,
    #[serde(default, alias = "orden", deserialize_with = "int_like")]
    #[validate(range(min = 1))]
    pub order_number: Option<i32>,
    #[serde(default, alias = "dni", deserialize_with = "string_or_number")]
    #[validate(length(max = 32))]
    pub national_id: Option<String>,
    #[serde(default, alias = "nombre")]
    #[validate(length(max = 256))]
    pub name: Option<String>,
    #[serde(default, alias = "sexo")]
    pub gender_category: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub note: Option<String>,
    #[serde(default, alias = "impugnado", deserialize_with = "bool_like")]
    pub challenged: Option<bool>,
    #[serde(default, alias = "asistido", deserialize_with = "bool_like")]
    pub assisted: Option<bool>,
}

/// Details recorded alongside a vote mark.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkVoteInput {
    #[serde(default)]
    pub source: Option<VoteSource>,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub device_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub note: Option<String>,
    #[serde(default)]
    pub voted_at: Option<DateTime<FixedOffset>>,
    #[serde(default, alias = "impugnado", deserialize_with = "bool_like")]
    pub challenged: Option<bool>,
    #[serde(default, alias = "asistido", deserialize_with = "bool_like")]
    pub assisted: Option<bool>,
}

/// Filters and paging for the voter roll listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterListQuery {
    #[serde(default, alias = "mesa")]
    pub table_id: Option<String>,
    #[serde(default, alias = "dni")]
    pub national_id: Option<String>,
    /// Name substring.
    #[serde(default, alias = "q")]
    pub name: Option<String>,
    #[serde(default, alias = "voted")]
    pub has_voted: Option<bool>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Comma-separated sort keys; a leading `-` sorts descending.
    #[serde(default)]
    pub sort: Option<String>,
    /// `false` returns every match as a single page.
    #[serde(default)]
    pub paginated: Option<bool>,
}

/// A page of the voter roll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterPage {
    pub total: u64,
    pub pages: u64,
    pub current_page: u64,
    pub voters: Vec<voter::Model>,
}

/// Turnout counts for one polling table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub total: u64,
    pub voted: u64,
    pub pending: u64,
    pub by_gender_category: BTreeMap<String, u64>,
}

impl TableStats {
    /// Tally `(has_voted, gender)` pairs. Every category is present, even at zero.
    #[must_use]
    pub fn from_states(states: &[(bool, GenderCategory)]) -> Self {
        let mut by_gender_category: BTreeMap<String, u64> =
            ["M", "F", "X"].into_iter().map(|k| (k.to_string(), 0)).collect();

        let mut voted = 0;
        for (has_voted, gender) in states {
            if *has_voted {
                voted += 1;
            }
            *by_gender_category
                .entry(gender_code(*gender).to_string())
                .or_default() += 1;
        }

        let total = states.len() as u64;
        Self {
            total,
            voted,
            pending: total - voted,
            by_gender_category,
        }
    }
}

const fn gender_code(gender: GenderCategory) -> &'static str {
    match gender {
        GenderCategory::Male => "M",
        GenderCategory::Female => "F",
        GenderCategory::Other => "X",
    }
}

fn parse_gender(value: &str) -> AppResult<GenderCategory> {
    match value.trim().to_uppercase().as_str() {
        "M" => Ok(GenderCategory::Male),
        "F" => Ok(GenderCategory::Female),
        "X" => Ok(GenderCategory::Other),
        other => Err(AppError::Validation(format!(
            "genderCategory must be one of M, F, X (got {other:?})"
        ))),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

fn sort_column(key: &str) -> AppResult<voter::Column> {
    Ok(match key {
        "tableId" | "mesa" => voter::Column::TableId,
        "orderNumber" | "orden" => voter::Column::OrderNumber,
        "nationalId" | "dni" => voter::Column::NationalId,
        "name" | "nombre" => voter::Column::Name,
        "genderCategory" | "sexo" => voter::Column::Gender,
        "hasVoted" | "voted" => voter::Column::HasVoted,
        "votedAt" => voter::Column::VotedAt,
        "createdAt" => voter::Column::CreatedAt,
        other => return Err(AppError::BadRequest(format!("cannot sort by {other:?}"))),
    })
}

/// Parse `"tableId,-orderNumber"` style sort keys.
fn parse_sort(sort: Option<&str>) -> AppResult<Vec<(voter::Column, Order)>> {
    let keys: Vec<&str> = sort
        .unwrap_or(DEFAULT_SORT)
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();
    if keys.is_empty() {
        return parse_sort(Some(DEFAULT_SORT));
    }

    keys.into_iter()
        .map(|key| match key.strip_prefix('-') {
            Some(name) => Ok((sort_column(name.trim())?, Order::Desc)),
            None => Ok((sort_column(key)?, Order::Asc)),
        })
        .collect()
}

/// Service for the voter roll.
#[derive(Clone)]
pub struct VoterRegistryService {
    voter_repo: VoterRepository,
    id_gen: IdGenerator,
}

impl VoterRegistryService {
    /// Create a new registry service.
    #[must_use]
    pub const fn new(voter_repo: VoterRepository) -> Self {
        Self {
            voter_repo,
            id_gen: IdGenerator::new(),
        }
    }

    fn not_found(id: &str) -> AppError {
        AppError::NotFound(format!("Voter {id} not found"))
    }

    /// Register a voter.
    pub async fn create_voter(&self, input: VoterInput) -> AppResult<voter::Model> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let table_id = non_empty(input.table_id.as_deref());
        let national_id = non_empty(input.national_id.as_deref());
        let name = non_empty(input.name.as_deref());
        let gender = non_empty(input.gender_category.as_deref());

        let missing: Vec<&str> = [
            ("tableId", table_id.is_none()),
            ("orderNumber", input.order_number.is_none()),
            ("nationalId", national_id.is_none()),
            ("name", name.is_none()),
            ("genderCategory", gender.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        let (Some(table_id), Some(order_number), Some(national_id), Some(name), Some(gender)) =
            (table_id, input.order_number, national_id, name, gender)
        else {
            return Err(AppError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        };

        let model = voter::ActiveModel {
            id: Set(self.id_gen.generate()),
            table_id: Set(table_id),
            order_number: Set(order_number),
            national_id: Set(national_id),
            name: Set(normalize_name(&name)),
            gender: Set(parse_gender(&gender)?),
            has_voted: Set(false),
            voted_at: Set(None),
            voted_by: Set(None),
            vote_source: Set(VoteSource::Manual),
            vote_device_id: Set(None),
            note: Set(input.note),
            challenged: Set(input.challenged.unwrap_or(false)),
            assisted: Set(input.assisted.unwrap_or(false)),
            is_deleted: Set(false),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };

        let created = self.voter_repo.create(model).await?;

        info!(
            voter_id = %created.id,
            table_id = %created.table_id,
            order_number = created.order_number,
            "Voter registered"
        );
        Ok(created)
    }

    /// Get a voter by ID.
    pub async fn get_voter(&self, id: &str) -> AppResult<voter::Model> {
        self.voter_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| Self::not_found(id))
    }

    /// Get a voter by national ID.
    pub async fn get_voter_by_national_id(&self, national_id: &str) -> AppResult<voter::Model> {
        let national_id = national_id.trim();
        self.voter_repo
            .find_by_national_id(national_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No voter with national id {national_id}")))
    }

    /// Update the supplied fields of a voter.
    pub async fn update_voter(&self, id: &str, input: VoterInput) -> AppResult<voter::Model> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let existing = self.get_voter(id).await?;
        let mut model: voter::ActiveModel = existing.into();

        for (field, value) in [
            ("tableId", &input.table_id),
            ("nationalId", &input.national_id),
            ("name", &input.name),
            ("genderCategory", &input.gender_category),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(AppError::Validation(format!("{field} cannot be empty")));
            }
        }

        if let Some(table_id) = non_empty(input.table_id.as_deref()) {
            model.table_id = Set(table_id);
        }
        if let Some(order_number) = input.order_number {
            model.order_number = Set(order_number);
        }
        if let Some(national_id) = non_empty(input.national_id.as_deref()) {
            model.national_id = Set(national_id);
        }
        if let Some(name) = non_empty(input.name.as_deref()) {
            model.name = Set(normalize_name(&name));
        }
        if let Some(gender) = non_empty(input.gender_category.as_deref()) {
            model.gender = Set(parse_gender(&gender)?);
        }
        if let Some(note) = input.note {
            model.note = Set(Some(note));
        }
        if let Some(challenged) = input.challenged {
            model.challenged = Set(challenged);
        }
        if let Some(assisted) = input.assisted {
            model.assisted = Set(assisted);
        }
        model.updated_at = Set(Some(Utc::now().into()));

        self.voter_repo.update(model).await
    }

    /// Soft-delete a voter, freeing its national ID and roll position.
    pub async fn soft_delete_voter(&self, id: &str) -> AppResult<()> {
        if !self.voter_repo.soft_delete(id).await? {
            return Err(Self::not_found(id));
        }

        info!(voter_id = %id, "Voter removed");
        Ok(())
    }

    /// Mark a voter as having voted.
    ///
    /// Succeeds at most once per voter until the mark is reversed.
    pub async fn mark_voted(
        &self,
        id: &str,
        input: MarkVoteInput,
        operator_id: Option<&str>,
    ) -> AppResult<voter::Model> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let mark = VoteMark {
            voted_at: input.voted_at.unwrap_or_else(|| Utc::now().into()),
            voted_by: operator_id.map(ToString::to_string),
            source: input.source.unwrap_or_default(),
            device_id: input.device_id,
            note: input.note,
            challenged: input.challenged,
            assisted: input.assisted,
        };
        let source = mark.source;

        let voter = self
            .voter_repo
            .mark_voted(id, mark)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Voter {id} already voted or not found")))?;

        info!(
            voter_id = %id,
            table_id = %voter.table_id,
            source = ?source,
            operator = operator_id.unwrap_or("-"),
            "Vote marked"
        );
        Ok(voter)
    }

    /// Reverse a vote mark.
    pub async fn unmark_voted(&self, id: &str, note: Option<String>) -> AppResult<voter::Model> {
        let existing = self.get_voter(id).await?;

        if !existing.has_voted {
            return Err(AppError::Conflict(format!("Voter {id} has not voted")));
        }

        let mut model: voter::ActiveModel = existing.into();
        model.has_voted = Set(false);
        model.voted_at = Set(None);
        model.voted_by = Set(None);
        model.vote_source = Set(VoteSource::Manual);
        model.vote_device_id = Set(None);
        if let Some(note) = note {
            model.note = Set(Some(note));
        }
        model.updated_at = Set(Some(Utc::now().into()));

        let voter = self.voter_repo.update(model).await?;

        info!(voter_id = %id, table_id = %voter.table_id, "Vote unmarked");
        Ok(voter)
    }

    /// Voters of one table in roll order.
    pub async fn list_by_table(&self, table_id: &str) -> AppResult<Vec<voter::Model>> {
        let voters = self.voter_repo.find_by_table(table_id).await?;

        if voters.is_empty() {
            return Err(AppError::NotFound(format!("No voters for table {table_id}")));
        }
        Ok(voters)
    }

    /// Search the voter roll.
    pub async fn list_voters(&self, query: VoterListQuery) -> AppResult<VoterPage> {
        let filter = VoterFilter {
            table_id: non_empty(query.table_id.as_deref()),
            national_id: non_empty(query.national_id.as_deref()),
            name_contains: non_empty(query.name.as_deref()),
            has_voted: query.has_voted,
        };
        let order = parse_sort(query.sort.as_deref())?;

        if query.paginated == Some(false) {
            let voters = self.voter_repo.search(&filter, &order, None).await?;
            if voters.is_empty() {
                return Err(AppError::NotFound("No voters match the filter".to_string()));
            }
            return Ok(VoterPage {
                total: voters.len() as u64,
                pages: 1,
                current_page: 1,
                voters,
            });
        }

        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let total = self.voter_repo.count(&filter).await?;
        let pages = total.div_ceil(limit).max(1);
        let current_page = query.page.unwrap_or(1).clamp(1, pages);

        let voters = self
            .voter_repo
            .search(&filter, &order, Some(((current_page - 1) * limit, limit)))
            .await?;

        Ok(VoterPage {
            total,
            pages,
            current_page,
            voters,
        })
    }

    /// Turnout statistics for one table.
    pub async fn table_stats(&self, table_id: &str) -> AppResult<TableStats> {
        let states = self.voter_repo.find_vote_states(table_id).await?;

        if states.is_empty() {
            return Err(AppError::NotFound(format!("No voters for table {table_id}")));
        }
        Ok(TableStats::from_states(&states))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;
    use std::sync::Arc;

    fn create_test_voter(id: &str, has_voted: bool) -> voter::Model {
        voter::Model {
            id: id.to_string(),
            table_id: "001".to_string(),
            order_number: 1,
            national_id: "30111222".to_string(),
            name: "PEREZ JUAN".to_string(),
            gender: GenderCategory::Male,
            has_voted,
            voted_at: None,
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

    fn service(db: MockDatabase) -> VoterRegistryService {
        VoterRegistryService::new(VoterRepository::new(Arc::new(db.into_connection())))
    }

    fn voter_input(value: serde_json::Value) -> VoterInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_voter_input_accepts_aliases() {
        let input = voter_input(json!({
            "mesa": "001",
            "orden": "4",
            "dni": 30111222,
            "nombre": " perez juan ",
            "sexo": "f",
            "impugnado": "1",
            "unknownField": "ignored"
        }));

        assert_eq!(input.table_id.as_deref(), Some("001"));
        assert_eq!(input.order_number, Some(4));
        assert_eq!(input.national_id.as_deref(), Some("30111222"));
        assert_eq!(input.challenged, Some(true));
        assert_eq!(parse_gender(input.gender_category.as_deref().unwrap()).unwrap(), GenderCategory::Female);
        assert_eq!(normalize_name(input.name.as_deref().unwrap()), "PEREZ JUAN");
    }

    #[test]
    fn test_mark_input_accepts_legacy_sources() {
        let input: MarkVoteInput = serde_json::from_value(json!({"source": "ocr"})).unwrap();
        assert_eq!(input.source, Some(VoteSource::Scanned));

        let input: MarkVoteInput = serde_json::from_value(json!({"source": "import"})).unwrap();
        assert_eq!(input.source, Some(VoteSource::Imported));
    }

    #[test]
    fn test_parse_sort_keys() {
        let default = parse_sort(None).unwrap();
        assert_eq!(default.len(), 2);
        assert!(matches!(default[0], (voter::Column::TableId, Order::Asc)));
        assert!(matches!(default[1], (voter::Column::OrderNumber, Order::Asc)));

        let custom = parse_sort(Some("-orden, nombre")).unwrap();
        assert!(matches!(custom[0], (voter::Column::OrderNumber, Order::Desc)));
        assert!(matches!(custom[1], (voter::Column::Name, Order::Asc)));

        assert_eq!(parse_sort(Some(" , ")).unwrap().len(), 2);
        assert!(matches!(
            parse_sort(Some("password")).unwrap_err(),
            AppError::BadRequest(_)
        ));
    }

    #[test]
    fn test_table_stats_counts() {
        let stats = TableStats::from_states(&[
            (true, GenderCategory::Male),
            (false, GenderCategory::Female),
            (true, GenderCategory::Female),
        ]);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.voted, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.by_gender_category["M"], 1);
        assert_eq!(stats.by_gender_category["F"], 2);
        assert_eq!(stats.by_gender_category["X"], 0);
    }

    #[tokio::test]
    async fn test_create_reports_missing_fields() {
        let svc = service(MockDatabase::new(DatabaseBackend::Postgres));

        let err = svc
            .create_voter(voter_input(json!({"mesa": "001", "nombre": "  "})))
            .await
            .unwrap_err();

        match err {
            AppError::Validation(message) => {
                assert!(message.contains("orderNumber"));
                assert!(message.contains("nationalId"));
                assert!(message.contains("name"));
                assert!(message.contains("genderCategory"));
                assert!(!message.contains("tableId"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_gender() {
        let svc = service(MockDatabase::new(DatabaseBackend::Postgres));

        let err = svc
            .create_voter(voter_input(json!({
                "tableId": "001",
                "orderNumber": 1,
                "nationalId": "1",
                "name": "A",
                "genderCategory": "Q"
            })))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mark_voted_twice_conflicts() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            },
        ]);
        let svc = service(db);

        let err = svc
            .mark_voted("v1", MarkVoteInput::default(), Some("op"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unmark_requires_vote() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[create_test_voter("v1", false)]]);
        let svc = service(db);

        let err = svc.unmark_voted("v1", None).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unmark_missing_voter() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<voter::Model>::new()]);
        let svc = service(db);

        let err = svc.unmark_voted("gone", None).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_missing_voter() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([
            MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            },
        ]);
        let svc = service(db);

        let err = svc.soft_delete_voter("gone").await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_by_empty_table() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<voter::Model>::new()]);
        let svc = service(db);

        let err = svc.list_by_table("999").await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }
}
