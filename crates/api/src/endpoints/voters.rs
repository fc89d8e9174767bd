//! Voter roll endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
};
use escrutinio_common::AppResult;
use escrutinio_core::{MarkVoteInput, TableStats, VoterInput, VoterListQuery};
use escrutinio_db::entities::voter::{self, GenderCategory, VoteSource};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::Operator,
    middleware::AppState,
    response::{self, ApiResponse},
};

// ==================== Request/Response Types ====================

/// Voter response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterResponse {
    pub id: String,
    pub table_id: String,
    pub order_number: i32,
    pub national_id: String,
    pub name: String,
    pub gender_category: GenderCategory,
    pub has_voted: bool,
    pub voted_at: Option<String>,
    pub voted_by_user: Option<String>,
    pub vote_source: VoteSource,
    pub vote_device_id: Option<String>,
    pub note: Option<String>,
    pub challenged: bool,
    pub assisted: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl From<voter::Model> for VoterResponse {
    fn from(v: voter::Model) -> Self {
        Self {
            id: v.id,
            table_id: v.table_id,
            order_number: v.order_number,
            national_id: v.national_id,
            name: v.name,
            gender_category: v.gender,
            has_voted: v.has_voted,
            voted_at: v.voted_at.map(|t| t.to_rfc3339()),
            voted_by_user: v.voted_by,
            vote_source: v.vote_source,
            vote_device_id: v.vote_device_id,
            note: v.note,
            challenged: v.challenged,
            assisted: v.assisted,
            created_at: v.created_at.to_rfc3339(),
            updated_at: v.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Voter search page response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterListResponse {
    pub total: u64,
    pub pages: u64,
    pub current_page: u64,
    pub voters: Vec<VoterResponse>,
}

/// Table roll response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRollResponse {
    pub table_id: String,
    pub count: usize,
    pub voters: Vec<VoterResponse>,
}

/// Table statistics response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatsResponse {
    pub table_id: String,
    pub stats: TableStats,
}

/// Unmark vote request.
#[derive(Debug, Default, Deserialize)]
pub struct UnmarkVoteRequest {
    pub note: Option<String>,
}

// ==================== Handlers ====================

/// Search the roll.
async fn list(
    State(state): State<AppState>,
    Query(req): Query<VoterListQuery>,
) -> AppResult<ApiResponse<VoterListResponse>> {
    let page = state.registry_service.list_voters(req).await?;

    Ok(ApiResponse::ok(VoterListResponse {
        total: page.total,
        pages: page.pages,
        current_page: page.current_page,
        voters: page.voters.into_iter().map(Into::into).collect(),
    }))
}

/// Register a voter.
async fn create(
    State(state): State<AppState>,
    Json(req): Json<VoterInput>,
) -> AppResult<ApiResponse<VoterResponse>> {
    let voter = state.registry_service.create_voter(req).await?;
    Ok(ApiResponse::created(voter.into()))
}

/// Show a voter.
async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<VoterResponse>> {
    let voter = state.registry_service.get_voter(&id).await?;
    Ok(ApiResponse::ok(voter.into()))
}

/// Look a voter up by national ID.
async fn show_by_national_id(
    State(state): State<AppState>,
    Path(national_id): Path<String>,
) -> AppResult<ApiResponse<VoterResponse>> {
    let voter = state
        .registry_service
        .get_voter_by_national_id(&national_id)
        .await?;
    Ok(ApiResponse::ok(voter.into()))
}

/// Update a voter.
async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VoterInput>,
) -> AppResult<ApiResponse<VoterResponse>> {
    let voter = state.registry_service.update_voter(&id, req).await?;
    Ok(ApiResponse::ok(voter.into()))
}

/// Remove a voter from the roll.
async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.registry_service.soft_delete_voter(&id).await?;
    Ok(response::ok())
}

/// Record that a voter has voted. The body is optional.
async fn mark_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    operator: Operator,
    req: Option<Json<MarkVoteInput>>,
) -> AppResult<ApiResponse<VoterResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let voter = state
        .registry_service
        .mark_voted(&id, req, operator.id())
        .await?;
    Ok(ApiResponse::ok(voter.into()))
}

/// Reverse a vote mark.
async fn unmark_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Option<Json<UnmarkVoteRequest>>,
) -> AppResult<ApiResponse<VoterResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    let voter = state.registry_service.unmark_voted(&id, req.note).await?;
    Ok(ApiResponse::ok(voter.into()))
}

/// The roll of one table.
async fn table_roll(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<ApiResponse<TableRollResponse>> {
    let voters = state.registry_service.list_by_table(&table_id).await?;

    Ok(ApiResponse::ok(TableRollResponse {
        table_id,
        count: voters.len(),
        voters: voters.into_iter().map(Into::into).collect(),
    }))
}

/// Turnout statistics of one table.
async fn table_stats(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<ApiResponse<TableStatsResponse>> {
    let stats = state.registry_service.table_stats(&table_id).await?;
    Ok(ApiResponse::ok(TableStatsResponse { table_id, stats }))
}

/// Create the voters router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/by-national-id/{national_id}", get(show_by_national_id))
        .route("/tables/{table_id}", get(table_roll))
        .route("/tables/{table_id}/stats", get(table_stats))
        .route("/{id}", get(show).patch(update).delete(delete))
        .route("/{id}/vote", patch(mark_vote))
        .route("/{id}/unvote", patch(unmark_vote))
}
