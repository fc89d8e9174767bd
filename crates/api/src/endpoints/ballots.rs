//! Ballot tally endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, patch, post},
};
use escrutinio_common::AppResult;
use escrutinio_core::{PartyTotal, SubmitTallyInput, TableOverview};
use escrutinio_db::entities::ballot_record::{self, BallotStatus};
use escrutinio_db::repositories::BallotRecordSummary;
use serde::{Deserialize, Serialize};

use crate::{middleware::AppState, response::ApiResponse};

// ==================== Request/Response Types ====================

/// Ballot record response. Photo bytes are never inlined.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotResponse {
    pub id: String,
    pub table_id: String,
    pub version: i32,
    pub previous_version_id: Option<String>,
    pub status: BallotStatus,
    pub votes_by_candidate: serde_json::Value,
    pub detail_lines: serde_json::Value,
    pub total: i64,
    pub has_photo: bool,
    pub photo_content_type: Option<String>,
    pub photo_uploaded_at: Option<String>,
    pub saved_at: String,
    pub created_at: String,
}

impl From<ballot_record::Model> for BallotResponse {
    fn from(r: ballot_record::Model) -> Self {
        BallotRecordSummary::from(r).into()
    }
}

impl From<BallotRecordSummary> for BallotResponse {
    fn from(r: BallotRecordSummary) -> Self {
        Self {
            id: r.id,
            table_id: r.table_id,
            version: r.version,
            previous_version_id: r.previous_version_id,
            status: r.status,
            votes_by_candidate: r.votes_by_candidate,
            detail_lines: r.detail_lines,
            total: r.total,
            has_photo: r.has_photo,
            photo_content_type: r.photo_content_type,
            photo_uploaded_at: r.photo_uploaded_at.map(|t| t.to_rfc3339()),
            saved_at: r.saved_at.to_rfc3339(),
            created_at: r.created_at.to_rfc3339(),
        }
    }
}

/// Current tallies page response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotListResponse {
    pub total: u64,
    pub page: u64,
    pub pages: u64,
    pub records: Vec<BallotResponse>,
}

/// Version history response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsResponse {
    pub table_id: String,
    pub total: usize,
    pub versions: Vec<BallotResponse>,
}

/// Photo upload acknowledgement.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoStoredResponse {
    pub table_id: String,
}

/// List current tallies request.
#[derive(Debug, Deserialize)]
pub struct ListBallotsRequest {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Photo upload request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRequest {
    #[serde(default, alias = "photo")]
    pub photo_base64: Option<String>,
}

// ==================== Handlers ====================

/// Submit a tally.
async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitTallyInput>,
) -> AppResult<ApiResponse<BallotResponse>> {
    let submission = state.ledger_service.submit_tally(req).await?;

    if submission.created {
        Ok(ApiResponse::created(submission.record.into()))
    } else {
        Ok(ApiResponse::ok(submission.record.into()))
    }
}

/// List the current tally of each table.
async fn list(
    State(state): State<AppState>,
    Query(req): Query<ListBallotsRequest>,
) -> AppResult<ApiResponse<BallotListResponse>> {
    let page = state.ledger_service.list_current(req.page, req.limit).await?;

    Ok(ApiResponse::ok(BallotListResponse {
        total: page.total,
        page: page.page,
        pages: page.pages,
        records: page.records.into_iter().map(Into::into).collect(),
    }))
}

/// Party totals across closed current tallies.
async fn totals(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<PartyTotal>>> {
    let totals = state.aggregation_service.totals_by_party().await?;
    Ok(ApiResponse::ok(totals))
}

/// Show the current tally of a table.
async fn show(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<ApiResponse<BallotResponse>> {
    let record = state.ledger_service.get_current(&table_id).await?;
    Ok(ApiResponse::ok(record.into()))
}

/// Close the current tally of a table.
async fn close(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<ApiResponse<BallotResponse>> {
    let record = state.ledger_service.close_table(&table_id).await?;
    Ok(ApiResponse::ok(record.into()))
}

/// Version history of a table, newest first.
async fn versions(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<ApiResponse<VersionsResponse>> {
    let versions = state.ledger_service.list_versions(&table_id).await?;

    Ok(ApiResponse::ok(VersionsResponse {
        table_id,
        total: versions.len(),
        versions: versions.into_iter().map(Into::into).collect(),
    }))
}

/// Attach a photo of the paper tally.
async fn upload_photo(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
    Json(req): Json<PhotoRequest>,
) -> AppResult<ApiResponse<PhotoStoredResponse>> {
    state
        .ledger_service
        .attach_photo(&table_id, req.photo_base64.as_deref().unwrap_or_default())
        .await?;

    Ok(ApiResponse::ok(PhotoStoredResponse { table_id }))
}

/// Serve the photo of the current tally.
async fn photo(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (bytes, content_type) = state.ledger_service.get_photo(&table_id).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// Turnout and tally side by side for one table.
async fn overview(
    State(state): State<AppState>,
    Path(table_id): Path<String>,
) -> AppResult<ApiResponse<TableOverview>> {
    let overview = state.aggregation_service.table_overview(&table_id).await?;
    Ok(ApiResponse::ok(overview))
}

/// Create the ballots router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit).get(list))
        .route("/totals", get(totals))
        .route("/{table_id}", get(show))
        .route("/{table_id}/close", patch(close))
        .route("/{table_id}/versions", get(versions))
        .route("/{table_id}/photo", post(upload_photo).get(photo))
        .route("/{table_id}/overview", get(overview))
}
