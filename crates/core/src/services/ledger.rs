//! Ballot ledger service.
//!
//! Each polling table has a chain of tally versions. A submission either
//! appends a new closed version or, when the current version is still open,
//! completes it in place. Appends race on the `(table_id, version)` unique
//! index and in-place completion races on a filtered UPDATE; a writer that
//! loses re-reads the current version and decides again.

use base64::{
    Engine, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use chrono::{DateTime, FixedOffset, Utc};
use escrutinio_common::{AppError, AppResult, IdGenerator, config::LedgerConfig};
use escrutinio_db::entities::ballot_record::{self, BallotStatus};
use escrutinio_db::repositories::{BallotRecordRepository, BallotRecordSummary, TallyFields};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use validator::Validate;

use super::input::string_or_number;

const DEFAULT_PHOTO_CONTENT_TYPE: &str = "image/jpeg";
const DEFAULT_LIST_LIMIT: u64 = 20;

/// Accepts unpadded input and stray trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A tally submission.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTallyInput {
    #[serde(default, alias = "mesaId", deserialize_with = "string_or_number")]
    #[validate(length(max = 64))]
    pub table_id: Option<String>,
    #[serde(default, alias = "votos")]
    pub votes_by_candidate: Option<Map<String, Value>>,
    #[serde(default, alias = "detalle")]
    pub detail_lines: Option<Vec<DetailLineInput>>,
    pub total: Option<i64>,
}

/// One line of a submitted breakdown. Votes may arrive in any shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailLineInput {
    #[serde(default, deserialize_with = "string_or_number")]
    pub party_id: Option<String>,
    #[serde(default, alias = "nombre")]
    pub name: Option<String>,
    #[serde(default, alias = "votos")]
    pub votes: Value,
}

/// A stored breakdown line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailLine {
    pub party_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub votes: i64,
}

/// The outcome of a submission.
#[derive(Debug, Clone)]
pub struct TallySubmission {
    pub record: ballot_record::Model,
    /// `true` when a new version was appended, `false` when an open
    /// version was completed in place.
    pub created: bool,
}

/// A page of current tallies, one per table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPage {
    /// Number of distinct tables.
    pub total: u64,
    pub page: u64,
    pub pages: u64,
    pub records: Vec<BallotRecordSummary>,
}

/// Coerce an arbitrary vote value into a non-negative count.
///
/// Non-digit characters are stripped. Negative-looking input, input without
/// digits and values too large for an `i64` all become 0.
#[must_use]
pub fn sanitize_vote(value: &Value) -> i64 {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return 0,
    };

    if text.trim_start().starts_with('-') {
        return 0;
    }

    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse::<i64>().unwrap_or(0)
}

/// Split a photo payload into its bytes and content type.
///
/// The payload is plain base64 or a `data:<type>;base64,<data>` URI.
/// Decoding is best-effort: characters outside the base64 alphabet are
/// skipped and URL-safe characters are accepted.
#[must_use]
pub fn decode_photo_payload(payload: &str) -> (Vec<u8>, String) {
    let (content_type, data) = payload
        .strip_prefix("data:")
        .and_then(|rest| rest.rsplit_once(";base64,"))
        .filter(|(content_type, _)| !content_type.is_empty())
        .unwrap_or((DEFAULT_PHOTO_CONTENT_TYPE, payload));

    let mut cleaned: String = data
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '+' | '/' => Some(c),
            '-' => Some('+'),
            '_' => Some('/'),
            _ => None,
        })
        .collect();

    // A single dangling character carries no whole byte.
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }

    let bytes = LENIENT_BASE64.decode(cleaned).unwrap_or_default();
    (bytes, content_type.to_string())
}

impl SubmitTallyInput {
    /// Sanitize the submitted breakdown into storable fields.
    fn into_tally(self) -> TallyFields {
        let has_votes_map = self.votes_by_candidate.is_some();
        let votes: Map<String, Value> = self
            .votes_by_candidate
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, Value::from(sanitize_vote(&value))))
            .collect();

        let lines: Vec<DetailLine> = self
            .detail_lines
            .unwrap_or_default()
            .into_iter()
            .map(|line| DetailLine {
                party_id: line.party_id.unwrap_or_default().trim().to_string(),
                name: line.name.unwrap_or_default().trim().to_string(),
                votes: sanitize_vote(&line.votes),
            })
            .collect();

        let total_calc = if has_votes_map {
            votes
                .values()
                .filter_map(Value::as_i64)
                .fold(0_i64, i64::saturating_add)
        } else {
            lines
                .iter()
                .map(|l| l.votes)
                .fold(0_i64, i64::saturating_add)
        };

        TallyFields {
            votes_by_candidate: Value::Object(votes),
            detail_lines: serde_json::to_value(&lines).unwrap_or_else(|_| Value::Array(vec![])),
            total: self.total.unwrap_or(total_calc),
        }
    }
}

/// Service for the ballot tally ledger.
#[derive(Clone)]
pub struct BallotLedgerService {
    ballot_repo: BallotRecordRepository,
    id_gen: IdGenerator,
    max_append_attempts: u32,
    list_max_limit: u64,
}

impl BallotLedgerService {
    /// Create a new ledger service.
    #[must_use]
    pub fn new(ballot_repo: BallotRecordRepository, config: &LedgerConfig) -> Self {
        Self {
            ballot_repo,
            id_gen: IdGenerator::new(),
            max_append_attempts: config.max_append_attempts.max(1),
            list_max_limit: config.list_max_limit.max(1),
        }
    }

    fn new_version(
        &self,
        table_id: &str,
        version: i32,
        previous_version_id: Option<String>,
        status: BallotStatus,
        tally: TallyFields,
        photo: Option<(Vec<u8>, String)>,
    ) -> ballot_record::ActiveModel {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let (photo_data, photo_content_type) = photo.unzip();

        ballot_record::ActiveModel {
            id: Set(self.id_gen.generate()),
            table_id: Set(table_id.to_string()),
            version: Set(version),
            previous_version_id: Set(previous_version_id),
            status: Set(status),
            votes_by_candidate: Set(tally.votes_by_candidate),
            detail_lines: Set(tally.detail_lines),
            total: Set(tally.total),
            photo_uploaded_at: Set(photo_data.as_ref().map(|_| now)),
            photo_data: Set(photo_data),
            photo_content_type: Set(photo_content_type),
            saved_at: Set(now),
            is_deleted: Set(false),
            created_at: Set(now),
        }
    }

    fn required_table_id(table_id: Option<&str>) -> AppResult<String> {
        table_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| AppError::BadRequest("tableId is required".to_string()))
    }

    /// Submit a tally for a polling table.
    pub async fn submit_tally(&self, input: SubmitTallyInput) -> AppResult<TallySubmission> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let table_id = Self::required_table_id(input.table_id.as_deref())?;

        if input.total.is_some_and(|total| total < 0) {
            return Err(AppError::BadRequest(
                "total must not be negative".to_string(),
            ));
        }

        let tally = input.into_tally();

        for attempt in 1..=self.max_append_attempts {
            let current = self.ballot_repo.find_current(&table_id).await?;

            match current {
                None => {
                    let model = self.new_version(
                        &table_id,
                        1,
                        None,
                        BallotStatus::Closed,
                        tally.clone(),
                        None,
                    );
                    if let Some(record) = self.ballot_repo.try_append(model).await? {
                        info!(table_id = %table_id, version = 1, total = record.total, "Tally recorded");
                        return Ok(TallySubmission {
                            record,
                            created: true,
                        });
                    }
                }
                Some(current) if current.status.is_closed() => {
                    let version = current.version.checked_add(1).ok_or_else(|| {
                        AppError::Internal(format!("version overflow for table {table_id}"))
                    })?;
                    let model = self.new_version(
                        &table_id,
                        version,
                        Some(current.id),
                        BallotStatus::Closed,
                        tally.clone(),
                        None,
                    );
                    if let Some(record) = self.ballot_repo.try_append(model).await? {
                        info!(
                            table_id = %table_id,
                            version = version,
                            total = record.total,
                            "Tally version appended"
                        );
                        return Ok(TallySubmission {
                            record,
                            created: true,
                        });
                    }
                }
                Some(current) => {
                    if let Some(record) = self
                        .ballot_repo
                        .complete_open(&current.id, tally.clone())
                        .await?
                    {
                        info!(
                            table_id = %table_id,
                            version = record.version,
                            total = record.total,
                            "Open tally completed"
                        );
                        return Ok(TallySubmission {
                            record,
                            created: false,
                        });
                    }
                }
            }

            debug!(table_id = %table_id, attempt = attempt, "Lost version race, re-reading");
        }

        warn!(
            table_id = %table_id,
            attempts = self.max_append_attempts,
            "Gave up submitting tally"
        );
        Err(AppError::Conflict(format!(
            "tally for table {table_id} kept changing, retry the submission"
        )))
    }

    /// Get the current record of a table.
    pub async fn get_current(&self, table_id: &str) -> AppResult<ballot_record::Model> {
        self.ballot_repo
            .find_current(table_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No ballot record for table {table_id}")))
    }

    /// Close the current record of a table. Closing twice is a no-op.
    pub async fn close_table(&self, table_id: &str) -> AppResult<ballot_record::Model> {
        let current = self.get_current(table_id).await?;

        if current.status.is_closed() {
            return Ok(current);
        }

        let closed = self
            .ballot_repo
            .mark_closed(&current.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No ballot record for table {table_id}")))?;

        info!(table_id = %table_id, version = closed.version, "Tally closed");
        Ok(closed)
    }

    /// Attach a photo of the paper tally to the current record.
    ///
    /// A table without records gets an open version 1 holding the photo.
    pub async fn attach_photo(&self, table_id: &str, payload: &str) -> AppResult<()> {
        if payload.trim().is_empty() {
            return Err(AppError::BadRequest("photo payload is required".to_string()));
        }

        let (data, content_type) = decode_photo_payload(payload.trim());
        if data.is_empty() {
            return Err(AppError::BadRequest(
                "photo payload contains no data".to_string(),
            ));
        }

        for attempt in 1..=self.max_append_attempts {
            match self.ballot_repo.find_current(table_id).await? {
                None => {
                    let model = self.new_version(
                        table_id,
                        1,
                        None,
                        BallotStatus::Open,
                        TallyFields {
                            votes_by_candidate: Value::Object(Map::new()),
                            detail_lines: Value::Array(vec![]),
                            total: 0,
                        },
                        Some((data.clone(), content_type.clone())),
                    );
                    if self.ballot_repo.try_append(model).await?.is_some() {
                        info!(table_id = %table_id, bytes = data.len(), "Photo stored on new open tally");
                        return Ok(());
                    }
                }
                Some(current) => {
                    if self
                        .ballot_repo
                        .set_photo(&current.id, data.clone(), &content_type)
                        .await?
                    {
                        info!(
                            table_id = %table_id,
                            version = current.version,
                            bytes = data.len(),
                            "Photo attached"
                        );
                        return Ok(());
                    }
                }
            }

            debug!(table_id = %table_id, attempt = attempt, "Lost photo race, re-reading");
        }

        warn!(table_id = %table_id, "Gave up attaching photo");
        Err(AppError::Conflict(format!(
            "tally for table {table_id} kept changing, retry the upload"
        )))
    }

    /// Get the photo of the current record with its content type.
    pub async fn get_photo(&self, table_id: &str) -> AppResult<(Vec<u8>, String)> {
        let current = self.get_current(table_id).await?;

        let data = current
            .photo_data
            .ok_or_else(|| AppError::NotFound(format!("No photo for table {table_id}")))?;
        let content_type = current
            .photo_content_type
            .unwrap_or_else(|| DEFAULT_PHOTO_CONTENT_TYPE.to_string());

        Ok((data, content_type))
    }

    /// List the current record of each table, ordered by table ID.
    pub async fn list_current(&self, page: Option<u64>, limit: Option<u64>) -> AppResult<CurrentPage> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, self.list_max_limit);
        let offset = (page - 1).saturating_mul(limit);

        let total = self.ballot_repo.count_tables().await?;
        let table_ids = self.ballot_repo.find_table_ids(offset, limit).await?;
        let records = self.ballot_repo.find_current_for_tables(&table_ids).await?;

        Ok(CurrentPage {
            total,
            page,
            pages: total.div_ceil(limit),
            records,
        })
    }

    /// All versions of a table, newest first.
    pub async fn list_versions(&self, table_id: &str) -> AppResult<Vec<BallotRecordSummary>> {
        self.ballot_repo.find_versions(table_id).await
    }
}
