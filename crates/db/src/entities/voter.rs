//! Voter entity: one row per registered voter.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Gender category as printed on the voter roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum GenderCategory {
    /// Male.
    #[sea_orm(string_value = "M")]
    #[serde(rename = "M")]
    Male,
    /// Female.
    #[sea_orm(string_value = "F")]
    #[serde(rename = "F")]
    Female,
    /// Other or unspecified.
    #[sea_orm(string_value = "X")]
    #[serde(rename = "X")]
    Other,
}

/// How a vote mark reached the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum VoteSource {
    /// Entered by an operator.
    #[default]
    #[sea_orm(string_value = "manual")]
    Manual,
    /// Read by a scanner.
    #[sea_orm(string_value = "scanned")]
    #[serde(alias = "ocr")]
    Scanned,
    /// Bulk import.
    #[sea_orm(string_value = "imported")]
    #[serde(alias = "import")]
    Imported,
    /// External client.
    #[sea_orm(string_value = "api")]
    Api,
}

/// A registered voter.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "voter")]
pub struct Model {
    /// Voter ID.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Polling table the voter is assigned to.
    #[sea_orm(indexed)]
    pub table_id: String,

    /// Position on the table's printed roll.
    pub order_number: i32,

    /// National identity number, unique among live voters.
    #[sea_orm(indexed)]
    pub national_id: String,

    /// Stored trimmed and upper-cased.
    pub name: String,

    /// Gender category from the roll.
    pub gender: GenderCategory,

    /// Single-use flag. Only flipped by a conditional update.
    pub has_voted: bool,

    /// When the vote was recorded.
    pub voted_at: Option<DateTimeWithTimeZone>,

    /// Operator who recorded the vote.
    pub voted_by: Option<String>,

    /// How the mark arrived.
    pub vote_source: VoteSource,

    /// Device that recorded the mark.
    pub vote_device_id: Option<String>,

    /// Free-form operator note.
    pub note: Option<String>,

    /// The vote was challenged at the table.
    pub challenged: bool,

    /// The voter was assisted.
    pub assisted: bool,

    /// Soft delete flag.
    pub is_deleted: bool,

    /// When the voter was registered.
    pub created_at: DateTimeWithTimeZone,

    /// Last edit.
    pub updated_at: Option<DateTimeWithTimeZone>,
}

/// Voters have no relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
