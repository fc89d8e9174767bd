//! Create ballot_record table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BallotRecord::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BallotRecord::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BallotRecord::TableId).string_len(64).not_null())
                    .col(ColumnDef::new(BallotRecord::Version).integer().not_null())
                    .col(ColumnDef::new(BallotRecord::PreviousVersionId).string_len(32))
                    .col(
                        ColumnDef::new(BallotRecord::Status)
                            .string_len(16)
                            .not_null()
                            .default("open"),
                    )
                    .col(ColumnDef::new(BallotRecord::VotesByCandidate).json().not_null())
                    .col(ColumnDef::new(BallotRecord::DetailLines).json().not_null())
                    .col(
                        ColumnDef::new(BallotRecord::Total)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(BallotRecord::PhotoData).binary())
                    .col(ColumnDef::new(BallotRecord::PhotoContentType).string_len(128))
                    .col(ColumnDef::new(BallotRecord::PhotoUploadedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(BallotRecord::SavedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BallotRecord::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(BallotRecord::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ballot_record_previous_version")
                            .from(BallotRecord::Table, BallotRecord::PreviousVersionId)
                            .to(BallotRecord::Table, BallotRecord::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Partial unique index: one live row per (table_id, version).
        // Serves "current version" lookups, and concurrent appends of the
        // same version number lose here.
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_ballot_record_live_version
                ON ballot_record (table_id, version)
                WHERE is_deleted = false;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS idx_ballot_record_live_version;")
            .await?;

        manager
            .drop_table(Table::drop().table(BallotRecord::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum BallotRecord {
    Table,
    Id,
    TableId,
    Version,
    PreviousVersionId,
    Status,
    VotesByCandidate,
    DetailLines,
    Total,
    PhotoData,
    PhotoContentType,
    PhotoUploadedAt,
    SavedAt,
    IsDeleted,
    CreatedAt,
}
