//! Create voter table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Voter::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Voter::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Voter::TableId).string_len(64).not_null())
                    .col(ColumnDef::new(Voter::OrderNumber).integer().not_null())
                    .col(ColumnDef::new(Voter::NationalId).string_len(32).not_null())
                    .col(ColumnDef::new(Voter::Name).string_len(256).not_null())
                    .col(ColumnDef::new(Voter::Gender).string_len(1).not_null())
                    .col(ColumnDef::new(Voter::HasVoted).boolean().not_null().default(false))
                    .col(ColumnDef::new(Voter::VotedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Voter::VotedBy).string_len(64))
                    .col(
                        ColumnDef::new(Voter::VoteSource)
                            .string_len(16)
                            .not_null()
                            .default("manual"),
                    )
                    .col(ColumnDef::new(Voter::VoteDeviceId).string_len(128))
                    .col(ColumnDef::new(Voter::Note).text())
                    .col(ColumnDef::new(Voter::Challenged).boolean().not_null().default(false))
                    .col(ColumnDef::new(Voter::Assisted).boolean().not_null().default(false))
                    .col(ColumnDef::new(Voter::IsDeleted).boolean().not_null().default(false))
                    .col(
                        ColumnDef::new(Voter::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Voter::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index: (table_id, has_voted) for per-table turnout
        manager
            .create_index(
                Index::create()
                    .name("idx_voter_table_id_has_voted")
                    .table(Voter::Table)
                    .col(Voter::TableId)
                    .col(Voter::HasVoted)
                    .to_owned(),
            )
            .await?;

        // Partial unique indexes: soft-deleted rows do not block reuse
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_voter_live_national_id
                ON voter (national_id)
                WHERE is_deleted = false;
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_voter_live_table_order
                ON voter (table_id, order_number)
                WHERE is_deleted = false;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS idx_voter_live_table_order;")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS idx_voter_live_national_id;")
            .await?;

        manager
            .drop_table(Table::drop().table(Voter::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Voter {
    Table,
    Id,
    TableId,
    OrderNumber,
    NationalId,
    Name,
    Gender,
    HasVoted,
    VotedAt,
    VotedBy,
    VoteSource,
    VoteDeviceId,
    Note,
    Challenged,
    Assisted,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}
