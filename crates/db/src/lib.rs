//! Database layer for escrutinio.
//!
//! Two record collections live here: versioned ballot tallies
//! (`ballot_record`) and the voter roll (`voter`). The uniqueness rules the
//! core relies on are partial unique indexes created by the migrations, so
//! the database itself arbitrates racing writers.

pub mod entities;
pub mod migrations;
pub mod repositories;
pub mod test_utils;

use escrutinio_common::{AppError, Config};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, SqlErr};
use std::time::Duration;
use tracing::log::LevelFilter;

/// Initialize database connection.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(&config.database.url);

    opt.max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    Database::connect(opt).await.map_err(db_error)
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None).await.map_err(db_error)
}

/// Whether the statement was rejected by a unique index.
#[must_use]
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Map a database error onto the application taxonomy.
///
/// Unique index rejections become [`AppError::Conflict`]; failing to reach
/// the store becomes the retryable [`AppError::Unavailable`].
#[must_use]
pub fn db_error(err: DbErr) -> AppError {
    if is_unique_violation(&err) {
        return AppError::Conflict(err.to_string());
    }

    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => AppError::Unavailable(err.to_string()),
        _ => AppError::Database(err.to_string()),
    }
}
