//! Database connection and repositories.

pub mod repositories;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::{CoreError, Result};

/// Connect to PostgreSQL and apply any pending migrations.
///
/// Migrations run under sqlx's database-level migration lock, so multiple
/// instances booting concurrently serialize cleanly.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
        return Err(CoreError::Validation(
            "database URL must start with postgres:// or postgresql://".to_string(),
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| CoreError::Internal(format!("database connection failed: {e}")))?;

    crate::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| CoreError::Internal(format!("migration failed: {e}")))?;

    info!("database connected, migrations current");
    Ok(pool)
}
