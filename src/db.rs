//! Postgres pool shared by the durable stores

use crate::error::ProcessingError;
use crate::Result;
use sqlx::PgPool;
use tracing::info;

/// Pool that connects on first use, so construction never blocks on the database
pub fn connect_lazy(database_url: &str) -> Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(database_url)
        .map_err(|e| ProcessingError::DatabaseError(format!("Invalid database url: {}", e)))?;

    info!("Postgres pool configured");
    Ok(pool)
}
