//! Database layer
//!
//! Connection pool against the PostgreSQL system of record. The schema is
//! owned by the order system and its change triggers; this crate only
//! performs the authoritative status mutations — snapshot reads live behind
//! the external API layer.

pub mod tickets;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::AppError;

/// Open the connection pool
pub async fn connect(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;

    tracing::info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Lazy pool for contexts where the first query may happen much later
/// (or never, in tests that only exercise room traffic)
pub fn connect_lazy(database_url: &str) -> Result<PgPool, AppError> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(database_url)
        .map_err(|e| AppError::database(format!("Invalid database URL: {e}")))
}
