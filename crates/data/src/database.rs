use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connects to the `PostgreSQL` database with the given pool size.
///
/// # Errors
/// Returns an error if the database connection cannot be established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
