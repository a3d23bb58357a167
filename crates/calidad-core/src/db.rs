// crates/calidad-core/src/db.rs

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub type DbPool = Pool<Postgres>;

/// Establishes a Postgres connection pool from the database settings.
pub async fn connect(settings: &DatabaseConfig) -> Result<DbPool> {
    let url = settings.connection_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout())
        .connect(&url)
        .await?;

    let version = server_version(&pool).await?;
    info!(server = %version.chars().take(50).collect::<String>(), "database connection pool established");
    Ok(pool)
}

/// Run database migrations embedded at compile-time.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn server_version(pool: &DbPool) -> Result<String> {
    let version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(pool)
        .await?;
    Ok(version)
}
