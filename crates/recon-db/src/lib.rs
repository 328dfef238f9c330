//! The reconciliation store: a thin, typed layer over Postgres covering
//! ingest, matching, exception review, audit, and analytics. Every public
//! operation takes the caller's roles and checks permission before
//! touching the database, returning [`error::RconError`] rather than a
//! bare `sqlx::Error` so the HTTP layer can map failures to status codes
//! without string matching.

pub mod analytics;
pub mod audit;
pub mod error;
pub mod exceptions;
pub mod ingest;
pub mod pan;
pub mod results;
pub mod rulesets;
pub mod runs;
pub mod users;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub const ENV_DB_URL: &str = "RECON_DATABASE_URL";

pub use error::{RconError, RconResult};

/// Connects to Postgres using `RECON_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Connects and applies embedded migrations — used by integration tests
/// and by the CLI's `db migrate` command.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Runs the embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_txns_table: bool,
}

/// Connectivity and schema-presence check, used by the CLI's `db status`
/// command and the API's health route.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from information_schema.tables
            where table_schema = 'public' and table_name = 'txns'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_txns_table: exists,
    })
}
