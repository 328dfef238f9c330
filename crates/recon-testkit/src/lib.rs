//! Shared fixtures for the reconciliation workspace's DB-backed scenario
//! tests: a gated Postgres pool helper (mirrors `recon_db::testkit_db_pool`)
//! and small builders for the raw records every scenario ingests before
//! exercising the engine/store/workflow under test.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use recon_db::ingest::{IngestRequest, RawTxnRecord};
use recon_schemas::Side;
use rust_decimal::Decimal;
use sqlx::PgPool;

/// Connects to `RECON_DATABASE_URL` and applies migrations. Scenario tests
/// call this first thing and stay `#[ignore]`d so a bare `cargo test`
/// across the workspace never needs a live database.
pub async fn test_pool() -> Result<PgPool> {
    let url = std::env::var(recon_db::ENV_DB_URL).with_context(|| {
        format!(
            "DB-backed scenario tests require {}; run with --include-ignored",
            recon_db::ENV_DB_URL
        )
    })?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .context("failed to connect to test Postgres")?;
    recon_db::migrate(&pool).await.context("failed to run migrations against test Postgres")?;
    Ok(pool)
}

pub const ADMIN: &[recon_authz::Role] = &[recon_authz::Role::Admin];

/// One synthetic raw transaction record with sane, overridable defaults.
pub fn raw_txn(rrn: &str, amount: Decimal, currency: &str, txn_time: DateTime<Utc>, merchant_id: &str) -> RawTxnRecord {
    RawTxnRecord {
        rrn: rrn.to_string(),
        arn: None,
        pan: Some("4000001234561234".to_string()),
        amount,
        currency: currency.to_string(),
        txn_time,
        op_type: Some("PURCHASE".to_string()),
        merchant_id: merchant_id.to_string(),
        channel_id: "POS".to_string(),
        status_norm: "SETTLED".to_string(),
        fee_amount: None,
        fee_currency: None,
    }
}

/// Builds an [`IngestRequest`] for one side/date. `checksum_tag` should be
/// unique per logical file within a test run (e.g. derived from a freshly
/// generated UUID) so unrelated tests sharing a database never collide on
/// the `(system_tag, business_date, checksum)` dedup key.
pub fn ingest_request(
    side: Side,
    system_tag: &str,
    business_date: NaiveDate,
    checksum_tag: &str,
    records: Vec<RawTxnRecord>,
) -> IngestRequest {
    IngestRequest {
        side,
        system_tag: system_tag.to_string(),
        business_date,
        file_name: format!("{system_tag}_{business_date}.csv"),
        checksum: format!("sha256:{checksum_tag}"),
        parser_profile: "default".to_string(),
        received_at: None,
        records,
    }
}

/// A fresh, never-reused business date derived from a UUID's low bits, so
/// parallel scenario tests sharing one database never observe each other's
/// transactions through a `business_date` cohort query.
pub fn unique_business_date() -> NaiveDate {
    let n = uuid::Uuid::new_v4().as_u128() as i64;
    let days = (n.unsigned_abs() % 3650) as i64;
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(days)
}
