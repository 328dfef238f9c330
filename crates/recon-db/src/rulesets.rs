//! Ruleset registry. At most one version is active; `put_ruleset` replaces
//! it atomically inside a single transaction.

use chrono::Utc;
use recon_authz::{Permission, Role};
use recon_schemas::{Ruleset, RulesetPayload};
use sqlx::{PgPool, Row};

use crate::error::{require_permission, RconError, RconResult};

pub async fn get_rulesets(pool: &PgPool, roles: &[Role]) -> RconResult<Vec<Ruleset>> {
    require_permission(roles, Permission::MatchRead)?;
    let rows = sqlx::query(
        "SELECT version, is_active, amount_tolerance, date_window_days, score_threshold, created_at
         FROM rulesets ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_ruleset).collect()
}

fn row_to_ruleset(row: sqlx::postgres::PgRow) -> RconResult<Ruleset> {
    Ok(Ruleset {
        version: row.try_get("version")?,
        is_active: row.try_get("is_active")?,
        payload: RulesetPayload {
            amount_tolerance: row.try_get("amount_tolerance")?,
            date_window_days: row.try_get("date_window_days")?,
            score_threshold: row.try_get("score_threshold")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

/// Returns the currently active ruleset, or a validation error if none is
/// marked active.
pub async fn active_ruleset(pool: &PgPool) -> RconResult<RulesetPayload> {
    let row = sqlx::query(
        "SELECT amount_tolerance, date_window_days, score_threshold FROM rulesets WHERE is_active LIMIT 1",
    )
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RconError::Validation("No active ruleset".into()))?;

    Ok(RulesetPayload {
        amount_tolerance: row.try_get("amount_tolerance")?,
        date_window_days: row.try_get("date_window_days")?,
        score_threshold: row.try_get("score_threshold")?,
    })
}

/// Deactivates every ruleset and inserts the new version as active, in one
/// transaction, so a reader never observes zero or two active rulesets.
pub async fn put_ruleset(
    pool: &PgPool,
    roles: &[Role],
    version: Option<String>,
    payload: RulesetPayload,
) -> RconResult<Ruleset> {
    require_permission(roles, Permission::AdminRules)?;

    if payload.amount_tolerance.is_sign_negative() {
        return Err(RconError::Validation("amount_tolerance must be >= 0".into()));
    }
    if payload.date_window_days < 1 {
        return Err(RconError::Validation("date_window_days must be >= 1".into()));
    }
    if !(0.0..=1.0).contains(&payload.score_threshold) {
        return Err(RconError::Validation("score_threshold must be within [0, 1]".into()));
    }

    let created_at = Utc::now();
    // No explicit version supplied: auto-generate one from the wall clock,
    // matching the registry's "version string auto-generated from the wall
    // clock if absent" contract.
    let version = version
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("v{}", created_at.format("%Y%m%d%H%M%S")));

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE rulesets SET is_active = false WHERE is_active")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO rulesets (version, is_active, amount_tolerance, date_window_days, score_threshold, created_at)
         VALUES ($1, true, $2, $3, $4, $5)
         ON CONFLICT (version) DO UPDATE SET
           is_active = true,
           amount_tolerance = EXCLUDED.amount_tolerance,
           date_window_days = EXCLUDED.date_window_days,
           score_threshold = EXCLUDED.score_threshold,
           created_at = EXCLUDED.created_at",
    )
    .bind(&version)
    .bind(payload.amount_tolerance)
    .bind(payload.date_window_days)
    .bind(payload.score_threshold)
    .bind(created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Ruleset {
        version,
        is_active: true,
        payload,
        created_at,
    })
}
