//! Match run orchestration: loads both sides for a business date, runs the
//! matching engine, and persists the outcome across two commits so a UI
//! polling `match_runs` sees the run go RUNNING before it sees it finish.

use chrono::{DateTime, NaiveDate, Utc};
use recon_authz::{Permission, Role};
use recon_schemas::{AuditResult, MatchRun, RunStatus, Side};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{require_permission, RconError, RconResult};
use crate::ingest::load_txns_for_side;
use crate::rulesets;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub business_date: NaiveDate,
    pub ruleset_version: String,
    pub matches_created: i64,
    pub exceptions_created: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub async fn run_matching(
    pool: &PgPool,
    actor: &str,
    source_ip: Option<&str>,
    roles: &[Role],
    business_date: NaiveDate,
    scope_filter: Option<String>,
) -> RconResult<RunOutcome> {
    require_permission(roles, Permission::MatchExecute)?;

    let ruleset_version = active_ruleset_version(pool).await?;
    let rules = rulesets::active_ruleset(pool).await?;

    let left = load_txns_for_side(pool, Side::Left, business_date).await?;
    let right = load_txns_for_side(pool, Side::Right, business_date).await?;

    if left.is_empty() && right.is_empty() {
        return Err(RconError::Validation(
            "no transactions for selected business_date".into(),
        ));
    }
    if left.is_empty() || right.is_empty() {
        return Err(RconError::Validation(
            "both sides are required: load LEFT and RIGHT for selected business_date".into(),
        ));
    }

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    // Phase 1: register the run as RUNNING and commit immediately, so a UI
    // polling this row sees live progress rather than a missing row.
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO match_runs (id, business_date, scope_filter, ruleset_version, started_at, status, created_by)
         VALUES ($1,$2,$3,$4,$5,'RUNNING',$6)",
    )
    .bind(run_id)
    .bind(business_date)
    .bind(&scope_filter)
    .bind(&ruleset_version)
    .bind(started_at)
    .bind(actor)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let outcome = recon_engine::match_transactions(&left, &right, &rules);

    // Phase 2: persist results and flip the run to FINISHED, or to FAILED
    // with a compensating audit event if persistence itself fails.
    let persist_result = persist_outcome(pool, run_id, business_date, &outcome).await;

    match persist_result {
        Ok(()) => {
            let finished_at = Utc::now();
            let mut tx = pool.begin().await?;
            sqlx::query("UPDATE match_runs SET finished_at = $1, status = 'FINISHED' WHERE id = $2")
                .bind(finished_at)
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
            crate::audit::insert_audit_event(
                &mut tx,
                actor,
                source_ip,
                "match_run",
                Some(&run_id.to_string()),
                "MATCH_RUN_EXECUTE",
                AuditResult::Success,
                serde_json::json!({
                    "matches": outcome.matches.len(),
                    "exceptions": outcome.exceptions.len(),
                }),
            )
            .await?;
            tx.commit().await?;

            Ok(RunOutcome {
                run_id,
                business_date,
                ruleset_version,
                matches_created: outcome.matches.len() as i64,
                exceptions_created: outcome.exceptions.len() as i64,
                started_at,
                finished_at,
            })
        }
        Err(e) => {
            let finished_at = Utc::now();
            let mut tx = pool.begin().await?;
            sqlx::query("UPDATE match_runs SET finished_at = $1, status = 'FAILED' WHERE id = $2")
                .bind(finished_at)
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
            crate::audit::insert_audit_event(
                &mut tx,
                actor,
                source_ip,
                "match_run",
                Some(&run_id.to_string()),
                "MATCH_RUN_EXECUTE",
                AuditResult::Failure,
                serde_json::json!({"error": e.to_string()}),
            )
            .await?;
            // RUNNING was already committed for UI polling, so FAILED must
            // also be committed explicitly before the error propagates.
            tx.commit().await?;
            Err(e)
        }
    }
}

async fn persist_outcome(
    pool: &PgPool,
    run_id: Uuid,
    business_date: NaiveDate,
    outcome: &recon_engine::MatchOutcome,
) -> RconResult<()> {
    let mut tx = pool.begin().await?;

    for m in &outcome.matches {
        sqlx::query(
            "INSERT INTO match_results (id, run_id, left_txn_id, right_txn_id, match_type, score, reason_code, explain_json)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(m.left_txn_id)
        .bind(m.right_txn_id)
        .bind(m.match_type.as_str())
        .bind(m.score)
        .bind(&m.reason_code)
        .bind(&m.explain)
        .execute(&mut *tx)
        .await?;
    }

    for e in &outcome.exceptions {
        sqlx::query(
            "INSERT INTO exception_cases
             (id, run_id, business_date, category, severity, status, primary_txn_id, owner_user_id, aging_days, resolution_code, created_at, closed_at)
             VALUES ($1,$2,$3,$4,$5,'NEW',$6,NULL,0,NULL,$7,NULL)",
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(business_date)
        .bind(e.category.as_str())
        .bind(e.severity.as_str())
        .bind(e.primary_txn_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn active_ruleset_version(pool: &PgPool) -> RconResult<String> {
    sqlx::query_scalar("SELECT version FROM rulesets WHERE is_active LIMIT 1")
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| RconError::Validation("No active ruleset".into()))
}

pub async fn get_run(pool: &PgPool, roles: &[Role], run_id: Uuid) -> RconResult<MatchRun> {
    require_permission(roles, Permission::MatchRead)?;
    let row = sqlx::query(
        "SELECT id, business_date, scope_filter, ruleset_version, started_at, finished_at, status, created_by
         FROM match_runs WHERE id = $1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RconError::NotFound("run not found".into()))?;

    row_to_run(row)
}

pub async fn list_runs(
    pool: &PgPool,
    roles: &[Role],
    business_date: Option<NaiveDate>,
    limit: i64,
) -> RconResult<Vec<MatchRun>> {
    require_permission(roles, Permission::MatchRead)?;
    let limit = limit.clamp(1, 500);

    let rows = sqlx::query(
        "SELECT id, business_date, scope_filter, ruleset_version, started_at, finished_at, status, created_by
         FROM match_runs
         WHERE ($1::date IS NULL OR business_date = $1)
         ORDER BY started_at DESC
         LIMIT $2",
    )
    .bind(business_date)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_run).collect()
}

pub async fn latest_run_status(
    pool: &PgPool,
    roles: &[Role],
    business_date: NaiveDate,
) -> RconResult<Option<MatchRun>> {
    require_permission(roles, Permission::MatchRead)?;
    let row = sqlx::query(
        "SELECT id, business_date, scope_filter, ruleset_version, started_at, finished_at, status, created_by
         FROM match_runs WHERE business_date = $1 ORDER BY started_at DESC LIMIT 1",
    )
    .bind(business_date)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_run).transpose()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run: MatchRun,
    pub matches_by_type: std::collections::BTreeMap<String, i64>,
    pub exceptions_by_category: std::collections::BTreeMap<String, i64>,
}

/// A run plus match/exception counts broken down by type, for the
/// `GET /api/v1/match/runs/{id}` summary route.
pub async fn run_summary(pool: &PgPool, roles: &[Role], run_id: Uuid) -> RconResult<RunSummary> {
    let run = get_run(pool, roles, run_id).await?;

    let match_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT match_type, COUNT(*) FROM match_results WHERE run_id = $1 GROUP BY match_type",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    let exception_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT category, COUNT(*) FROM exception_cases WHERE run_id = $1 GROUP BY category",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(RunSummary {
        run,
        matches_by_type: match_rows.into_iter().collect(),
        exceptions_by_category: exception_rows.into_iter().collect(),
    })
}

/// Test-only entrypoint that runs the same two-phase protocol as
/// [`run_matching`] but appends one match record referencing a transaction
/// id that does not exist in `txns`. The persistence transaction then hits
/// a real foreign-key violation partway through its inserts, exercising the
/// rollback-then-compensating-write path with a genuine DB failure rather
/// than a mocked one. Used by `recon-testkit`'s run-atomicity scenario.
#[cfg(feature = "testkit")]
pub async fn run_matching_with_injected_fault(
    pool: &PgPool,
    actor: &str,
    roles: &[Role],
    business_date: NaiveDate,
) -> RconResult<Uuid> {
    require_permission(roles, Permission::MatchExecute)?;

    let left = load_txns_for_side(pool, Side::Left, business_date).await?;
    let right = load_txns_for_side(pool, Side::Right, business_date).await?;
    if left.is_empty() || right.is_empty() {
        return Err(RconError::Validation("both sides are required".into()));
    }

    let rules = rulesets::active_ruleset(pool).await?;
    let ruleset_version = active_ruleset_version(pool).await?;
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO match_runs (id, business_date, scope_filter, ruleset_version, started_at, status, created_by)
         VALUES ($1,$2,NULL,$3,$4,'RUNNING',$5)",
    )
    .bind(run_id)
    .bind(business_date)
    .bind(&ruleset_version)
    .bind(started_at)
    .bind(actor)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut outcome = recon_engine::match_transactions(&left, &right, &rules);
    outcome.matches.push(recon_engine::MatchRecord {
        left_txn_id: Uuid::new_v4(),
        right_txn_id: None,
        match_type: recon_schemas::MatchType::Matched,
        score: 1.0,
        reason_code: "INJECTED_FAULT_FOR_TEST".to_string(),
        explain: serde_json::json!({"injected": true}),
    });

    let finished_at = Utc::now();
    let mut tx = pool.begin().await?;
    match persist_outcome(pool, run_id, business_date, &outcome).await {
        Ok(()) => {
            sqlx::query("UPDATE match_runs SET finished_at = $1, status = 'FINISHED' WHERE id = $2")
                .bind(finished_at)
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
        }
        Err(e) => {
            sqlx::query("UPDATE match_runs SET finished_at = $1, status = 'FAILED' WHERE id = $2")
                .bind(finished_at)
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
            crate::audit::insert_audit_event(
                &mut tx,
                actor,
                None,
                "match_run",
                Some(&run_id.to_string()),
                "MATCH_RUN_EXECUTE",
                AuditResult::Failure,
                serde_json::json!({"error": e.to_string()}),
            )
            .await?;
        }
    }
    tx.commit().await?;

    Ok(run_id)
}

fn row_to_run(row: sqlx::postgres::PgRow) -> RconResult<MatchRun> {
    let status_str: String = row.try_get("status")?;
    Ok(MatchRun {
        id: row.try_get("id")?,
        business_date: row.try_get("business_date")?,
        scope_filter: row.try_get("scope_filter")?,
        ruleset_version: row.try_get("ruleset_version")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: RunStatus::parse(&status_str).unwrap_or(RunStatus::Failed),
        created_by: row.try_get("created_by")?,
    })
}
