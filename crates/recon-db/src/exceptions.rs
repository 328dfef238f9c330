//! Exception case review: listing, diagnostics, and the action log
//! (assign/comment/status change/close) an operator appends to each case.

use chrono::{DateTime, NaiveDate, Utc};
use recon_authz::{Permission, Role};
use recon_schemas::{
    CaseStatus, ExceptionAction, ExceptionActionType, ExceptionCase, ExceptionCategory, Severity, Side,
};
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{require_permission, RconError, RconResult};
use crate::rulesets;

#[derive(Debug, Clone, Default)]
pub struct ExceptionFilters {
    pub business_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub run_id: Option<Uuid>,
    pub limit: i64,
}

pub async fn list_exceptions(
    pool: &PgPool,
    roles: &[Role],
    filters: ExceptionFilters,
) -> RconResult<Vec<ExceptionCase>> {
    require_permission(roles, Permission::ExceptionsRead)?;
    let limit = filters.limit.clamp(1, 500);

    let rows = sqlx::query(
        "SELECT id, run_id, business_date, category, severity, status, primary_txn_id,
                owner_user_id, aging_days, resolution_code, created_at, closed_at
         FROM exception_cases
         WHERE ($1::date IS NULL OR business_date = $1)
           AND ($2::text IS NULL OR status = $2)
           AND ($3::text IS NULL OR category = $3)
           AND ($4::uuid IS NULL OR run_id = $4)
         ORDER BY created_at DESC
         LIMIT $5",
    )
    .bind(filters.business_date)
    .bind(&filters.status)
    .bind(&filters.category)
    .bind(filters.run_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_case).collect()
}

pub async fn get_exception(pool: &PgPool, roles: &[Role], case_id: Uuid) -> RconResult<ExceptionCase> {
    require_permission(roles, Permission::ExceptionsRead)?;
    let row = sqlx::query(
        "SELECT id, run_id, business_date, category, severity, status, primary_txn_id,
                owner_user_id, aging_days, resolution_code, created_at, closed_at
         FROM exception_cases WHERE id = $1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RconError::NotFound("exception case not found".into()))?;

    row_to_case(row)
}

fn row_to_case(row: PgRow) -> RconResult<ExceptionCase> {
    let category_str: String = row.try_get("category")?;
    let status_str: String = row.try_get("status")?;
    let severity_str: String = row.try_get("severity")?;
    Ok(ExceptionCase {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        business_date: row.try_get("business_date")?,
        category: ExceptionCategory::parse(&category_str).unwrap_or(ExceptionCategory::StatusMismatch),
        severity: match severity_str.as_str() {
            "HIGH" => Severity::High,
            "LOW" => Severity::Low,
            _ => Severity::Medium,
        },
        status: CaseStatus::parse(&status_str).unwrap_or(CaseStatus::New),
        primary_txn_id: row.try_get("primary_txn_id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        aging_days: row.try_get("aging_days")?,
        resolution_code: row.try_get("resolution_code")?,
        created_at: row.try_get("created_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

/// Append-only action history for one case, oldest first.
pub async fn list_actions(pool: &PgPool, roles: &[Role], case_id: Uuid) -> RconResult<Vec<ExceptionAction>> {
    require_permission(roles, Permission::ExceptionsRead)?;
    let rows = sqlx::query(
        "SELECT id, case_id, actor_user_id, action_at, action_type, action_payload
         FROM exception_actions WHERE case_id = $1 ORDER BY action_at ASC",
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let action_type_str: String = row.try_get("action_type")?;
            Ok(ExceptionAction {
                id: row.try_get("id")?,
                case_id: row.try_get("case_id")?,
                actor: row.try_get("actor_user_id")?,
                action_at: row.try_get("action_at")?,
                action_type: ExceptionActionType::parse(&action_type_str)
                    .unwrap_or(ExceptionActionType::Comment),
                payload: row.try_get("action_payload")?,
            })
        })
        .collect()
}

/// One ranked counterpart candidate surfaced for manual triage, with the
/// same heuristic score the matching engine uses for its own fuzzy pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiagnosticCandidate {
    pub txn_id: Uuid,
    pub rrn: String,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub txn_time: DateTime<Utc>,
    pub op_type: String,
    pub merchant_id: String,
    pub score_hint: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExceptionDiagnostics {
    pub top_reasons: Vec<String>,
    pub ruleset_version: String,
    pub candidate_source_side: String,
    pub top_candidates: Vec<DiagnosticCandidate>,
}

/// Builds the triage panel for one exception's primary transaction: a short
/// list of reasons a human reviewer can read top-to-bottom, plus the three
/// best-scoring opposite-side rows for the same business date (not
/// filtered to anything already excluded by the matching passes — a
/// reviewer may want to see a row the engine itself ruled out).
pub async fn build_exception_diagnostics(
    pool: &PgPool,
    roles: &[Role],
    case_id: Uuid,
) -> RconResult<ExceptionDiagnostics> {
    require_permission(roles, Permission::ExceptionsRead)?;

    let case = get_exception(pool, roles, case_id).await?;
    let txn_row = sqlx::query(
        "SELECT rrn, currency, amount, op_type, txn_time, side FROM txns WHERE id = $1",
    )
    .bind(case.primary_txn_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RconError::NotFound("primary transaction not found".into()))?;

    let rrn: String = txn_row.try_get("rrn")?;
    let currency: String = txn_row.try_get("currency")?;
    let amount: rust_decimal::Decimal = txn_row.try_get("amount")?;
    let op_type: String = txn_row.try_get("op_type")?;
    let txn_time: DateTime<Utc> = txn_row.try_get("txn_time")?;
    let side_str: String = txn_row.try_get("side")?;
    let side = Side::parse(&side_str).unwrap_or(Side::Left);
    let opposite = side.opposite();

    let rules = rulesets::active_ruleset(pool).await?;
    let ruleset_version: Option<String> = sqlx::query_scalar("SELECT version FROM rulesets WHERE is_active LIMIT 1")
        .fetch_optional(pool)
        .await?;

    let opposite_rows = sqlx::query(
        "SELECT id, rrn, currency, amount, txn_time, op_type, merchant_id
         FROM txns WHERE side = $1 AND business_date = $2",
    )
    .bind(opposite.as_str())
    .bind(case.business_date)
    .fetch_all(pool)
    .await?;

    let amount_f = amount.to_f64().unwrap_or(0.0);

    let rrn_rows: Vec<&PgRow> = opposite_rows
        .iter()
        .filter(|r| r.get::<String, _>("rrn") == rrn)
        .collect();
    let rrn_cur_rows: Vec<&PgRow> = rrn_rows
        .iter()
        .filter(|r| r.get::<String, _>("currency") == currency)
        .copied()
        .collect();

    let mut reasons: Vec<String> = Vec::new();
    if rrn_rows.is_empty() {
        reasons.push(format!("No record with the same RRN was found on the {} side", opposite.as_str()));
    } else {
        if rrn_rows.len() > 1 {
            reasons.push(format!(
                "Multiple records with the same RRN were found on the {} side ({} rows)",
                opposite.as_str(),
                rrn_rows.len()
            ));
        }
        if rrn_cur_rows.is_empty() {
            reasons.push(format!("RRN matched but currency differs (expected {currency})"));
        } else {
            let in_tolerance = rrn_cur_rows.iter().any(|r| {
                let other: rust_decimal::Decimal = r.get("amount");
                (other.to_f64().unwrap_or(0.0) - amount_f).abs() <= rules.amount_tolerance.to_f64().unwrap_or(0.0)
            });
            if !in_tolerance {
                let min_delta = rrn_cur_rows
                    .iter()
                    .map(|r| {
                        let other: rust_decimal::Decimal = r.get("amount");
                        (other.to_f64().unwrap_or(0.0) - amount_f).abs()
                    })
                    .fold(f64::INFINITY, f64::min);
                reasons.push(format!(
                    "RRN and currency match but the amount is outside tolerance ±{} (min delta {:.2})",
                    rules.amount_tolerance, min_delta
                ));
            }

            let date_window_rows = rrn_cur_rows.iter().filter(|r| {
                let other_time: DateTime<Utc> = r.get("txn_time");
                let diff_days = (txn_time - other_time).num_milliseconds().abs() as f64 / 86_400_000.0;
                diff_days <= rules.date_window_days as f64
            });
            if date_window_rows.count() == 0 && !rrn_cur_rows.is_empty() {
                reasons.push(format!("Transaction date falls outside the ±{} day window", rules.date_window_days));
            }
        }
    }
    if !rrn_cur_rows.is_empty() && reasons.is_empty() {
        reasons.push("Review op_type/fee rules and one-to-many sum combinations".to_string());
    }

    let score = |r: &PgRow| -> i64 {
        let mut s: i64 = 0;
        if r.get::<String, _>("rrn") == rrn {
            s += 50;
        }
        if r.get::<String, _>("currency") == currency {
            s += 20;
        }
        let other_amount: rust_decimal::Decimal = r.get("amount");
        let delta = (other_amount.to_f64().unwrap_or(0.0) - amount_f).abs();
        s += (20 - delta as i64).max(0);
        if r.get::<String, _>("op_type") == op_type {
            s += 10;
        }
        s
    };

    let mut scored: Vec<(i64, &PgRow)> = opposite_rows.iter().map(|r| (score(r), r)).collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let top_candidates = scored
        .into_iter()
        .take(3)
        .map(|(score_hint, r)| DiagnosticCandidate {
            txn_id: r.get("id"),
            rrn: r.get("rrn"),
            amount: r.get("amount"),
            currency: r.get("currency"),
            txn_time: r.get("txn_time"),
            op_type: r.get("op_type"),
            merchant_id: r.get("merchant_id"),
            score_hint,
        })
        .collect();

    reasons.truncate(3);

    Ok(ExceptionDiagnostics {
        top_reasons: reasons,
        ruleset_version: ruleset_version.unwrap_or_else(|| recon_config::DEFAULT_RULESET_VERSION.to_string()),
        candidate_source_side: opposite.as_str().to_string(),
        top_candidates,
    })
}

pub struct ExceptionActionRequest {
    pub action_type: ExceptionActionType,
    pub comment: Option<String>,
    pub assignee: Option<String>,
    pub new_status: Option<CaseStatus>,
    pub resolution_code: Option<String>,
}

/// Appends one action to a case's history and applies its side effect
/// (assignment, status transition, or closing the case) in the same
/// transaction as the audit entry.
pub async fn exception_action(
    pool: &PgPool,
    actor: &str,
    source_ip: Option<&str>,
    roles: &[Role],
    case_id: Uuid,
    req: ExceptionActionRequest,
) -> RconResult<ExceptionAction> {
    require_permission(roles, Permission::ExceptionsWrite)?;

    let mut tx = pool.begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM exception_cases WHERE id = $1")
        .bind(case_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(RconError::NotFound("exception case not found".into()));
    }

    let payload = serde_json::json!({
        "comment": req.comment,
        "assignee": req.assignee,
        "new_status": req.new_status.map(|s| s.as_str()),
        "resolution_code": req.resolution_code,
    });

    match req.action_type {
        ExceptionActionType::Assign => {
            let assignee = req
                .assignee
                .as_deref()
                .ok_or_else(|| RconError::Validation("assignee is required".into()))?;
            let active = crate::users::is_active_user(pool, assignee).await?;
            if !active {
                return Err(RconError::Validation(format!(
                    "owner '{assignee}' does not exist or is not ACTIVE"
                )));
            }
            sqlx::query("UPDATE exception_cases SET owner_user_id = $1, status = 'TRIAGED' WHERE id = $2")
                .bind(assignee)
                .bind(case_id)
                .execute(&mut *tx)
                .await?;
        }
        ExceptionActionType::StatusChange => {
            let new_status = req
                .new_status
                .ok_or_else(|| RconError::Validation("new_status is required".into()))?;
            sqlx::query("UPDATE exception_cases SET status = $1 WHERE id = $2")
                .bind(new_status.as_str())
                .bind(case_id)
                .execute(&mut *tx)
                .await?;
        }
        ExceptionActionType::Close => {
            let resolution_code = req
                .resolution_code
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| RconError::Validation("resolution_code is required".into()))?;
            sqlx::query(
                "UPDATE exception_cases SET status = 'CLOSED', closed_at = $1, resolution_code = $2 WHERE id = $3",
            )
            .bind(Utc::now())
            .bind(resolution_code)
            .bind(case_id)
            .execute(&mut *tx)
            .await?;
        }
        ExceptionActionType::Comment => {
            let comment = req
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| RconError::Validation("comment is required".into()))?;
            if comment.chars().count() > 1000 {
                return Err(RconError::Validation("comment must be <= 1000 chars".into()));
            }
        }
    }

    let action_id = Uuid::new_v4();
    let action_at = Utc::now();
    sqlx::query(
        "INSERT INTO exception_actions (id, case_id, actor_user_id, action_at, action_type, action_payload)
         VALUES ($1,$2,$3,$4,$5,$6)",
    )
    .bind(action_id)
    .bind(case_id)
    .bind(actor)
    .bind(action_at)
    .bind(req.action_type.as_str())
    .bind(&payload)
    .execute(&mut *tx)
    .await?;

    let audit_action = format!("EXCEPTION_{}", req.action_type.as_str().to_uppercase());
    crate::audit::insert_audit_event(
        &mut tx,
        actor,
        source_ip,
        "exception_case",
        Some(&case_id.to_string()),
        &audit_action,
        recon_schemas::AuditResult::Success,
        serde_json::json!({"action_type": req.action_type.as_str()}),
    )
    .await?;

    tx.commit().await?;

    Ok(ExceptionAction {
        id: action_id,
        case_id,
        actor: actor.to_string(),
        action_at,
        action_type: req.action_type,
        payload,
    })
}
