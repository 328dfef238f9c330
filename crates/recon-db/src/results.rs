//! The Unified Result View: a UNION ALL of `match_results` and
//! `exception_cases`, filtered, sorted, and paginated, plus a summary
//! aggregate over the same filtered set.

use chrono::{DateTime, Utc};
use recon_authz::{Permission, Role};
use recon_schemas::{FieldDifference, MatchRun, Severity, Side, Txn, UnifiedRow, UnifiedStatus, UnifiedSummary};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{require_permission, RconError, RconResult};

const UNIFIED_CTE_HEAD: &str = r#"
WITH unified AS (
  SELECT
    'M:' || m.id::text AS row_id,
    CASE m.match_type
      WHEN 'MATCHED' THEN 'MATCHED'
      WHEN 'PARTIAL_MATCH' THEN 'PARTIAL'
      WHEN 'DUPLICATE_SUSPECT' THEN 'DUPLICATE'
      ELSE 'MISMATCH'
    END AS status,
    wl.rrn AS rrn,
    COALESCE(NULLIF(wl.arn, ''), NULLIF(wr.arn, '')) AS arn,
    COALESCE(wl.txn_time, wr.txn_time) AS txn_time,
    wl.amount AS amount_left,
    wr.amount AS amount_right,
    CASE WHEN wl.amount IS NOT NULL AND wr.amount IS NOT NULL
         THEN ROUND(wr.amount - wl.amount, 2) ELSE NULL END AS delta,
    COALESCE(wl.currency, wr.currency) AS currency,
    m.score AS match_score,
    m.reason_code AS rule_reason,
    COALESCE(wl.pan_masked, wr.pan_masked, '') AS pan_masked
  FROM match_results m
  LEFT JOIN txns wl ON wl.id = m.left_txn_id
  LEFT JOIN txns wr ON wr.id = m.right_txn_id
  WHERE m.run_id = "#;

const UNIFIED_CTE_TAIL: &str = r#"

  UNION ALL

  SELECT
    'E:' || e.id::text AS row_id,
    CASE e.category
      WHEN 'MISSING_IN_LEFT' THEN 'MISSING_IN_LEFT'
      WHEN 'MISSING_IN_RIGHT' THEN 'MISSING_IN_RIGHT'
      WHEN 'DUPLICATE' THEN 'DUPLICATE'
      ELSE 'MISMATCH'
    END AS status,
    t.rrn AS rrn,
    t.arn AS arn,
    t.txn_time AS txn_time,
    CASE WHEN t.side = 'LEFT' THEN t.amount ELSE NULL END AS amount_left,
    CASE WHEN t.side = 'RIGHT' THEN t.amount ELSE NULL END AS amount_right,
    NULL::numeric AS delta,
    t.currency AS currency,
    NULL::double precision AS match_score,
    e.category AS rule_reason,
    COALESCE(t.pan_masked, '') AS pan_masked
  FROM exception_cases e
  LEFT JOIN txns t ON t.id = e.primary_txn_id
  WHERE e.run_id = "#;

/// Pushes `WITH unified AS (...)`, binding `run_id` once for each of the
/// CTE's two branches.
fn push_unified_cte(qb: &mut QueryBuilder<'_, sqlx::Postgres>, run_id: Uuid) {
    qb.push(UNIFIED_CTE_HEAD);
    qb.push_bind(run_id);
    qb.push(UNIFIED_CTE_TAIL);
    qb.push_bind(run_id);
    qb.push("\n)");
}

#[derive(Debug, Clone, Default)]
pub struct ResultFilters {
    pub status: Option<String>,
    pub q: Option<String>,
    pub currency: Option<String>,
    pub amount_min: Option<Decimal>,
    pub amount_max: Option<Decimal>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(serde::Serialize)]
pub struct ResultPage {
    pub run: MatchRun,
    pub summary: UnifiedSummary,
    pub items: Vec<UnifiedRow>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

fn sort_column(sort_by: &str) -> &'static str {
    match sort_by {
        "delta" => "COALESCE(u.delta, 0)",
        "match_score" => "COALESCE(u.match_score, -1)",
        _ => "u.txn_time",
    }
}

/// Appends the `WHERE ...` clause shared by the count and item queries.
fn push_where(qb: &mut QueryBuilder<'_, sqlx::Postgres>, filters: &ResultFilters) {
    qb.push(" WHERE 1=1");
    if let Some(status) = &filters.status {
        qb.push(" AND u.status = ").push_bind(status.clone());
    }
    if let Some(q) = &filters.q {
        let like = format!("%{q}%");
        qb.push(" AND (u.rrn ILIKE ")
            .push_bind(like.clone())
            .push(" OR u.arn ILIKE ")
            .push_bind(like.clone())
            .push(" OR u.pan_masked ILIKE ")
            .push_bind(like)
            .push(")");
    }
    if let Some(currency) = &filters.currency {
        qb.push(" AND u.currency = ").push_bind(currency.clone());
    }
    if let Some(min) = filters.amount_min {
        qb.push(" AND COALESCE(u.amount_left, u.amount_right, 0) >= ").push_bind(min);
    }
    if let Some(max) = filters.amount_max {
        qb.push(" AND COALESCE(u.amount_left, u.amount_right, 0) <= ").push_bind(max);
    }
}

pub async fn get_run_results(
    pool: &PgPool,
    roles: &[Role],
    run_id: Uuid,
    filters: ResultFilters,
) -> RconResult<ResultPage> {
    require_permission(roles, Permission::MatchRead)?;
    let run = crate::runs::get_run(pool, roles, run_id).await?;
    get_run_results_for(pool, roles, run, filters).await
}

/// Same as [`get_run_results`] but takes an already-loaded [`MatchRun`] —
/// used by the `results/latest` route, which resolves the run first to find
/// its id and would otherwise re-fetch the same row.
pub async fn get_run_results_for(
    pool: &PgPool,
    roles: &[Role],
    run: MatchRun,
    mut filters: ResultFilters,
) -> RconResult<ResultPage> {
    require_permission(roles, Permission::MatchRead)?;

    if let (Some(min), Some(max)) = (filters.amount_min, filters.amount_max) {
        if min > max {
            return Err(RconError::Validation("amount_min must be <= amount_max".into()));
        }
    }

    filters.page = filters.page.max(1);
    filters.page_size = filters.page_size.clamp(1, 200);
    let offset = (filters.page - 1) * filters.page_size;

    let run_id = run.id;
    let summary = fetch_summary(pool, run_id).await?;
    let total = count_unified(pool, run_id, &filters).await?;
    let items = fetch_items(pool, run_id, &filters, offset).await?;
    let total_pages = ((total + filters.page_size - 1) / filters.page_size).max(1);

    Ok(ResultPage {
        run,
        summary,
        items,
        page: filters.page,
        page_size: filters.page_size,
        total,
        total_pages,
    })
}

async fn fetch_summary(pool: &PgPool, run_id: Uuid) -> RconResult<UnifiedSummary> {
    let mut qb = QueryBuilder::new("");
    push_unified_cte(&mut qb, run_id);
    qb.push(
        " SELECT
            SUM(CASE WHEN status='MATCHED' THEN 1 ELSE 0 END) AS matched,
            SUM(CASE WHEN status='MISSING_IN_LEFT' THEN 1 ELSE 0 END) AS unmatched_left,
            SUM(CASE WHEN status='MISSING_IN_RIGHT' THEN 1 ELSE 0 END) AS unmatched_right,
            SUM(CASE WHEN status='PARTIAL' THEN 1 ELSE 0 END) AS partial,
            SUM(CASE WHEN status='DUPLICATE' THEN 1 ELSE 0 END) AS duplicates,
            COALESCE(SUM(ABS(COALESCE(delta, 0))), 0) AS amount_delta
          FROM unified",
    );

    let row = qb.build().fetch_one(pool).await?;
    Ok(UnifiedSummary {
        matched: row.try_get::<Option<i64>, _>("matched")?.unwrap_or(0),
        unmatched_left: row.try_get::<Option<i64>, _>("unmatched_left")?.unwrap_or(0),
        unmatched_right: row.try_get::<Option<i64>, _>("unmatched_right")?.unwrap_or(0),
        partial: row.try_get::<Option<i64>, _>("partial")?.unwrap_or(0),
        duplicates: row.try_get::<Option<i64>, _>("duplicates")?.unwrap_or(0),
        amount_delta: row.try_get("amount_delta")?,
    })
}

async fn count_unified(pool: &PgPool, run_id: Uuid, filters: &ResultFilters) -> RconResult<i64> {
    let mut qb = QueryBuilder::new("");
    push_unified_cte(&mut qb, run_id);
    qb.push(" SELECT COUNT(*) AS c FROM unified u");
    push_where(&mut qb, filters);

    let row = qb.build().fetch_one(pool).await?;
    Ok(row.try_get("c")?)
}

async fn fetch_items(
    pool: &PgPool,
    run_id: Uuid,
    filters: &ResultFilters,
    offset: i64,
) -> RconResult<Vec<UnifiedRow>> {
    let order_col = sort_column(filters.sort_by.as_deref().unwrap_or("txn_time"));
    let order_dir = if filters.sort_dir.as_deref() == Some("asc") { "ASC" } else { "DESC" };

    let mut qb = QueryBuilder::new("");
    push_unified_cte(&mut qb, run_id);
    qb.push(
        " SELECT u.row_id, u.status, u.rrn, u.arn, u.txn_time, u.amount_left, u.amount_right,
                 u.delta, u.currency, u.match_score, u.rule_reason, u.pan_masked
          FROM unified u",
    );
    push_where(&mut qb, filters);
    qb.push(format!(" ORDER BY {order_col} {order_dir}, u.row_id DESC LIMIT "));
    qb.push_bind(filters.page_size);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows = qb.build().fetch_all(pool).await?;
    rows.into_iter().map(row_to_unified).collect()
}

fn row_to_unified(row: PgRow) -> RconResult<UnifiedRow> {
    let status_str: String = row.try_get("status")?;
    Ok(UnifiedRow {
        row_id: row.try_get("row_id")?,
        status: UnifiedStatus::parse(&status_str).unwrap_or(UnifiedStatus::Mismatch),
        rrn: row.try_get("rrn")?,
        arn: row.try_get("arn")?,
        txn_time: row.try_get::<Option<DateTime<Utc>>, _>("txn_time")?,
        amount_left: row.try_get("amount_left")?,
        amount_right: row.try_get("amount_right")?,
        delta: row.try_get("delta")?,
        currency: row.try_get("currency")?,
        match_score: row.try_get("match_score")?,
        reason_code: row.try_get("rule_reason")?,
        pan_masked: row.try_get("pan_masked")?,
    })
}

/// One business field compared between the two sides of a unified row, its
/// accessor, and the severity a disagreement on it carries.
struct ComparedField {
    name: &'static str,
    severity: Severity,
    left: Option<String>,
    right: Option<String>,
}

/// Field-by-field comparison between the two sides of a unified row, used by
/// the result-details endpoint: twelve business fields, HIGH severity on
/// {rrn, arn, amount, currency}, MEDIUM on {txnTime, statusNorm, opType,
/// merchantId, channelId}, LOW on the rest (feeAmount, feeCurrency,
/// panMasked). A side missing entirely (no counterpart persisted) compares
/// every field against `None` rather than being skipped.
pub fn build_differences(left: Option<&Txn>, right: Option<&Txn>) -> Vec<FieldDifference> {
    let fields: Vec<ComparedField> = vec![
        ComparedField {
            name: "rrn",
            severity: Severity::High,
            left: left.map(|t| t.rrn.clone()),
            right: right.map(|t| t.rrn.clone()),
        },
        ComparedField {
            name: "arn",
            severity: Severity::High,
            left: left.and_then(|t| t.arn.clone()),
            right: right.and_then(|t| t.arn.clone()),
        },
        ComparedField {
            name: "amount",
            severity: Severity::High,
            left: left.map(|t| t.amount.to_string()),
            right: right.map(|t| t.amount.to_string()),
        },
        ComparedField {
            name: "currency",
            severity: Severity::High,
            left: left.map(|t| t.currency.clone()),
            right: right.map(|t| t.currency.clone()),
        },
        ComparedField {
            name: "txnTime",
            severity: Severity::Medium,
            left: left.map(|t| t.txn_time.to_rfc3339()),
            right: right.map(|t| t.txn_time.to_rfc3339()),
        },
        ComparedField {
            name: "statusNorm",
            severity: Severity::Medium,
            left: left.map(|t| t.status_norm.clone()),
            right: right.map(|t| t.status_norm.clone()),
        },
        ComparedField {
            name: "opType",
            severity: Severity::Medium,
            left: left.map(|t| t.op_type.as_str().to_string()),
            right: right.map(|t| t.op_type.as_str().to_string()),
        },
        ComparedField {
            name: "merchantId",
            severity: Severity::Medium,
            left: left.map(|t| t.merchant_id.clone()),
            right: right.map(|t| t.merchant_id.clone()),
        },
        ComparedField {
            name: "channelId",
            severity: Severity::Medium,
            left: left.map(|t| t.channel_id.clone()),
            right: right.map(|t| t.channel_id.clone()),
        },
        ComparedField {
            name: "feeAmount",
            severity: Severity::Low,
            left: left.map(|t| t.fee_amount.to_string()),
            right: right.map(|t| t.fee_amount.to_string()),
        },
        ComparedField {
            name: "feeCurrency",
            severity: Severity::Low,
            left: left.map(|t| t.fee_currency.clone()),
            right: right.map(|t| t.fee_currency.clone()),
        },
        ComparedField {
            name: "panMasked",
            severity: Severity::Low,
            left: left.map(|t| t.pan_masked.clone()),
            right: right.map(|t| t.pan_masked.clone()),
        },
    ];

    fields
        .into_iter()
        .filter(|f| f.left != f.right)
        .map(|f| FieldDifference {
            field: f.name,
            left: f.left,
            right: f.right,
            severity: f.severity,
        })
        .collect()
}

/// Loads one transaction by id, with `pan_hash` cleared before it leaves the
/// store layer — callers past this point only ever see `pan_masked`.
async fn fetch_txn_for_detail(pool: &PgPool, id: Uuid) -> RconResult<Txn> {
    let row = sqlx::query(
        "SELECT id, side, system_tag, business_date, rrn, arn, pan_masked, pan_hash, amount,
                currency, txn_time, op_type, merchant_id, channel_id, status_norm, fee_amount, fee_currency
         FROM txns WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RconError::NotFound("transaction not found".into()))?;

    let mut txn = crate::ingest::row_to_txn(row)?;
    txn.pan_hash.clear();
    Ok(txn)
}

/// The detail resolver's output: both sides of the row (when present), the
/// field-by-field comparison, and either the match's `explain` payload or —
/// for exception rows — the triage diagnostics panel.
#[derive(serde::Serialize)]
pub struct RowDetail {
    pub row_id: String,
    pub left_txn: Option<Txn>,
    pub right_txn: Option<Txn>,
    pub differences: Vec<FieldDifference>,
    pub explain: Option<serde_json::Value>,
    pub diagnostics: Option<crate::exceptions::ExceptionDiagnostics>,
}

/// Resolves one unified row id (`"M:"+matchId` or `"E:"+caseId`) into its
/// full detail view. For exception rows, assembles a best-candidate pair
/// from the opposite side via the same diagnostics the exception workflow
/// uses for its triage panel.
pub async fn get_row_details(pool: &PgPool, roles: &[Role], row_id: &str) -> RconResult<RowDetail> {
    require_permission(roles, Permission::ExceptionsRead)?;

    if let Some(id_str) = row_id.strip_prefix("M:") {
        let match_id: Uuid = id_str
            .parse()
            .map_err(|_| RconError::Validation("invalid row_id".into()))?;
        let row = sqlx::query("SELECT left_txn_id, right_txn_id, explain_json FROM match_results WHERE id = $1")
            .bind(match_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| RconError::NotFound("match result not found".into()))?;

        let left_id: Uuid = row.try_get("left_txn_id")?;
        let right_id: Option<Uuid> = row.try_get("right_txn_id")?;
        let explain: serde_json::Value = row.try_get("explain_json")?;

        let left_txn = fetch_txn_for_detail(pool, left_id).await?;
        let right_txn = match right_id {
            Some(id) => Some(fetch_txn_for_detail(pool, id).await?),
            None => None,
        };

        let differences = build_differences(Some(&left_txn), right_txn.as_ref());
        Ok(RowDetail {
            row_id: row_id.to_string(),
            left_txn: Some(left_txn),
            right_txn,
            differences,
            explain: Some(explain),
            diagnostics: None,
        })
    } else if let Some(id_str) = row_id.strip_prefix("E:") {
        let case_id: Uuid = id_str
            .parse()
            .map_err(|_| RconError::Validation("invalid row_id".into()))?;
        let case = crate::exceptions::get_exception(pool, roles, case_id).await?;
        let primary = fetch_txn_for_detail(pool, case.primary_txn_id).await?;
        let diagnostics = crate::exceptions::build_exception_diagnostics(pool, roles, case_id).await?;

        let (left_txn, right_txn) = match primary.side {
            Side::Left => (Some(primary), None),
            Side::Right => (None, Some(primary)),
        };
        let differences = build_differences(left_txn.as_ref(), right_txn.as_ref());

        Ok(RowDetail {
            row_id: row_id.to_string(),
            left_txn,
            right_txn,
            differences,
            explain: None,
            diagnostics: Some(diagnostics),
        })
    } else {
        Err(RconError::Validation(
            "row_id must start with 'M:' or 'E:'".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use recon_schemas::OpType;
    use rust_decimal_macros::dec;

    fn txn(rrn: &str, amount: Decimal, currency: &str, side: Side) -> Txn {
        Txn {
            id: Uuid::new_v4(),
            side,
            system_tag: "WAY4".into(),
            business_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            rrn: rrn.to_string(),
            arn: None,
            pan_masked: "400000******1234".into(),
            pan_hash: String::new(),
            amount,
            currency: currency.to_string(),
            txn_time: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            op_type: OpType::Purchase,
            merchant_id: "M1".into(),
            channel_id: "POS".into(),
            status_norm: "SETTLED".into(),
            fee_amount: dec!(0),
            fee_currency: currency.to_string(),
        }
    }

    #[test]
    fn identical_sides_yield_no_differences() {
        let l = txn("R1", dec!(10.00), "USD", Side::Left);
        let r = txn("R1", dec!(10.00), "USD", Side::Right);
        assert!(build_differences(Some(&l), Some(&r)).is_empty());
    }

    #[test]
    fn amount_mismatch_is_flagged_high_severity() {
        let l = txn("R1", dec!(10.00), "USD", Side::Left);
        let r = txn("R1", dec!(12.00), "USD", Side::Right);
        let diffs = build_differences(Some(&l), Some(&r));
        assert_eq!(diffs.iter().filter(|d| d.field == "amount").count(), 1);
        assert_eq!(
            diffs.iter().find(|d| d.field == "amount").unwrap().severity,
            Severity::High
        );
    }

    #[test]
    fn missing_right_side_compares_every_field_against_none() {
        let l = txn("R1", dec!(10.00), "USD", Side::Left);
        let diffs = build_differences(Some(&l), None);
        assert_eq!(diffs.len(), 12);
        assert!(diffs.iter().all(|d| d.right.is_none()));
    }

    #[test]
    fn status_norm_mismatch_is_medium_severity() {
        let mut l = txn("R1", dec!(10.00), "USD", Side::Left);
        let mut r = txn("R1", dec!(10.00), "USD", Side::Right);
        l.status_norm = "SETTLED".into();
        r.status_norm = "PENDING".into();
        let diffs = build_differences(Some(&l), Some(&r));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].field, "statusNorm");
        assert_eq!(diffs[0].severity, Severity::Medium);
    }
}
