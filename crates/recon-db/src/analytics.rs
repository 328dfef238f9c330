//! Read-only rollups over a business date: source balances, the summary
//! numbers shown on the analytics dashboard, and the semicolon-delimited
//! CSV export of open exceptions.

use chrono::NaiveDate;
use recon_authz::{Permission, Role};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::{require_permission, RconResult};

#[derive(Debug, Clone, Serialize)]
pub struct SourceBalance {
    pub business_date: NaiveDate,
    pub left_count: i64,
    pub left_amount: Decimal,
    pub left_file_count: i64,
    pub right_count: i64,
    pub right_amount: Decimal,
    pub right_file_count: i64,
    pub ready_for_matching: bool,
    pub skew_warning: Option<String>,
}

/// Volume skew outside this ratio window (either side vs. the other) is
/// flagged, matching "warns on a volume skew ratio outside [0.3, 3.0]".
const SKEW_RATIO_MIN: f64 = 0.3;
const SKEW_RATIO_MAX: f64 = 3.0;

pub async fn source_balance(pool: &PgPool, roles: &[Role], business_date: NaiveDate) -> RconResult<SourceBalance> {
    require_permission(roles, Permission::AnalyticsRead)?;

    let row = sqlx::query(
        "SELECT
           COUNT(*) FILTER (WHERE side = 'LEFT') AS left_count,
           COALESCE(SUM(amount) FILTER (WHERE side = 'LEFT'), 0) AS left_amount,
           COUNT(*) FILTER (WHERE side = 'RIGHT') AS right_count,
           COALESCE(SUM(amount) FILTER (WHERE side = 'RIGHT'), 0) AS right_amount
         FROM txns WHERE business_date = $1",
    )
    .bind(business_date)
    .fetch_one(pool)
    .await?;

    let file_row = sqlx::query(
        "SELECT
           COUNT(*) FILTER (WHERE side = 'LEFT') AS left_file_count,
           COUNT(*) FILTER (WHERE side = 'RIGHT') AS right_file_count
         FROM ingest_files WHERE business_date = $1",
    )
    .bind(business_date)
    .fetch_one(pool)
    .await?;

    let left_count: i64 = row.try_get("left_count")?;
    let right_count: i64 = row.try_get("right_count")?;
    let ready_for_matching = left_count > 0 && right_count > 0;

    let skew_warning = if left_count > 0 && right_count > 0 {
        let ratio = left_count as f64 / right_count as f64;
        if !(SKEW_RATIO_MIN..=SKEW_RATIO_MAX).contains(&ratio) {
            Some(format!(
                "left/right volume ratio {ratio:.2} is outside the expected [{SKEW_RATIO_MIN}, {SKEW_RATIO_MAX}] window"
            ))
        } else {
            None
        }
    } else {
        None
    };

    Ok(SourceBalance {
        business_date,
        left_count,
        left_amount: row.try_get("left_amount")?,
        left_file_count: file_row.try_get("left_file_count")?,
        right_count,
        right_amount: row.try_get("right_amount")?,
        right_file_count: file_row.try_get("right_file_count")?,
        ready_for_matching,
        skew_warning,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BusinessDateAnalytics {
    pub business_date: NaiveDate,
    pub total_left: i64,
    pub total_right: i64,
    pub run_id: Option<uuid::Uuid>,
    pub match_rate_pct: Option<f64>,
    pub matched_count: Option<i64>,
    pub unmatched_count: Option<i64>,
    pub partial_count: Option<i64>,
    pub avg_open_aging_days: Option<f64>,
    pub variance_amount: Option<Decimal>,
    pub message: Option<String>,
}

/// Backs the `/api/v1/analytics/hardcoded` endpoint: a fixed set of
/// dashboard numbers for one business date, computed from the most recent
/// match run on that date. Returns partial data with a `message` when no
/// run has been executed yet, rather than an error, since "no run today"
/// is an expected state for a day still in progress.
pub async fn business_date_analytics(
    pool: &PgPool,
    roles: &[Role],
    business_date: NaiveDate,
) -> RconResult<BusinessDateAnalytics> {
    require_permission(roles, Permission::AnalyticsRead)?;

    let total_left: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM txns WHERE side = 'LEFT' AND business_date = $1",
    )
    .bind(business_date)
    .fetch_one(pool)
    .await?;
    let total_right: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM txns WHERE side = 'RIGHT' AND business_date = $1",
    )
    .bind(business_date)
    .fetch_one(pool)
    .await?;

    let run_id: Option<uuid::Uuid> = sqlx::query_scalar(
        "SELECT id FROM match_runs WHERE business_date = $1 ORDER BY started_at DESC LIMIT 1",
    )
    .bind(business_date)
    .fetch_optional(pool)
    .await?;

    let Some(run_id) = run_id else {
        return Ok(BusinessDateAnalytics {
            business_date,
            total_left,
            total_right,
            run_id: None,
            match_rate_pct: None,
            matched_count: None,
            unmatched_count: None,
            partial_count: None,
            avg_open_aging_days: None,
            variance_amount: None,
            message: Some("No match run for date".to_string()),
        });
    };

    let matched_unique: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT left_txn_id) FROM match_results WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(pool)
            .await?;
    let partial_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM match_results WHERE run_id = $1 AND match_type = 'PARTIAL_MATCH'",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;
    let open_exceptions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exception_cases WHERE run_id = $1 AND status != 'CLOSED'")
            .bind(run_id)
            .fetch_one(pool)
            .await?;
    let avg_aging: f64 = sqlx::query_scalar(
        "SELECT COALESCE(AVG(aging_days), 0) FROM exception_cases WHERE run_id = $1 AND status != 'CLOSED'",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;
    let variance: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(ABS(wl.amount - wr.amount)), 0)
         FROM match_results m
         JOIN txns wl ON wl.id = m.left_txn_id
         JOIN txns wr ON wr.id = m.right_txn_id
         WHERE m.run_id = $1",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;

    let match_rate = if total_left > 0 {
        matched_unique as f64 / total_left as f64 * 100.0
    } else {
        0.0
    };

    Ok(BusinessDateAnalytics {
        business_date,
        total_left,
        total_right,
        run_id: Some(run_id),
        match_rate_pct: Some((match_rate * 100.0).round() / 100.0),
        matched_count: Some(matched_unique),
        unmatched_count: Some(open_exceptions),
        partial_count: Some(partial_count),
        avg_open_aging_days: Some((avg_aging * 100.0).round() / 100.0),
        variance_amount: Some(variance),
        message: None,
    })
}

/// Semicolon-delimited, UTF-8-BOM-prefixed CSV of open exceptions for a
/// business date, optionally scoped to one run. Candidate columns are
/// reserved for parity with the diagnostics endpoint's shape but left
/// empty here — ranking counterpart candidates per row is a diagnostics-
/// endpoint feature, not something this bulk export recomputes per row.
pub async fn export_unmatched_csv(
    pool: &PgPool,
    roles: &[Role],
    business_date: NaiveDate,
    run_id: Option<uuid::Uuid>,
) -> RconResult<String> {
    require_permission(roles, Permission::ExceptionsRead)?;

    let rows = sqlx::query(
        "SELECT e.id AS case_id, e.run_id, e.business_date, e.category, e.severity, e.status,
                e.owner_user_id, e.created_at,
                t.side, t.system_tag, t.rrn, t.arn, t.pan_masked, t.amount, t.currency, t.txn_time,
                t.op_type, t.merchant_id, t.channel_id, t.status_norm
         FROM exception_cases e
         LEFT JOIN txns t ON t.id = e.primary_txn_id
         WHERE e.business_date = $1 AND e.status != 'CLOSED'
           AND ($2::uuid IS NULL OR e.run_id = $2)
         ORDER BY e.created_at DESC",
    )
    .bind(business_date)
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    let mut out = String::from('\u{feff}');
    out.push_str(
        "case_id;run_id;business_date;category;severity;status;owner_user_id;created_at;system_tag;rrn;arn;pan_masked;amount;currency;txn_time;op_type;merchant_id;channel_id;status_norm;reason_1;reason_2;reason_3;candidate_source;candidate_1;candidate_2;candidate_3\n",
    );

    for row in rows {
        let category: String = row.try_get("category")?;
        let reasons = reason_hints(&category);

        let case_id: uuid::Uuid = row.try_get("case_id")?;
        let run_id: uuid::Uuid = row.try_get("run_id")?;
        let business_date: NaiveDate = row.try_get("business_date")?;
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;
        let owner_user_id: Option<String> = row.try_get("owner_user_id")?;
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        let system_tag: Option<String> = row.try_get("system_tag")?;
        let rrn: Option<String> = row.try_get("rrn")?;
        let arn: Option<String> = row.try_get("arn")?;
        let pan_masked: Option<String> = row.try_get("pan_masked")?;
        let amount: Option<Decimal> = row.try_get("amount")?;
        let currency: Option<String> = row.try_get("currency")?;
        let txn_time: Option<chrono::DateTime<chrono::Utc>> = row.try_get("txn_time")?;
        let op_type: Option<String> = row.try_get("op_type")?;
        let merchant_id: Option<String> = row.try_get("merchant_id")?;
        let channel_id: Option<String> = row.try_get("channel_id")?;
        let status_norm: Option<String> = row.try_get("status_norm")?;

        let fields = [
            case_id.to_string(),
            run_id.to_string(),
            business_date.to_string(),
            category,
            severity,
            status,
            owner_user_id.unwrap_or_default(),
            created_at.to_rfc3339(),
            system_tag.unwrap_or_default(),
            rrn.unwrap_or_default(),
            arn.unwrap_or_default(),
            pan_masked.unwrap_or_default(),
            amount.map(|a| a.to_string()).unwrap_or_default(),
            currency.unwrap_or_default(),
            txn_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            op_type.unwrap_or_default(),
            merchant_id.unwrap_or_default(),
            channel_id.unwrap_or_default(),
            status_norm.unwrap_or_default(),
            reasons[0].to_string(),
            reasons[1].to_string(),
            reasons[2].to_string(),
            "N/A".to_string(),
            String::new(),
            String::new(),
            String::new(),
        ];

        out.push_str(&fields.iter().map(|f| csv_escape(f)).collect::<Vec<_>>().join(";"));
        out.push('\n');
    }

    Ok(out)
}

fn csv_escape(field: &str) -> String {
    if field.contains(';') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn reason_hints(category: &str) -> [&'static str; 3] {
    match category {
        "MISSING_IN_RIGHT" => [
            "Record present on the left side but not found on the right side for this business date",
            "Check the business_date and cut-off boundary",
            "Check RRN/ARN and completeness of the right-side feed",
        ],
        "MISSING_IN_LEFT" => [
            "Record present on the right side but not found on the left side for this business date",
            "Check the business_date and cut-off boundary",
            "Check RRN/ARN and completeness of the left-side feed",
        ],
        "DUPLICATE" => [
            "Multiple matching candidates were found (duplicates)",
            "Check RRN/ARN uniqueness in the source feeds",
            "Requires manual review",
        ],
        "AMOUNT_MISMATCH" => [
            "RRN/ARN matched but the amount differs",
            "Check fee/FX handling and the amount tolerance",
            "Check one-to-many/partial scenarios",
        ],
        "DATE_MISMATCH" => [
            "Transaction date falls outside the allowed window",
            "Check timezone handling and the cut-off boundary",
            "Check for late posting/late clearing",
        ],
        _ => [
            "Record was not matched automatically",
            "Check rrn/arn/amount/currency/date/op_type",
            "Requires manual review in the exception case",
        ],
    }
}
