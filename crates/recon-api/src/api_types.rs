//! Wire shapes for request bodies and query parameters. Response bodies are
//! the `recon-schemas` types directly — they already carry `Serialize`.

use chrono::{DateTime, NaiveDate, Utc};
use recon_schemas::{CaseStatus, ExceptionActionType, Side};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct IngestRecordBody {
    pub rrn: String,
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub pan: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub txn_time: DateTime<Utc>,
    #[serde(default)]
    pub op_type: Option<String>,
    pub merchant_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub status_norm: String,
    #[serde(default)]
    pub fee_amount: Option<Decimal>,
    #[serde(default)]
    pub fee_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestFileBody {
    pub side: Side,
    pub system_tag: String,
    pub business_date: NaiveDate,
    pub file_name: String,
    pub checksum: String,
    #[serde(default)]
    pub parser_profile: String,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records: Vec<IngestRecordBody>,
}

#[derive(Debug, Deserialize)]
pub struct StartRunBody {
    pub business_date: NaiveDate,
    #[serde(default)]
    pub scope_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PutRulesetBody {
    #[serde(default)]
    pub version: Option<String>,
    pub amount_tolerance: Decimal,
    pub date_window_days: i32,
    pub score_threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct ExceptionActionBody {
    pub action_type: ExceptionActionType,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub new_status: Option<CaseStatus>,
    #[serde(default)]
    pub resolution_code: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListRunsQuery {
    pub business_date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct BusinessDateQuery {
    pub business_date: NaiveDate,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResultsFilterQuery {
    pub status: Option<String>,
    pub q: Option<String>,
    pub currency: Option<String>,
    pub amount_min: Option<Decimal>,
    pub amount_max: Option<Decimal>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResultsLatestQuery {
    pub business_date: NaiveDate,
    #[serde(flatten)]
    pub filters: ResultsFilterQuery,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExceptionsQuery {
    pub business_date: Option<NaiveDate>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub run_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub object_type: Option<String>,
    pub action: Option<String>,
    pub result: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportQuery {
    pub business_date: NaiveDate,
    pub run_id: Option<Uuid>,
}
