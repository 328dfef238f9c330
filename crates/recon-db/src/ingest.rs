//! Registering ingest files and the transaction rows they carry.

use chrono::{NaiveDate, Utc};
use recon_authz::{Permission, Role};
use recon_schemas::{AuditResult, OpType, Side, Txn};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{require_permission, RconError, RconResult};
use crate::pan;

/// One raw transaction record as received from a source feed, before
/// PAN sanitization/hashing and op_type normalization are applied.
#[derive(Debug, Clone)]
pub struct RawTxnRecord {
    pub rrn: String,
    pub arn: Option<String>,
    pub pan: Option<String>,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub txn_time: chrono::DateTime<Utc>,
    pub op_type: Option<String>,
    pub merchant_id: String,
    pub channel_id: String,
    pub status_norm: String,
    pub fee_amount: Option<rust_decimal::Decimal>,
    pub fee_currency: Option<String>,
}

pub struct IngestRequest {
    pub side: Side,
    pub system_tag: String,
    pub business_date: NaiveDate,
    pub file_name: String,
    pub checksum: String,
    pub parser_profile: String,
    pub received_at: Option<chrono::DateTime<Utc>>,
    pub records: Vec<RawTxnRecord>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestOutcome {
    pub file_id: Uuid,
    pub status: String,
    pub record_count: i64,
    pub duplicate: bool,
}

/// Registers a source file and its transaction rows. Idempotent: a second
/// call with the same `(system_tag, business_date, checksum)` returns the
/// original outcome, recording a `DUPLICATE` audit event instead of a
/// second `SUCCESS` one, rather than re-inserting anything.
pub async fn ingest_file(
    pool: &PgPool,
    actor: &str,
    source_ip: Option<&str>,
    pan_hash_secret: &str,
    roles: &[Role],
    req: IngestRequest,
) -> RconResult<IngestOutcome> {
    require_permission(roles, Permission::IngestWrite)?;

    if req.file_name.trim().is_empty() || req.checksum.trim().is_empty() {
        return Err(RconError::Validation(
            "file_name and checksum_sha256 are required".into(),
        ));
    }
    validate_records(&req.records)?;

    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT id, status, record_count FROM ingest_files
         WHERE system_tag = $1 AND business_date = $2 AND checksum = $3",
    )
    .bind(&req.system_tag)
    .bind(req.business_date)
    .bind(&req.checksum)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        let file_id: Uuid = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let record_count: i64 = row.try_get("record_count")?;

        crate::audit::insert_audit_event(
            &mut tx,
            actor,
            source_ip,
            "ingest_file",
            Some(&file_id.to_string()),
            "INGEST_REGISTER",
            AuditResult::Duplicate,
            serde_json::json!({"note": "idempotent duplicate request"}),
        )
        .await?;

        tx.commit().await?;
        return Ok(IngestOutcome {
            file_id,
            status,
            record_count,
            duplicate: true,
        });
    }

    let file_id = Uuid::new_v4();
    let received_at = req.received_at.unwrap_or_else(Utc::now);
    let record_count = req.records.len() as i64;

    sqlx::query(
        "INSERT INTO ingest_files
         (id, side, system_tag, business_date, file_name, checksum, parser_profile, received_at, status, record_count, created_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PARSED', $9, $10)",
    )
    .bind(file_id)
    .bind(req.side.as_str())
    .bind(&req.system_tag)
    .bind(req.business_date)
    .bind(&req.file_name)
    .bind(&req.checksum)
    .bind(&req.parser_profile)
    .bind(received_at)
    .bind(record_count)
    .bind(actor)
    .execute(&mut *tx)
    .await?;

    for rec in &req.records {
        insert_txn(&mut tx, req.side, &req.system_tag, req.business_date, pan_hash_secret, rec).await?;
    }

    crate::audit::insert_audit_event(
        &mut tx,
        actor,
        source_ip,
        "ingest_file",
        Some(&file_id.to_string()),
        "INGEST_REGISTER",
        AuditResult::Success,
        serde_json::json!({"records": record_count}),
    )
    .await?;

    tx.commit().await?;

    Ok(IngestOutcome {
        file_id,
        status: "PARSED".to_string(),
        record_count,
        duplicate: false,
    })
}

/// Every record must carry `rrn`, `amount`, `currency`, `txn_time`,
/// `merchant_id`, and `channel_id`; missing any aborts the whole file (no
/// partial ingest), reported with the offending record's 1-based index.
fn validate_records(records: &[RawTxnRecord]) -> RconResult<()> {
    for (i, rec) in records.iter().enumerate() {
        if rec.rrn.trim().is_empty() {
            return Err(RconError::Validation(format!("record {}: rrn is required", i + 1)));
        }
        if rec.currency.trim().is_empty() {
            return Err(RconError::Validation(format!("record {}: currency is required", i + 1)));
        }
        if rec.merchant_id.trim().is_empty() {
            return Err(RconError::Validation(format!("record {}: merchant_id is required", i + 1)));
        }
        if rec.channel_id.trim().is_empty() {
            return Err(RconError::Validation(format!("record {}: channel_id is required", i + 1)));
        }
    }
    Ok(())
}

async fn insert_txn(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    side: Side,
    system_tag: &str,
    business_date: NaiveDate,
    pan_hash_secret: &str,
    rec: &RawTxnRecord,
) -> RconResult<Uuid> {
    let id = Uuid::new_v4();
    let pan_masked = pan::sanitize_pan_masked(rec.pan.as_deref());
    let pan_hash = pan::hash_pan(&pan_masked, pan_hash_secret);
    let rrn = pan::normalize_reference(&rec.rrn);
    let arn = rec.arn.as_deref().map(pan::normalize_reference).filter(|s| !s.is_empty());
    let currency = pan::normalize_currency(&rec.currency);
    let op_type = pan::parse_op_type(rec.op_type.as_deref());
    let fee_amount = rec.fee_amount.unwrap_or_default();
    let fee_currency = rec
        .fee_currency
        .as_deref()
        .map(pan::normalize_currency)
        .unwrap_or_else(|| currency.clone());

    sqlx::query(
        "INSERT INTO txns
         (id, side, system_tag, business_date, rrn, arn, pan_masked, pan_hash, amount, currency,
          txn_time, op_type, merchant_id, channel_id, status_norm, fee_amount, fee_currency)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
    )
    .bind(id)
    .bind(side.as_str())
    .bind(system_tag)
    .bind(business_date)
    .bind(&rrn)
    .bind(&arn)
    .bind(&pan_masked)
    .bind(&pan_hash)
    .bind(rec.amount)
    .bind(&currency)
    .bind(rec.txn_time)
    .bind(op_type.as_str())
    .bind(&rec.merchant_id)
    .bind(&rec.channel_id)
    .bind(&rec.status_norm)
    .bind(fee_amount)
    .bind(&fee_currency)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub async fn ingest_status(pool: &PgPool, roles: &[Role], file_id: Uuid) -> RconResult<serde_json::Value> {
    require_permission(roles, Permission::IngestRead)?;
    let row = sqlx::query(
        "SELECT id, side, system_tag, business_date, status, record_count FROM ingest_files WHERE id = $1",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RconError::NotFound("ingest file not found".into()))?;

    Ok(serde_json::json!({
        "file_id": row.try_get::<Uuid, _>("id")?.to_string(),
        "side": row.try_get::<String, _>("side")?,
        "system_tag": row.try_get::<String, _>("system_tag")?,
        "business_date": row.try_get::<NaiveDate, _>("business_date")?.to_string(),
        "status": row.try_get::<String, _>("status")?,
        "record_count": row.try_get::<i64, _>("record_count")?,
    }))
}

pub(crate) async fn load_txns_for_side(
    pool: &PgPool,
    side: Side,
    business_date: NaiveDate,
) -> RconResult<Vec<Txn>> {
    let rows = sqlx::query(
        "SELECT id, side, system_tag, business_date, rrn, arn, pan_masked, pan_hash, amount,
                currency, txn_time, op_type, merchant_id, channel_id, status_norm, fee_amount, fee_currency
         FROM txns WHERE side = $1 AND business_date = $2",
    )
    .bind(side.as_str())
    .bind(business_date)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_txn).collect()
}

pub(crate) fn row_to_txn(row: sqlx::postgres::PgRow) -> RconResult<Txn> {
    let side_str: String = row.try_get("side")?;
    let op_type_str: String = row.try_get("op_type")?;
    Ok(Txn {
        id: row.try_get("id")?,
        side: Side::parse(&side_str).unwrap_or(Side::Left),
        system_tag: row.try_get("system_tag")?,
        business_date: row.try_get("business_date")?,
        rrn: row.try_get("rrn")?,
        arn: row.try_get("arn")?,
        pan_masked: row.try_get("pan_masked")?,
        pan_hash: row.try_get("pan_hash")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        txn_time: row.try_get("txn_time")?,
        op_type: OpType::parse_or_purchase(&op_type_str),
        merchant_id: row.try_get("merchant_id")?,
        channel_id: row.try_get("channel_id")?,
        status_norm: row.try_get("status_norm")?,
        fee_amount: row.try_get("fee_amount")?,
        fee_currency: row.try_get("fee_currency")?,
    })
}
