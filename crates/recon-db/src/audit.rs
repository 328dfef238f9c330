//! Append-only audit trail. Every mutating operation in this crate writes
//! one row here inside the same transaction as its own writes, so an audit
//! entry and the change it describes commit or roll back together.

use chrono::Utc;
use recon_authz::{Permission, Role};
use recon_schemas::{AuditEvent, AuditResult};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{require_permission, RconResult};

/// Inserts one audit row, chaining its hash to the previous row (by `at`,
/// ties broken by `id`) when hash chaining is enabled for the pool.
/// `recon-db` always chains — there is no opt-out, matching the ambient
/// integrity stance the rest of the workspace takes on audit trails.
pub async fn insert_audit_event(
    tx: &mut Transaction<'_, Postgres>,
    actor: &str,
    source_ip: Option<&str>,
    object_type: &str,
    object_id: Option<&str>,
    action: &str,
    result: AuditResult,
    details: serde_json::Value,
) -> RconResult<Uuid> {
    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash_self FROM audit_events ORDER BY at DESC, id DESC LIMIT 1")
            .fetch_optional(&mut **tx)
            .await?
            .flatten();

    let id = Uuid::new_v4();
    let at = Utc::now();

    let event = AuditEvent {
        id,
        at,
        actor: actor.to_string(),
        source_ip: source_ip.map(str::to_string),
        object_type: object_type.to_string(),
        object_id: object_id.map(str::to_string),
        action: action.to_string(),
        result,
        details,
        hash_prev: prev_hash.clone(),
        hash_self: None,
    };
    let hash_self = recon_audit::compute_event_hash(&event)?;

    sqlx::query(
        "INSERT INTO audit_events
         (id, at, actor_login, source_ip, object_type, object_id, action, result, details, hash_prev, hash_self)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
    )
    .bind(id)
    .bind(at)
    .bind(actor)
    .bind(source_ip)
    .bind(object_type)
    .bind(object_id)
    .bind(action)
    .bind(result.as_str())
    .bind(&event.details)
    .bind(&prev_hash)
    .bind(&hash_self)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub struct AuditFilters {
    pub actor: Option<String>,
    pub object_type: Option<String>,
    pub action: Option<String>,
    pub result: Option<String>,
    pub limit: i64,
}

pub async fn list_audit(pool: &PgPool, roles: &[Role], filters: AuditFilters) -> RconResult<Vec<AuditEvent>> {
    require_permission(roles, Permission::AuditRead)?;

    let limit = filters.limit.clamp(1, 1000);
    let rows = sqlx::query(
        "SELECT id, at, actor_login, source_ip, object_type, object_id, action, result, details, hash_prev, hash_self
         FROM audit_events
         WHERE ($1::text IS NULL OR actor_login = $1)
           AND ($2::text IS NULL OR object_type = $2)
           AND ($3::text IS NULL OR action = $3)
           AND ($4::text IS NULL OR result = $4)
         ORDER BY at DESC, id DESC
         LIMIT $5",
    )
    .bind(&filters.actor)
    .bind(&filters.object_type)
    .bind(&filters.action)
    .bind(&filters.result)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_event).collect()
}

fn row_to_event(row: sqlx::postgres::PgRow) -> RconResult<AuditEvent> {
    let result_str: String = row.try_get("result")?;
    let result = match result_str.as_str() {
        "SUCCESS" => AuditResult::Success,
        "DUPLICATE" => AuditResult::Duplicate,
        _ => AuditResult::Failure,
    };
    Ok(AuditEvent {
        id: row.try_get("id")?,
        at: row.try_get("at")?,
        actor: row.try_get("actor_login")?,
        source_ip: row.try_get("source_ip")?,
        object_type: row.try_get("object_type")?,
        object_id: row.try_get("object_id")?,
        action: row.try_get("action")?,
        result,
        details: row.try_get("details")?,
        hash_prev: row.try_get("hash_prev")?,
        hash_self: row.try_get("hash_self")?,
    })
}

/// Re-verifies the hash chain over every row, oldest first. Used by the
/// operational CLI's integrity check, not exposed over HTTP.
pub async fn verify_chain(pool: &PgPool) -> RconResult<recon_audit::VerifyResult> {
    let rows = sqlx::query(
        "SELECT id, at, actor_login, source_ip, object_type, object_id, action, result, details, hash_prev, hash_self
         FROM audit_events ORDER BY at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    let events: Vec<AuditEvent> = rows.into_iter().map(row_to_event).collect::<RconResult<_>>()?;
    Ok(recon_audit::verify_hash_chain(&events)?)
}
