//! Canonical JSON hashing for audit rows, and optional hash-chain
//! verification across a sequence of them. `recon-db` stores every audit
//! row in Postgres rather than a JSONL file, so this crate carries no file
//! I/O of its own — just the canonicalization and hashing primitives.

use anyhow::{Context, Result};
use recon_schemas::AuditEvent;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize by sorting object keys recursively, then emit compact JSON.
pub fn canonical_json<T: serde::Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit payload failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// A minimal, hashable view of one audit row. `hash_self` is deliberately
/// excluded — it is the output of hashing, not an input.
#[derive(Debug, Clone, serde::Serialize)]
struct Hashable<'a> {
    id: &'a uuid::Uuid,
    at: &'a chrono::DateTime<chrono::Utc>,
    actor: &'a str,
    object_type: &'a str,
    object_id: &'a Option<String>,
    action: &'a str,
    result: &'a str,
    details: &'a Value,
    hash_prev: &'a Option<String>,
}

/// Hash chain is computed over the canonical JSON of the event's fields,
/// excluding `hash_self` to avoid self-reference.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let hashable = Hashable {
        id: &ev.id,
        at: &ev.at,
        actor: &ev.actor,
        object_type: &ev.object_type,
        object_id: &ev.object_id,
        action: &ev.action,
        result: ev.result.as_str(),
        details: &ev.details,
        hash_prev: &ev.hash_prev,
    };
    let canonical = canonical_json(&hashable)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { rows: usize },
    Broken { index: usize, reason: String },
}

/// Verifies a sequence of audit rows, already ordered by insertion (`at`
/// ascending, ties broken by `id`). Rows with no chain columns populated
/// (hash chaining disabled) are skipped without affecting adjacency.
pub fn verify_hash_chain(rows: &[AuditEvent]) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut checked = 0usize;

    for (i, ev) in rows.iter().enumerate() {
        if ev.hash_self.is_none() && ev.hash_prev.is_none() {
            continue;
        }

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                index: i,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(claimed) = &ev.hash_self {
            let recomputed = compute_event_hash(ev)?;
            if claimed != &recomputed {
                return Ok(VerifyResult::Broken {
                    index: i,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed, recomputed
                    ),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
        checked += 1;
    }

    Ok(VerifyResult::Valid { rows: checked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_schemas::AuditResult;
    use uuid::Uuid;

    fn base_event(hash_prev: Option<String>) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            at: chrono::Utc::now(),
            actor: "svc-ingest".into(),
            source_ip: None,
            object_type: "ingest_file".into(),
            object_id: Some("f-1".into()),
            action: "ingest".into(),
            result: AuditResult::Success,
            details: serde_json::json!({"rows": 10}),
            hash_prev,
            hash_self: None,
        }
    }

    #[test]
    fn chain_of_two_verifies_clean() {
        let mut first = base_event(None);
        first.hash_self = Some(compute_event_hash(&first).unwrap());

        let mut second = base_event(first.hash_self.clone());
        second.hash_self = Some(compute_event_hash(&second).unwrap());

        let result = verify_hash_chain(&[first, second]).unwrap();
        assert_eq!(result, VerifyResult::Valid { rows: 2 });
    }

    #[test]
    fn tampering_with_details_breaks_the_chain() {
        let mut first = base_event(None);
        first.hash_self = Some(compute_event_hash(&first).unwrap());

        let mut second = base_event(first.hash_self.clone());
        second.hash_self = Some(compute_event_hash(&second).unwrap());

        // Tamper after the fact, as if a row were edited directly in the DB.
        second.details = serde_json::json!({"rows": 999});

        let result = verify_hash_chain(&[first, second]).unwrap();
        assert!(matches!(result, VerifyResult::Broken { index: 1, .. }));
    }

    #[test]
    fn rows_without_chain_columns_pass_through() {
        let plain = base_event(None);
        let result = verify_hash_chain(&[plain]).unwrap();
        assert_eq!(result, VerifyResult::Valid { rows: 0 });
    }
}
