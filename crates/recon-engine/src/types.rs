use recon_schemas::{ExceptionCategory, MatchType, Severity};
use uuid::Uuid;

/// One matching decision produced by [`crate::engine::match_transactions`].
/// Carries no `id`/`run_id` — those are assigned by the store when the
/// engine's output is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub left_txn_id: Uuid,
    pub right_txn_id: Option<Uuid>,
    pub match_type: MatchType,
    pub score: f64,
    pub reason_code: String,
    pub explain: serde_json::Value,
}

/// One unresolved leftover produced by [`crate::engine::match_transactions`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRecord {
    pub primary_txn_id: Uuid,
    pub category: ExceptionCategory,
    pub severity: Severity,
    pub reason: String,
}

/// Output of one matching pass over a left/right transaction set.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: Vec<MatchRecord>,
    pub exceptions: Vec<ExceptionRecord>,
}
