//! Shared domain types for the reconciliation engine and its surrounding
//! crates. Kept free of any I/O so both `recon-engine` (pure) and
//! `recon-db` (sqlx-backed) can depend on the same shapes without pulling
//! in a database driver.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which independent record a transaction or ingest file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LEFT" => Some(Side::Left),
            "RIGHT" => Some(Side::Right),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Status of an [`IngestFile`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestStatus {
    Parsed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        "PARSED"
    }
}

/// A registered ingest of a source file. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFile {
    pub id: Uuid,
    pub side: Side,
    pub system_tag: String,
    pub business_date: chrono::NaiveDate,
    pub file_name: String,
    pub checksum: String,
    pub parser_profile: String,
    pub received_at: DateTime<Utc>,
    pub status: String,
    pub record_count: i64,
    pub created_by: String,
}

/// The network-level operation type carried by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    Purchase,
    Clearing,
    Settlement,
    Refund,
    Reversal,
    Chargeback,
    Adjustment,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Purchase => "PURCHASE",
            OpType::Clearing => "CLEARING",
            OpType::Settlement => "SETTLEMENT",
            OpType::Refund => "REFUND",
            OpType::Reversal => "REVERSAL",
            OpType::Chargeback => "CHARGEBACK",
            OpType::Adjustment => "ADJUSTMENT",
        }
    }

    /// Lookup with fallback to `PURCHASE`, per the ingest normalization rule.
    pub fn parse_or_purchase(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PURCHASE" => OpType::Purchase,
            "CLEARING" => OpType::Clearing,
            "SETTLEMENT" => OpType::Settlement,
            "REFUND" => OpType::Refund,
            "REVERSAL" => OpType::Reversal,
            "CHARGEBACK" => OpType::Chargeback,
            "ADJUSTMENT" => OpType::Adjustment,
            _ => OpType::Purchase,
        }
    }
}

/// Normalized, immutable transaction record ingested from one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txn {
    pub id: Uuid,
    pub side: Side,
    pub system_tag: String,
    pub business_date: chrono::NaiveDate,
    pub rrn: String,
    pub arn: Option<String>,
    pub pan_masked: String,
    /// Never serialized back out to API callers; stripped at the read boundary.
    #[serde(skip_serializing)]
    pub pan_hash: String,
    pub amount: Decimal,
    pub currency: String,
    pub txn_time: DateTime<Utc>,
    pub op_type: OpType,
    pub merchant_id: String,
    pub channel_id: String,
    pub status_norm: String,
    pub fee_amount: Decimal,
    pub fee_currency: String,
}

/// A versioned set of matching parameters. At most one is active at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RulesetPayload {
    pub amount_tolerance: Decimal,
    pub date_window_days: i32,
    pub score_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub version: String,
    pub is_active: bool,
    pub payload: RulesetPayload,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a [`MatchRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Finished),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRun {
    pub id: Uuid,
    pub business_date: chrono::NaiveDate,
    pub scope_filter: Option<String>,
    pub ruleset_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub created_by: String,
}

/// Outcome category of one [`MatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Matched,
    PartialMatch,
    DuplicateSuspect,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Matched => "MATCHED",
            MatchType::PartialMatch => "PARTIAL_MATCH",
            MatchType::DuplicateSuspect => "DUPLICATE_SUSPECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MATCHED" => Some(MatchType::Matched),
            "PARTIAL_MATCH" => Some(MatchType::PartialMatch),
            "DUPLICATE_SUSPECT" => Some(MatchType::DuplicateSuspect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub left_txn_id: Uuid,
    pub right_txn_id: Option<Uuid>,
    pub match_type: MatchType,
    pub score: f64,
    pub reason_code: String,
    pub explain: serde_json::Value,
}

/// Category of an [`ExceptionCase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionCategory {
    MissingInLeft,
    MissingInRight,
    Duplicate,
    AmountMismatch,
    DateMismatch,
    StatusMismatch,
    OptypeMismatch,
}

impl ExceptionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionCategory::MissingInLeft => "MISSING_IN_LEFT",
            ExceptionCategory::MissingInRight => "MISSING_IN_RIGHT",
            ExceptionCategory::Duplicate => "DUPLICATE",
            ExceptionCategory::AmountMismatch => "AMOUNT_MISMATCH",
            ExceptionCategory::DateMismatch => "DATE_MISMATCH",
            ExceptionCategory::StatusMismatch => "STATUS_MISMATCH",
            ExceptionCategory::OptypeMismatch => "OPTYPE_MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MISSING_IN_LEFT" => Some(ExceptionCategory::MissingInLeft),
            "MISSING_IN_RIGHT" => Some(ExceptionCategory::MissingInRight),
            "DUPLICATE" => Some(ExceptionCategory::Duplicate),
            "AMOUNT_MISMATCH" => Some(ExceptionCategory::AmountMismatch),
            "DATE_MISMATCH" => Some(ExceptionCategory::DateMismatch),
            "STATUS_MISMATCH" => Some(ExceptionCategory::StatusMismatch),
            "OPTYPE_MISMATCH" => Some(ExceptionCategory::OptypeMismatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    New,
    Triaged,
    InProgress,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::New => "NEW",
            CaseStatus::Triaged => "TRIAGED",
            CaseStatus::InProgress => "IN_PROGRESS",
            CaseStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(CaseStatus::New),
            "TRIAGED" => Some(CaseStatus::Triaged),
            "IN_PROGRESS" => Some(CaseStatus::InProgress),
            "CLOSED" => Some(CaseStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionCase {
    pub id: Uuid,
    pub run_id: Uuid,
    pub business_date: chrono::NaiveDate,
    pub category: ExceptionCategory,
    pub severity: Severity,
    pub status: CaseStatus,
    pub primary_txn_id: Uuid,
    pub owner_user_id: Option<String>,
    pub aging_days: i32,
    pub resolution_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionActionType {
    Assign,
    Comment,
    StatusChange,
    Close,
}

impl ExceptionActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionActionType::Assign => "assign",
            ExceptionActionType::Comment => "comment",
            ExceptionActionType::StatusChange => "status_change",
            ExceptionActionType::Close => "close",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assign" => Some(ExceptionActionType::Assign),
            "comment" => Some(ExceptionActionType::Comment),
            "status_change" => Some(ExceptionActionType::StatusChange),
            "close" => Some(ExceptionActionType::Close),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionAction {
    pub id: Uuid,
    pub case_id: Uuid,
    pub actor: String,
    pub action_at: DateTime<Utc>,
    pub action_type: ExceptionActionType,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditResult {
    Success,
    Failure,
    Duplicate,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "SUCCESS",
            AuditResult::Failure => "FAILURE",
            AuditResult::Duplicate => "DUPLICATE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub source_ip: Option<String>,
    pub object_type: String,
    pub object_id: Option<String>,
    pub action: String,
    pub result: AuditResult,
    pub details: serde_json::Value,
    /// Hash-chain columns (ambient integrity feature, see DESIGN.md).
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Disabled => "DISABLED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub full_name: String,
    pub status: UserStatus,
    pub roles: Vec<String>,
}

/// Status used by a [`UnifiedRow`] — the Result View's common schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnifiedStatus {
    Matched,
    Partial,
    Duplicate,
    MissingInLeft,
    MissingInRight,
    Mismatch,
}

impl UnifiedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnifiedStatus::Matched => "MATCHED",
            UnifiedStatus::Partial => "PARTIAL",
            UnifiedStatus::Duplicate => "DUPLICATE",
            UnifiedStatus::MissingInLeft => "MISSING_IN_LEFT",
            UnifiedStatus::MissingInRight => "MISSING_IN_RIGHT",
            UnifiedStatus::Mismatch => "MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MATCHED" => Some(UnifiedStatus::Matched),
            "PARTIAL" => Some(UnifiedStatus::Partial),
            "DUPLICATE" => Some(UnifiedStatus::Duplicate),
            "MISSING_IN_LEFT" => Some(UnifiedStatus::MissingInLeft),
            "MISSING_IN_RIGHT" => Some(UnifiedStatus::MissingInRight),
            "MISMATCH" => Some(UnifiedStatus::Mismatch),
            _ => None,
        }
    }

    pub fn from_match_type(mt: MatchType) -> Self {
        match mt {
            MatchType::Matched => UnifiedStatus::Matched,
            MatchType::PartialMatch => UnifiedStatus::Partial,
            MatchType::DuplicateSuspect => UnifiedStatus::Duplicate,
        }
    }

    pub fn from_exception_category(cat: ExceptionCategory) -> Self {
        match cat {
            ExceptionCategory::MissingInLeft => UnifiedStatus::MissingInLeft,
            ExceptionCategory::MissingInRight => UnifiedStatus::MissingInRight,
            ExceptionCategory::Duplicate => UnifiedStatus::Duplicate,
            _ => UnifiedStatus::Mismatch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRow {
    pub row_id: String,
    pub status: UnifiedStatus,
    pub rrn: Option<String>,
    pub arn: Option<String>,
    pub txn_time: Option<DateTime<Utc>>,
    pub amount_left: Option<Decimal>,
    pub amount_right: Option<Decimal>,
    pub delta: Option<Decimal>,
    pub currency: Option<String>,
    pub match_score: Option<f64>,
    pub reason_code: Option<String>,
    pub pan_masked: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSummary {
    pub matched: i64,
    pub unmatched_left: i64,
    pub unmatched_right: i64,
    pub partial: i64,
    pub duplicates: i64,
    pub amount_delta: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub field: &'static str,
    pub left: Option<String>,
    pub right: Option<String>,
    pub severity: Severity,
}
