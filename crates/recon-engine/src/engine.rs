//! Deterministic multi-pass transaction matching.
//!
//! Passes run in a fixed order and each consumes rows from the working
//! remainder sets before the next pass runs, mirroring a transaction's
//! single trip through progressively looser matching criteria:
//!
//! 1. exact key (rrn, amount, currency, business date)
//! 2. ARN match with tolerance scoring
//! 3. fuzzy rrn+currency match within the ruleset's date window
//! 4. one-to-many amount-sum match (2 or 3 counterpart rows)
//!
//! Anything left on either side after all four passes becomes a
//! `MISSING_IN_*` exception.

use std::collections::{BTreeMap, BTreeSet};

use recon_schemas::{ExceptionCategory, MatchType, OpType, RulesetPayload, Severity, Txn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{ExceptionRecord, MatchOutcome, MatchRecord};

/// Whether a `DUPLICATE_SUSPECT` exception removes the left row from
/// further matching passes. The original behavior leaves it in play — a
/// later pass may still resolve it — so this stays `false`. Not exposed
/// over HTTP or the ruleset payload; flipping it is a code change, not a
/// config change, until a concrete need for the flag materializes.
#[allow(dead_code)]
const DEDUPE_REMOVES_LEFT: bool = false;

fn date_diff_days(a: chrono::DateTime<chrono::Utc>, b: chrono::DateTime<chrono::Utc>) -> f64 {
    (a - b).num_milliseconds().abs() as f64 / 86_400_000.0
}

fn amount_close(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

fn op_compat_score(left: OpType, right: OpType) -> f64 {
    use OpType::*;
    if left as u8 == right as u8 {
        return 0.2;
    }
    let pair = (left, right);
    let compatible = matches!(
        pair,
        (Purchase, Clearing)
            | (Clearing, Purchase)
            | (Refund, Chargeback)
            | (Chargeback, Refund)
            | (Reversal, Reversal)
    );
    if compatible {
        0.1
    } else {
        0.0
    }
}

fn fuzzy_score(left: &Txn, right: &Txn, rules: &RulesetPayload) -> (f64, serde_json::Value) {
    let amount_delta = (left.amount - right.amount).abs();
    let amount_delta_f = amount_delta.to_f64().unwrap_or(0.0);
    let date_delta = date_diff_days(left.txn_time, right.txn_time);

    let tolerance_f = rules.amount_tolerance.to_f64().unwrap_or(0.01).max(0.01);
    let window_f = (rules.date_window_days as f64).max(1.0);

    let amount_penalty = (amount_delta_f / tolerance_f).min(1.0) * 0.5;
    let date_penalty = (date_delta / window_f).min(1.0) * 0.3;
    let compat_bonus = op_compat_score(left.op_type, right.op_type);

    let score = (1.0 - amount_penalty - date_penalty + compat_bonus).clamp(0.0, 1.0);

    let explain = serde_json::json!({
        "amount_delta": round4(amount_delta_f),
        "date_delta_days": date_delta,
        "amount_penalty": round4(amount_penalty),
        "date_penalty": round4(date_penalty),
        "compat_bonus": round4(compat_bonus),
    });

    (score, explain)
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Key used for the exact-match index: rrn, amount rounded to 2dp,
/// currency, business date.
type ExactKey = (String, Decimal, String, chrono::NaiveDate);

/// Runs the four matching passes over `left` and `right`, returning every
/// match decision and every unresolved leftover. Pure and side-effect free;
/// the caller assigns run ids and persists the result.
pub fn match_transactions(left: &[Txn], right: &[Txn], rules: &RulesetPayload) -> MatchOutcome {
    let mut left_remaining: BTreeMap<Uuid, Txn> =
        left.iter().map(|t| (t.id, t.clone())).collect();
    let right_by_id: BTreeMap<Uuid, Txn> = right.iter().map(|t| (t.id, t.clone())).collect();
    let mut right_remaining: BTreeSet<Uuid> = right_by_id.keys().copied().collect();

    let mut exact_idx: BTreeMap<ExactKey, Vec<Uuid>> = BTreeMap::new();
    let mut rrn_cur_idx: BTreeMap<(String, String), Vec<Uuid>> = BTreeMap::new();
    let mut arn_idx: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();

    for t in right {
        let key: ExactKey = (
            t.rrn.clone(),
            t.amount.round_dp(2),
            t.currency.clone(),
            t.business_date,
        );
        exact_idx.entry(key).or_default().push(t.id);
        rrn_cur_idx
            .entry((t.rrn.clone(), t.currency.clone()))
            .or_default()
            .push(t.id);
        if let Some(arn) = &t.arn {
            arn_idx.entry(arn.clone()).or_default().push(t.id);
        }
    }

    let mut matches: Vec<MatchRecord> = Vec::new();
    let mut exceptions: Vec<ExceptionRecord> = Vec::new();

    let mut record_match = |left_id: Uuid,
                             right_id: Option<Uuid>,
                             match_type: MatchType,
                             score: f64,
                             reason_code: &str,
                             explain: serde_json::Value,
                             left_remaining: &mut BTreeMap<Uuid, Txn>,
                             right_remaining: &mut BTreeSet<Uuid>,
                             matches: &mut Vec<MatchRecord>| {
        matches.push(MatchRecord {
            left_txn_id: left_id,
            right_txn_id: right_id,
            match_type,
            score: round4(score),
            reason_code: reason_code.to_string(),
            explain,
        });
        left_remaining.remove(&left_id);
        if let Some(rid) = right_id {
            right_remaining.remove(&rid);
        }
    };

    // Pass 1: exact key match.
    let snapshot: Vec<Txn> = left_remaining.values().cloned().collect();
    for w in &snapshot {
        let key: ExactKey = (
            w.rrn.clone(),
            w.amount.round_dp(2),
            w.currency.clone(),
            w.business_date,
        );
        let candidates: Vec<Uuid> = exact_idx
            .get(&key)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| right_remaining.contains(id))
            .collect();

        if candidates.len() == 1 {
            record_match(
                w.id,
                Some(candidates[0]),
                MatchType::Matched,
                1.0,
                "EXACT_RRN_AMOUNT_CURR_DATE",
                serde_json::json!({"stage": "exact"}),
                &mut left_remaining,
                &mut right_remaining,
                &mut matches,
            );
        } else if candidates.len() > 1 {
            // Left row is intentionally NOT removed from `left_remaining`
            // here; it stays eligible for the later passes.
            exceptions.push(ExceptionRecord {
                primary_txn_id: w.id,
                category: ExceptionCategory::Duplicate,
                severity: Severity::High,
                reason: "MULTI_CANDIDATE_EXACT".to_string(),
            });
        }
    }

    // Pass 2: ARN match with tolerance scoring.
    let snapshot: Vec<Txn> = left_remaining.values().cloned().collect();
    for w in &snapshot {
        let Some(arn) = &w.arn else { continue };
        let candidates: Vec<Uuid> = arn_idx
            .get(arn)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| right_remaining.contains(id))
            .collect();

        if candidates.len() == 1 {
            let c = &right_by_id[&candidates[0]];
            let (score, mut explain) = fuzzy_score(w, c, rules);
            if score >= rules.score_threshold {
                let match_type = if w.amount != c.amount {
                    MatchType::PartialMatch
                } else {
                    MatchType::Matched
                };
                merge_stage(&mut explain, "arn");
                record_match(
                    w.id,
                    Some(c.id),
                    match_type,
                    score,
                    "ARN_MATCH_WITH_TOLERANCE",
                    explain,
                    &mut left_remaining,
                    &mut right_remaining,
                    &mut matches,
                );
            }
        }
    }

    // Pass 3: fuzzy rrn+currency match within the date window, requiring a
    // clear winner (> 0.05 ahead of the runner-up).
    let snapshot: Vec<Txn> = left_remaining.values().cloned().collect();
    for w in &snapshot {
        let candidates: Vec<Uuid> = rrn_cur_idx
            .get(&(w.rrn.clone(), w.currency.clone()))
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| {
                right_remaining.contains(id)
                    && date_diff_days(w.txn_time, right_by_id[id].txn_time)
                        <= rules.date_window_days as f64
            })
            .collect();

        if candidates.is_empty() {
            continue;
        }

        let mut scored: Vec<(f64, Uuid, serde_json::Value)> = candidates
            .iter()
            .map(|id| {
                let c = &right_by_id[id];
                let (score, explain) = fuzzy_score(w, c, rules);
                (score, *id, explain)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        let (top_score, top_id, mut top_explain) = scored[0].clone();
        let second = scored.get(1).map(|s| s.0).unwrap_or(-1.0);
        let unique_best = top_score - second > 0.05;

        if top_score >= rules.score_threshold && unique_best {
            let c = &right_by_id[&top_id];
            let match_type = if w.amount != c.amount {
                MatchType::PartialMatch
            } else {
                MatchType::Matched
            };
            merge_stage(&mut top_explain, "fuzzy");
            record_match(
                w.id,
                Some(top_id),
                match_type,
                top_score,
                "FUZZY_SCORE",
                top_explain,
                &mut left_remaining,
                &mut right_remaining,
                &mut matches,
            );
        }
    }

    // Pass 4: one-to-many amount-sum match, trying 2 then 3 counterpart rows.
    let snapshot: Vec<Txn> = left_remaining.values().cloned().collect();
    for w in &snapshot {
        let candidates: Vec<Uuid> = right_remaining
            .iter()
            .copied()
            .filter(|id| {
                let c = &right_by_id[id];
                c.rrn == w.rrn && c.currency == w.currency && c.merchant_id == w.merchant_id
            })
            .collect();

        let matched_combo = [2usize, 3usize]
            .into_iter()
            .find_map(|r| find_summing_combo(&candidates, &right_by_id, r, w.amount, rules.amount_tolerance));

        if let Some(combo) = matched_combo {
            let combo_size = combo.len();
            for rid in combo {
                record_match(
                    w.id,
                    Some(rid),
                    MatchType::PartialMatch,
                    0.8,
                    "ONE_TO_MANY_SUM_MATCH",
                    serde_json::json!({"stage": "one_to_many", "combo_size": combo_size}),
                    &mut left_remaining,
                    &mut right_remaining,
                    &mut matches,
                );
            }
        }
    }

    // Anything left over on either side is a missing-counterpart exception.
    for w in left_remaining.values() {
        exceptions.push(ExceptionRecord {
            primary_txn_id: w.id,
            category: ExceptionCategory::MissingInRight,
            severity: Severity::Medium,
            reason: "No cross-source candidate found".to_string(),
        });
    }
    for rid in &right_remaining {
        exceptions.push(ExceptionRecord {
            primary_txn_id: *rid,
            category: ExceptionCategory::MissingInLeft,
            severity: Severity::Medium,
            reason: "No counterpart candidate found".to_string(),
        });
    }

    MatchOutcome { matches, exceptions }
}

fn merge_stage(explain: &mut serde_json::Value, stage: &str) {
    if let Some(obj) = explain.as_object_mut() {
        obj.insert("stage".to_string(), serde_json::json!(stage));
    }
}

/// First combination of `r` candidate ids (in ascending id order, matching
/// the combinatorics of `itertools.combinations`) whose summed amount is
/// within tolerance of `target`.
fn find_summing_combo(
    candidates: &[Uuid],
    by_id: &BTreeMap<Uuid, Txn>,
    r: usize,
    target: Decimal,
    tolerance: Decimal,
) -> Option<Vec<Uuid>> {
    if candidates.len() < r {
        return None;
    }
    let mut indices: Vec<usize> = (0..r).collect();
    loop {
        let combo: Vec<Uuid> = indices.iter().map(|&i| candidates[i]).collect();
        let total: Decimal = combo.iter().map(|id| by_id[id].amount).sum::<Decimal>().round_dp(2);
        if amount_close(total, target.round_dp(2), tolerance) {
            return Some(combo);
        }
        if !advance_combo(&mut indices, candidates.len()) {
            break;
        }
    }
    None
}

/// Advances `indices` to the next combination in lexicographic order.
/// Returns `false` once combinations are exhausted.
fn advance_combo(indices: &mut [usize], n: usize) -> bool {
    let r = indices.len();
    let mut i = r;
    loop {
        if i == 0 {
            return false;
        }
        i -= 1;
        if indices[i] != i + n - r {
            indices[i] += 1;
            for j in (i + 1)..r {
                indices[j] = indices[j - 1] + 1;
            }
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ruleset() -> RulesetPayload {
        RulesetPayload {
            amount_tolerance: dec!(2.0),
            date_window_days: 1,
            score_threshold: 0.75,
        }
    }

    fn txn(id: Uuid, rrn: &str, amount: Decimal, merchant: &str) -> Txn {
        Txn {
            id,
            side: recon_schemas::Side::Left,
            system_tag: "WAY4".into(),
            business_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            rrn: rrn.to_string(),
            arn: None,
            pan_masked: "400000******1234".into(),
            pan_hash: "hash".into(),
            amount,
            currency: "USD".into(),
            txn_time: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            op_type: OpType::Purchase,
            merchant_id: merchant.to_string(),
            channel_id: "POS".into(),
            status_norm: "SETTLED".into(),
            fee_amount: dec!(0),
            fee_currency: "USD".into(),
        }
    }

    #[test]
    fn exact_key_match_is_clean() {
        let lid = Uuid::new_v4();
        let rid = Uuid::new_v4();
        let mut l = txn(lid, "RRN1", dec!(100.00), "M1");
        let mut r = txn(rid, "RRN1", dec!(100.00), "M1");
        r.side = recon_schemas::Side::Right;
        l.id = lid;
        r.id = rid;

        let outcome = match_transactions(&[l], &[r], &ruleset());
        assert_eq!(outcome.matches.len(), 1);
        assert!(outcome.exceptions.is_empty());
        assert_eq!(outcome.matches[0].match_type, MatchType::Matched);
        assert_eq!(outcome.matches[0].reason_code, "EXACT_RRN_AMOUNT_CURR_DATE");
    }

    #[test]
    fn duplicate_exact_candidates_raise_exception_without_removing_left() {
        let lid = Uuid::new_v4();
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        let l = txn(lid, "RRN1", dec!(50.00), "M1");
        let c1 = txn(r1, "RRN1", dec!(50.00), "M1");
        let c2 = txn(r2, "RRN1", dec!(50.00), "M1");

        let outcome = match_transactions(&[l], &[c1, c2], &ruleset());
        assert!(outcome
            .exceptions
            .iter()
            .any(|e| e.category == ExceptionCategory::Duplicate));
        // both right candidates remain unmatched and become MISSING_IN_LEFT
        assert_eq!(
            outcome
                .exceptions
                .iter()
                .filter(|e| e.category == ExceptionCategory::MissingInLeft)
                .count(),
            2
        );
    }

    #[test]
    fn one_to_many_sum_match_splits_across_two_counterparts() {
        let lid = Uuid::new_v4();
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        let l = txn(lid, "RRN9", dec!(150.00), "M9");
        let c1 = txn(r1, "RRN9", dec!(100.00), "M9");
        let c2 = txn(r2, "RRN9", dec!(50.00), "M9");

        let outcome = match_transactions(&[l], &[c1, c2], &ruleset());
        assert_eq!(outcome.matches.len(), 2);
        assert!(outcome
            .matches
            .iter()
            .all(|m| m.reason_code == "ONE_TO_MANY_SUM_MATCH"));
        assert!(outcome.exceptions.is_empty());
    }

    #[test]
    fn unmatched_rows_become_missing_counterpart_exceptions() {
        let lid = Uuid::new_v4();
        let l = txn(lid, "RRN-ORPHAN", dec!(10.00), "M1");

        let outcome = match_transactions(&[l], &[], &ruleset());
        assert_eq!(outcome.matches.len(), 0);
        assert_eq!(outcome.exceptions.len(), 1);
        assert_eq!(outcome.exceptions[0].category, ExceptionCategory::MissingInRight);
    }

    #[test]
    fn fuzzy_pass_requires_a_clear_winner() {
        let lid = Uuid::new_v4();
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        let mut l = txn(lid, "RRN-F", dec!(100.00), "M1");
        l.txn_time = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let mut c1 = txn(r1, "RRN-F", dec!(100.50), "M1");
        c1.txn_time = l.txn_time;
        let mut c2 = txn(r2, "RRN-F", dec!(100.60), "M1");
        c2.txn_time = l.txn_time;

        // Two near-identical candidates: neither should win outright.
        let outcome = match_transactions(&[l], &[c1, c2], &ruleset());
        assert!(outcome
            .exceptions
            .iter()
            .any(|e| e.category == ExceptionCategory::MissingInRight));
    }
}
