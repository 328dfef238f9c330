//! PAN masking, hashing, and the small field-normalization helpers applied
//! to every ingested record.

use hmac::{Hmac, Mac};
use recon_schemas::OpType;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn normalize_currency(value: &str) -> String {
    value.trim().to_ascii_uppercase().chars().take(3).collect()
}

/// `rrn`/`arn` are normalized to upper-case strings per the ingest contract.
pub fn normalize_reference(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

pub fn parse_op_type(value: Option<&str>) -> OpType {
    OpType::parse_or_purchase(value.unwrap_or("PURCHASE"))
}

/// HMAC-SHA256 of the already-masked PAN, keyed by the configured secret.
/// Never hash the raw PAN — callers must pass `sanitize_pan_masked`'s output.
pub fn hash_pan(masked_pan: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(masked_pan.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Masks a PAN-like value to first6+stars+last4. Values that already look
/// masked (digits mixed with `X`/`x`/`*`) are normalized to `*`. Anything
/// that doesn't look like a card number passes through unchanged so
/// non-card identifiers aren't silently mangled.
pub fn sanitize_pan_masked(value: Option<&str>) -> String {
    let raw = value.unwrap_or("").trim().to_string();
    if raw.is_empty() {
        return "****".to_string();
    }

    let compact: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();

    if compact.len() >= 12 && compact.len() <= 19 && compact.chars().all(|c| c.is_ascii_digit()) {
        let stars = "*".repeat((compact.len() - 10).max(2));
        let first6: String = compact.chars().take(6).collect();
        let last4: String = compact.chars().skip(compact.len() - 4).collect();
        return format!("{first6}{stars}{last4}");
    }

    if compact.len() >= 12
        && compact.len() <= 19
        && compact
            .chars()
            .all(|c| c.is_ascii_digit() || c == 'X' || c == 'x' || c == '*')
    {
        return compact.chars().map(|c| if c == 'X' || c == 'x' { '*' } else { c }).collect();
    }

    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pan_is_masked_to_first6_last4() {
        assert_eq!(sanitize_pan_masked(Some("4000001234561234")), "400000******1234");
    }

    #[test]
    fn shorter_pan_uses_minimum_two_stars() {
        assert_eq!(sanitize_pan_masked(Some("400000123451234")), "400000*****1234");
    }

    #[test]
    fn already_masked_pan_normalizes_x_to_star() {
        assert_eq!(sanitize_pan_masked(Some("400000XXXXXX1234")), "400000******1234");
    }

    #[test]
    fn empty_value_becomes_placeholder() {
        assert_eq!(sanitize_pan_masked(None), "****");
        assert_eq!(sanitize_pan_masked(Some("  ")), "****");
    }

    #[test]
    fn non_card_value_passes_through() {
        assert_eq!(sanitize_pan_masked(Some("WALLET-REF-001")), "WALLET-REF-001");
    }

    #[test]
    fn hash_is_deterministic_for_same_secret() {
        let a = hash_pan("4000******1234", "secret-a");
        let b = hash_pan("4000******1234", "secret-a");
        let c = hash_pan("4000******1234", "secret-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
