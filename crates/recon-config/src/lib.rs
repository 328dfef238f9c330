//! Environment-driven configuration: database URL, HTTP bind address, the
//! PAN hashing secret, and the built-in ruleset defaults seeded on first
//! boot. Flat env vars, no layered file config — this system has nothing
//! resembling the trading stack's per-strategy YAML stacks, so config stays
//! as simple as `original_source/src/config.py`'s module-level constants.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// The ruleset version seeded into `rulesets` on first migration, and used
/// whenever a run is started without an explicit active ruleset.
pub const DEFAULT_RULESET_VERSION: &str = "v1";
pub const DEFAULT_AMOUNT_TOLERANCE: Decimal = dec!(2.0);
pub const DEFAULT_DATE_WINDOW_DAYS: i32 = 1;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.75;

/// Resolved process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub app_env: AppEnv,
    pub pan_hash_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Dev,
    Prod,
}

impl AppEnv {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "prod" | "production" => AppEnv::Prod,
            _ => AppEnv::Dev,
        }
    }
}

const INSECURE_DEFAULT_SECRET: &str = "change-me-in-production";

impl Config {
    /// Reads `RECON_DATABASE_URL`, `RECON_BIND_ADDR`, `APP_ENV`, and
    /// `RECON_PAN_HASH_SECRET` from the process environment. Mirrors the
    /// production guard in `original_source/src/config.py`: booting with the
    /// insecure default secret while `APP_ENV=production` is a hard error.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("RECON_DATABASE_URL")
            .context("RECON_DATABASE_URL must be set")?;
        let bind_addr = std::env::var("RECON_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8088".to_string());
        let app_env = AppEnv::parse(&std::env::var("APP_ENV").unwrap_or_else(|_| "dev".into()));
        let pan_hash_secret = std::env::var("RECON_PAN_HASH_SECRET")
            .unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string());

        if app_env == AppEnv::Prod && pan_hash_secret == INSECURE_DEFAULT_SECRET {
            bail!("RECON_PAN_HASH_SECRET must be set in production");
        }

        Ok(Config {
            database_url,
            bind_addr,
            app_env,
            pan_hash_secret,
        })
    }
}

/// The built-in ruleset payload seeded into `rulesets` by the initial
/// migration. Kept here as the single source of truth for those constants;
/// runtime code always requires an active ruleset row rather than falling
/// back to this.
pub fn default_ruleset_payload() -> recon_schemas::RulesetPayload {
    recon_schemas::RulesetPayload {
        amount_tolerance: DEFAULT_AMOUNT_TOLERANCE,
        date_window_days: DEFAULT_DATE_WINDOW_DAYS,
        score_threshold: DEFAULT_SCORE_THRESHOLD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_parses_common_spellings() {
        assert_eq!(AppEnv::parse("prod"), AppEnv::Prod);
        assert_eq!(AppEnv::parse("PRODUCTION"), AppEnv::Prod);
        assert_eq!(AppEnv::parse("dev"), AppEnv::Dev);
        assert_eq!(AppEnv::parse("staging"), AppEnv::Dev);
    }

    #[test]
    fn default_ruleset_matches_original_constants() {
        let p = default_ruleset_payload();
        assert_eq!(p.amount_tolerance, dec!(2.0));
        assert_eq!(p.date_window_days, 1);
        assert_eq!(p.score_threshold, 0.75);
    }
}
