//! Resolves the HTTP-level caller into an actor login and a role set.
//!
//! There is no session handling in this system (out of scope, §1): the
//! caller names itself via `X-User` and the store looks up that login's
//! roles on every request. Client IP is carried through for the audit log
//! only, never used for access control.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use recon_authz::Role;
use sqlx::PgPool;

use crate::error_map::ApiResult;

/// Default actor when `X-User` is absent, per §6.
pub const DEFAULT_ACTOR: &str = "admin";

pub fn actor_login(headers: &HeaderMap) -> String {
    headers
        .get("x-user")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

/// Prefers `X-Forwarded-For`'s first hop (reverse-proxy deployments) over
/// the raw peer address.
pub fn source_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(fwd) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = fwd.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    peer.map(|a| a.ip().to_string())
}

pub async fn roles_for(pool: &PgPool, login: &str) -> ApiResult<Vec<Role>> {
    Ok(recon_db::users::roles_for_login(pool, login).await?)
}
