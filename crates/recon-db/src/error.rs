use std::fmt;

/// Boundary error type. Every public operation in this crate returns one of
/// these instead of a bare `anyhow::Error` so `recon-api` can map it to an
/// HTTP status without inspecting error strings.
#[derive(Debug)]
pub enum RconError {
    Validation(String),
    Forbidden(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl fmt::Display for RconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RconError::Validation(msg) => write!(f, "validation error: {msg}"),
            RconError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            RconError::NotFound(msg) => write!(f, "not found: {msg}"),
            RconError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for RconError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RconError::Internal(e) => e.source(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for RconError {
    fn from(e: anyhow::Error) -> Self {
        RconError::Internal(e)
    }
}

impl From<sqlx::Error> for RconError {
    fn from(e: sqlx::Error) -> Self {
        RconError::Internal(anyhow::Error::new(e))
    }
}

pub type RconResult<T> = Result<T, RconError>;

/// Checks a permission and turns a denial into `RconError::Forbidden`.
pub fn require_permission(
    roles: &[recon_authz::Role],
    permission: recon_authz::Permission,
) -> RconResult<()> {
    if recon_authz::has_permission(roles, permission) {
        Ok(())
    } else {
        Err(RconError::Forbidden(format!(
            "missing permission: {}",
            permission.as_str()
        )))
    }
}
