//! User directory: logins, display names, and the roles backing
//! permission checks throughout this crate.

use recon_authz::{Permission, Role};
use recon_schemas::{User, UserStatus};
use sqlx::PgPool;

use crate::error::{require_permission, RconResult};

pub async fn list_users(pool: &PgPool, roles: &[Role]) -> RconResult<Vec<User>> {
    require_permission(roles, Permission::ExceptionsWrite)?;

    let rows = sqlx::query_as::<_, (String, String, String)>(
        "SELECT login, full_name, status FROM users ORDER BY login",
    )
    .fetch_all(pool)
    .await?;

    let mut users = Vec::with_capacity(rows.len());
    for (login, full_name, status) in rows {
        let role_rows: Vec<(String,)> =
            sqlx::query_as("SELECT role_name FROM user_roles WHERE login = $1 ORDER BY role_name")
                .bind(&login)
                .fetch_all(pool)
                .await?;

        users.push(User {
            login,
            full_name,
            status: if status == "DISABLED" { UserStatus::Disabled } else { UserStatus::Active },
            roles: role_rows.into_iter().map(|(r,)| r).collect(),
        });
    }

    Ok(users)
}

/// Loads a user's roles by login, used by the API layer to resolve the
/// `X-User` request header into a permission set for every call.
pub async fn roles_for_login(pool: &PgPool, login: &str) -> RconResult<Vec<Role>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT role_name FROM user_roles WHERE login = $1")
            .bind(login)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().filter_map(|(r,)| Role::parse(&r)).collect())
}

/// `true` if `login` names a user in `ACTIVE` status. Used by the exception
/// workflow's `assign` action, which requires the owner to exist and be
/// active before the case can transition to `TRIAGED`.
pub async fn is_active_user(pool: &PgPool, login: &str) -> RconResult<bool> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM users WHERE login = $1")
        .bind(login)
        .fetch_optional(pool)
        .await?;
    Ok(status.as_deref() == Some("ACTIVE"))
}
