//! Role → permission mapping. Pure, no I/O — the same shape as the small
//! state-engine crates in the rest of the workspace: plain enums and free
//! functions, no traits, no generics.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Admin,
    OperatorL1,
    OperatorL2,
    Auditor,
    FinanceViewer,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "operator_l1" => Some(Role::OperatorL1),
            "operator_l2" => Some(Role::OperatorL2),
            "auditor" => Some(Role::Auditor),
            "finance_viewer" => Some(Role::FinanceViewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::OperatorL1 => "operator_l1",
            Role::OperatorL2 => "operator_l2",
            Role::Auditor => "auditor",
            Role::FinanceViewer => "finance_viewer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    IngestWrite,
    IngestRead,
    MatchExecute,
    MatchRead,
    ExceptionsRead,
    ExceptionsWrite,
    AdminRules,
    AuditRead,
    AnalyticsRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::IngestWrite => "ingest:write",
            Permission::IngestRead => "ingest:read",
            Permission::MatchExecute => "match:execute",
            Permission::MatchRead => "match:read",
            Permission::ExceptionsRead => "exceptions:read",
            Permission::ExceptionsWrite => "exceptions:write",
            Permission::AdminRules => "admin:rules",
            Permission::AuditRead => "audit:read",
            Permission::AnalyticsRead => "analytics:read",
        }
    }
}

/// The permission set granted to each role. Looked up fresh on every call
/// rather than cached — the matrix is small and static.
fn role_permissions(role: Role) -> BTreeSet<Permission> {
    use Permission::*;
    match role {
        Role::Admin => BTreeSet::from([
            IngestWrite,
            IngestRead,
            MatchExecute,
            MatchRead,
            ExceptionsRead,
            ExceptionsWrite,
            AdminRules,
            AuditRead,
            AnalyticsRead,
        ]),
        Role::OperatorL1 => BTreeSet::from([MatchRead, ExceptionsRead, ExceptionsWrite, AnalyticsRead]),
        Role::OperatorL2 => BTreeSet::from([MatchRead, ExceptionsRead, ExceptionsWrite, AnalyticsRead]),
        Role::Auditor => BTreeSet::from([AuditRead, ExceptionsRead, MatchRead, AnalyticsRead]),
        Role::FinanceViewer => BTreeSet::from([MatchRead, ExceptionsRead, AnalyticsRead]),
    }
}

/// `true` if any of the given roles grants `permission`. Unknown roles
/// (already filtered out by `Role::parse` at the caller) simply contribute
/// nothing.
pub fn has_permission(roles: &[Role], permission: Permission) -> bool {
    roles.iter().any(|r| role_permissions(*r).contains(&permission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_has_every_permission() {
        let all = [
            Permission::IngestWrite,
            Permission::IngestRead,
            Permission::MatchExecute,
            Permission::MatchRead,
            Permission::ExceptionsRead,
            Permission::ExceptionsWrite,
            Permission::AdminRules,
            Permission::AuditRead,
            Permission::AnalyticsRead,
        ];
        for p in all {
            assert!(has_permission(&[Role::Admin], p));
        }
    }

    #[test]
    fn operator_cannot_execute_runs_or_admin_rules() {
        assert!(!has_permission(&[Role::OperatorL1], Permission::MatchExecute));
        assert!(!has_permission(&[Role::OperatorL1], Permission::AdminRules));
        assert!(has_permission(&[Role::OperatorL1], Permission::ExceptionsWrite));
    }

    #[test]
    fn auditor_is_read_only() {
        assert!(has_permission(&[Role::Auditor], Permission::AuditRead));
        assert!(!has_permission(&[Role::Auditor], Permission::ExceptionsWrite));
        assert!(!has_permission(&[Role::Auditor], Permission::IngestWrite));
    }

    #[test]
    fn finance_viewer_cannot_touch_exceptions() {
        assert!(!has_permission(&[Role::FinanceViewer], Permission::ExceptionsWrite));
        assert!(has_permission(&[Role::FinanceViewer], Permission::AnalyticsRead));
    }

    #[test]
    fn multiple_roles_union_their_permissions() {
        let roles = [Role::FinanceViewer, Role::Auditor];
        assert!(has_permission(&roles, Permission::AuditRead));
        assert!(has_permission(&roles, Permission::MatchRead));
        assert!(!has_permission(&roles, Permission::IngestWrite));
    }

    #[test]
    fn role_parse_round_trips_known_roles() {
        for r in [
            Role::Admin,
            Role::OperatorL1,
            Role::OperatorL2,
            Role::Auditor,
            Role::FinanceViewer,
        ] {
            assert_eq!(Role::parse(r.as_str()), Some(r));
        }
        assert_eq!(Role::parse("nonexistent"), None);
    }
}
