//! Role-based access policy
//!
//! A pure decision module: given an actor and an action, return allow or deny
//! with a stable reason code. Route guards are thin wrappers over
//! [`AccessPolicy::decide`]; nothing else in the service makes authorization
//! decisions.
//!
//! Deny reasons never reveal the target's role to an actor who is not allowed
//! to manage it; those denials all read `denied`.

use crate::domain::{Role, User};
use crate::error::Error;

/// An operation an actor wants to perform
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    ViewDashboard,
    SearchPackages,
    RegisterPackage,
    UpdatePackageStatus,
    ChangeOwnPassword,
    ManageRecipients,
    ImportRecipients,
    ViewReports,
    ExportReports,
    ListUsers,
    CreateUser { role: Role },
    EditUser { target: &'a User },
    DeactivateUser { target: &'a User },
    ResetUserPassword { target: &'a User },
    ChangeUserRole { target: &'a User, new_role: Role },
    ViewAuditLogs,
    EditSettings,
}

/// Outcome of a policy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        /// Stable snake_case reason code
        reason: &'static str,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason } => Some(reason),
        }
    }

    /// Turn a denial into the typed error routes map to 403
    pub fn require(self) -> Result<(), Error> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(Error::Forbidden(reason.to_string())),
        }
    }
}

/// The access policy
pub struct AccessPolicy;

impl AccessPolicy {
    /// Decide whether `actor` may perform `action`
    pub fn decide(actor: &User, action: Action<'_>) -> Decision {
        use Action::*;

        match action {
            // Every role
            ViewDashboard | SearchPackages | RegisterPackage | UpdatePackageStatus
            | ChangeOwnPassword => Decision::Allow,

            // Admin and above
            ManageRecipients | ImportRecipients | ViewReports | ExportReports => {
                require_rank(actor, Role::Admin)
            }

            // User management follows the lattice: super_admin manages anyone,
            // admin manages operators only
            ListUsers => require_rank(actor, Role::Admin),

            CreateUser { role } => can_manage(actor, role),

            EditUser { target } => can_manage(actor, target.role),

            DeactivateUser { target } => {
                if actor.id == target.id {
                    return Decision::Deny {
                        reason: "self_deactivation",
                    };
                }
                can_manage(actor, target.role)
            }

            ResetUserPassword { target } => can_manage(actor, target.role),

            ChangeUserRole { target, new_role } => {
                if actor.role != Role::SuperAdmin {
                    return Decision::Deny { reason: "denied" };
                }
                if actor.id == target.id && new_role.rank() < actor.role.rank() {
                    return Decision::Deny {
                        reason: "self_role_downgrade",
                    };
                }
                Decision::Allow
            }

            // Super admin only
            ViewAuditLogs | EditSettings => require_rank(actor, Role::SuperAdmin),
        }
    }
}

fn require_rank(actor: &User, minimum: Role) -> Decision {
    if actor.role.rank() >= minimum.rank() {
        Decision::Allow
    } else {
        Decision::Deny {
            reason: "role_required",
        }
    }
}

fn can_manage(actor: &User, target_role: Role) -> Decision {
    let allowed = match actor.role {
        Role::SuperAdmin => true,
        Role::Admin => target_role == Role::Operator,
        Role::Operator => false,
    };
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny { reason: "denied" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: format!("{}-user", role.as_str()),
            password_hash: "unused".into(),
            full_name: "Test".into(),
            role,
            is_active: true,
            must_change_password: false,
            password_history: Vec::new(),
            failed_login_count: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_package_actions_open_to_all_roles() {
        for role in [Role::Operator, Role::Admin, Role::SuperAdmin] {
            let actor = user(role);
            for action in [
                Action::ViewDashboard,
                Action::SearchPackages,
                Action::RegisterPackage,
                Action::UpdatePackageStatus,
                Action::ChangeOwnPassword,
            ] {
                assert!(AccessPolicy::decide(&actor, action).is_allowed());
            }
        }
    }

    #[test]
    fn test_recipient_and_report_actions_need_admin() {
        let operator = user(Role::Operator);
        for action in [
            Action::ManageRecipients,
            Action::ImportRecipients,
            Action::ViewReports,
            Action::ExportReports,
        ] {
            assert_eq!(
                AccessPolicy::decide(&operator, action).reason(),
                Some("role_required")
            );
            assert!(AccessPolicy::decide(&user(Role::Admin), action).is_allowed());
            assert!(AccessPolicy::decide(&user(Role::SuperAdmin), action).is_allowed());
        }
    }

    #[test]
    fn test_admin_manages_operators_only() {
        let admin = user(Role::Admin);
        let operator = user(Role::Operator);
        let other_admin = user(Role::Admin);
        let super_admin = user(Role::SuperAdmin);

        assert!(AccessPolicy::decide(&admin, Action::EditUser { target: &operator }).is_allowed());
        assert_eq!(
            AccessPolicy::decide(&admin, Action::EditUser { target: &other_admin }).reason(),
            Some("denied")
        );
        assert_eq!(
            AccessPolicy::decide(&admin, Action::EditUser { target: &super_admin }).reason(),
            Some("denied")
        );
    }

    #[test]
    fn test_super_admin_manages_everyone() {
        let super_admin = user(Role::SuperAdmin);
        for target_role in [Role::Operator, Role::Admin, Role::SuperAdmin] {
            let target = user(target_role);
            assert!(AccessPolicy::decide(
                &super_admin,
                Action::EditUser { target: &target }
            )
            .is_allowed());
            assert!(AccessPolicy::decide(
                &super_admin,
                Action::ResetUserPassword { target: &target }
            )
            .is_allowed());
        }
    }

    #[test]
    fn test_no_self_deactivation() {
        for role in [Role::Admin, Role::SuperAdmin] {
            let actor = user(role);
            let decision = AccessPolicy::decide(
                &actor,
                Action::DeactivateUser { target: &actor },
            );
            assert_eq!(decision.reason(), Some("self_deactivation"));
        }
    }

    #[test]
    fn test_role_change_is_super_admin_only() {
        let admin = user(Role::Admin);
        let operator = user(Role::Operator);
        assert_eq!(
            AccessPolicy::decide(
                &admin,
                Action::ChangeUserRole {
                    target: &operator,
                    new_role: Role::Admin,
                }
            )
            .reason(),
            Some("denied")
        );

        let super_admin = user(Role::SuperAdmin);
        assert!(AccessPolicy::decide(
            &super_admin,
            Action::ChangeUserRole {
                target: &operator,
                new_role: Role::Admin,
            }
        )
        .is_allowed());
    }

    #[test]
    fn test_no_self_role_downgrade() {
        let super_admin = user(Role::SuperAdmin);
        let decision = AccessPolicy::decide(
            &super_admin,
            Action::ChangeUserRole {
                target: &super_admin,
                new_role: Role::Admin,
            },
        );
        assert_eq!(decision.reason(), Some("self_role_downgrade"));

        // Re-asserting the same role on oneself is not a downgrade
        assert!(AccessPolicy::decide(
            &super_admin,
            Action::ChangeUserRole {
                target: &super_admin,
                new_role: Role::SuperAdmin,
            },
        )
        .is_allowed());
    }

    #[test]
    fn test_audit_and_settings_are_super_admin_only() {
        for action in [Action::ViewAuditLogs, Action::EditSettings] {
            assert!(!AccessPolicy::decide(&user(Role::Operator), action).is_allowed());
            assert!(!AccessPolicy::decide(&user(Role::Admin), action).is_allowed());
            assert!(AccessPolicy::decide(&user(Role::SuperAdmin), action).is_allowed());
        }
    }

    #[test]
    fn test_allowance_is_monotone_in_role() {
        // Any action allowed to a lower role is allowed to every higher role.
        let operator = user(Role::Operator);
        let admin = user(Role::Admin);
        let super_admin = user(Role::SuperAdmin);
        let target = user(Role::Operator);

        let actions = [
            Action::ViewDashboard,
            Action::RegisterPackage,
            Action::ManageRecipients,
            Action::ViewReports,
            Action::EditUser { target: &target },
            Action::ViewAuditLogs,
            Action::EditSettings,
        ];

        for action in actions {
            let by_operator = AccessPolicy::decide(&operator, action).is_allowed();
            let by_admin = AccessPolicy::decide(&admin, action).is_allowed();
            let by_super = AccessPolicy::decide(&super_admin, action).is_allowed();
            if by_operator {
                assert!(by_admin && by_super);
            }
            if by_admin {
                assert!(by_super);
            }
        }
    }
}
