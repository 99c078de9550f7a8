//! # Authorization Decider
//!
//! Combines the routing classification with the credential outcome into a final
//! allow/deny decision. The rules are evaluated in a fixed order:
//!
//! 1. `Public` allows unconditionally; a valid identity is attached if there is one.
//! 2. `Unmatched` is `NotFound`, for anonymous and authenticated callers alike.
//! 3. `Protected(roles)`:
//!    - no credential is `Unauthenticated`
//!    - a credential that failed validation is `Unauthenticated` with the credential
//!      invalidated
//!    - a valid identity whose role is not in `roles` is `Forbidden`
//!    - otherwise allow with the identity attached
//!
//! Authentication failures are always reported before role failures.

use crate::auth::providers::CredentialError;
use crate::core::types::{AccessDecision, DenyReason, Identity, RoutingDecision};

/// Outcome of credential extraction plus validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    /// Nothing was extracted
    Absent,

    /// A credential was present but failed validation
    Invalid(CredentialError),

    Valid(Identity),
}

impl CredentialState {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Absent => "absent",
            CredentialState::Invalid(_) => "invalid",
            CredentialState::Valid(_) => "valid",
        }
    }
}

/// Stateless decision function
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationDecider;

impl AuthorizationDecider {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(&self, routing: &RoutingDecision<'_>, credential: CredentialState) -> AccessDecision {
        match routing {
            RoutingDecision::Public => AccessDecision::Allow {
                identity: match credential {
                    CredentialState::Valid(identity) => Some(identity),
                    _ => None,
                },
            },
            RoutingDecision::Unmatched => AccessDecision::Deny(DenyReason::NotFound),
            RoutingDecision::Protected { roles, .. } => match credential {
                CredentialState::Absent => AccessDecision::Deny(DenyReason::Unauthenticated {
                    credential_invalidated: false,
                }),
                CredentialState::Invalid(_) => AccessDecision::Deny(DenyReason::Unauthenticated {
                    credential_invalidated: true,
                }),
                CredentialState::Valid(identity) if !roles.contains(&identity.role) => {
                    AccessDecision::Deny(DenyReason::Forbidden)
                }
                CredentialState::Valid(identity) => AccessDecision::Allow {
                    identity: Some(identity),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Role, RoleSet};
    use chrono::{Duration, Utc};

    fn identity(role: Role) -> Identity {
        Identity {
            subject_id: "user-1".to_string(),
            role,
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn roles(list: &[Role]) -> RoleSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_public_allows_without_credential() {
        let decision = AuthorizationDecider.decide(&RoutingDecision::Public, CredentialState::Absent);
        assert_eq!(decision, AccessDecision::Allow { identity: None });
    }

    #[test]
    fn test_public_attaches_valid_identity_and_ignores_invalid() {
        let decider = AuthorizationDecider::new();

        let with_identity = decider.decide(
            &RoutingDecision::Public,
            CredentialState::Valid(identity(Role::Student)),
        );
        assert!(matches!(with_identity, AccessDecision::Allow { identity: Some(_) }));

        let invalid = decider.decide(
            &RoutingDecision::Public,
            CredentialState::Invalid(CredentialError::Expired),
        );
        assert_eq!(invalid, AccessDecision::Allow { identity: None });
    }

    #[test]
    fn test_unmatched_is_not_found_for_everyone() {
        let decider = AuthorizationDecider::new();
        for credential in [
            CredentialState::Absent,
            CredentialState::Invalid(CredentialError::Expired),
            CredentialState::Valid(identity(Role::Admin)),
        ] {
            assert_eq!(
                decider.decide(&RoutingDecision::Unmatched, credential),
                AccessDecision::Deny(DenyReason::NotFound)
            );
        }
    }

    #[test]
    fn test_protected_rules_in_order() {
        let decider = AuthorizationDecider::new();
        let allowed = roles(&[Role::Instructor, Role::Admin]);
        let route = RoutingDecision::Protected {
            pattern: "/api/courses/create",
            roles: &allowed,
        };

        assert_eq!(
            decider.decide(&route, CredentialState::Absent),
            AccessDecision::Deny(DenyReason::Unauthenticated {
                credential_invalidated: false
            })
        );
        assert_eq!(
            decider.decide(
                &route,
                CredentialState::Invalid(CredentialError::Malformed("bad signature".into()))
            ),
            AccessDecision::Deny(DenyReason::Unauthenticated {
                credential_invalidated: true
            })
        );
        assert_eq!(
            decider.decide(&route, CredentialState::Valid(identity(Role::Student))),
            AccessDecision::Deny(DenyReason::Forbidden)
        );
        let admin = identity(Role::Admin);
        assert_eq!(
            decider.decide(&route, CredentialState::Valid(admin.clone())),
            AccessDecision::Allow {
                identity: Some(admin)
            }
        );
    }

    #[test]
    fn test_expired_credential_treated_like_missing_but_clears() {
        let decider = AuthorizationDecider::new();
        let allowed = roles(&[Role::Student]);
        let route = RoutingDecision::Protected {
            pattern: "/api/auth/profile",
            roles: &allowed,
        };

        match decider.decide(&route, CredentialState::Invalid(CredentialError::Expired)) {
            AccessDecision::Deny(DenyReason::Unauthenticated {
                credential_invalidated,
            }) => assert!(credential_invalidated),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_decision_is_repeatable() {
        let decider = AuthorizationDecider::new();
        let allowed = roles(&[Role::Admin]);
        let route = RoutingDecision::Protected {
            pattern: "/api/courses/delete",
            roles: &allowed,
        };
        let user = identity(Role::Instructor);

        let first = decider.decide(&route, CredentialState::Valid(user.clone()));
        for _ in 0..5 {
            assert_eq!(decider.decide(&route, CredentialState::Valid(user.clone())), first);
        }
    }
}
