//! Reusable authorization guard. Every check reads current state.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::database::models::Role;
use crate::error::CoreError;
use crate::identity::{Caller, Confidence, IdentityStore, ResolvedIdentity};
use crate::store::{GroupStore, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Authenticated,
    HasRole(Role),
    MemberOf(Uuid),
    /// Identity established by session or token, not reconstructed from loose credentials
    FreshCredential,
    AnyOf(Vec<Predicate>),
}

#[derive(Clone)]
pub struct AuthorizationGate {
    identities: IdentityStore,
    store: Arc<dyn Store>,
}

impl AuthorizationGate {
    pub fn new(identities: IdentityStore, store: Arc<dyn Store>) -> Self {
        Self { identities, store }
    }

    /// All predicates must hold. Anonymous callers fail with `Authentication`,
    /// identified callers failing a predicate with `Forbidden`.
    pub async fn require<'c>(&self, caller: &'c Caller, predicates: &[Predicate]) -> Result<&'c ResolvedIdentity, CoreError> {
        let Some(resolved) = caller.resolved() else {
            return Err(CoreError::Authentication);
        };

        for predicate in predicates {
            if !self.holds(resolved, predicate).await? {
                debug!(user_id = %resolved.user_id(), ?predicate, "predicate failed");
                return Err(CoreError::forbidden(denial_message(predicate)));
            }
        }
        Ok(resolved)
    }

    fn holds<'a>(&'a self, resolved: &'a ResolvedIdentity, predicate: &'a Predicate) -> BoxFuture<'a, Result<bool, CoreError>> {
        async move {
            let user_id = resolved.user_id();
            let held = match predicate {
                Predicate::Authenticated => true,
                Predicate::HasRole(role) => self.identities.get_role(user_id).await? == *role,
                Predicate::MemberOf(group_id) => self.store.is_member(*group_id, user_id).await?,
                Predicate::FreshCredential => resolved.confidence > Confidence::Reconstructed,
                Predicate::AnyOf(options) => {
                    let mut any = false;
                    for option in options {
                        if self.holds(resolved, option).await? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
            };
            Ok(held)
        }
        .boxed()
    }
}

fn denial_message(predicate: &Predicate) -> &'static str {
    match predicate {
        Predicate::Authenticated => "Authentication required",
        Predicate::HasRole(Role::Admin) => "Admin role required",
        Predicate::HasRole(_) => "Insufficient role",
        Predicate::MemberOf(_) => "Not a member of this group",
        Predicate::FreshCredential => "Please sign in again to perform this action",
        Predicate::AnyOf(_) => "Access denied",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AdminRequest, Group, ReviewDecision};
    use crate::identity::Identity;
    use crate::store::{MemoryStore, ProfileStore, RequestStore};
    use chrono::Utc;

    struct Fixture {
        store: Arc<MemoryStore>,
        gate: AuthorizationGate,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let identities = IdentityStore::new(store.clone(), None);
        let gate = AuthorizationGate::new(identities, store.clone());
        Fixture { store, gate }
    }

    async fn caller(f: &Fixture, email: &str, confidence: Confidence) -> Caller {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        };
        f.store.ensure_profile(identity.user_id, email).await.unwrap();
        Caller::identified(identity, confidence)
    }

    async fn promote(f: &Fixture, caller: &Caller) {
        let id = caller.identity().unwrap().user_id;
        let request = f.store.open_request(AdminRequest::pending(id, "help")).await.unwrap();
        f.store
            .decide_request(request.id, ReviewDecision::Approve, Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn anonymous_is_an_authentication_error() {
        let f = fixture();
        let err = f.gate.require(&Caller::Anonymous, &[Predicate::Authenticated]).await.unwrap_err();
        assert!(matches!(err, CoreError::Authentication));
    }

    #[tokio::test]
    async fn role_checks_read_current_state() {
        let f = fixture();
        let user = caller(&f, "ida@campus.test", Confidence::Token).await;
        let admin_only = [Predicate::HasRole(Role::Admin)];

        assert!(matches!(f.gate.require(&user, &admin_only).await, Err(CoreError::Forbidden(_))));
        promote(&f, &user).await;
        assert!(f.gate.require(&user, &admin_only).await.is_ok());
    }

    #[tokio::test]
    async fn predicates_are_conjunctive() {
        let f = fixture();
        let user = caller(&f, "jo@campus.test", Confidence::Reconstructed).await;
        promote(&f, &user).await;

        let err = f
            .gate
            .require(&user, &[Predicate::HasRole(Role::Admin), Predicate::FreshCredential])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn any_of_accepts_members_or_admins() {
        let f = fixture();
        let owner = caller(&f, "owner@campus.test", Confidence::Session).await;
        let member = caller(&f, "member@campus.test", Confidence::Session).await;
        let outsider = caller(&f, "outsider@campus.test", Confidence::Session).await;
        promote(&f, &owner).await;

        let group = f
            .store
            .create_group(Group::new("Chem", None, owner.identity().unwrap().user_id))
            .await
            .unwrap();
        f.store.add_membership(group.id, member.identity().unwrap().user_id).await.unwrap();

        let rule = [Predicate::AnyOf(vec![Predicate::MemberOf(group.id), Predicate::HasRole(Role::Admin)])];
        assert!(f.gate.require(&owner, &rule).await.is_ok());
        assert!(f.gate.require(&member, &rule).await.is_ok());
        assert!(f.gate.require(&outsider, &rule).await.is_err());
    }
}
