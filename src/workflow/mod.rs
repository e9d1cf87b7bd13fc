//! Admin elevation requests: `none -> pending -> approved | denied`, and their effect on role.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::{AdminRequest, ReviewDecision, Role};
use crate::error::{ConflictKind, CoreError};
use crate::gate::{AuthorizationGate, Predicate};
use crate::identity::{Caller, IdentityStore};
use crate::store::{RequestStore, Store};

#[derive(Clone)]
pub struct AdminRequestWorkflow {
    store: Arc<dyn Store>,
    identities: IdentityStore,
    gate: AuthorizationGate,
    max_reason_len: usize,
}

impl AdminRequestWorkflow {
    pub fn new(store: Arc<dyn Store>, identities: IdentityStore, gate: AuthorizationGate, max_reason_len: usize) -> Self {
        Self {
            store,
            identities,
            gate,
            max_reason_len,
        }
    }

    pub async fn submit(&self, caller: &Caller, reason: &str) -> Result<AdminRequest, CoreError> {
        let requester = self.gate.require(caller, &[Predicate::Authenticated]).await?;
        let requester_id = requester.user_id();

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::validation("Reason is required"));
        }
        if reason.chars().count() > self.max_reason_len {
            return Err(CoreError::validation(format!(
                "Reason must be at most {} characters",
                self.max_reason_len
            )));
        }

        if self.identities.get_role(requester_id).await? == Role::Admin {
            return Err(CoreError::Conflict(ConflictKind::AlreadyAdmin));
        }

        let request = self.store.open_request(AdminRequest::pending(requester_id, reason)).await?;
        info!(
            target: "audit",
            request_id = %request.id,
            %requester_id,
            "admin request submitted, role now pending_admin"
        );
        Ok(request)
    }

    pub async fn review(&self, caller: &Caller, request_id: Uuid, decision: ReviewDecision) -> Result<AdminRequest, CoreError> {
        let reviewer = self
            .gate
            .require(caller, &[Predicate::HasRole(Role::Admin), Predicate::FreshCredential])
            .await?;
        let reviewer_id = reviewer.user_id();

        let existing = self
            .store
            .find_request(request_id)
            .await?
            .ok_or(CoreError::NotFound("request"))?;
        if existing.requester_id == reviewer_id {
            warn!(%request_id, %reviewer_id, "self-review refused");
            return Err(CoreError::forbidden("You cannot review your own request"));
        }

        let decided = match self.store.decide_request(request_id, decision, reviewer_id, Utc::now()).await {
            Ok(decided) => decided,
            Err(e) => {
                let err = CoreError::from(e);
                if matches!(err, CoreError::Conflict(_)) {
                    warn!(%request_id, %reviewer_id, "review lost: request already processed");
                }
                return Err(err);
            }
        };

        info!(
            target: "audit",
            %request_id,
            %reviewer_id,
            requester_id = %decided.requester_id,
            status = %decided.status,
            role = %decision.requester_role(),
            "admin request reviewed"
        );
        Ok(decided)
    }

    /// Admins see every request, everyone else only their own. Newest first.
    pub async fn list(&self, caller: &Caller) -> Result<Vec<AdminRequest>, CoreError> {
        let resolved = self.gate.require(caller, &[Predicate::Authenticated]).await?;
        let user_id = resolved.user_id();

        let scope = match self.identities.get_role(user_id).await? {
            Role::Admin => None,
            _ => Some(user_id),
        };
        Ok(self.store.list_requests(scope).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::RequestStatus;
    use crate::identity::{Confidence, Identity};
    use crate::store::{MemoryStore, ProfileStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        identities: IdentityStore,
        workflow: AdminRequestWorkflow,
    }

    const ROOT: &str = "root@campus.test";

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let identities = IdentityStore::new(store.clone(), Some(ROOT.to_string()));
        let gate = AuthorizationGate::new(identities.clone(), store.clone());
        let workflow = AdminRequestWorkflow::new(store.clone(), identities.clone(), gate, 200);
        Fixture {
            store,
            identities,
            workflow,
        }
    }

    async fn signed_in(f: &Fixture, email: &str) -> Caller {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        };
        f.store.ensure_profile(identity.user_id, email).await.unwrap();
        Caller::identified(identity, Confidence::Session)
    }

    fn id_of(caller: &Caller) -> Uuid {
        caller.identity().unwrap().user_id
    }

    #[tokio::test]
    async fn approval_promotes_the_requester() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;
        let root = signed_in(&f, ROOT).await;

        let request = f.workflow.submit(&student, "  I run the robotics club  ").await.unwrap();
        assert_eq!(request.reason, "I run the robotics club");
        assert_eq!(f.identities.get_role(id_of(&student)).await.unwrap(), Role::PendingAdmin);

        let decided = f.workflow.review(&root, request.id, ReviewDecision::Approve).await.unwrap();
        assert_eq!(decided.status, RequestStatus::Approved);
        assert_eq!(decided.reviewer_id, Some(id_of(&root)));
        assert!(decided.reviewed_at.is_some());
        assert_eq!(f.identities.get_role(id_of(&student)).await.unwrap(), Role::Admin);
    }

    #[tokio::test]
    async fn second_pending_request_is_a_conflict() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;
        f.workflow.submit(&student, "first").await.unwrap();

        let err = f.workflow.submit(&student, "second").await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::PendingRequestExists)));
        assert_eq!(f.workflow.list(&student).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_reason_changes_nothing() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;

        assert!(matches!(f.workflow.submit(&student, " \n\t ").await, Err(CoreError::Validation(_))));
        assert!(matches!(
            f.workflow.submit(&student, &"x".repeat(201)).await,
            Err(CoreError::Validation(_))
        ));
        assert_eq!(f.identities.get_role(id_of(&student)).await.unwrap(), Role::Student);
        assert!(f.workflow.list(&student).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn anonymous_submit_is_an_authentication_error() {
        let f = fixture();
        assert!(matches!(
            f.workflow.submit(&Caller::Anonymous, "reason").await,
            Err(CoreError::Authentication)
        ));
    }

    #[tokio::test]
    async fn denial_returns_to_student_and_allows_resubmission() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;
        let root = signed_in(&f, ROOT).await;

        let first = f.workflow.submit(&student, "first").await.unwrap();
        f.workflow.review(&root, first.id, ReviewDecision::Deny).await.unwrap();
        assert_eq!(f.identities.get_role(id_of(&student)).await.unwrap(), Role::Student);

        let second = f.workflow.submit(&student, "second").await.unwrap();
        assert_ne!(first.id, second.id);
        let history = f.workflow.list(&student).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
    }

    #[tokio::test]
    async fn non_admin_review_is_forbidden_and_changes_nothing() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;
        let peer = signed_in(&f, "peer@campus.test").await;
        let request = f.workflow.submit(&student, "please").await.unwrap();

        let err = f.workflow.review(&peer, request.id, ReviewDecision::Approve).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert_eq!(f.identities.get_role(id_of(&student)).await.unwrap(), Role::PendingAdmin);
        let stored = f.store.find_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn reconstructed_admin_cannot_review() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;
        let request = f.workflow.submit(&student, "please").await.unwrap();
        let weak_root = Caller::identified(
            Identity {
                user_id: Uuid::new_v4(),
                email: ROOT.to_string(),
            },
            Confidence::Reconstructed,
        );
        f.store
            .ensure_profile(id_of(&weak_root), ROOT)
            .await
            .unwrap();

        assert!(matches!(
            f.workflow.review(&weak_root, request.id, ReviewDecision::Approve).await,
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_reviews_have_one_winner() {
        let f = fixture();
        let student = signed_in(&f, "s@campus.test").await;
        let root = signed_in(&f, ROOT).await;
        let other_admin = signed_in(&f, "other-admin@campus.test").await;

        // Promote a second admin through the workflow itself
        let promotion = f.workflow.submit(&other_admin, "co-moderator").await.unwrap();
        f.workflow.review(&root, promotion.id, ReviewDecision::Approve).await.unwrap();

        let request = f.workflow.submit(&student, "please").await.unwrap();
        let (a, b) = tokio::join!(
            f.workflow.review(&root, request.id, ReviewDecision::Approve),
            f.workflow.review(&other_admin, request.id, ReviewDecision::Deny),
        );

        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert!(matches!(loser, CoreError::Conflict(ConflictKind::AlreadyProcessed)));

        let expected = match winner.status {
            RequestStatus::Approved => Role::Admin,
            _ => Role::Student,
        };
        assert_eq!(f.identities.get_role(id_of(&student)).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn admins_cannot_review_themselves_or_resubmit() {
        let f = fixture();
        let root = signed_in(&f, ROOT).await;
        assert!(matches!(
            f.workflow.submit(&root, "more power").await,
            Err(CoreError::Conflict(ConflictKind::AlreadyAdmin))
        ));

        let unknown = f.workflow.review(&root, Uuid::new_v4(), ReviewDecision::Deny).await;
        assert!(matches!(unknown, Err(CoreError::NotFound("request"))));
    }

    #[tokio::test]
    async fn listing_is_scoped_by_role() {
        let f = fixture();
        let a = signed_in(&f, "a@campus.test").await;
        let b = signed_in(&f, "b@campus.test").await;
        let root = signed_in(&f, ROOT).await;
        f.workflow.submit(&a, "a").await.unwrap();
        f.workflow.submit(&b, "b").await.unwrap();

        let mine = f.workflow.list(&a).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].requester_id, id_of(&a));

        let all = f.workflow.list(&root).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].requester_id, id_of(&b));
    }
}
