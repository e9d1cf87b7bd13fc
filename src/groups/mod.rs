use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::database::models::{Group, GroupChanges, Membership, Role};
use crate::error::CoreError;
use crate::gate::{AuthorizationGate, Predicate};
use crate::identity::{Caller, IdentityStore};
use crate::store::{GroupStore, Store};

const MAX_GROUP_NAME: usize = 100;

/// Told when access to a group ends, after the store change has committed
pub trait MembershipObserver: Send + Sync {
    fn membership_ended(&self, group_id: Uuid, user_id: Uuid);

    fn group_deleted(&self, group_id: Uuid);
}

/// Which users belong to which groups. A membership row is the whole proof of access.
#[derive(Clone)]
pub struct GroupMembershipRegistry {
    store: Arc<dyn Store>,
    identities: IdentityStore,
    gate: AuthorizationGate,
    observers: Vec<Arc<dyn MembershipObserver>>,
}

fn clean_name(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("Group name is required"));
    }
    if name.chars().count() > MAX_GROUP_NAME {
        return Err(CoreError::validation(format!(
            "Group name must be at most {} characters",
            MAX_GROUP_NAME
        )));
    }
    Ok(name.to_string())
}

impl GroupMembershipRegistry {
    pub fn new(store: Arc<dyn Store>, identities: IdentityStore, gate: AuthorizationGate) -> Self {
        Self {
            store,
            identities,
            gate,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MembershipObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn notify_ended(&self, group_id: Uuid, user_id: Uuid) {
        for observer in &self.observers {
            observer.membership_ended(group_id, user_id);
        }
    }

    pub async fn create_group(&self, caller: &Caller, name: &str, description: Option<String>) -> Result<Group, CoreError> {
        let admin = self.gate.require(caller, &[Predicate::HasRole(Role::Admin)]).await?;
        let name = clean_name(name)?;
        let description = description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());

        let group = self.store.create_group(Group::new(name, description, admin.user_id())).await?;
        info!(group_id = %group.id, created_by = %group.created_by, "group created");
        Ok(group)
    }

    pub async fn update_group(&self, caller: &Caller, group_id: Uuid, mut changes: GroupChanges) -> Result<Group, CoreError> {
        self.gate.require(caller, &[Predicate::HasRole(Role::Admin)]).await?;
        if let Some(name) = changes.name.as_deref() {
            changes.name = Some(clean_name(name)?);
        }

        let group = self.store.update_group(group_id, changes).await?;
        info!(%group_id, "group updated");
        Ok(group)
    }

    /// Drops the group together with its memberships and messages
    pub async fn delete_group(&self, caller: &Caller, group_id: Uuid) -> Result<(), CoreError> {
        let admin = self.gate.require(caller, &[Predicate::HasRole(Role::Admin)]).await?;
        self.store.delete_group(group_id).await?;
        info!(%group_id, deleted_by = %admin.user_id(), "group deleted");
        for observer in &self.observers {
            observer.group_deleted(group_id);
        }
        Ok(())
    }

    pub async fn list_groups(&self, caller: &Caller) -> Result<Vec<Group>, CoreError> {
        self.gate.require(caller, &[Predicate::Authenticated]).await?;
        Ok(self.store.list_groups().await?)
    }

    pub async fn get_group(&self, caller: &Caller, group_id: Uuid) -> Result<Group, CoreError> {
        self.gate.require(caller, &[Predicate::Authenticated]).await?;
        self.store.find_group(group_id).await?.ok_or(CoreError::NotFound("group"))
    }

    /// Idempotent: joining twice leaves one membership
    pub async fn join(&self, caller: &Caller, group_id: Uuid) -> Result<(), CoreError> {
        let user = self.gate.require(caller, &[Predicate::Authenticated]).await?;
        if self.store.add_membership(group_id, user.user_id()).await? {
            info!(%group_id, user_id = %user.user_id(), "joined group");
        }
        Ok(())
    }

    /// Idempotent: leaving a group you are not in is a no-op
    pub async fn leave(&self, caller: &Caller, group_id: Uuid) -> Result<(), CoreError> {
        let user = self.gate.require(caller, &[Predicate::Authenticated]).await?;
        if self.store.remove_membership(group_id, user.user_id()).await? {
            info!(%group_id, user_id = %user.user_id(), "left group");
            self.notify_ended(group_id, user.user_id());
        }
        Ok(())
    }

    pub async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool, CoreError> {
        Ok(self.store.is_member(group_id, user_id).await?)
    }

    /// Members and admins only
    pub async fn members(&self, caller: &Caller, group_id: Uuid) -> Result<Vec<Membership>, CoreError> {
        self.gate
            .require(
                caller,
                &[Predicate::AnyOf(vec![Predicate::MemberOf(group_id), Predicate::HasRole(Role::Admin)])],
            )
            .await?;
        Ok(self.store.list_members(group_id).await?)
    }

    pub async fn add_member(&self, caller: &Caller, group_id: Uuid, user_id: Uuid) -> Result<(), CoreError> {
        let admin = self.gate.require(caller, &[Predicate::HasRole(Role::Admin)]).await?;
        if self.identities.profile(user_id).await?.is_none() {
            return Err(CoreError::NotFound("user"));
        }
        if self.store.add_membership(group_id, user_id).await? {
            info!(%group_id, %user_id, added_by = %admin.user_id(), "member added");
        }
        Ok(())
    }

    pub async fn remove_member(&self, caller: &Caller, group_id: Uuid, user_id: Uuid) -> Result<(), CoreError> {
        let admin = self.gate.require(caller, &[Predicate::HasRole(Role::Admin)]).await?;
        if self.store.remove_membership(group_id, user_id).await? {
            info!(%group_id, %user_id, removed_by = %admin.user_id(), "member removed");
            self.notify_ended(group_id, user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Confidence, Identity};
    use crate::store::{MemoryStore, ProfileStore};

    const ROOT: &str = "root@campus.test";

    async fn setup() -> (GroupMembershipRegistry, Arc<MemoryStore>, Caller) {
        let store = Arc::new(MemoryStore::new());
        let identities = IdentityStore::new(store.clone(), Some(ROOT.to_string()));
        let gate = AuthorizationGate::new(identities.clone(), store.clone());
        let registry = GroupMembershipRegistry::new(store.clone(), identities, gate);
        let root = user(&store, ROOT).await;
        (registry, store, root)
    }

    async fn user(store: &MemoryStore, email: &str) -> Caller {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        };
        store.ensure_profile(identity.user_id, email).await.unwrap();
        Caller::identified(identity, Confidence::Token)
    }

    fn id_of(caller: &Caller) -> Uuid {
        caller.identity().unwrap().user_id
    }

    #[tokio::test]
    async fn join_and_leave_are_idempotent() {
        let (registry, store, root) = setup().await;
        let student = user(&store, "s@campus.test").await;
        let group = registry.create_group(&root, "Biology", None).await.unwrap();

        registry.join(&student, group.id).await.unwrap();
        registry.join(&student, group.id).await.unwrap();
        assert!(registry.is_member(group.id, id_of(&student)).await.unwrap());
        assert_eq!(registry.members(&student, group.id).await.unwrap().len(), 1);

        registry.leave(&student, group.id).await.unwrap();
        registry.leave(&student, group.id).await.unwrap();
        assert!(!registry.is_member(group.id, id_of(&student)).await.unwrap());
    }

    #[tokio::test]
    async fn joining_an_unknown_group_is_not_found() {
        let (registry, store, _) = setup().await;
        let student = user(&store, "s@campus.test").await;
        assert!(matches!(
            registry.join(&student, Uuid::new_v4()).await,
            Err(CoreError::NotFound("group"))
        ));
    }

    #[tokio::test]
    async fn group_management_is_admin_only() {
        let (registry, store, root) = setup().await;
        let student = user(&store, "s@campus.test").await;

        assert!(matches!(
            registry.create_group(&student, "Mine", None).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(registry.create_group(&root, "   ", None).await, Err(CoreError::Validation(_))));

        let group = registry
            .create_group(&root, " History ", Some("Ancient and modern".to_string()))
            .await
            .unwrap();
        assert_eq!(group.name, "History");

        let renamed = registry
            .update_group(
                &root,
                group.id,
                GroupChanges {
                    name: Some("World History".to_string()),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "World History");
        assert_eq!(renamed.description.as_deref(), Some("Ancient and modern"));

        assert!(registry.delete_group(&student, group.id).await.is_err());
        registry.delete_group(&root, group.id).await.unwrap();
        assert!(registry.list_groups(&student).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn members_are_hidden_from_outsiders() {
        let (registry, store, root) = setup().await;
        let member = user(&store, "m@campus.test").await;
        let outsider = user(&store, "o@campus.test").await;
        let group = registry.create_group(&root, "Art", None).await.unwrap();

        registry.add_member(&root, group.id, id_of(&member)).await.unwrap();
        assert!(matches!(
            registry.members(&outsider, group.id).await,
            Err(CoreError::Forbidden(_))
        ));
        assert_eq!(registry.members(&root, group.id).await.unwrap().len(), 1);

        registry.remove_member(&root, group.id, id_of(&member)).await.unwrap();
        assert!(!registry.is_member(group.id, id_of(&member)).await.unwrap());
        assert!(matches!(
            registry.add_member(&root, group.id, Uuid::new_v4()).await,
            Err(CoreError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn anonymous_callers_cannot_list() {
        let (registry, _, _) = setup().await;
        assert!(matches!(
            registry.list_groups(&Caller::Anonymous).await,
            Err(CoreError::Authentication)
        ));
    }

    #[derive(Default)]
    struct Recorder {
        ended: parking_lot::Mutex<Vec<(Uuid, Uuid)>>,
        deleted: parking_lot::Mutex<Vec<Uuid>>,
    }

    impl MembershipObserver for Recorder {
        fn membership_ended(&self, group_id: Uuid, user_id: Uuid) {
            self.ended.lock().push((group_id, user_id));
        }

        fn group_deleted(&self, group_id: Uuid) {
            self.deleted.lock().push(group_id);
        }
    }

    #[tokio::test]
    async fn observers_hear_about_memberships_that_actually_end() {
        let (registry, store, root) = setup().await;
        let recorder = Arc::new(Recorder::default());
        let registry = registry.with_observer(recorder.clone());
        let student = user(&store, "s@campus.test").await;
        let other = user(&store, "o@campus.test").await;
        let group = registry.create_group(&root, "Drama", None).await.unwrap();

        // Not a member yet: nothing to report
        registry.leave(&student, group.id).await.unwrap();
        assert!(recorder.ended.lock().is_empty());

        registry.join(&student, group.id).await.unwrap();
        registry.join(&other, group.id).await.unwrap();
        registry.leave(&student, group.id).await.unwrap();
        registry.leave(&student, group.id).await.unwrap();
        registry.remove_member(&root, group.id, id_of(&other)).await.unwrap();
        assert_eq!(
            *recorder.ended.lock(),
            vec![(group.id, id_of(&student)), (group.id, id_of(&other))]
        );

        registry.delete_group(&root, group.id).await.unwrap();
        assert_eq!(*recorder.deleted.lock(), vec![group.id]);
    }
}
