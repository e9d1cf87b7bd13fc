use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GroupStore, MessageStore, ProfileStore, RequestStore, Store, StoreError, StoreResult};
use crate::database::models::{
    AdminRequest, Group, GroupChanges, Membership, Message, Profile, RequestStatus, ReviewDecision, Role,
};

/// Process-local engine. Every operation runs under the single state lock, so each trait
/// method is atomic with respect to every other.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<Uuid, Profile>,
    /// Insertion order doubles as creation order
    requests: Vec<AdminRequest>,
    groups: HashMap<Uuid, GroupEntry>,
}

struct GroupEntry {
    group: Group,
    members: BTreeMap<Uuid, Membership>,
    messages: Vec<Message>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn set_role(&mut self, user_id: Uuid, role: Role) -> StoreResult<()> {
        let profile = self.profiles.get_mut(&user_id).ok_or(StoreError::NotFound("profile"))?;
        profile.role = role;
        profile.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.state.read().await.profiles.get(&id).cloned())
    }

    async fn find_profile_by_email(&self, email: &str) -> StoreResult<Option<Profile>> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn ensure_profile(&self, id: Uuid, email: &str) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .entry(id)
            .or_insert_with(|| Profile::signup(id, email));
        Ok(profile.clone())
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn open_request(&self, request: AdminRequest) -> StoreResult<AdminRequest> {
        let mut state = self.state.write().await;
        if !state.profiles.contains_key(&request.requester_id) {
            return Err(StoreError::NotFound("profile"));
        }
        let pending = state
            .requests
            .iter()
            .any(|r| r.requester_id == request.requester_id && r.status == RequestStatus::Pending);
        if pending {
            return Err(StoreError::PendingExists);
        }

        state.set_role(request.requester_id, Role::PendingAdmin)?;
        state.requests.push(request.clone());
        Ok(request)
    }

    async fn decide_request(
        &self,
        id: Uuid,
        decision: ReviewDecision,
        reviewer_id: Uuid,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<AdminRequest> {
        let mut state = self.state.write().await;
        let index = state
            .requests
            .iter()
            .position(|r| r.id == id)
            .ok_or(StoreError::NotFound("request"))?;
        if state.requests[index].status.is_terminal() {
            return Err(StoreError::AlreadyProcessed);
        }

        let requester_id = state.requests[index].requester_id;
        state.set_role(requester_id, decision.requester_role())?;

        let request = &mut state.requests[index];
        request.status = decision.status();
        request.reviewer_id = Some(reviewer_id);
        request.reviewed_at = Some(reviewed_at);
        Ok(request.clone())
    }

    async fn find_request(&self, id: Uuid) -> StoreResult<Option<AdminRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn list_requests(&self, requester: Option<Uuid>) -> StoreResult<Vec<AdminRequest>> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .iter()
            .rev()
            .filter(|r| requester.map_or(true, |id| r.requester_id == id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn create_group(&self, group: Group) -> StoreResult<Group> {
        let mut state = self.state.write().await;
        state.groups.insert(
            group.id,
            GroupEntry {
                group: group.clone(),
                members: BTreeMap::new(),
                messages: Vec::new(),
            },
        );
        Ok(group)
    }

    async fn update_group(&self, id: Uuid, changes: GroupChanges) -> StoreResult<Group> {
        let mut state = self.state.write().await;
        let entry = state.groups.get_mut(&id).ok_or(StoreError::NotFound("group"))?;
        if let Some(name) = changes.name {
            entry.group.name = name;
        }
        if let Some(description) = changes.description {
            entry.group.description = Some(description);
        }
        entry.group.updated_at = Utc::now();
        Ok(entry.group.clone())
    }

    async fn delete_group(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.groups.remove(&id).map(|_| ()).ok_or(StoreError::NotFound("group"))
    }

    async fn find_group(&self, id: Uuid) -> StoreResult<Option<Group>> {
        let state = self.state.read().await;
        Ok(state.groups.get(&id).map(|e| e.group.clone()))
    }

    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state.groups.values().map(|e| e.group.clone()).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(groups)
    }

    async fn add_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let entry = state.groups.get_mut(&group_id).ok_or(StoreError::NotFound("group"))?;
        if entry.members.contains_key(&user_id) {
            return Ok(false);
        }
        entry.members.insert(
            user_id,
            Membership {
                group_id,
                user_id,
                joined_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn remove_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .groups
            .get_mut(&group_id)
            .map_or(false, |e| e.members.remove(&user_id).is_some()))
    }

    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .get(&group_id)
            .map_or(false, |e| e.members.contains_key(&user_id)))
    }

    async fn list_members(&self, group_id: Uuid) -> StoreResult<Vec<Membership>> {
        let state = self.state.read().await;
        let entry = state.groups.get(&group_id).ok_or(StoreError::NotFound("group"))?;
        let mut members: Vec<Membership> = entry.members.values().cloned().collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_if_member(&self, group_id: Uuid, sender_id: Uuid, content: &str) -> StoreResult<Message> {
        let mut state = self.state.write().await;
        let entry = match state.groups.get_mut(&group_id) {
            Some(entry) if entry.members.contains_key(&sender_id) => entry,
            _ => return Err(StoreError::NotMember),
        };

        let (seq, created_at) = match entry.messages.last() {
            Some(last) => (last.seq + 1, Utc::now().max(last.created_at)),
            None => (1, Utc::now()),
        };
        let message = Message {
            id: Uuid::new_v4(),
            group_id,
            seq,
            sender_id,
            content: content.to_string(),
            created_at,
        };
        entry.messages.push(message.clone());
        Ok(message)
    }

    async fn messages_since(&self, group_id: Uuid, since: Option<i64>, limit: usize) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        let Some(entry) = state.groups.get(&group_id) else {
            return Ok(Vec::new());
        };
        let since = since.unwrap_or(0);
        Ok(entry
            .messages
            .iter()
            .filter(|m| m.seq > since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_seq(&self, group_id: Uuid) -> StoreResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .groups
            .get(&group_id)
            .and_then(|e| e.messages.last())
            .map_or(0, |m| m.seq))
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
