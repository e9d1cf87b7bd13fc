//! Storage traits behind the core components.
//!
//! Every method the core relies on for atomicity (opening and deciding an admin request,
//! appending a message while a membership holds) is one atomic unit in each engine.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{AdminRequest, Group, GroupChanges, Membership, Message, Profile, ReviewDecision};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Requester already has a pending request
    #[error("a pending request already exists for this requester")]
    PendingExists,

    /// Compare-and-swap on a request lost: status was no longer pending
    #[error("request is no longer pending")]
    AlreadyProcessed,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Guarded append refused because the sender holds no membership
    #[error("sender is not a member of the group")]
    NotMember,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profile(&self, id: Uuid) -> StoreResult<Option<Profile>>;

    async fn find_profile_by_email(&self, email: &str) -> StoreResult<Option<Profile>>;

    /// Idempotent signup. Returns the stored profile, creating it as a student when missing.
    async fn ensure_profile(&self, id: Uuid, email: &str) -> StoreResult<Profile>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Inserts the pending request and moves the requester to `pending_admin` in one unit.
    /// Fails with `PendingExists` when the requester already has a pending row.
    async fn open_request(&self, request: AdminRequest) -> StoreResult<AdminRequest>;

    /// Applies the decision only while the request is still pending, and sets the requester's
    /// role in the same unit. The loser of a race gets `AlreadyProcessed`.
    async fn decide_request(
        &self,
        id: Uuid,
        decision: ReviewDecision,
        reviewer_id: Uuid,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<AdminRequest>;

    async fn find_request(&self, id: Uuid) -> StoreResult<Option<AdminRequest>>;

    /// Newest first. `None` lists every requester.
    async fn list_requests(&self, requester: Option<Uuid>) -> StoreResult<Vec<AdminRequest>>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn create_group(&self, group: Group) -> StoreResult<Group>;

    async fn update_group(&self, id: Uuid, changes: GroupChanges) -> StoreResult<Group>;

    /// Removes the group with its memberships and messages
    async fn delete_group(&self, id: Uuid) -> StoreResult<()>;

    async fn find_group(&self, id: Uuid) -> StoreResult<Option<Group>>;

    async fn list_groups(&self) -> StoreResult<Vec<Group>>;

    /// Returns true when a new membership row was created
    async fn add_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Returns true when a membership row was removed
    async fn remove_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    async fn list_members(&self, group_id: Uuid) -> StoreResult<Vec<Membership>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Membership check and insert as one guarded write. The next `seq` for the group is
    /// assigned here and `created_at` never runs backwards within a group.
    async fn append_if_member(&self, group_id: Uuid, sender_id: Uuid, content: &str) -> StoreResult<Message>;

    /// Messages with `seq > since`, ascending, at most `limit`
    async fn messages_since(&self, group_id: Uuid, since: Option<i64>, limit: usize) -> StoreResult<Vec<Message>>;

    /// Highest committed `seq` for the group, 0 when empty
    async fn latest_seq(&self, group_id: Uuid) -> StoreResult<i64>;
}

#[async_trait]
pub trait Store: ProfileStore + RequestStore + GroupStore + MessageStore {
    /// Name reported by the health endpoint
    fn engine(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;
}
