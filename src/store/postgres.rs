use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{GroupStore, MessageStore, ProfileStore, RequestStore, Store, StoreError, StoreResult};
use crate::database::models::{
    AdminRequest, Group, GroupChanges, Membership, Message, Profile, ReviewDecision, Role,
};

/// PostgreSQL engine. Atomic units are transactions; the pending-request invariant is backed
/// by the `admin_requests_one_pending` partial unique index.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            id: row.id,
            email: row.email,
            role: row.role.parse().map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: Uuid,
    requester_id: Uuid,
    reason: String,
    status: String,
    reviewer_id: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for AdminRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(AdminRequest {
            id: row.id,
            requester_id: row.requester_id,
            reason: row.reason,
            status: row.status.parse().map_err(|e| StoreError::Corrupt(format!("{}", e)))?,
            reviewer_id: row.reviewer_id,
            reviewed_at: row.reviewed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            id: row.id,
            name: row.name,
            description: row.description,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MembershipRow {
    group_id: Uuid,
    user_id: Uuid,
    joined_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    group_id: Uuid,
    seq: i64,
    sender_id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            group_id: row.group_id,
            seq: row.seq,
            sender_id: row.sender_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

const PROFILE_COLUMNS: &str = "id, email, role, created_at, updated_at";
const REQUEST_COLUMNS: &str = "id, requester_id, reason, status, reviewer_id, reviewed_at, created_at";
const GROUP_COLUMNS: &str = "id, name, description, created_by, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, group_id, seq, sender_id, content, created_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_profile(&self, id: Uuid) -> StoreResult<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE id = $1", PROFILE_COLUMNS);
        let row: Option<ProfileRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(Profile::try_from).transpose()
    }

    async fn find_profile_by_email(&self, email: &str) -> StoreResult<Option<Profile>> {
        let sql = format!("SELECT {} FROM profiles WHERE lower(email) = lower($1)", PROFILE_COLUMNS);
        let row: Option<ProfileRow> = sqlx::query_as(&sql).bind(email).fetch_optional(&self.pool).await?;
        row.map(Profile::try_from).transpose()
    }

    async fn ensure_profile(&self, id: Uuid, email: &str) -> StoreResult<Profile> {
        sqlx::query("INSERT INTO profiles (id, email, role) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .bind(email)
            .bind(Role::Student.as_str())
            .execute(&self.pool)
            .await?;

        self.find_profile(id).await?.ok_or(StoreError::NotFound("profile"))
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn open_request(&self, request: AdminRequest) -> StoreResult<AdminRequest> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE profiles SET role = $2, updated_at = now() WHERE id = $1")
            .bind(request.requester_id)
            .bind(Role::PendingAdmin.as_str())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("profile"));
        }

        let sql = format!(
            "INSERT INTO admin_requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            REQUEST_COLUMNS, REQUEST_COLUMNS
        );
        let inserted: Result<RequestRow, sqlx::Error> = sqlx::query_as(&sql)
            .bind(request.id)
            .bind(request.requester_id)
            .bind(&request.reason)
            .bind(request.status.as_str())
            .bind(request.reviewer_id)
            .bind(request.reviewed_at)
            .bind(request.created_at)
            .fetch_one(&mut *tx)
            .await;

        let row = match inserted {
            Ok(row) => row,
            // Dropping the transaction rolls back the role change
            Err(e) if is_unique_violation(&e) => return Err(StoreError::PendingExists),
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        AdminRequest::try_from(row)
    }

    async fn decide_request(
        &self,
        id: Uuid,
        decision: ReviewDecision,
        reviewer_id: Uuid,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<AdminRequest> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE admin_requests SET status = $2, reviewer_id = $3, reviewed_at = $4 \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            REQUEST_COLUMNS
        );
        let row: Option<RequestRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(decision.status().as_str())
            .bind(reviewer_id)
            .bind(reviewed_at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM admin_requests WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::AlreadyProcessed,
                None => StoreError::NotFound("request"),
            });
        };

        sqlx::query("UPDATE profiles SET role = $2, updated_at = now() WHERE id = $1")
            .bind(row.requester_id)
            .bind(decision.requester_role().as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        AdminRequest::try_from(row)
    }

    async fn find_request(&self, id: Uuid) -> StoreResult<Option<AdminRequest>> {
        let sql = format!("SELECT {} FROM admin_requests WHERE id = $1", REQUEST_COLUMNS);
        let row: Option<RequestRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(AdminRequest::try_from).transpose()
    }

    async fn list_requests(&self, requester: Option<Uuid>) -> StoreResult<Vec<AdminRequest>> {
        let rows: Vec<RequestRow> = match requester {
            Some(requester_id) => {
                let sql = format!(
                    "SELECT {} FROM admin_requests WHERE requester_id = $1 ORDER BY created_at DESC",
                    REQUEST_COLUMNS
                );
                sqlx::query_as(&sql).bind(requester_id).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!("SELECT {} FROM admin_requests ORDER BY created_at DESC", REQUEST_COLUMNS);
                sqlx::query_as(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.into_iter().map(AdminRequest::try_from).collect()
    }
}

#[async_trait]
impl GroupStore for PgStore {
    async fn create_group(&self, group: Group) -> StoreResult<Group> {
        let sql = format!(
            "INSERT INTO groups ({}) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            GROUP_COLUMNS, GROUP_COLUMNS
        );
        let row: GroupRow = sqlx::query_as(&sql)
            .bind(group.id)
            .bind(&group.name)
            .bind(&group.description)
            .bind(group.created_by)
            .bind(group.created_at)
            .bind(group.updated_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn update_group(&self, id: Uuid, changes: GroupChanges) -> StoreResult<Group> {
        let sql = format!(
            "UPDATE groups SET name = COALESCE($2, name), description = COALESCE($3, description), \
             updated_at = now() WHERE id = $1 RETURNING {}",
            GROUP_COLUMNS
        );
        let row: Option<GroupRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.description)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Group::from).ok_or(StoreError::NotFound("group"))
    }

    async fn delete_group(&self, id: Uuid) -> StoreResult<()> {
        // Memberships and messages cascade
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("group"));
        }
        Ok(())
    }

    async fn find_group(&self, id: Uuid) -> StoreResult<Option<Group>> {
        let sql = format!("SELECT {} FROM groups WHERE id = $1", GROUP_COLUMNS);
        let row: Option<GroupRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Group::from))
    }

    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let sql = format!("SELECT {} FROM groups ORDER BY name, created_at", GROUP_COLUMNS);
        let rows: Vec<GroupRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Group::from).collect())
    }

    async fn add_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO memberships (group_id, user_id) VALUES ($1, $2) ON CONFLICT (group_id, user_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::NotFound("group")),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM memberships WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_member(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let found: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM memberships WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn list_members(&self, group_id: Uuid) -> StoreResult<Vec<Membership>> {
        if self.find_group(group_id).await?.is_none() {
            return Err(StoreError::NotFound("group"));
        }
        let rows: Vec<MembershipRow> = sqlx::query_as(
            "SELECT group_id, user_id, joined_at FROM memberships WHERE group_id = $1 ORDER BY joined_at",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Membership {
                group_id: row.group_id,
                user_id: row.user_id,
                joined_at: row.joined_at,
            })
            .collect())
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append_if_member(&self, group_id: Uuid, sender_id: Uuid, content: &str) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Share lock holds off a concurrent leave until this insert commits
        let member: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM memberships WHERE group_id = $1 AND user_id = $2 FOR SHARE")
                .bind(group_id)
                .bind(sender_id)
                .fetch_optional(&mut *tx)
                .await?;
        if member.is_none() {
            return Err(StoreError::NotMember);
        }

        // Row lock on the group serializes commits per group
        let (seq, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "UPDATE groups SET message_seq = message_seq + 1, \
             last_message_at = GREATEST(clock_timestamp(), COALESCE(last_message_at, clock_timestamp())) \
             WHERE id = $1 RETURNING message_seq, last_message_at",
        )
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO messages ({}) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            MESSAGE_COLUMNS, MESSAGE_COLUMNS
        );
        let row: MessageRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(group_id)
            .bind(seq)
            .bind(sender_id)
            .bind(content)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn messages_since(&self, group_id: Uuid, since: Option<i64>, limit: usize) -> StoreResult<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE group_id = $1 AND seq > $2 ORDER BY seq LIMIT $3",
            MESSAGE_COLUMNS
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(group_id)
            .bind(since.unwrap_or(0))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn latest_seq(&self, group_id: Uuid) -> StoreResult<i64> {
        let seq: Option<(i64,)> = sqlx::query_as("SELECT message_seq FROM groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(seq.map_or(0, |(s,)| s))
    }
}

#[async_trait]
impl Store for PgStore {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
