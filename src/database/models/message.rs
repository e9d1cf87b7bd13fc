use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable chat message. `seq` is assigned per group at commit and doubles as the history cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub group_id: Uuid,
    pub seq: i64,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
