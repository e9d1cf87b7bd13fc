use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::profile::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown request status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "denied" => Ok(RequestStatus::Denied),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Reviewer's verdict on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Deny,
}

impl ReviewDecision {
    pub fn status(&self) -> RequestStatus {
        match self {
            ReviewDecision::Approve => RequestStatus::Approved,
            ReviewDecision::Deny => RequestStatus::Denied,
        }
    }

    /// Role the requester ends up with once the decision commits
    pub fn requester_role(&self) -> Role {
        match self {
            ReviewDecision::Approve => Role::Admin,
            ReviewDecision::Deny => Role::Student,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("action must be 'approve' or 'deny'")]
pub struct InvalidAction;

impl FromStr for ReviewDecision {
    type Err = InvalidAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ReviewDecision::Approve),
            "deny" => Ok(ReviewDecision::Deny),
            _ => Err(InvalidAction),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub reason: String,
    pub status: RequestStatus,
    pub reviewer_id: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AdminRequest {
    pub fn pending(requester_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id,
            reason: reason.into(),
            status: RequestStatus::Pending,
            reviewer_id: None,
            reviewed_at: None,
            created_at: Utc::now(),
        }
    }
}
