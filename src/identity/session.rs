use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use super::Identity;

pub type SessionId = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub identity: Identity,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Server-side sessions keyed by an opaque id carried in a cookie
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<SessionId, Session>>,
    by_user: RwLock<HashMap<Uuid, HashSet<SessionId>>>,
}

fn gen_id() -> SessionId {
    // 256 random bits, base64url without padding
    let mut buf = [0u8; 32];
    buf[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    buf[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, identity: Identity) -> Session {
        let now = Utc::now();
        let session = Session {
            id: gen_id(),
            identity,
            issued_at: now,
            expires_at: now + self.ttl,
        };

        self.sessions.write().insert(session.id.clone(), session.clone());
        self.by_user
            .write()
            .entry(session.identity.user_id)
            .or_default()
            .insert(session.id.clone());

        debug!(user_id = %session.identity.user_id, ttl_secs = self.ttl.num_seconds(), "session issued");
        session
    }

    /// Live session for the id; an expired entry is dropped on sight
    pub fn validate(&self, id: &str) -> Option<Identity> {
        let now = Utc::now();
        let expired = {
            let sessions = self.sessions.read();
            match sessions.get(id) {
                Some(s) if s.expires_at > now => return Some(s.identity.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.revoke(id);
        }
        None
    }

    pub fn revoke(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        let mut by_user = self.by_user.write();
        if let Some(ids) = by_user.get_mut(&session.identity.user_id) {
            ids.remove(id);
            if ids.is_empty() {
                by_user.remove(&session.identity.user_id);
            }
        }
        true
    }

    pub fn revoke_user(&self, user_id: Uuid) -> usize {
        let ids = self.by_user.write().remove(&user_id).unwrap_or_default();
        let mut sessions = self.sessions.write();
        let count = ids.iter().filter(|id| sessions.remove(*id).is_some()).count();
        debug!(%user_id, count, "sessions revoked");
        count
    }

    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.id.clone())
            .collect();
        expired.iter().filter(|id| self.revoke(id)).count()
    }
}

/// `Set-Cookie` value carrying a session id
pub fn session_cookie(name: &str, id: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name,
        id,
        max_age.num_seconds().max(0)
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that clears the session cookie
pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", name)
}
