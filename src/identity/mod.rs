//! Recovering "who is calling" from an inbound request.
//!
//! Resolution happens once per request in the identity middleware; everything downstream
//! receives an explicit [`Caller`] value.

pub mod context;
pub mod profiles;
pub mod provider;
pub mod resolver;
pub mod session;
pub mod strategy;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::TokenPair;

pub use context::RequestContext;
pub use profiles::IdentityStore;
pub use provider::{IdentityProvider, LocalProvider, ProviderError, RemoteProvider};
pub use resolver::IdentityResolver;
pub use session::{SessionId, SessionStore};
pub use strategy::{Attempt, BearerStrategy, HeaderReconstructionStrategy, IdentityStrategy, SessionStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
}

/// How the identity was established. Ordered: a later variant is a stronger credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Reconstructed,
    Token,
    Session,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Reconstructed => "reconstructed",
            Confidence::Token => "token",
            Confidence::Session => "session",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub confidence: Confidence,
    /// Session persisted while resolving; the HTTP layer hands it back as a cookie
    pub issued_session: Option<SessionId>,
    /// Replacement credentials from a refresh exchange, handed back the same way
    pub refreshed_tokens: Option<TokenPair>,
}

impl ResolvedIdentity {
    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }
}

/// Outcome of resolution. Absence of identity is a value, not an error.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Identified(ResolvedIdentity),
}

impl Caller {
    pub fn identified(identity: Identity, confidence: Confidence) -> Self {
        Caller::Identified(ResolvedIdentity {
            identity,
            confidence,
            issued_session: None,
            refreshed_tokens: None,
        })
    }

    pub fn resolved(&self) -> Option<&ResolvedIdentity> {
        match self {
            Caller::Anonymous => None,
            Caller::Identified(resolved) => Some(resolved),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.resolved().map(|r| &r.identity)
    }

    pub fn issued_session(&self) -> Option<&SessionId> {
        self.resolved().and_then(|r| r.issued_session.as_ref())
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    /// A packed session credential was present but could not be decoded
    #[error("malformed session credential: {0}")]
    MalformedSession(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_orders_session_above_token_above_reconstructed() {
        assert!(Confidence::Session > Confidence::Token);
        assert!(Confidence::Token > Confidence::Reconstructed);
        assert_eq!(Confidence::Reconstructed.to_string(), "reconstructed");
    }

    #[test]
    fn anonymous_caller_has_no_identity() {
        assert!(Caller::Anonymous.identity().is_none());
        let caller = Caller::identified(
            Identity {
                user_id: Uuid::new_v4(),
                email: "kim@campus.test".to_string(),
            },
            Confidence::Token,
        );
        assert_eq!(caller.identity().map(|i| i.email.as_str()), Some("kim@campus.test"));
        assert!(caller.issued_session().is_none());
    }
}
