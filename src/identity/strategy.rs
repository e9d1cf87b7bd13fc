use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Confidence, Identity, IdentityError, IdentityProvider, RequestContext, SessionId, SessionStore};
use crate::auth::TokenPair;
use crate::config::IdentityConfig;

/// Identity recovered by a strategy, plus the session it persisted along the way (if any)
#[derive(Debug, Clone)]
pub struct Attempt {
    pub identity: Identity,
    pub persisted_session: Option<SessionId>,
    /// Rotated pair when the refresh credential had to be exchanged
    pub refreshed: Option<TokenPair>,
}

impl Attempt {
    fn found(identity: Identity) -> Self {
        Self {
            identity,
            persisted_session: None,
            refreshed: None,
        }
    }
}

/// One way of recovering the caller. `Ok(None)` means "not applicable or not verified";
/// only a credential that is present but undecodable is an error.
#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn confidence(&self) -> Confidence;

    async fn attempt(&self, ctx: &RequestContext) -> Result<Option<Attempt>, IdentityError>;
}

/// Live server-side session named by the session cookie
pub struct SessionStrategy {
    sessions: Arc<SessionStore>,
    cookie: String,
}

impl SessionStrategy {
    pub fn new(sessions: Arc<SessionStore>, cookie: impl Into<String>) -> Self {
        Self {
            sessions,
            cookie: cookie.into(),
        }
    }
}

#[async_trait]
impl IdentityStrategy for SessionStrategy {
    fn name(&self) -> &'static str {
        "session"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Session
    }

    async fn attempt(&self, ctx: &RequestContext) -> Result<Option<Attempt>, IdentityError> {
        Ok(ctx
            .cookie(&self.cookie)
            .and_then(|id| self.sessions.validate(id))
            .map(Attempt::found))
    }
}

/// `Authorization: Bearer` verified against the identity provider
pub struct BearerStrategy {
    provider: Arc<dyn IdentityProvider>,
}

impl BearerStrategy {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl IdentityStrategy for BearerStrategy {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Token
    }

    async fn attempt(&self, ctx: &RequestContext) -> Result<Option<Attempt>, IdentityError> {
        let Some(token) = ctx.bearer() else {
            return Ok(None);
        };
        match self.provider.verify_access(token).await {
            Ok(identity) => Ok(identity.map(Attempt::found)),
            Err(e) => {
                warn!("Bearer verification failed: {}", e);
                Ok(None)
            }
        }
    }
}

/// Rebuilds a session from loose credentials in cookies and headers
pub struct HeaderReconstructionStrategy {
    provider: Arc<dyn IdentityProvider>,
    sessions: Arc<SessionStore>,
    access_names: Vec<String>,
    refresh_names: Vec<String>,
    access_header: String,
    refresh_header: String,
    packed_suffix: String,
}

#[derive(Debug, Default, PartialEq)]
struct Credentials {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PackedSession {
    Object {
        access_token: Option<String>,
        #[serde(default)]
        refresh_token: Option<String>,
    },
    /// `[access, refresh, ...]`
    Tuple(Vec<Value>),
}

const BASE64_PREFIX: &str = "base64-";

impl HeaderReconstructionStrategy {
    pub fn new(provider: Arc<dyn IdentityProvider>, sessions: Arc<SessionStore>, config: &IdentityConfig) -> Self {
        Self {
            provider,
            sessions,
            access_names: config.access_cookie_names.clone(),
            refresh_names: config.refresh_cookie_names.clone(),
            access_header: config.access_header.clone(),
            refresh_header: config.refresh_header.clone(),
            packed_suffix: config.packed_cookie_suffix.clone(),
        }
    }

    /// Reassembles the first packed session cookie, joining `.0`, `.1`, ... chunks in order
    fn packed_blob(&self, ctx: &RequestContext) -> Option<String> {
        let mut whole: Option<(&str, &str)> = None;
        let mut chunked: BTreeMap<&str, BTreeMap<u32, &str>> = BTreeMap::new();

        for (name, value) in ctx.cookies() {
            if name.ends_with(&self.packed_suffix) {
                whole.get_or_insert((name, value));
                continue;
            }
            if let Some((base, index)) = name.rsplit_once('.') {
                if let (true, Ok(index)) = (base.ends_with(&self.packed_suffix), index.parse::<u32>()) {
                    chunked.entry(base).or_default().insert(index, value);
                }
            }
        }

        if let Some((_, value)) = whole {
            return Some(value.to_string());
        }
        chunked
            .into_values()
            .next()
            .map(|chunks| chunks.into_values().collect::<String>())
    }

    fn decode_packed(raw: &str) -> Result<Credentials, IdentityError> {
        let raw = raw.trim();
        let lowered = raw.to_ascii_lowercase();
        let raw = if lowered.starts_with("%7b") || lowered.starts_with("%5b") {
            urlencoding::decode(raw)
                .map_err(|_| IdentityError::MalformedSession("percent-encoding is not utf-8".to_string()))?
                .into_owned()
        } else {
            raw.to_string()
        };

        let json = match raw.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
                    .decode(encoded.trim_end_matches('='))
                    .map_err(|e| IdentityError::MalformedSession(format!("base64: {}", e)))?;
                String::from_utf8(bytes).map_err(|_| IdentityError::MalformedSession("not utf-8".to_string()))?
            }
            None => raw,
        };

        let packed: PackedSession =
            serde_json::from_str(&json).map_err(|e| IdentityError::MalformedSession(format!("json: {}", e)))?;

        Ok(match packed {
            PackedSession::Object {
                access_token,
                refresh_token,
            } => Credentials {
                access: access_token.filter(|s| !s.is_empty()),
                refresh: refresh_token.filter(|s| !s.is_empty()),
            },
            PackedSession::Tuple(values) => {
                let at = |i: usize| {
                    values
                        .get(i)
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                };
                Credentials {
                    access: at(0),
                    refresh: at(1),
                }
            }
        })
    }

    fn loose_credentials(&self, ctx: &RequestContext) -> Credentials {
        let find = |names: &[String], header: &str| {
            names
                .iter()
                .find_map(|name| ctx.cookie(name))
                .or_else(|| ctx.header(header))
                .map(str::to_string)
        };
        Credentials {
            access: find(&self.access_names, &self.access_header),
            refresh: find(&self.refresh_names, &self.refresh_header),
        }
    }

    fn credentials(&self, ctx: &RequestContext) -> Result<Credentials, IdentityError> {
        match self.packed_blob(ctx) {
            Some(blob) => Self::decode_packed(&blob),
            None => Ok(self.loose_credentials(ctx)),
        }
    }
}

#[async_trait]
impl IdentityStrategy for HeaderReconstructionStrategy {
    fn name(&self) -> &'static str {
        "header_reconstruction"
    }

    fn confidence(&self) -> Confidence {
        Confidence::Reconstructed
    }

    async fn attempt(&self, ctx: &RequestContext) -> Result<Option<Attempt>, IdentityError> {
        let Credentials { access, refresh } = self.credentials(ctx)?;
        let Some(access) = access else {
            return Ok(None);
        };

        let verified = match self.provider.verify_access(&access).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Access credential verification failed: {}", e);
                None
            }
        };

        let (identity, refreshed) = match (verified, refresh) {
            (Some(identity), _) => (identity, None),
            (None, Some(refresh)) => match self.provider.refresh(&refresh).await {
                Ok(Some(pair)) => {
                    debug!(user_id = %pair.identity.user_id, "refresh credential exchanged");
                    (pair.identity.clone(), Some(pair))
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!("Refresh exchange failed: {}", e);
                    return Ok(None);
                }
            },
            (None, None) => return Ok(None),
        };

        let session = self.sessions.issue(identity.clone());
        Ok(Some(Attempt {
            identity,
            persisted_session: Some(session.id),
            refreshed,
        }))
    }
}
