use std::sync::Arc;
use tracing::debug;

use super::{
    BearerStrategy, Caller, HeaderReconstructionStrategy, IdentityError, IdentityProvider, IdentityStrategy,
    RequestContext, ResolvedIdentity, SessionStore, SessionStrategy,
};
use crate::config::AppConfig;

/// Tries each strategy in priority order; the first that yields an identity wins
pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
}

impl IdentityResolver {
    pub fn new(strategies: Vec<Box<dyn IdentityStrategy>>) -> Self {
        Self { strategies }
    }

    /// Session cookie, then bearer token, then header reconstruction
    pub fn standard(config: &AppConfig, sessions: Arc<SessionStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self::new(vec![
            Box::new(SessionStrategy::new(sessions.clone(), config.security.session_cookie.clone())),
            Box::new(BearerStrategy::new(provider.clone())),
            Box::new(HeaderReconstructionStrategy::new(provider, sessions, &config.identity)),
        ])
    }

    pub async fn resolve(&self, ctx: &RequestContext) -> Result<Caller, IdentityError> {
        for strategy in &self.strategies {
            if let Some(attempt) = strategy.attempt(ctx).await? {
                debug!(
                    strategy = strategy.name(),
                    user_id = %attempt.identity.user_id,
                    confidence = %strategy.confidence(),
                    "caller resolved"
                );
                return Ok(Caller::Identified(ResolvedIdentity {
                    identity: attempt.identity,
                    confidence: strategy.confidence(),
                    issued_session: attempt.persisted_session,
                    refreshed_tokens: attempt.refreshed,
                }));
            }
        }

        debug!("no strategy matched, caller is anonymous");
        Ok(Caller::Anonymous)
    }
}
