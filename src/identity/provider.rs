use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::Identity;
use crate::auth::{TokenError, TokenKind, TokenPair, TokenService};
use crate::config::IdentityConfig;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider answered with status {0}")]
    Status(u16),

    #[error("identity provider response malformed: {0}")]
    Malformed(String),

    #[error("invalid provider url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Verifies access credentials and exchanges refresh credentials.
/// A rejected credential is `Ok(None)`; `Err` is reserved for failures to reach a verdict.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_access(&self, token: &str) -> Result<Option<Identity>, ProviderError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>, ProviderError>;
}

/// Verifies tokens this service issued itself
pub struct LocalProvider {
    tokens: TokenService,
}

impl LocalProvider {
    pub fn new(tokens: TokenService) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityProvider for LocalProvider {
    async fn verify_access(&self, token: &str) -> Result<Option<Identity>, ProviderError> {
        match self.tokens.verify(token, TokenKind::Access) {
            Ok(identity) => Ok(Some(identity)),
            Err(TokenError::InvalidSecret) => Err(TokenError::InvalidSecret.into()),
            Err(_) => Ok(None),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>, ProviderError> {
        let identity = match self.tokens.verify(refresh_token, TokenKind::Refresh) {
            Ok(identity) => identity,
            Err(TokenError::InvalidSecret) => return Err(TokenError::InvalidSecret.into()),
            Err(_) => return Ok(None),
        };
        // Rotate both tokens on every exchange
        Ok(Some(self.tokens.issue_pair(&identity)?))
    }
}

/// GoTrue-compatible external identity service
pub struct RemoteProvider {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct RemoteUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct RemoteSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: RemoteUser,
}

impl From<RemoteUser> for Identity {
    fn from(user: RemoteUser) -> Self {
        Identity {
            user_id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

impl RemoteProvider {
    pub fn from_config(config: &IdentityConfig, base_url: &str) -> Result<Self, ProviderError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base,
            api_key: config.provider_api_key.clone(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("apikey", key),
            None => builder,
        }
    }
}

fn is_rejection(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    )
}

#[async_trait]
impl IdentityProvider for RemoteProvider {
    async fn verify_access(&self, token: &str) -> Result<Option<Identity>, ProviderError> {
        let url = self.base.join("user")?;
        let response = self.request(self.client.get(url).bearer_auth(token)).send().await?;

        let status = response.status();
        if is_rejection(status) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let user: RemoteUser = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(Some(user.into()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>, ProviderError> {
        let url = self.base.join("token?grant_type=refresh_token")?;
        let response = self
            .request(self.client.post(url).json(&json!({ "refresh_token": refresh_token })))
            .send()
            .await?;

        let status = response.status();
        if is_rejection(status) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let session: RemoteSession = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(Some(TokenPair {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_in: session.expires_in.unwrap_or_default(),
            identity: session.user.into(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn local() -> (LocalProvider, TokenService) {
        let tokens = TokenService::new("provider-secret", ChronoDuration::minutes(5), ChronoDuration::hours(1));
        (LocalProvider::new(tokens.clone()), tokens)
    }

    fn kim() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            email: "kim@campus.test".to_string(),
        }
    }

    #[tokio::test]
    async fn local_provider_rejects_without_error() {
        let (provider, tokens) = local();
        let identity = kim();
        let access = tokens.issue(&identity, TokenKind::Access).unwrap();

        assert_eq!(provider.verify_access(&access).await.unwrap(), Some(identity));
        assert_eq!(provider.verify_access("garbage").await.unwrap(), None);
        // An access token is not a refresh credential
        assert!(provider.refresh(&access).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_refresh_rotates_the_pair() {
        let (provider, tokens) = local();
        let identity = kim();
        let refresh = tokens.issue(&identity, TokenKind::Refresh).unwrap();

        let pair = provider.refresh(&refresh).await.unwrap().unwrap();
        assert_eq!(pair.identity, identity);
        assert!(tokens.verify(&pair.access_token, TokenKind::Access).is_ok());
    }

    #[test]
    fn remote_base_url_keeps_its_path() {
        let provider = RemoteProvider::from_config(&IdentityConfig::default(), "https://id.campus.test/auth/v1").unwrap();
        assert_eq!(provider.base.join("user").unwrap().as_str(), "https://id.campus.test/auth/v1/user");
        assert!(RemoteProvider::from_config(&IdentityConfig::default(), "not a url").is_err());
    }
}
