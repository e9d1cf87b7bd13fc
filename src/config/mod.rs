use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub identity: IdentityConfig,
    pub messaging: MessagingConfig,
    pub requests: RequestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// When unset the service runs on the in-memory store
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub require_https: bool,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_hours: i64,
    pub session_cookie: String,
    pub session_ttl_minutes: i64,
    /// Seed account that is always treated as admin. Every use is logged on the `audit` target.
    pub bootstrap_admin_email: Option<String>,
    pub allow_dev_login: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// External GoTrue-style provider. Tokens are verified locally when unset.
    pub provider_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub provider_timeout_secs: u64,
    pub access_cookie_names: Vec<String>,
    pub refresh_cookie_names: Vec<String>,
    pub access_header: String,
    pub refresh_header: String,
    pub packed_cookie_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub max_message_length: usize,
    pub history_limit: usize,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub max_reason_length: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env::var("CAMPUS_API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            if !v.trim().is_empty() {
                self.database.url = Some(v);
            }
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = split_list(&v);
        }
        if let Ok(v) = env::var("SECURITY_REQUIRE_HTTPS") {
            self.security.require_https = v.parse().unwrap_or(self.security.require_https);
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_ACCESS_TOKEN_MINUTES") {
            self.security.access_token_minutes = v.parse().unwrap_or(self.security.access_token_minutes);
        }
        if let Ok(v) = env::var("SECURITY_REFRESH_TOKEN_HOURS") {
            self.security.refresh_token_hours = v.parse().unwrap_or(self.security.refresh_token_hours);
        }
        if let Ok(v) = env::var("SECURITY_SESSION_COOKIE") {
            self.security.session_cookie = v;
        }
        if let Ok(v) = env::var("SECURITY_SESSION_TTL_MINUTES") {
            self.security.session_ttl_minutes = v.parse().unwrap_or(self.security.session_ttl_minutes);
        }
        if let Ok(v) = env::var("BOOTSTRAP_ADMIN_EMAIL") {
            let v = v.trim();
            self.security.bootstrap_admin_email = (!v.is_empty()).then(|| v.to_string());
        }
        if let Ok(v) = env::var("SECURITY_ALLOW_DEV_LOGIN") {
            self.security.allow_dev_login = v.parse().unwrap_or(self.security.allow_dev_login);
        }

        // Identity provider overrides
        if let Ok(v) = env::var("IDENTITY_PROVIDER_URL") {
            self.identity.provider_url = (!v.trim().is_empty()).then_some(v);
        }
        if let Ok(v) = env::var("IDENTITY_PROVIDER_API_KEY") {
            self.identity.provider_api_key = Some(v);
        }
        if let Ok(v) = env::var("IDENTITY_PROVIDER_TIMEOUT_SECS") {
            self.identity.provider_timeout_secs = v.parse().unwrap_or(self.identity.provider_timeout_secs);
        }
        if let Ok(v) = env::var("IDENTITY_ACCESS_COOKIES") {
            self.identity.access_cookie_names = split_list(&v);
        }
        if let Ok(v) = env::var("IDENTITY_REFRESH_COOKIES") {
            self.identity.refresh_cookie_names = split_list(&v);
        }

        // Messaging overrides
        if let Ok(v) = env::var("MESSAGING_MAX_MESSAGE_LENGTH") {
            self.messaging.max_message_length = v.parse().unwrap_or(self.messaging.max_message_length);
        }
        if let Ok(v) = env::var("MESSAGING_HISTORY_LIMIT") {
            self.messaging.history_limit = v.parse().unwrap_or(self.messaging.history_limit);
        }
        if let Ok(v) = env::var("MESSAGING_CHANNEL_CAPACITY") {
            self.messaging.channel_capacity = v.parse().unwrap_or(self.messaging.channel_capacity);
        }

        if let Ok(v) = env::var("REQUESTS_MAX_REASON_LENGTH") {
            self.requests.max_reason_length = v.parse().unwrap_or(self.requests.max_reason_length);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig { port: 3000 },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                require_https: false,
                jwt_secret: "campus-development-secret".to_string(),
                access_token_minutes: 60,
                refresh_token_hours: 24 * 7, // 1 week
                session_cookie: "campus_session".to_string(),
                session_ttl_minutes: 60 * 12,
                bootstrap_admin_email: None,
                allow_dev_login: true,
            },
            identity: IdentityConfig::default(),
            messaging: MessagingConfig {
                max_message_length: 4000,
                history_limit: 500,
                channel_capacity: 256,
            },
            requests: RequestConfig { max_reason_length: 2000 },
        }
    }

    pub fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config.security.require_https = true;
        config.security.jwt_secret = String::new();
        config.security.access_token_minutes = 30;
        config.security.refresh_token_hours = 24;
        config.security.allow_dev_login = false;
        config
    }

    pub fn production() -> Self {
        let mut config = Self::staging();
        config.environment = Environment::Production;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config.security.access_token_minutes = 15;
        config.security.session_ttl_minutes = 60 * 4;
        config.messaging.history_limit = 200;
        config
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider_url: None,
            provider_api_key: None,
            provider_timeout_secs: 5,
            access_cookie_names: vec![
                "access_token".to_string(),
                "sb-access-token".to_string(),
                "campus-access-token".to_string(),
            ],
            refresh_cookie_names: vec![
                "refresh_token".to_string(),
                "sb-refresh-token".to_string(),
                "campus-refresh-token".to_string(),
            ],
            access_header: "x-access-token".to_string(),
            refresh_header: "x-refresh-token".to_string(),
            packed_cookie_suffix: "-auth-token".to_string(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
