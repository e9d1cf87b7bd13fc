use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::TokenService;
use crate::config::{AppConfig, Environment};
use crate::gate::AuthorizationGate;
use crate::groups::GroupMembershipRegistry;
use crate::handlers::{protected, public};
use crate::identity::{IdentityProvider, IdentityResolver, IdentityStore, LocalProvider, ProviderError, RemoteProvider, SessionStore};
use crate::messages::MessageBus;
use crate::middleware::identity_middleware;
use crate::store::{MemoryStore, Store};
use crate::workflow::AdminRequestWorkflow;

/// Everything a handler can reach. Components are wired once here and shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionStore>,
    pub tokens: TokenService,
    pub provider: Arc<dyn IdentityProvider>,
    pub resolver: Arc<IdentityResolver>,
    pub identities: IdentityStore,
    pub gate: AuthorizationGate,
    pub workflow: AdminRequestWorkflow,
    pub groups: GroupMembershipRegistry,
    pub bus: Arc<MessageBus>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>) -> Result<Self, ProviderError> {
        let config = Arc::new(config);
        let tokens = TokenService::from_config(&config.security);
        let sessions = Arc::new(SessionStore::new(chrono::Duration::minutes(
            config.security.session_ttl_minutes,
        )));

        let provider: Arc<dyn IdentityProvider> = match config.identity.provider_url.as_deref() {
            Some(url) => Arc::new(RemoteProvider::from_config(&config.identity, url)?),
            None => Arc::new(LocalProvider::new(tokens.clone())),
        };

        let resolver = Arc::new(IdentityResolver::standard(&config, sessions.clone(), provider.clone()));
        let identities = IdentityStore::new(store.clone(), config.security.bootstrap_admin_email.clone());
        let gate = AuthorizationGate::new(identities.clone(), store.clone());
        let workflow = AdminRequestWorkflow::new(
            store.clone(),
            identities.clone(),
            gate.clone(),
            config.requests.max_reason_length,
        );
        let bus = Arc::new(MessageBus::new(store.clone(), gate.clone(), &config.messaging));
        let groups =
            GroupMembershipRegistry::new(store.clone(), identities.clone(), gate.clone()).with_observer(bus.clone());

        Ok(Self {
            config,
            store,
            sessions,
            tokens,
            provider,
            resolver,
            identities,
            gate,
            workflow,
            groups,
            bus,
        })
    }

    /// Fresh in-memory state, used when no database is configured and by tests
    pub fn in_memory(config: AppConfig) -> Result<Self, ProviderError> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(auth_public_routes())
        // Identity-resolved API
        .merge(protected_routes().route_layer(from_fn_with_state(state.clone(), identity_middleware)))
        // Global middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_public_routes() -> Router<AppState> {
    use public::auth;

    Router::new()
        .route("/auth/token", post(auth::token_post))
        .route("/auth/refresh", post(auth::refresh_post))
}

fn protected_routes() -> Router<AppState> {
    use protected::{auth, groups, messages, requests, subscribe};

    Router::new()
        // Session
        .route("/api/auth/whoami", get(auth::whoami))
        .route("/api/auth/session", delete(auth::logout))
        // Admin elevation requests
        .route(
            "/api/requests",
            get(requests::list).post(requests::submit).patch(requests::review),
        )
        // Groups and membership
        .route("/api/groups", get(groups::list).post(groups::create))
        .route("/api/groups/join", post(groups::join))
        .route("/api/groups/leave", post(groups::leave))
        .route(
            "/api/groups/:id",
            get(groups::get_one).put(groups::update).delete(groups::remove),
        )
        .route("/api/groups/:id/members", get(groups::members).post(groups::add_member))
        .route("/api/groups/:id/members/:user_id", delete(groups::remove_member))
        .route("/api/groups/:id/subscribe", get(subscribe::subscribe))
        // Messages
        .route("/api/messages", get(messages::history).post(messages::send))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }
    if matches!(config.environment, Environment::Development) && config.security.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-access-token"),
            HeaderName::from_static("x-refresh-token"),
        ])
        .allow_credentials(true)
}
