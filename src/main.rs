use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use campus_api::config::config;
use campus_api::database::DatabaseManager;
use campus_api::is_development;
use campus_api::store::{MemoryStore, PgStore, Store};
use campus_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")))
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = config();
    tracing::info!("Starting Campus API in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() && config.identity.provider_url.is_none() {
        anyhow::bail!("JWT_SECRET must be set when no identity provider is configured");
    }

    let store: Arc<dyn Store> = match config.database.url {
        Some(_) => {
            let db = DatabaseManager::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            db.migrate().await.context("failed to apply schema")?;
            Arc::new(PgStore::new(db.pool()))
        }
        None => {
            if !is_development!() {
                tracing::warn!("DATABASE_URL not set; state is kept in memory and lost on restart");
            }
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(config.clone(), store).context("failed to initialize identity provider")?;

    // Expired sessions are dropped on sight; this sweeps the ones nobody presents again,
    // along with group lanes nobody listens on
    let sessions = state.sessions.clone();
    let bus = state.bus.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            let pruned = sessions.prune_expired();
            if pruned > 0 {
                tracing::debug!(pruned, "expired sessions pruned");
            }
            let lanes = bus.prune_idle();
            if lanes > 0 {
                tracing::debug!(lanes, "idle group lanes pruned");
            }
        }
    });

    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Campus API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
