use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

const SCHEMA: &str = include_str!("schema.sql");

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Owns the connection pool for the PostgreSQL store
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// Connect using the configured URL and pool limits
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config.url.as_deref().ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        let parsed = url::Url::parse(url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(DatabaseError::InvalidDatabaseUrl);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!(
            "Created database pool for {}{}",
            parsed.host_str().unwrap_or("localhost"),
            parsed.path()
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Applies the bundled schema. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let statements = schema_statements(SCHEMA);
        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Applied {} schema statements", statements.len());
        Ok(())
    }
}

/// Splits the schema file on `;`, dropping comment lines and empty statements
fn schema_statements(schema: &str) -> Vec<String> {
    let stripped: String = schema
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    stripped
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
