//! PostgreSQL pool and schema bootstrap for the ledger store

pub mod schema;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Shared pool handed to `PgStore` and the health endpoint
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool with the configured size and acquire timeout
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(database_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query; used by `/health`
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create tables and indexes that do not exist yet
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for stmt in schema::STATEMENTS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        tracing::info!(statements = schema::STATEMENTS.len(), "Ledger schema ready");
        Ok(())
    }
}
