//! CalMesh Storage Layer
//!
//! Embedded SQLite persistence for the registry, both actor families, and
//! the sync/write/reconcile pipelines.
//!
//! # Repository pattern
//!
//! Each domain has its own repository with CRUD and domain-specific queries.
//! All repositories use runtime-bound SQLx queries against a shared pool;
//! write serialisation is provided by the owning actor, not the store.
//!
//! The schema is applied lazily and idempotently on connect, so re-applying
//! across restarts is safe.

pub mod models;
pub mod repos;
pub mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use calmesh_types::{CalError, Result};

pub use repos::*;

/// Map an SQLx failure into the core error type
pub(crate) fn db_err(e: sqlx::Error) -> CalError {
    CalError::Storage(e.to_string())
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub database_path: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: std::env::var("CALMESH_DB_PATH")
                .unwrap_or_else(|_| "calmesh.db".to_string()),
            max_connections: 5,
        }
    }
}

/// Database connection pool and repository factory
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file and apply the schema
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!(path = %config.database_path, "Opening SQLite store");

        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            config.database_path
        ))
        .map_err(db_err)?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    /// An in-memory store for tests. A single connection keeps every query
    /// on the same in-memory database.
    pub async fn connect_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    /// Apply the schema; every statement is `IF NOT EXISTS` so re-applying
    /// is a no-op.
    pub async fn apply_schema(&self) -> Result<()> {
        for statement in schema::SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    /// Liveness probe
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Repository factories

    pub fn registry(&self) -> RegistryRepo {
        RegistryRepo::new(self.pool.clone())
    }

    pub fn auth(&self) -> AuthRepo {
        AuthRepo::new(self.pool.clone())
    }

    pub fn sync_state(&self) -> SyncStateRepo {
        SyncStateRepo::new(self.pool.clone())
    }

    pub fn channels(&self) -> ChannelRepo {
        ChannelRepo::new(self.pool.clone())
    }

    pub fn events(&self) -> EventRepo {
        EventRepo::new(self.pool.clone())
    }

    pub fn mirrors(&self) -> MirrorRepo {
        MirrorRepo::new(self.pool.clone())
    }

    pub fn policies(&self) -> PolicyRepo {
        PolicyRepo::new(self.pool.clone())
    }

    pub fn sessions(&self) -> SessionRepo {
        SessionRepo::new(self.pool.clone())
    }

    pub fn constraints(&self) -> ConstraintRepo {
        ConstraintRepo::new(self.pool.clone())
    }

    pub fn history(&self) -> HistoryRepo {
        HistoryRepo::new(self.pool.clone())
    }

    pub fn journal(&self) -> JournalRepo {
        JournalRepo::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_and_reapply_schema() {
        let store = Store::connect_memory().await.unwrap();
        store.health_check().await.unwrap();
        // Idempotent re-apply must be safe
        store.apply_schema().await.unwrap();
    }
}
