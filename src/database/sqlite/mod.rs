use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{NewMessage, StoredMessage};
use crate::database::sqlite::queries::MessageQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// SQLite-backed conversation memory
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open the memory database at the given path, creating its parent
    /// directory if needed
    pub async fn initialize_at(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        Self::new(database_path).await
    }

    pub async fn append_message(&self, message: NewMessage) -> Result<StoredMessage> {
        MessageQueries::append(&self.pool, message).await
    }

    /// The most recent `window` messages of a conversation, oldest first
    pub async fn conversation_window(
        &self,
        conversation_id: &str,
        window: u32,
    ) -> Result<Vec<StoredMessage>> {
        MessageQueries::recent(&self.pool, conversation_id, window).await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<u64> {
        MessageQueries::delete_conversation(&self.pool, conversation_id).await
    }
}
