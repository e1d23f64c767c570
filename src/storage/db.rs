use std::{str::FromStr, sync::Arc, time::Duration};

use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::storage::sqlite_store::SqliteStore;

/// DatabaseManager handles SQLite connection pooling and schema migrations
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    /// Connection pool for SQLite
    pub pool: Pool<Sqlite>,
    /// Connection string the pool was opened with
    pub url: Arc<str>,
}

impl DatabaseManager {
    /// Creates a new DatabaseManager with a connection pool to the configured database
    #[instrument(err, skip(config), fields(url = %config.url))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing database at: {}", config.url);

        let options = SqliteConnectOptions::from_str(&config.url)?
            // Create the database if it doesn't exist
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL is safe with WAL and avoids an fsync per commit
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            url: config.url.as_str().into(),
        })
    }

    /// Private in-memory database on a single long-lived connection.
    ///
    /// Every new connection to `:memory:` would see an empty database, so the
    /// pool never opens a second one or recycles the first.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            url: "sqlite::memory:".into(),
        })
    }

    /// Get the connection string
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Store adapter sharing this manager's pool
    pub fn store(&self) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(self.pool.clone()))
    }

    /// Apply the embedded migrations
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        let migrator = sqlx::migrate!("./migrations");
        info!("Running {} embedded migrations", migrator.iter().count());
        migrator.run(&self.pool).await?;
        info!("Database schema is up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
