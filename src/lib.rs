pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod logging;
pub mod repositories;
pub mod storage;

use std::sync::Arc;

use tracing::info;

use crate::{
    config::{DatabaseConfig, RepositoryConfig},
    repositories::{AuditLogger, MemoryCache, RepositoryFactory, SqliteAuditSink},
    storage::DatabaseManager,
};

/// Open the database, apply migrations and keep the repositories ready until
/// interrupted, then drain the audit queue and close the pool
#[tokio::main]
pub async fn run() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    logging::init_tracing();

    let db_config = DatabaseConfig::from_env()?;
    let repo_config = RepositoryConfig::from_env()?;

    let db = DatabaseManager::new(&db_config).await?;
    db.run_migrations().await?;

    let audit = Arc::new(AuditLogger::new(
        Arc::new(SqliteAuditSink::new(db.pool.clone())),
        repo_config.audit_queue_capacity,
    ));
    let factory = RepositoryFactory::from_config(
        db.store(),
        &repo_config,
        Some(Arc::new(MemoryCache::default())),
        None,
        Some(audit.clone()),
    );
    info!(
        url = db.url(),
        cache_ttl_secs = repo_config.cache_ttl.as_secs(),
        page_size = factory.options().limits().default_size(),
        "Booking data layer ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    audit.shutdown().await?;
    info!(stats = ?audit.stats(), "Audit queue drained");
    db.close().await;
    Ok(())
}
