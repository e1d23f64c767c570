//! Configuration for repositories and the database connection
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file. Every field has a default so an empty environment is a valid setup.

use std::{env, str::FromStr, time::Duration};

use tracing::debug;

use crate::error::{AppError, Result};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Repository tuning shared by every entity repository
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
    /// Time-to-live for read-through cache entries
    pub cache_ttl: Duration,
    /// Page size applied when the caller gives none or an out-of-range one
    pub default_page_size: i64,
    /// Largest page size a caller may request
    pub max_page_size: i64,
    /// Capacity of the audit queue before entries are dropped
    pub audit_queue_capacity: usize,
    /// Whether to log start/end of every repository operation
    pub log_operations: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            audit_queue_capacity: DEFAULT_AUDIT_QUEUE_CAPACITY,
            log_operations: false,
        }
    }
}

impl RepositoryConfig {
    /// Load the configuration from the environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load the configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            cache_ttl: parse_var::<u64>(&lookup, "BOOKING_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            default_page_size: parse_var(&lookup, "BOOKING_DEFAULT_PAGE_SIZE")?
                .unwrap_or(defaults.default_page_size),
            max_page_size: parse_var(&lookup, "BOOKING_MAX_PAGE_SIZE")?
                .unwrap_or(defaults.max_page_size),
            audit_queue_capacity: parse_var(&lookup, "BOOKING_AUDIT_QUEUE_CAPACITY")?
                .unwrap_or(defaults.audit_queue_capacity),
            log_operations: parse_var(&lookup, "BOOKING_LOG_OPERATIONS")?
                .unwrap_or(defaults.log_operations),
        };

        if config.default_page_size < 1 || config.max_page_size < 1 {
            return Err(AppError::validation("page sizes must be at least 1"));
        }
        if config.default_page_size > config.max_page_size {
            return Err(AppError::validation(format!(
                "BOOKING_DEFAULT_PAGE_SIZE ({}) must not exceed BOOKING_MAX_PAGE_SIZE ({})",
                config.default_page_size, config.max_page_size
            )));
        }
        if config.audit_queue_capacity == 0 {
            return Err(AppError::validation(
                "BOOKING_AUDIT_QUEUE_CAPACITY must be at least 1",
            ));
        }

        debug!(?config, "Loaded repository configuration");
        Ok(config)
    }
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// SQLite connection string
    pub url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://booking.db".to_string(),
            max_connections: 8,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: lookup("DATABASE_URL").unwrap_or(defaults.url),
            max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::validation(format!("{name} has an invalid value: {raw}"))),
    }
}
