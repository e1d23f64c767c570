//! Test utilities for repositories
//!
//! This module provides utilities for testing repositories, including
//! test data generation, verification helpers and instrumented doubles for
//! the store, cache and audit ports.

use std::sync::Arc;

use crate::storage::{DatabaseManager, Store};

mod base_repository_test;

/// Initialize an in-memory database for testing
pub async fn setup_test_db() -> DatabaseManager {
    let db = DatabaseManager::in_memory()
        .await
        .expect("in-memory database should open");
    db.run_migrations().await.expect("migrations should apply");
    db
}

/// In-memory database plus a store over it
pub async fn setup_test_store() -> (DatabaseManager, Arc<dyn Store>) {
    let db = setup_test_db().await;
    let store: Arc<dyn Store> = db.store();
    (db, store)
}

/// Test data generator for repositories
pub mod generators {
    use uuid::Uuid;

    use crate::entities::{Service, Task, Tenant, User};

    /// Generate a test user with a unique email
    pub fn user(n: usize) -> User {
        User::new(format!("user{n}-{}@example.com", Uuid::new_v4().simple()), format!("User {n}"))
    }

    /// Generate a batch of test users
    pub fn users(count: usize) -> Vec<User> {
        (0..count).map(user).collect()
    }

    pub fn tenant(slug: &str) -> Tenant {
        Tenant::new(format!("Tenant {slug}"), slug)
    }

    pub fn service(tenant_id: Uuid, name: &str, price_cents: i64) -> Service {
        Service::new(tenant_id, name, "haircut").with_price(price_cents)
    }

    pub fn task(tenant_id: Uuid, title: &str) -> Task {
        Task::new(tenant_id, title)
    }
}

/// Test assertions for repositories
pub mod assertions {
    use std::fmt::Debug;

    use crate::error::{ErrorKind, Result};

    /// Assert that a result failed with the given kind
    pub fn assert_error_kind<T: Debug>(result: Result<T>, expected: ErrorKind) {
        match result {
            Ok(value) => panic!("expected {expected:?} error, got Ok({value:?})"),
            Err(e) => assert_eq!(e.kind(), expected, "unexpected error: {e}"),
        }
    }
}

/// Instrumented port implementations
pub mod doubles {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::Value;
    use uuid::Uuid;

    use crate::error::{AppError, Result};
    use crate::repositories::audit::{AuditEntry, AuditSink};
    use crate::repositories::cache::CachePort;
    use crate::storage::{FieldChange, Filter, Store, StoredRow, Visibility, Window, WriteOp};

    /// Store wrapper that counts round trips
    #[derive(Debug)]
    pub struct CountingStore {
        inner: Arc<dyn Store>,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl CountingStore {
        pub fn new(inner: Arc<dyn Store>) -> Self {
            Self {
                inner,
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> usize {
            self.reads() + self.writes()
        }

        fn read(&self) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }

        fn write(&self) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn insert(&self, table: &str, row: &StoredRow) -> Result<()> {
            self.write();
            self.inner.insert(table, row).await
        }

        async fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<StoredRow>> {
            self.read();
            self.inner.find_one(table, filter).await
        }

        async fn find_many(&self, table: &str, filter: &Filter, window: Window) -> Result<Vec<StoredRow>> {
            self.read();
            self.inner.find_many(table, filter, window).await
        }

        async fn count(&self, table: &str, filter: &Filter) -> Result<i64> {
            self.read();
            self.inner.count(table, filter).await
        }

        async fn update_fields(
            &self,
            table: &str,
            id: Uuid,
            changes: &[FieldChange],
            visibility: Visibility,
        ) -> Result<u64> {
            self.write();
            self.inner.update_fields(table, id, changes, visibility).await
        }

        async fn delete(&self, table: &str, id: Uuid) -> Result<u64> {
            self.write();
            self.inner.delete(table, id).await
        }

        async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<u64>> {
            self.write();
            self.inner.transaction(ops).await
        }
    }

    /// Cache whose every call fails
    #[derive(Debug, Default)]
    pub struct FailingCache;

    #[async_trait]
    impl CachePort for FailingCache {
        async fn get_json(&self, _key: &str) -> Result<Option<Value>> {
            Err(AppError::cache("cache unavailable"))
        }

        async fn set_json(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<()> {
            Err(AppError::cache("cache unavailable"))
        }

        async fn delete(&self, _keys: &[String]) -> Result<()> {
            Err(AppError::cache("cache unavailable"))
        }

        async fn delete_pattern(&self, _pattern: &str) -> Result<()> {
            Err(AppError::cache("cache unavailable"))
        }

        fn epoch(&self) -> u64 {
            0
        }

        fn advance_epoch(&self) {}
    }

    /// Sink that keeps entries in memory, optionally slowly
    #[derive(Debug, Default)]
    pub struct MemoryAuditSink {
        entries: Mutex<Vec<AuditEntry>>,
        delay: Option<Duration>,
    }

    impl MemoryAuditSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                delay: Some(delay),
            }
        }

        pub fn entries(&self) -> Vec<AuditEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuditSink for MemoryAuditSink {
        async fn write(&self, entry: &AuditEntry) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    /// Sink that rejects every entry
    #[derive(Debug, Default)]
    pub struct FailingAuditSink;

    #[async_trait]
    impl AuditSink for FailingAuditSink {
        async fn write(&self, _entry: &AuditEntry) -> Result<()> {
            Err(AppError::audit("audit store unavailable"))
        }
    }
}
