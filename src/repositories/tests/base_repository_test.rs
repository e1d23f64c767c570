//! Tests for the generic repository core

use std::sync::Arc;

use uuid::Uuid;

use crate::context::OpContext;
use crate::entities::{Record, User};
use crate::error::{ErrorKind, Result};
use crate::repositories::base::{BaseRepository, Repository, RepositoryOptions};
use crate::repositories::metrics::InMemoryMetrics;
use crate::repositories::pagination::PageRequest;
use crate::repositories::tests::doubles::CountingStore;
use crate::repositories::tests::{assertions, generators, setup_test_store};
use crate::storage::{Filter, OrderDirection, Window};

async fn user_repo() -> (crate::storage::DatabaseManager, BaseRepository<User>) {
    let (db, store) = setup_test_store().await;
    (db, BaseRepository::new(store, RepositoryOptions::new()))
}

#[tokio::test]
async fn test_create_and_get_user() -> Result<()> {
    // Setup
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();

    // Execute
    let created = repo.create(&ctx, generators::user(1)).await?;
    let fetched = repo.get_by_id(&ctx, created.id()).await?;

    // Verify
    assert!(created.meta.has_id());
    assert_eq!(created.meta.created_at, created.meta.updated_at);
    assert!(created.meta.deleted_at.is_none());
    assert_eq!(fetched, created);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_email_is_conflict() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    repo.create(&ctx, User::new("a@x.com", "First")).await?;

    let result = repo.create(&ctx, User::new("a@x.com", "Second")).await;

    assertions::assert_error_kind(result, ErrorKind::Conflict);
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_preassigned_id_conflicts_even_when_soft_deleted() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let created = repo.create(&ctx, generators::user(1)).await?;
    repo.soft_delete(&ctx, created.id()).await?;

    let mut again = generators::user(2);
    again.meta.id = created.id();
    assertions::assert_error_kind(repo.create(&ctx, again).await, ErrorKind::Conflict);
    Ok(())
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let id = Uuid::new_v4();

    let err = repo.get_by_id(&ctx, id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains(&id.to_string()));
    assert!(!repo.exists(&ctx, id).await?);
    Ok(())
}

#[tokio::test]
async fn test_soft_deleted_record_is_hidden_from_default_reads() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let kept = repo.create(&ctx, generators::user(1)).await?;
    let gone = repo.create(&ctx, generators::user(2)).await?;

    repo.soft_delete(&ctx, gone.id()).await?;

    assertions::assert_error_kind(repo.get_by_id(&ctx, gone.id()).await, ErrorKind::NotFound);
    assert!(!repo.exists(&ctx, gone.id()).await?);
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 1);
    let page = repo.list(&ctx, Filter::new(), PageRequest::default()).await?;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id(), kept.id());

    // Still reachable through the explicit variants
    let deleted = repo.get_by_id_including_deleted(&ctx, gone.id()).await?;
    assert!(deleted.meta.is_deleted());
    let all = repo
        .list_including_deleted(&ctx, Filter::new(), PageRequest::default())
        .await?;
    assert_eq!(all.info.total, 2);

    // A second soft delete finds nothing visible
    assertions::assert_error_kind(repo.soft_delete(&ctx, gone.id()).await, ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_restore_makes_record_visible_again() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let created = repo.create(&ctx, generators::user(1)).await?;
    repo.soft_delete(&ctx, created.id()).await?;

    let restored = repo.restore(&ctx, created.id()).await?;

    assert!(!restored.meta.is_deleted());
    assert!(restored.meta.updated_at >= created.meta.updated_at);
    assert_eq!(repo.get_by_id(&ctx, created.id()).await?.email, created.email);
    assertions::assert_error_kind(repo.restore(&ctx, Uuid::new_v4()).await, ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_hard_delete_removes_soft_deleted_rows() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let created = repo.create(&ctx, generators::user(1)).await?;
    repo.soft_delete(&ctx, created.id()).await?;

    repo.delete(&ctx, created.id()).await?;

    assertions::assert_error_kind(
        repo.get_by_id_including_deleted(&ctx, created.id()).await,
        ErrorKind::NotFound,
    );
    assertions::assert_error_kind(repo.delete(&ctx, created.id()).await, ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_update_keeps_created_at_and_refreshes_updated_at() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let created = repo.create(&ctx, generators::user(1)).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let mut changed = created.clone();
    changed.display_name = "Renamed".to_string();
    changed.meta.created_at = chrono::Utc::now();
    let updated = repo.update(&ctx, changed).await?;

    assert_eq!(updated.meta.created_at, created.meta.created_at);
    assert!(updated.meta.updated_at > created.meta.updated_at);
    let fetched = repo.get_by_id(&ctx, created.id()).await?;
    assert_eq!(fetched.display_name, "Renamed");
    assert_eq!(fetched.meta.created_at, created.meta.created_at);

    repo.soft_delete(&ctx, created.id()).await?;
    assertions::assert_error_kind(repo.update(&ctx, fetched).await, ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_pagination_over_twenty_five_rows() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    repo.batch_create(&ctx, generators::users(25)).await?;

    let first = repo.list(&ctx, Filter::new(), PageRequest::new(1, 10)).await?;
    assert_eq!(first.items.len(), 10);
    assert_eq!(first.info.total, 25);
    assert_eq!(first.info.total_pages, 3);
    assert!(first.info.has_next);
    assert!(!first.info.has_previous);

    let last = repo.list(&ctx, Filter::new(), PageRequest::new(3, 10)).await?;
    assert_eq!(last.items.len(), 5);
    assert!(!last.info.has_next);
    assert!(last.info.has_previous);

    // Pages do not overlap
    let second = repo.list(&ctx, Filter::new(), PageRequest::new(2, 10)).await?;
    assert!(second.items.iter().all(|u| !first.items.contains(u)));

    // Out-of-range requests are normalized
    let normalized = repo.list(&ctx, Filter::new(), PageRequest::new(0, 500)).await?;
    assert_eq!(normalized.info.page, 1);
    assert_eq!(normalized.info.size, 20);
    assert_eq!(normalized.items.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_list_total_matches_count_for_same_filter() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let tenant = Uuid::new_v4();
    let mut users = generators::users(7);
    for user in users.iter_mut().take(4) {
        user.tenant_id = Some(tenant);
    }
    repo.batch_create(&ctx, users).await?;

    let filter = Filter::new()
        .eq("tenant_id", tenant.to_string())
        .order_by("email", OrderDirection::Desc);
    let page = repo.list(&ctx, filter.clone(), PageRequest::new(1, 3)).await?;

    assert_eq!(page.info.total, repo.count(&ctx, filter).await?);
    assert_eq!(page.info.total, 4);
    assert_eq!(page.items.len(), 3);
    let emails: Vec<&str> = page.items.iter().map(|u| u.email.as_str()).collect();
    let mut sorted = emails.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(emails, sorted);
    Ok(())
}

#[tokio::test]
async fn test_validation_fails_before_any_store_call() -> Result<()> {
    let (_db, store) = setup_test_store().await;
    let counting = Arc::new(CountingStore::new(store));
    let repo: BaseRepository<User> = BaseRepository::new(counting.clone(), RepositoryOptions::new());
    let ctx = OpContext::system();

    assertions::assert_error_kind(
        repo.create(&ctx, User::new("not-an-email", "Bad")).await,
        ErrorKind::Validation,
    );
    assertions::assert_error_kind(repo.get_by_id(&ctx, Uuid::nil()).await, ErrorKind::Validation);
    assertions::assert_error_kind(
        repo.list(&ctx, Filter::new().eq("email; DROP TABLE users", "x"), PageRequest::default())
            .await,
        ErrorKind::Validation,
    );
    assertions::assert_error_kind(
        repo.count(&ctx, Filter::new().with_condition("id", crate::storage::ConditionOperator::In, "x"))
            .await,
        ErrorKind::Validation,
    );

    assert_eq!(counting.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_context_skips_store() -> Result<()> {
    let (_db, store) = setup_test_store().await;
    let counting = Arc::new(CountingStore::new(store));
    let repo: BaseRepository<User> = BaseRepository::new(counting.clone(), RepositoryOptions::new());
    let ctx = OpContext::system();
    ctx.cancel();

    assertions::assert_error_kind(repo.get_by_id(&ctx, Uuid::new_v4()).await, ErrorKind::Cancelled);
    assertions::assert_error_kind(repo.create(&ctx, generators::user(1)).await, ErrorKind::Cancelled);
    assert_eq!(counting.calls(), 0);

    let fresh = OpContext::system();
    assert_eq!(repo.count(&fresh, Filter::new()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_batch_create_is_all_or_nothing() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    repo.create(&ctx, User::new("taken@x.com", "Existing")).await?;

    let mut batch = generators::users(3);
    batch.push(User::new("taken@x.com", "Duplicate"));
    assertions::assert_error_kind(repo.batch_create(&ctx, batch).await, ErrorKind::Conflict);
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 1);

    let created = repo.batch_create(&ctx, generators::users(3)).await?;
    assert_eq!(created.len(), 3);
    assert!(created.iter().all(|u| u.meta.has_id()));
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 4);
    assert!(repo.batch_create(&ctx, Vec::new()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_batch_soft_delete_is_all_or_nothing() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let users = repo.batch_create(&ctx, generators::users(3)).await?;
    let ids: Vec<Uuid> = users.iter().map(Record::id).collect();

    assertions::assert_error_kind(
        repo.batch_soft_delete(&ctx, &[ids[0], Uuid::new_v4()]).await,
        ErrorKind::NotFound,
    );
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 3);

    assert_eq!(repo.batch_soft_delete(&ctx, &ids[..2]).await?, 2);
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 1);
    assert_eq!(repo.count(&ctx, Filter::new().including_deleted()).await?, 3);
    assert_eq!(repo.batch_soft_delete(&ctx, &[]).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_batch_soft_delete_rejects_duplicate_ids() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let user = repo.create(&ctx, generators::user(1)).await?;

    assertions::assert_error_kind(
        repo.batch_soft_delete(&ctx, &[user.id(), user.id()]).await,
        ErrorKind::Validation,
    );
    assert!(repo.exists(&ctx, user.id()).await?);
    Ok(())
}

#[tokio::test]
async fn test_find_one_and_find_many() -> Result<()> {
    let (_db, repo) = user_repo().await;
    let ctx = OpContext::system();
    let users = repo.batch_create(&ctx, generators::users(5)).await?;

    let found = repo
        .find_one(&ctx, Filter::new().eq("email", users[2].email.as_str()))
        .await?;
    assert_eq!(found.map(|u| u.id()), Some(users[2].id()));
    assert!(repo.find_one(&ctx, Filter::new().eq("email", "nobody@x.com")).await?.is_none());

    let window = repo.find_many(&ctx, Filter::new(), Window::new(1, 2)).await?;
    assert_eq!(window.len(), 2);
    let everything = repo.find_many(&ctx, Filter::new(), Window::all()).await?;
    assert_eq!(everything.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_operations_are_reported_to_metrics() -> Result<()> {
    let (_db, store) = setup_test_store().await;
    let metrics = Arc::new(InMemoryMetrics::new());
    let repo: BaseRepository<User> =
        BaseRepository::new(store, RepositoryOptions::new().with_metrics(metrics.clone()));
    let ctx = OpContext::system();

    let created = repo.create(&ctx, generators::user(1)).await?;
    repo.get_by_id(&ctx, created.id()).await?;
    let _ = repo.get_by_id(&ctx, Uuid::new_v4()).await;

    let snapshot = metrics.snapshot("User");
    assert_eq!(snapshot.operation_count("create"), 1);
    assert_eq!(snapshot.operation_count("get_by_id"), 2);
    assert_eq!(snapshot.errors.get("NotFound"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn test_repository_trait_delegates_to_core() -> Result<()> {
    let (_db, store) = setup_test_store().await;
    let repo: Box<dyn Repository<User>> =
        Box::new(BaseRepository::<User>::new(store, RepositoryOptions::new()));
    let ctx = OpContext::system();

    let created = repo.create(&ctx, generators::user(1)).await?;
    assert!(repo.exists(&ctx, created.id()).await?);
    assert_eq!(repo.count(&ctx, Filter::new()).await?, 1);
    Ok(())
}
