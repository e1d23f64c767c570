//! Explicit per-call context for repository operations
//!
//! Every repository call receives an [`OpContext`] carrying the actor that is
//! recorded in the audit trail and the cancellation/deadline that bounds the
//! store round trips.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Who is acting, for audit purposes. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub request_id: Option<String>,
}

impl ActorContext {
    /// Context with no actor; audit entries get empty actor fields
    pub fn system() -> Self {
        Self::default()
    }

    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Operation context: actor plus cancellation and deadline
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub actor: ActorContext,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(actor: ActorContext) -> Self {
        Self {
            actor,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context for background jobs and tests
    pub fn system() -> Self {
        Self::new(ActorContext::system())
    }

    /// Share an existing cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Abort store round trips that are still running after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast when the context is already cancelled or expired
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::cancelled(operation, "cancellation requested"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(AppError::cancelled(operation, "deadline exceeded"));
        }
        Ok(())
    }

    /// Run a store round trip, aborting it on cancellation or deadline.
    ///
    /// An aborted future is dropped, so no partial result is returned.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| AppError::cancelled(operation, "deadline exceeded"))?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::cancelled(operation, "cancellation requested")),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = OpContext::system();
        let value = ctx.run("noop", async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_pre_cancelled_context_fails_before_running() {
        let ctx = OpContext::system();
        ctx.cancel();
        let polled = AtomicBool::new(false);
        let err = ctx
            .run("noop", async {
                polled.store(true, Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_round_trip() {
        let ctx = OpContext::system();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_aborts_pending_round_trip() {
        let ctx = OpContext::system().with_timeout(Duration::from_millis(10));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deadline exceeded"));
    }
}
