//! Delayed-callback collaborator
//!
//! A deadline is an independent timed action. Canceling it races the action
//! itself, so callbacks must tolerate firing after the thing they guard has
//! already finished.

use crate::error::DeadlineError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Action run when a deadline expires
pub type DeadlineCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cancelable reference to a scheduled deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineToken(pub u64);

/// Deadline scheduling capability
pub trait DeadlineScheduler: Send + Sync {
    /// Run `callback` once `after` has elapsed, unless canceled first
    fn schedule(
        &self,
        after: Duration,
        callback: DeadlineCallback,
    ) -> Result<DeadlineToken, DeadlineError>;

    /// Cancel a pending deadline; unknown or expired tokens are ignored
    fn cancel(&self, token: DeadlineToken);
}

/// Scheduler with one sleeping tokio task per deadline
///
/// Must be used from within a tokio runtime.
pub struct TokioDeadlines {
    next_token: AtomicU64,
    max_pending: Option<usize>,
    pending: Arc<DashMap<u64, Option<AbortHandle>>>,
}

impl TokioDeadlines {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            max_pending: None,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Refuse to hold more than `max` pending deadlines
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for TokioDeadlines {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineScheduler for TokioDeadlines {
    fn schedule(
        &self,
        after: Duration,
        callback: DeadlineCallback,
    ) -> Result<DeadlineToken, DeadlineError> {
        if let Some(max) = self.max_pending {
            if self.pending.len() >= max {
                return Err(DeadlineError::Exhausted(max));
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        // Registered before the task exists so an immediate expiry still finds it.
        self.pending.insert(token, None);

        let pending = Arc::clone(&self.pending);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Losing this race to cancel() means the callback must not run.
            if pending.remove(&token).is_some() {
                callback();
            }
        });
        if let Some(mut slot) = self.pending.get_mut(&token) {
            *slot = Some(task.abort_handle());
        }

        Ok(DeadlineToken(token))
    }

    fn cancel(&self, token: DeadlineToken) {
        if let Some((_, Some(task))) = self.pending.remove(&token.0) {
            task.abort();
        }
    }
}
