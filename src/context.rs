//! Per-request execution context.
//!
//! The orchestrator creates one [`RequestContext`] per turn and threads
//! a reference through every downstream call. It carries the
//! correlation id, the whole-turn deadline, a cancellation token, and
//! the wall-clock timestamp captured at request entry (reused for all
//! TTL arithmetic inside the turn so backend clock skew cannot produce
//! inconsistent expiries).

use crate::error::{CoreError, CorrelationId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Scratch state for one user turn.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancel: CancellationToken,
    started: Instant,
    deadline: Instant,
    now: DateTime<Utc>,
}

impl RequestContext {
    /// Create a context with the given whole-turn deadline.
    pub fn new(deadline: Duration) -> Self {
        let started = Instant::now();
        Self {
            correlation_id: CorrelationId::new(),
            cancel: CancellationToken::new(),
            started,
            deadline: started + deadline,
            now: Utc::now(),
        }
    }

    /// Create a context whose cancellation token is chained to an
    /// external caller token.
    pub fn with_caller_token(deadline: Duration, caller: &CancellationToken) -> Self {
        let mut ctx = Self::new(deadline);
        ctx.cancel = caller.child_token();
        ctx
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wall-clock time captured at request entry.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Elapsed time since the turn started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Remaining budget before the deadline; zero once elapsed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Check cancellation and deadline. Called before and after every
    /// suspension point.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if self.remaining().is_zero() {
            return Err(CoreError::Timeout);
        }
        Ok(())
    }

    /// Run a future under the remaining deadline, aborting promptly on
    /// cancellation. The losing branch is dropped, which releases any
    /// provider slot the future held.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CoreError::Cancelled),
            out = tokio::time::timeout(self.remaining(), fut) => {
                out.map_err(|_| CoreError::Timeout)
            }
        }
    }

    /// Like [`Self::run`] for fallible futures, flattening the result.
    pub async fn run_result<F, T, E>(&self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<CoreError>,
    {
        match self.run(fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_deadline_times_out_before_work() {
        let ctx = RequestContext::new(Duration::ZERO);
        let err = ctx.check().unwrap_err();
        assert!(matches!(err, CoreError::Timeout));

        // And run() refuses to dispatch the future at all
        let err = ctx.run(async { 1 }).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_slow_future() {
        let ctx = RequestContext::new(Duration::from_secs(30));
        ctx.cancellation_token().cancel();
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses_mid_future() {
        let ctx = RequestContext::new(Duration::from_millis(50));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
    }

    #[tokio::test]
    async fn test_fast_future_completes() {
        let ctx = RequestContext::new(Duration::from_secs(5));
        let out = ctx.run(async { 42 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_caller_token_chains() {
        let caller = CancellationToken::new();
        let ctx = RequestContext::with_caller_token(Duration::from_secs(5), &caller);
        assert!(ctx.check().is_ok());
        caller.cancel();
        assert!(matches!(ctx.check(), Err(CoreError::Cancelled)));
    }
}
