//! Execution context handed to every stage.
//!
//! Carries a cancellation token (tripped by Ctrl-C in the binary) and an
//! optional wall-clock deadline for the whole invocation. Stages call
//! [`JobContext::checkpoint`] between batches and between upstream pages;
//! nothing inside a batch transaction observes it.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl JobContext {
    /// A context with no deadline that is never cancelled unless asked to.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns an error if the job has been cancelled or ran out of time.
    pub fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PipelineError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Sleep for `delay`, waking early on cancellation or deadline.
    pub async fn pause(&self, delay: Duration) -> Result<(), PipelineError> {
        let wake = Instant::now() + delay;
        let wake = match self.deadline {
            Some(deadline) if deadline < wake => deadline,
            _ => wake,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(wake) => {}
        }
        self.checkpoint()
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes_checkpoint() {
        assert!(JobContext::new().checkpoint().is_ok());
    }

    #[test]
    fn test_cancelled_context_fails_checkpoint() {
        let ctx = JobContext::new();
        ctx.cancel();
        assert!(matches!(ctx.checkpoint(), Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_checkpoint() {
        let ctx = JobContext::new().with_deadline(Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            ctx.checkpoint(),
            Err(PipelineError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_pause_wakes_on_cancel() {
        let ctx = JobContext::new();
        let clone = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            clone.cancel();
        });
        let res = ctx.pause(Duration::from_secs(30)).await;
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }
}
