//! Cooperative cancellation for long-running generations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RenderError, Result};

/// Shared flag plus optional deadline, checked between frames.
///
/// Clones share the same flag, so one side can cancel while the
/// blocking worker observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl CancelToken {
    /// Creates a token that never expires on its own.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some((Instant::now() + timeout, timeout)),
        }
    }

    /// Marks the token as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails if the token was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(RenderError::DeadlineExceeded {
                    timeout_secs: timeout.as_secs(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_passes() {
        assert!(CancelToken::new().check().is_ok());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(RenderError::Cancelled)));
    }

    #[test]
    fn test_deadline_expires() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(matches!(
            token.check(),
            Err(RenderError::DeadlineExceeded { timeout_secs: 0 })
        ));
    }

    #[test]
    fn test_generous_deadline_passes() {
        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        assert!(token.check().is_ok());
    }
}
