//! Cooperative cancellation shared across a generation and its exports
//!
//! One coordinator is created per top-level generation request and passed to
//! every job wait and every transport call it spawns. Cancellation is a
//! pull-based signal checked at every suspension point; the orchestrators
//! are responsible for the follow-up best-effort remote cancel calls.

use tokio_util::sync::CancellationToken;

/// Cancellation signal for one generation and all of its sub-jobs
///
/// Cloning shares the same signal. Triggering is idempotent — cancelling
/// twice, or after natural completion, is a no-op.
#[derive(Clone, Debug, Default)]
pub struct CancellationCoordinator {
    token: CancellationToken,
}

impl CancellationCoordinator {
    /// Create a fresh, untriggered coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation
    ///
    /// All in-flight waits and transport calls holding this coordinator's
    /// token return promptly in a cancelled state.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying token, passed to transport calls and job waits
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A token that is never cancelled, for fire-and-forget best-effort
    /// calls that must proceed even after the coordinator has triggered
    /// (e.g. the remote cancel request itself)
    pub fn detached_token() -> CancellationToken {
        CancellationToken::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_shared_across_clones() {
        let coordinator = CancellationCoordinator::new();
        let clone = coordinator.clone();

        assert!(!coordinator.is_cancelled());
        coordinator.cancel();
        coordinator.cancel();
        assert!(coordinator.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn token_resolves_pending_waits() {
        let coordinator = CancellationCoordinator::new();
        let token = coordinator.token().clone();

        let wait = tokio::spawn(async move { token.cancelled().await });
        coordinator.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), wait)
            .await
            .unwrap()
            .unwrap();
    }
}
