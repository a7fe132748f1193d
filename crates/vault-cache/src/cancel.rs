//! Cancellation tokens for background derivation and sync work.
//!
//! A [`CancelTracker`] owns an active version number. Tokens capture the
//! version at the time they were issued and report cancellation once the
//! tracker has moved past it, so bumping the version cancels every token
//! handed out before.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of loop iterations between two cancellation checks in
/// [`CancellationToken::is_active_sparse`]. Must be a power of two.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400;

/// Shared version counter that invalidates issued tokens when bumped.
#[derive(Debug, Default, Clone)]
pub struct CancelTracker {
    active_version: Arc<AtomicU64>,
}

impl CancelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the version. Tokens issued before the bump report cancelled.
    pub fn next_version(&self) -> u64 {
        self.active_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Version that freshly issued tokens are bound to.
    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }

    /// Issues a token bound to the current version.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            active_version: Some(self.active_version.clone()),
            version: self.current_version(),
        }
    }

    /// Cancels all outstanding tokens. Safe to call any number of times.
    pub fn cancel_all(&self) {
        self.next_version();
    }
}

/// Handle checked by listing and derivation loops to notice a newer run.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    active_version: Option<Arc<AtomicU64>>,
    version: u64,
}

impl CancellationToken {
    /// Token without a tracker; it stays active forever.
    #[inline]
    pub fn noop() -> Self {
        Self {
            active_version: None,
            version: 0,
        }
    }

    /// Returns `Some(())` while the token is active and `None` once cancelled,
    /// so callers can bail out with `?`.
    #[inline]
    pub fn is_active(&self) -> Option<()> {
        match &self.active_version {
            Some(active) if active.load(Ordering::Relaxed) != self.version => None,
            _ => Some(()),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.is_active().is_none()
    }

    /// Like [`is_active`](Self::is_active), but only loads the version when
    /// `counter` is a multiple of [`CANCEL_CHECK_INTERVAL`].
    #[inline]
    pub fn is_active_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_active()
        } else {
            Some(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_token_is_never_cancelled() {
        let token = CancellationToken::noop();
        assert!(token.is_active().is_some());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn bumping_version_cancels_older_tokens() {
        let tracker = CancelTracker::new();
        let token = tracker.token();
        assert!(!token.is_cancelled());

        tracker.cancel_all();
        assert!(token.is_cancelled());

        let fresh = tracker.token();
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn cancel_all_is_idempotent_for_cancelled_tokens() {
        let tracker = CancelTracker::new();
        let token = tracker.token();
        tracker.cancel_all();
        tracker.cancel_all();
        assert!(token.is_cancelled());
    }

    #[test]
    fn sparse_check_only_looks_on_interval() {
        let tracker = CancelTracker::new();
        let token = tracker.token();
        tracker.cancel_all();
        assert!(token.is_active_sparse(1).is_some());
        assert!(token.is_active_sparse(CANCEL_CHECK_INTERVAL).is_none());
    }
}
