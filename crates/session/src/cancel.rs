//! Cancellation token for interruptible waits
//!
//! Lock acquisition in this crate is blocking but must stay abortable: a
//! caller stuck behind a long transfer has to be able to give up when its
//! own context is torn down (ctrl-c, client disconnect). The token is a
//! shared flag raised by the canceller and polled by the waiter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    raised: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Pending interruptible waits observe it on their next
    /// poll and abort with an `Interrupted` error.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_raised());

        token.raise();
        assert!(clone.is_raised());
    }
}
