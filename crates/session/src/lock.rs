//! Per-session logical lock
//!
//! Exactly one holder at a time serializes open/close/write/command, and a
//! holder may keep the lock across a transfer that takes hundreds of
//! milliseconds. A plain `Mutex` guard would make waiters uninterruptible
//! for that whole window, so the lock is split in two levels: a `held` flag
//! behind a short-lived std mutex, and waiters parked on a condvar that
//! re-check their cancellation token on a short poll interval.

use crate::cancel::CancelToken;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// How often a parked waiter re-checks its cancellation token.
const ACQUIRE_POLL: Duration = Duration::from_millis(10);

/// Marker error: the wait was aborted by the caller's token.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Interrupted;

pub(crate) struct SessionLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl SessionLock {
    pub(crate) fn new() -> Self {
        SessionLock {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// Blocking, interruptible acquisition. The token is only consulted
    /// while actually waiting; an uncontended acquire never fails.
    pub(crate) fn acquire(&self, cancel: &CancelToken) -> Result<SessionGuard<'_>, Interrupted> {
        let mut held = self.held.lock().unwrap();
        while *held {
            if cancel.is_raised() {
                return Err(Interrupted);
            }
            let (guard, _) = self.released.wait_timeout(held, ACQUIRE_POLL).unwrap();
            held = guard;
        }
        *held = true;
        Ok(SessionGuard { lock: self })
    }

    /// Blocking, non-interruptible acquisition, for close paths that must
    /// run to completion.
    pub(crate) fn acquire_blocking(&self) -> SessionGuard<'_> {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        *held = true;
        SessionGuard { lock: self }
    }
}

pub(crate) struct SessionGuard<'a> {
    lock: &'a SessionLock,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.lock.held.lock().unwrap() = false;
        self.lock.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_uncontended_acquire_ignores_raised_token() {
        let lock = SessionLock::new();
        let cancel = CancelToken::new();
        cancel.raise();

        // Nothing to wait for, so no interruption.
        assert!(lock.acquire(&cancel).is_ok());
    }

    #[test]
    fn test_contended_acquire_observes_cancellation() {
        let lock = Arc::new(SessionLock::new());
        let cancel = CancelToken::new();
        let _guard = lock.acquire(&cancel).unwrap();

        let waiter_lock = Arc::clone(&lock);
        let waiter_cancel = cancel.clone();
        let waiter = thread::spawn(move || waiter_lock.acquire(&waiter_cancel).err());

        thread::sleep(Duration::from_millis(30));
        cancel.raise();

        assert_eq!(waiter.join().unwrap(), Some(Interrupted));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let lock = Arc::new(SessionLock::new());
        let guard = lock.acquire_blocking();

        let waiter_lock = Arc::clone(&lock);
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let _g = waiter_lock.acquire_blocking();
            start.elapsed()
        });

        thread::sleep(Duration::from_millis(20));
        drop(guard);

        // The waiter must get through once the holder releases.
        assert!(waiter.join().unwrap() >= Duration::from_millis(10));
    }
}
