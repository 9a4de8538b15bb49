//! Session registry
//!
//! Process-wide table mapping minor ids to live sessions, behind one coarse
//! non-interruptible mutex, the attach/detach lock. `open` holds that lock
//! for its whole duration, so a session can never be opened mid-detach or
//! detached mid-open. The registry is passed around explicitly; there is no
//! ambient singleton.

use crate::cancel::CancelToken;
use crate::device::{DeviceSession, SessionHandle};
use crate::error::OpenError;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

/// Number of minor slots. Attach fails with `RegistrationFailure` once all
/// are taken.
pub const MAX_SESSIONS: usize = 16;

/// Externally-visible session identifier, assigned once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinorId(pub u8);

impl std::fmt::Display for MinorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of one registered session, for listings.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub minor: MinorId,
    pub serial: String,
    pub open_count: u32,
    pub attached: bool,
}

pub(crate) struct RegistryInner {
    /// Arena of minor slots; a session keeps its index for its lifetime.
    slots: Vec<Option<Arc<DeviceSession>>>,
}

impl RegistryInner {
    /// Lowest free minor, if any.
    pub(crate) fn free_minor(&self) -> Option<MinorId> {
        self.slots
            .iter()
            .position(|slot| slot.is_none())
            .map(|idx| MinorId(idx as u8))
    }

    pub(crate) fn insert(&mut self, minor: MinorId, session: Arc<DeviceSession>) {
        debug_assert!(self.slots[minor.0 as usize].is_none());
        self.slots[minor.0 as usize] = Some(session);
    }

    pub(crate) fn remove(&mut self, minor: MinorId) -> Option<Arc<DeviceSession>> {
        self.slots.get_mut(minor.0 as usize)?.take()
    }

    fn get(&self, minor: MinorId) -> Option<&Arc<DeviceSession>> {
        self.slots.get(minor.0 as usize)?.as_ref()
    }
}

/// The process-wide minor → session table.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            inner: Mutex::new(RegistryInner { slots: vec![None; MAX_SESSIONS] }),
        }
    }

    /// The coarse attach/detach lock, for the lifecycle controller.
    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap()
    }

    /// Open a session by minor id.
    ///
    /// The coarse lock is held across lookup, the (interruptible) session
    /// lock wait, and the stream arming, exactly excluding attach/detach.
    pub fn open(&self, minor: MinorId, cancel: &CancelToken) -> Result<SessionHandle, OpenError> {
        let inner = self.inner.lock().unwrap();
        let session = inner.get(minor).cloned().ok_or(OpenError::NotFound)?;
        session.open_locked(cancel)?;
        debug!("Session {} opened", minor);
        Ok(SessionHandle::new(session))
    }

    /// Registered session count.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all registered sessions, in minor order.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .flatten()
            .map(|session| SessionSnapshot {
                minor: session.minor(),
                serial: session.serial().to_string(),
                open_count: session.open_count(),
                attached: session.is_attached(),
            })
            .collect()
    }

    /// Weak reference to a registered session, for liveness observation
    /// without pinning its storage.
    pub fn downgrade(&self, minor: MinorId) -> Option<Weak<DeviceSession>> {
        self.inner.lock().unwrap().get(minor).map(Arc::downgrade)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.sessions().is_empty());
        assert!(registry.downgrade(MinorId(0)).is_none());
    }

    #[test]
    fn test_open_unknown_minor() {
        let registry = SessionRegistry::new();
        let err = registry.open(MinorId(3), &CancelToken::new()).unwrap_err();
        assert_eq!(err, OpenError::NotFound);
    }

    #[test]
    fn test_free_minor_is_lowest() {
        let registry = SessionRegistry::new();
        let inner = registry.lock_inner();
        assert_eq!(inner.free_minor(), Some(MinorId(0)));
    }
}
