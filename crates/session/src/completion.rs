//! Interrupt-in completion handling
//!
//! Runs in the transport's completion context. Nothing here blocks: the
//! only shared state touched is the session's atomics and brief buffer
//! parks. Errors have no caller to surface to, so they are logged and
//! absorbed; the only visible effect of a dead stream is the cleared
//! `running_in` flag, which the next open repairs.

use crate::device::DeviceSession;
use crate::registry::MinorId;
use crate::slot::TransferSlot;
use crate::transport::{CompletionStatus, InCompletion, Transport};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{trace, warn};

/// Consumer hook for bytes arriving on the status stream. Called from the
/// completion context; implementations must not block.
pub trait InboundObserver: Send + Sync {
    fn on_payload(&self, minor: MinorId, payload: &[u8]);
}

/// Handles one completion, then either re-arms itself or goes quiet.
pub(crate) struct CompletionHandler {
    session: Arc<DeviceSession>,
    transport: Arc<dyn Transport>,
}

impl CompletionHandler {
    pub(crate) fn new(session: Arc<DeviceSession>, transport: Arc<dyn Transport>) -> Self {
        CompletionHandler { session, transport }
    }

    pub(crate) fn into_callback(self) -> InCompletion {
        Box::new(move |slot, status| self.handle(slot, status))
    }

    fn handle(self, slot: TransferSlot, status: CompletionStatus) {
        if status.is_teardown() {
            // Expected outcome of close/detach cancellation; not an error.
            trace!("Interrupt-in transfer stopped: {:?}", status);
            self.session.park_in_buffer(slot.into_buffer());
            return;
        }

        match status {
            CompletionStatus::Success => {
                let payload = slot.payload();
                trace!(
                    "Session {} received {} status bytes",
                    self.session.minor(),
                    payload.len()
                );
                if let Some(observer) = &self.session.observer {
                    observer.on_payload(self.session.minor(), payload);
                }
            }
            CompletionStatus::Error(e) => {
                // Maybe we can recover; transient transport hiccups should
                // not kill the stream.
                warn!(
                    "Session {} interrupt-in completion reported {}",
                    self.session.minor(),
                    e
                );
            }
            CompletionStatus::Cancelled | CompletionStatus::Reset | CompletionStatus::Shutdown => {
                unreachable!("teardown statuses returned above")
            }
        }

        self.resubmit(slot);
    }

    /// Re-arm if the stream is still wanted and the device is still here.
    /// Both flags may have been cleared since this transfer was armed.
    fn resubmit(self, mut slot: TransferSlot) {
        let session = Arc::clone(&self.session);
        if !session.running_in.load(Ordering::Acquire) || !session.alive.load(Ordering::Acquire) {
            session.park_in_buffer(slot.into_buffer());
            return;
        }

        slot.reset();
        let endpoint = session.interrupt_in_endpoint();
        let transport = Arc::clone(&self.transport);
        if let Err(failure) = transport.submit_interrupt_in(&endpoint, slot, self.into_callback()) {
            warn!(
                "Session {} could not resubmit interrupt-in transfer: {}; stream stops until next open",
                session.minor(),
                failure.error
            );
            session.halt_stream(failure.slot.into_buffer());
        }
    }
}
