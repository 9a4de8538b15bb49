//! The transport seam
//!
//! The session core does not talk USB itself; it drives a [`Transport`],
//! which is whatever lower layer can run synchronous out/control transfers
//! and asynchronous interrupt-in submissions with a completion notification.
//! The production implementation wraps rusb; tests substitute a scripted
//! mock.

use crate::error::TransportError;
use crate::slot::TransferSlot;
use protocol::EndpointInfo;
use std::time::Duration;

/// Final status of an asynchronous interrupt-in transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The transfer completed and the slot's payload is valid.
    Success,
    /// Killed by an explicit cancel.
    Cancelled,
    /// The endpoint or device was reset while the transfer was in flight.
    Reset,
    /// The transport is shutting down.
    Shutdown,
    /// Any other failure; the status code travels with it.
    Error(TransportError),
}

impl CompletionStatus {
    /// True for the statuses produced by deliberate teardown. These are the
    /// expected outcome of close/detach cancellation, not anomalies.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            CompletionStatus::Cancelled | CompletionStatus::Reset | CompletionStatus::Shutdown
        )
    }
}

/// Completion notification for one interrupt-in submission. Invoked exactly
/// once, possibly on a transport-owned thread; it runs in the completion
/// context and must not block.
pub type InCompletion = Box<dyn FnOnce(TransferSlot, CompletionStatus) + Send>;

/// A rejected submission; the slot travels back to the caller.
#[derive(Debug)]
pub struct SubmitFailure {
    pub slot: TransferSlot,
    pub error: TransportError,
}

/// Lower layer the session core drives.
///
/// Contract:
/// - `submit_interrupt_in` must not invoke `complete` synchronously from
///   within the call; the completion runs later, in the transport's
///   completion context.
/// - `cancel_interrupt_in` returns only once the transport guarantees that
///   no further completion will fire for the armed transfer (the completion
///   for the cancelled transfer, if any, has already finished running).
///   Callers rely on this before tearing resources down.
pub trait Transport: Send + Sync {
    /// Device-reported serial identifier.
    fn serial_number(&self) -> Result<String, TransportError>;

    /// Declared endpoints, in descriptor order.
    fn endpoints(&self) -> Vec<EndpointInfo>;

    /// Arm an asynchronous interrupt-in transfer. On rejection the slot is
    /// handed back inside the failure.
    fn submit_interrupt_in(
        &self,
        endpoint: &EndpointInfo,
        slot: TransferSlot,
        complete: InCompletion,
    ) -> Result<(), SubmitFailure>;

    /// Synchronously cancel the in-flight interrupt-in transfer, if any.
    fn cancel_interrupt_in(&self, endpoint: &EndpointInfo);

    /// Synchronous interrupt-out transfer. Returns the number of bytes the
    /// device accepted, which may be short.
    fn interrupt_out(
        &self,
        endpoint: &EndpointInfo,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Synchronous control transfer to endpoint zero.
    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_statuses() {
        assert!(CompletionStatus::Cancelled.is_teardown());
        assert!(CompletionStatus::Reset.is_teardown());
        assert!(CompletionStatus::Shutdown.is_teardown());
        assert!(!CompletionStatus::Success.is_teardown());
        assert!(!CompletionStatus::Error(TransportError::Io).is_teardown());
    }
}
