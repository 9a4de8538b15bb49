//! Scripted transport for exercising the session core without hardware.
//!
//! The mock records every synchronous transfer, parks the armed
//! interrupt-in submission until the test drives it with
//! [`MockTransport::complete_pending`], and completes it with `Cancelled`
//! when the core cancels, mirroring the real transport's synchronous
//! cancel guarantee.

use protocol::{Direction, EndpointInfo, TransferKind};
use session::{CompletionStatus, InCompletion, SubmitFailure, Transport, TransferSlot, TransportError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One recorded control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

struct Pending {
    slot: TransferSlot,
    complete: InCompletion,
}

pub struct MockTransport {
    endpoints: Vec<EndpointInfo>,
    serial: Mutex<Result<String, TransportError>>,
    pending: Mutex<Option<Pending>>,
    submit_count: AtomicUsize,
    cancel_count: AtomicUsize,
    fail_submits: AtomicUsize,
    out_calls: Mutex<Vec<Vec<u8>>>,
    out_result: Mutex<Result<Option<usize>, TransportError>>,
    out_delay: Mutex<Duration>,
    control_calls: Mutex<Vec<ControlCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_endpoints(vec![
            EndpointInfo::from_raw(0x81, 0x03, 8, 10),
            EndpointInfo::from_raw(0x02, 0x03, 64, 1),
        ])
    }

    pub fn with_endpoints(endpoints: Vec<EndpointInfo>) -> Self {
        MockTransport {
            endpoints,
            serial: Mutex::new(Ok("MOCK0001".to_string())),
            pending: Mutex::new(None),
            submit_count: AtomicUsize::new(0),
            cancel_count: AtomicUsize::new(0),
            fail_submits: AtomicUsize::new(0),
            out_calls: Mutex::new(Vec::new()),
            out_result: Mutex::new(Ok(None)),
            out_delay: Mutex::new(Duration::ZERO),
            control_calls: Mutex::new(Vec::new()),
        }
    }

    /// Endpoint set with no interrupt-out endpoint.
    pub fn interrupt_in_only() -> Self {
        Self::with_endpoints(vec![EndpointInfo::from_raw(0x81, 0x03, 8, 10)])
    }

    pub fn set_serial_result(&self, result: Result<&str, TransportError>) {
        *self.serial.lock().unwrap() = result.map(str::to_string);
    }

    /// Reject the next `n` interrupt-in submissions.
    pub fn fail_next_submits(&self, n: usize) {
        self.fail_submits.store(n, Ordering::SeqCst);
    }

    /// `Ok(None)` echoes the staged length; `Ok(Some(n))` reports a short
    /// transfer.
    pub fn set_out_result(&self, result: Result<Option<usize>, TransportError>) {
        *self.out_result.lock().unwrap() = result;
    }

    /// Make interrupt-out transfers take this long, to hold the session
    /// lock from a test thread.
    pub fn set_out_delay(&self, delay: Duration) {
        *self.out_delay.lock().unwrap() = delay;
    }

    /// Drive the parked interrupt-in completion. Returns false if nothing
    /// was armed.
    pub fn complete_pending(&self, status: CompletionStatus, payload: &[u8]) -> bool {
        let pending = self.pending.lock().unwrap().take();
        match pending {
            Some(Pending { mut slot, complete }) => {
                let len = payload.len().min(slot.capacity());
                slot.buffer_mut()[..len].copy_from_slice(&payload[..len]);
                slot.set_actual_len(len);
                complete(slot, status);
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }

    pub fn out_calls(&self) -> Vec<Vec<u8>> {
        self.out_calls.lock().unwrap().clone()
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.control_calls.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn serial_number(&self) -> Result<String, TransportError> {
        self.serial.lock().unwrap().clone()
    }

    fn endpoints(&self) -> Vec<EndpointInfo> {
        self.endpoints.clone()
    }

    fn submit_interrupt_in(
        &self,
        endpoint: &EndpointInfo,
        slot: TransferSlot,
        complete: InCompletion,
    ) -> Result<(), SubmitFailure> {
        assert!(endpoint.is_interrupt(Direction::In));
        assert_eq!(endpoint.transfer_kind, TransferKind::Interrupt);
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SubmitFailure { slot, error: TransportError::Io });
        }

        let previous = self
            .pending
            .lock()
            .unwrap()
            .replace(Pending { slot, complete });
        assert!(previous.is_none(), "double-armed interrupt-in transfer");
        Ok(())
    }

    fn cancel_interrupt_in(&self, _endpoint: &EndpointInfo) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        // Completing inline before returning models the synchronous-cancel
        // guarantee: once this returns, no completion can fire.
        self.complete_pending(CompletionStatus::Cancelled, &[]);
    }

    fn interrupt_out(
        &self,
        endpoint: &EndpointInfo,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        assert!(endpoint.is_interrupt(Direction::Out));
        // Recorded before the delay, so tests can wait for the transfer to
        // be in flight.
        self.out_calls.lock().unwrap().push(data.to_vec());
        let delay = *self.out_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match *self.out_result.lock().unwrap() {
            Ok(None) => Ok(data.len()),
            Ok(Some(n)) => Ok(n),
            Err(e) => Err(e),
        }
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        assert!(data.is_empty(), "command transfers carry no data stage");
        self.control_calls.lock().unwrap().push(ControlCall {
            request_type,
            request,
            value,
            index,
        });
        Ok(0)
    }
}
