//! Per-device session state
//!
//! One [`DeviceSession`] exists per physically attached bird, shared by the
//! registry and every open handle through an `Arc`. Three independent
//! triggers act on it (client open/close, transfer completion on the
//! transport thread, and physical unplug) and the rules here keep them
//! from freeing or invalidating each other's state:
//!
//! - All client-facing operations serialize through the logical
//!   [`SessionLock`]; acquisition is blocking but interruptible.
//! - Mutable state lives behind a plain mutex held only for short critical
//!   sections, so the completion context can park buffers without waiting
//!   on a client mid-transfer.
//! - `running_in` and `alive` are the lock-free view for the completion
//!   context: stores use `Release`, loads use `Acquire`. `alive` mirrors
//!   the presence of the transport handle, which after detach is only
//!   dereferenced by operations already holding their own clone.
//!
//! The session's storage is released at the later of detach and the last
//! close; whichever comes second runs [`DeviceSession::finalize`].

use crate::cancel::CancelToken;
use crate::completion::{CompletionHandler, InboundObserver};
use crate::error::{CloseError, CommandError, OpenError, ReadError, WriteError};
use crate::lock::SessionLock;
use crate::registry::MinorId;
use crate::slot::TransferSlot;
use crate::transport::Transport;
use protocol::{ActuatorCommand, COMMAND_REQUEST, COMMAND_TIMEOUT, REQUEST_TYPE_VENDOR_OUT, WRITE_TIMEOUT};
use protocol::EndpointInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Mutable session state. Critical sections on this mutex stay short; long
/// operations hold only the logical session lock.
pub(crate) struct SessionState {
    pub(crate) open_count: u32,
    /// Present while the device is attached. Never freed by the session
    /// itself; clearing the `Option` drops one reference, nothing more.
    pub(crate) transport: Option<Arc<dyn Transport>>,
    /// Interrupt-in buffer, parked here between arms.
    pub(crate) in_buffer: Option<Vec<u8>>,
    /// Interrupt-out staging buffer, parked here between writes.
    pub(crate) out_buffer: Option<Vec<u8>>,
    /// The reserved control frame, armed at attach and never driven.
    pub(crate) status_slot: Option<TransferSlot>,
}

/// Shared per-device object for the whole attached lifetime.
pub struct DeviceSession {
    minor: MinorId,
    serial: String,
    int_in: EndpointInfo,
    int_out: EndpointInfo,
    pub(crate) lock: SessionLock,
    pub(crate) state: Mutex<SessionState>,
    /// True while an interrupt-in transfer is armed.
    pub(crate) running_in: AtomicBool,
    /// Lock-free mirror of "transport is present".
    pub(crate) alive: AtomicBool,
    pub(crate) observer: Option<Arc<dyn InboundObserver>>,
}

impl DeviceSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        minor: MinorId,
        serial: String,
        int_in: EndpointInfo,
        int_out: EndpointInfo,
        transport: Arc<dyn Transport>,
        in_buffer: Vec<u8>,
        out_buffer: Vec<u8>,
        status_slot: TransferSlot,
        observer: Option<Arc<dyn InboundObserver>>,
    ) -> Self {
        DeviceSession {
            minor,
            serial,
            int_in,
            int_out,
            lock: SessionLock::new(),
            state: Mutex::new(SessionState {
                open_count: 0,
                transport: Some(transport),
                in_buffer: Some(in_buffer),
                out_buffer: Some(out_buffer),
                status_slot: Some(status_slot),
            }),
            running_in: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            observer,
        }
    }

    pub fn minor(&self) -> MinorId {
        self.minor
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().unwrap().open_count
    }

    /// False once the physical device has been removed.
    pub fn is_attached(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt_in_endpoint(&self) -> EndpointInfo {
        self.int_in
    }

    /// Open this session. The caller (the registry) holds the coarse
    /// attach/detach lock for the whole call, so an open can never
    /// interleave with attach or detach.
    pub(crate) fn open_locked(self: &Arc<Self>, cancel: &CancelToken) -> Result<(), OpenError> {
        let _guard = self.lock.acquire(cancel).map_err(|_| OpenError::Interrupted)?;

        let mut st = self.state.lock().unwrap();
        if st.transport.is_none() {
            return Err(OpenError::NotFound);
        }

        st.open_count += 1;
        if st.open_count > 1 {
            debug!("Session {} open_count now {}", self.minor, st.open_count);
        }

        // First opener (or first after the stream went quiet) arms the
        // status stream.
        if !self.running_in.load(Ordering::Acquire) {
            if let Err(e) = self.arm_interrupt_in(&mut st) {
                st.open_count -= 1;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Arm the interrupt-in stream. Called with the state mutex held.
    fn arm_interrupt_in(self: &Arc<Self>, st: &mut SessionState) -> Result<(), OpenError> {
        let transport = st.transport.clone().ok_or(OpenError::NotFound)?;
        let buffer = st
            .in_buffer
            .take()
            .ok_or(OpenError::Submit(crate::error::TransportError::Busy))?;

        // The flag must be visible to the completion context before the
        // first completion can possibly run.
        self.running_in.store(true, Ordering::Release);

        let slot = TransferSlot::interrupt_in(buffer);
        let handler = CompletionHandler::new(Arc::clone(self), Arc::clone(&transport));
        match transport.submit_interrupt_in(&self.int_in, slot, handler.into_callback()) {
            Ok(()) => {
                trace!("Session {} interrupt-in stream armed", self.minor);
                Ok(())
            }
            Err(failure) => {
                self.running_in.store(false, Ordering::Release);
                st.in_buffer = Some(failure.slot.into_buffer());
                warn!(
                    "Arming interrupt-in stream for session {} failed: {}",
                    self.minor, failure.error
                );
                Err(OpenError::Submit(failure.error))
            }
        }
    }

    pub(crate) fn close(&self) -> Result<(), CloseError> {
        let guard = self.lock.acquire_blocking();

        let mut st = self.state.lock().unwrap();
        if st.open_count == 0 {
            return Err(CloseError::NotOpen);
        }

        if st.transport.is_none() {
            // Unplugged while open; the last close finalizes teardown.
            st.open_count -= 1;
            let last = st.open_count == 0;
            debug!(
                "Session {} closed after unplug (open_count {})",
                self.minor, st.open_count
            );
            drop(st);
            // The guard goes first: finalization must not run under the
            // session lock it is about to orphan.
            drop(guard);
            if last {
                self.finalize();
            }
            return Ok(());
        }

        if st.open_count == 1 {
            // Last closer stops the status stream.
            self.running_in.store(false, Ordering::Release);
            let transport = st.transport.clone();
            drop(st);
            if let Some(transport) = transport {
                transport.cancel_interrupt_in(&self.int_in);
            }
            st = self.state.lock().unwrap();
        }

        st.open_count -= 1;
        debug!("Session {} closed (open_count {})", self.minor, st.open_count);
        Ok(())
    }

    pub(crate) fn write(&self, data: &[u8], cancel: &CancelToken) -> Result<usize, WriteError> {
        let _guard = self.lock.acquire(cancel).map_err(|_| WriteError::Interrupted)?;

        let (transport, buffer) = {
            let mut st = self.state.lock().unwrap();
            let transport = st.transport.clone().ok_or(WriteError::DeviceGone)?;
            if data.is_empty() {
                return Ok(0);
            }
            let buffer = st
                .out_buffer
                .take()
                .expect("out buffer is parked whenever the session lock is free");
            (transport, buffer)
        };

        let mut slot = TransferSlot::interrupt_out(buffer);
        let staged = slot.stage(data);
        if staged < data.len() {
            trace!(
                "Session {} write truncated from {} to {} bytes",
                self.minor,
                data.len(),
                staged
            );
        }

        let outcome = transport.interrupt_out(&self.int_out, slot.staged(), WRITE_TIMEOUT);
        self.state.lock().unwrap().out_buffer = Some(slot.into_buffer());

        match outcome {
            Ok(written) => {
                debug!("Session {} wrote {} of {} staged bytes", self.minor, written, staged);
                Ok(written)
            }
            Err(e) => {
                warn!("Session {} interrupt-out transfer failed: {}", self.minor, e);
                Err(WriteError::Transfer(e))
            }
        }
    }

    pub(crate) fn command(&self, code: u8, cancel: &CancelToken) -> Result<(), CommandError> {
        let _guard = self.lock.acquire(cancel).map_err(|_| CommandError::Interrupted)?;

        let transport = {
            let st = self.state.lock().unwrap();
            st.transport.clone().ok_or(CommandError::DeviceGone)?
        };

        let command = ActuatorCommand::from_code(code);
        let words = command.words();
        debug!(
            "Session {} issuing {:?} (value {:#06x}, index {})",
            self.minor, command, words.value, words.index
        );

        transport
            .control_out(
                REQUEST_TYPE_VENDOR_OUT,
                COMMAND_REQUEST,
                words.value,
                words.index,
                &[],
                COMMAND_TIMEOUT,
            )
            .map(drop)
            .map_err(|e| {
                warn!("Session {} command transfer failed: {}", self.minor, e);
                CommandError::Transfer(e)
            })
    }

    /// Park the interrupt-in buffer after its slot was consumed. Runs in
    /// the completion context; the state mutex is only ever held briefly.
    pub(crate) fn park_in_buffer(&self, buffer: Vec<u8>) {
        self.state.lock().unwrap().in_buffer = Some(buffer);
    }

    /// Park the buffer and mark the stream stopped in one critical section,
    /// so an opener never observes a running flag without a buffer.
    pub(crate) fn halt_stream(&self, buffer: Vec<u8>) {
        let mut st = self.state.lock().unwrap();
        st.in_buffer = Some(buffer);
        self.running_in.store(false, Ordering::Release);
    }

    /// Sever the transport on physical detach. Caller holds the coarse
    /// attach/detach lock.
    pub(crate) fn detach_transport(&self) {
        self.running_in.store(false, Ordering::Release);
        self.alive.store(false, Ordering::Release);

        let transport = self.state.lock().unwrap().transport.clone();
        if let Some(transport) = &transport {
            // Returns only once no further completion can fire.
            transport.cancel_interrupt_in(&self.int_in);
        }

        let mut st = self.state.lock().unwrap();
        st.transport = None;
        let idle = st.open_count == 0;
        drop(st);

        if idle {
            self.finalize();
        }
    }

    /// Release the session's buffers. Every path here has already cancelled
    /// outstanding transfers; buffers go before the last shared references.
    fn finalize(&self) {
        let mut st = self.state.lock().unwrap();
        let buffers = (st.in_buffer.take(), st.out_buffer.take(), st.status_slot.take());
        drop(st);
        drop(buffers);
        debug!("Session {} resources released", self.minor);
    }
}

/// Client-side handle returned by a successful open.
///
/// Dropping the handle closes the session; an explicit [`close`] reports
/// errors instead of logging them.
///
/// [`close`]: SessionHandle::close
pub struct SessionHandle {
    session: Option<Arc<DeviceSession>>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<DeviceSession>) -> Self {
        SessionHandle { session: Some(session) }
    }

    fn session(&self) -> &Arc<DeviceSession> {
        self.session
            .as_ref()
            .expect("handle only loses its session in close/drop")
    }

    pub fn minor(&self) -> MinorId {
        self.session().minor()
    }

    /// Stream bytes to the device's audio path. Input beyond the 4096-byte
    /// frame cap is truncated silently; the return value is the byte count
    /// the device actually accepted.
    pub fn write(&self, data: &[u8], cancel: &CancelToken) -> Result<usize, WriteError> {
        self.session().write(data, cancel)
    }

    /// Issue an actuator command by raw code. Unrecognized codes fall back
    /// to the neutral command.
    pub fn command(&self, code: u8, cancel: &CancelToken) -> Result<(), CommandError> {
        self.session().command(code, cancel)
    }

    /// Issue a known actuator command.
    pub fn send(&self, command: ActuatorCommand, cancel: &CancelToken) -> Result<(), CommandError> {
        self.session().command(command.code(), cancel)
    }

    /// The device has no host-readable data path.
    pub fn read(&self, _buf: &mut [u8]) -> Result<usize, ReadError> {
        Err(ReadError::Unsupported)
    }

    pub fn close(mut self) -> Result<(), CloseError> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Err(CloseError::NotOpen),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("minor", &self.session.as_ref().map(|s| s.minor()))
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                debug!("Closing dropped handle failed: {}", e);
            }
        }
    }
}
