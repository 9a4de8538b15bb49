//! Attach and detach transitions
//!
//! The [`LifecycleController`] turns a plugged-in device into a registered
//! session and tears it back down on unplug. Both transitions run under the
//! registry's coarse lock, so they serialize against each other and against
//! every open.

use crate::completion::InboundObserver;
use crate::device::DeviceSession;
use crate::error::{AttachError, DetachError};
use crate::registry::{MinorId, SessionRegistry};
use crate::slot::TransferSlot;
use crate::transport::Transport;
use protocol::{Direction, INT_OUT_FRAME_MAX, STATUS_FRAME_LEN};
use std::sync::Arc;
use tracing::{info, warn};

/// Fallible buffer allocation, so a hostile size from a descriptor cannot
/// abort the process.
fn alloc_buffer(len: usize) -> Result<Vec<u8>, AttachError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| AttachError::AllocationFailure)?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// Drives attach/detach against a shared registry.
pub struct LifecycleController {
    registry: Arc<SessionRegistry>,
    observer: Option<Arc<dyn InboundObserver>>,
}

impl LifecycleController {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        LifecycleController { registry, observer: None }
    }

    /// Attach an observer for inbound status payloads; applies to sessions
    /// attached afterwards.
    pub fn with_observer(mut self, observer: Arc<dyn InboundObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bring a plugged-in device up as a session and make it visible to
    /// `open`.
    ///
    /// Discovery must yield exactly one interrupt-in and one interrupt-out
    /// endpoint. Failures release everything allocated so far (buffer and
    /// slot ownership unwinds by value) and leave the registry untouched.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> Result<MinorId, AttachError> {
        let endpoints = transport.endpoints();
        let int_in = *endpoints
            .iter()
            .find(|ep| ep.is_interrupt(Direction::In))
            .ok_or(AttachError::MissingEndpoint(Direction::In))?;
        let int_out = *endpoints
            .iter()
            .find(|ep| ep.is_interrupt(Direction::Out))
            .ok_or(AttachError::MissingEndpoint(Direction::Out))?;

        let in_buffer = alloc_buffer(int_in.max_packet_size as usize)?;
        let out_buffer = alloc_buffer(INT_OUT_FRAME_MAX)?;
        // The reserved status frame: allocated and armed, never driven.
        let status_slot = TransferSlot::control(alloc_buffer(STATUS_FRAME_LEN)?);

        let serial = transport.serial_number().map_err(|e| {
            warn!("Could not read device serial: {}", e);
            AttachError::SerialRead(e)
        })?;

        let mut inner = self.registry.lock_inner();
        let minor = inner.free_minor().ok_or(AttachError::RegistrationFailure)?;
        let session = Arc::new(DeviceSession::new(
            minor,
            serial.clone(),
            int_in,
            int_out,
            transport,
            in_buffer,
            out_buffer,
            status_slot,
            self.observer.clone(),
        ));
        inner.insert(minor, session);

        info!("Device {} attached as session {}", serial, minor);
        Ok(minor)
    }

    /// Tear a session down on physical removal.
    ///
    /// Under the coarse lock: the session leaves the registry (future opens
    /// observe `NotFound`), the status stream is cancelled synchronously,
    /// and the transport reference is dropped. If no handles are open the
    /// session's resources are released now; otherwise the surviving
    /// handles keep the object alive and observe `DeviceGone` until the
    /// last close.
    pub fn detach(&self, minor: MinorId) -> Result<(), DetachError> {
        let mut inner = self.registry.lock_inner();
        let session = inner.remove(minor).ok_or(DetachError::NotFound(minor))?;

        session.detach_transport();

        let open_count = session.open_count();
        if open_count > 0 {
            info!(
                "Session {} detached with {} handle(s) still open; teardown deferred",
                minor, open_count
            );
        } else {
            info!("Session {} detached", minor);
        }
        Ok(())
    }
}
