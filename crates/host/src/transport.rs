//! rusb-backed transport
//!
//! Bridges the session core's [`Transport`] seam onto libusb. Out and
//! control transfers map straight onto rusb's synchronous calls. The
//! asynchronous interrupt-in path runs on one persistent reader thread per
//! device: an armed submission polls `read_interrupt` with a short timeout
//! until data, cancellation, or a hard error, then runs the completion on
//! that thread. Cancellation sets a flag and waits for the reader's
//! acknowledgement, which is what gives the core its "no completion after
//! cancel returns" guarantee.

use protocol::{Direction, EndpointInfo, TransferKind};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use session::{CompletionStatus, InCompletion, SubmitFailure, Transport, TransferSlot, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Poll timeout for the reader thread; bounds cancel latency.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Find all matching devices on the bus.
pub fn find_birds(
    context: &Context,
    vendor_id: u16,
    product_id: u16,
) -> Result<Vec<Device<Context>>, rusb::Error> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
            found.push(device);
        }
    }
    Ok(found)
}

enum ReaderMsg {
    Arm {
        endpoint: u8,
        slot: TransferSlot,
        complete: InCompletion,
    },
    Cancel {
        ack: async_channel::Sender<()>,
    },
    Shutdown,
}

struct ReaderShared {
    handle: Arc<DeviceHandle<Context>>,
    cancelling: AtomicBool,
}

/// One physical bird, opened for transfers.
pub struct UsbBirdTransport {
    handle: Arc<DeviceHandle<Context>>,
    endpoints: Vec<EndpointInfo>,
    serial_index: Option<u8>,
    claimed_interfaces: Vec<u8>,
    shared: Arc<ReaderShared>,
    cmd_tx: async_channel::Sender<ReaderMsg>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

impl UsbBirdTransport {
    /// Open the device, detach kernel drivers, claim its interfaces, and
    /// start the reader thread.
    pub fn open(device: &Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let handle = Arc::new(device.open()?);

        let config = device.active_config_descriptor()?;
        let mut endpoints = Vec::new();
        let mut claimed_interfaces = Vec::new();
        for interface in config.interfaces() {
            let interface_number = interface.number();

            match handle.kernel_driver_active(interface_number) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", interface_number);
                    if let Err(e) = handle.detach_kernel_driver(interface_number) {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface_number, e
                        );
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface_number, e
                    );
                }
            }

            handle.claim_interface(interface_number)?;
            claimed_interfaces.push(interface_number);

            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    endpoints.push(map_endpoint(&endpoint));
                }
            }
        }

        let shared = Arc::new(ReaderShared {
            handle: Arc::clone(&handle),
            cancelling: AtomicBool::new(false),
        });
        let (cmd_tx, cmd_rx) = async_channel::unbounded();
        let reader_shared = Arc::clone(&shared);
        let reader_thread = std::thread::Builder::new()
            .name("bird-reader".to_string())
            .spawn(move || run_reader(reader_shared, cmd_rx))
            .map_err(|_| rusb::Error::Other)?;

        debug!(
            "Opened bird {:04x}:{:04x} with {} endpoints",
            descriptor.vendor_id(),
            descriptor.product_id(),
            endpoints.len()
        );

        Ok(UsbBirdTransport {
            handle,
            endpoints,
            serial_index: descriptor.serial_number_string_index(),
            claimed_interfaces,
            shared,
            cmd_tx,
            reader_thread: Mutex::new(Some(reader_thread)),
        })
    }
}

impl Transport for UsbBirdTransport {
    fn serial_number(&self) -> Result<String, TransportError> {
        let index = self.serial_index.ok_or(TransportError::NotFound)?;
        self.handle
            .read_string_descriptor_ascii(index)
            .map_err(map_rusb_error)
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
        // Reject submissions that race an in-progress cancel, so a queued
        // arm cannot complete after the cancel has been acknowledged.
        if self.shared.cancelling.load(Ordering::Acquire) {
            return Err(SubmitFailure { slot, error: TransportError::Busy });
        }
        let msg = ReaderMsg::Arm { endpoint: endpoint.address, slot, complete };
        match self.cmd_tx.send_blocking(msg) {
            Ok(()) => Ok(()),
            Err(send_error) => match send_error.into_inner() {
                ReaderMsg::Arm { slot, .. } => {
                    Err(SubmitFailure { slot, error: TransportError::NoDevice })
                }
                _ => unreachable!("we only sent an Arm"),
            },
        }
    }

    fn cancel_interrupt_in(&self, _endpoint: &EndpointInfo) {
        self.shared.cancelling.store(true, Ordering::Release);
        let (ack_tx, ack_rx) = async_channel::bounded(1);
        if self.cmd_tx.send_blocking(ReaderMsg::Cancel { ack: ack_tx }).is_ok() {
            // The reader finishes (and completes) any in-flight arm before
            // it reaches this message; the ack is the guarantee.
            let _ = ack_rx.recv_blocking();
        }
        self.shared.cancelling.store(false, Ordering::Release);
    }

    fn interrupt_out(
        &self,
        endpoint: &EndpointInfo,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle
            .write_interrupt(endpoint.address, data, timeout)
            .map_err(map_rusb_error)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
            .map_err(map_rusb_error)
    }
}

impl Drop for UsbBirdTransport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send_blocking(ReaderMsg::Shutdown);
        if let Some(thread) = self.reader_thread.lock().unwrap().take() {
            // The reader can own the last reference through a completion
            // closure; never join from its own context.
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }

        for interface in &self.claimed_interfaces {
            if let Err(e) = self.handle.release_interface(*interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
            if let Err(e) = self.handle.attach_kernel_driver(*interface) {
                debug!(
                    "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                    interface, e
                );
            }
        }
    }
}

/// Reader thread body: serve arm/cancel commands until shutdown.
fn run_reader(shared: Arc<ReaderShared>, cmd_rx: async_channel::Receiver<ReaderMsg>) {
    debug!("Bird reader thread started");
    loop {
        match cmd_rx.recv_blocking() {
            Ok(ReaderMsg::Arm { endpoint, mut slot, complete }) => {
                let status = poll_interrupt_in(&shared, endpoint, &mut slot);
                trace!("Interrupt-in poll on {:#04x} finished: {:?}", endpoint, status);
                complete(slot, status);
            }
            Ok(ReaderMsg::Cancel { ack }) => {
                let _ = ack.send_blocking(());
            }
            Ok(ReaderMsg::Shutdown) | Err(_) => break,
        }
    }
    debug!("Bird reader thread stopped");
}

/// One armed transfer: poll until data, cancellation, or a hard error.
fn poll_interrupt_in(
    shared: &ReaderShared,
    endpoint: u8,
    slot: &mut TransferSlot,
) -> CompletionStatus {
    loop {
        if shared.cancelling.load(Ordering::Acquire) {
            return CompletionStatus::Cancelled;
        }
        match shared
            .handle
            .read_interrupt(endpoint, slot.buffer_mut(), READ_POLL_TIMEOUT)
        {
            Ok(len) => {
                slot.set_actual_len(len);
                return CompletionStatus::Success;
            }
            // No data within the poll window; keep listening.
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => continue,
            Err(rusb::Error::NoDevice) => return CompletionStatus::Shutdown,
            Err(e) => return CompletionStatus::Error(map_rusb_error(e)),
        }
    }
}

/// Map an endpoint descriptor into the discovery model.
fn map_endpoint(endpoint: &rusb::EndpointDescriptor<'_>) -> EndpointInfo {
    EndpointInfo {
        address: endpoint.address(),
        direction: match endpoint.direction() {
            rusb::Direction::In => Direction::In,
            rusb::Direction::Out => Direction::Out,
        },
        transfer_kind: match endpoint.transfer_type() {
            rusb::TransferType::Control => TransferKind::Control,
            rusb::TransferType::Isochronous => TransferKind::Isochronous,
            rusb::TransferType::Bulk => TransferKind::Bulk,
            rusb::TransferType::Interrupt => TransferKind::Interrupt,
        },
        max_packet_size: endpoint.max_packet_size(),
        interval: endpoint.interval(),
    }
}

/// Map rusb errors onto the transport status set. Codes without a named
/// counterpart carry their libusb value.
pub(crate) fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::NotFound => TransportError::NotFound,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::InvalidParam => TransportError::InvalidParam,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::Interrupted => TransportError::Other { code: -10 },
        rusb::Error::NoMem => TransportError::Other { code: -11 },
        rusb::Error::NotSupported => TransportError::Other { code: -12 },
        _ => TransportError::Other { code: -99 },
    }
}
