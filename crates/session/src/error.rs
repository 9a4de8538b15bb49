//! Error taxonomy for the session core

use crate::registry::MinorId;
use protocol::Direction;
use thiserror::Error;

/// Low-level transport status, mirroring the libusb code set.
///
/// Carried inside `Transfer` errors so callers can tell a timeout from a
/// stall from an unplug without this crate interpreting the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transfer timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("device is gone")]
    NoDevice,
    #[error("device or endpoint not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("buffer overflow")]
    Overflow,
    #[error("i/o error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied")]
    Access,
    #[error("transport error code {code}")]
    Other { code: i32 },
}

/// Why bringing a plugged-in device up as a session failed.
///
/// Fatal to the attach attempt; every partial allocation is released before
/// the error is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("device declares no interrupt-{0} endpoint")]
    MissingEndpoint(Direction),
    #[error("could not allocate session buffers")]
    AllocationFailure,
    #[error("could not read device serial number: {0}")]
    SerialRead(#[source] TransportError),
    #[error("session registry is full")]
    RegistrationFailure,
}

/// Why tearing a session down failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetachError {
    #[error("no session registered for minor {0}")]
    NotFound(MinorId),
}

/// Why an open attempt failed. Both variants are recoverable; the caller
/// may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("no session registered for that minor")]
    NotFound,
    #[error("wait for the session lock was interrupted")]
    Interrupted,
    #[error("could not arm the interrupt-in stream: {0}")]
    Submit(#[source] TransportError),
}

/// Why a close failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseError {
    #[error("session is not open")]
    NotOpen,
}

/// Why a write failed. `DeviceGone` is terminal for this session instance;
/// `Transfer` is recoverable at the caller's discretion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("wait for the session lock was interrupted")]
    Interrupted,
    #[error("device has been unplugged")]
    DeviceGone,
    #[error("interrupt-out transfer failed: {0}")]
    Transfer(#[source] TransportError),
}

/// Why an actuator command failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("wait for the session lock was interrupted")]
    Interrupted,
    #[error("device has been unplugged")]
    DeviceGone,
    #[error("command control transfer failed: {0}")]
    Transfer(#[source] TransportError),
}

/// Why a read failed. The device has no host-readable data path; reads are
/// rejected explicitly rather than pretending to succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("reading from the device is not supported")]
    Unsupported,
}
