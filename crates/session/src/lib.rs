//! Device-session lifecycle core
//!
//! This crate owns the hard part of driving the bird: one shared device
//! object acted on by three independent triggers (client open/close,
//! transfer completion running on a transport thread, and physical unplug),
//! any of which may be the one that finally releases it.
//!
//! The shape:
//!
//! - [`LifecycleController`] creates a [`DeviceSession`] on attach and
//!   registers it in the [`SessionRegistry`].
//! - `open` looks the session up (under the same coarse lock attach/detach
//!   use), bumps its open count, and arms the interrupt-in stream.
//! - Completions are routed through the completion handler, which resubmits
//!   while the session stays live and feeds payloads to an optional
//!   [`InboundObserver`].
//! - Detach marks the session dead and releases it immediately if
//!   unreferenced; otherwise destruction is deferred to the last close, and
//!   surviving handles observe `DeviceGone` instead of crashing.
//!
//! The transport itself is a collaborator behind the [`Transport`] trait;
//! this crate never parses descriptors or encodes USB frames beyond the
//! wire contract re-exported from `protocol`.

pub mod cancel;
pub mod completion;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod slot;
pub mod transport;

mod lock;

pub use cancel::CancelToken;
pub use completion::InboundObserver;
pub use device::{DeviceSession, SessionHandle};
pub use error::{
    AttachError, CloseError, CommandError, DetachError, OpenError, ReadError, TransportError,
    WriteError,
};
pub use lifecycle::LifecycleController;
pub use registry::{MAX_SESSIONS, MinorId, SessionRegistry, SessionSnapshot};
pub use slot::{SlotKind, TransferSlot};
pub use transport::{CompletionStatus, InCompletion, SubmitFailure, Transport};
