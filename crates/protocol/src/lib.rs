//! Wire contract with the songbird's firmware
//!
//! This crate pins down everything the physical device dictates: the
//! actuator command table, the vendor control requests, endpoint frame
//! sizes, and the endpoint descriptor model used during discovery. It
//! contains data and conversions only: no device state, no transfer
//! scheduling. Keeping the contract in one dependency-light crate lets the
//! session core and the host binary agree on it without pulling in USB
//! machinery.

pub mod command;
pub mod endpoint;

pub use command::{
    ActuatorCommand, CommandWords, COMMAND_REQUEST, COMMAND_TIMEOUT, INT_OUT_FRAME_MAX,
    PRODUCT_ID, REQUEST_TYPE_VENDOR_OUT, STATUS_FRAME_LEN, STATUS_REQUEST, VENDOR_ID,
    WRITE_TIMEOUT,
};
pub use endpoint::{Direction, EndpointInfo, TransferKind};
