//! Actuator command table and vendor control requests
//!
//! The bird's firmware takes movement and LED commands as vendor control
//! transfers with no data stage; the whole command is carried in the
//! `wValue`/`wIndex` words of the setup packet. The table below is the
//! firmware contract and must stay bit-exact; changing a pair breaks
//! compatibility with shipped hardware.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// USB vendor ID of the toy.
pub const VENDOR_ID: u16 = 0x03ee;
/// USB product ID of the toy.
pub const PRODUCT_ID: u16 = 0xff01;

/// bmRequestType for all host-to-device vendor requests (vendor, device).
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0b0100_0000;

/// bRequest carrying an actuator command in `wValue`/`wIndex`.
pub const COMMAND_REQUEST: u8 = 0x1;

/// bRequest of the reserved status frame (see [`STATUS_FRAME_LEN`]).
pub const STATUS_REQUEST: u8 = 0x0;

/// Length of the reserved 8-byte status frame. The frame is allocated and
/// armed at attach time with value/index both zero, but no shipped firmware
/// revision consumes it yet.
pub const STATUS_FRAME_LEN: usize = 8;

/// Largest payload the firmware accepts in one interrupt-out frame. Audio
/// writes beyond this are truncated by the host, not rejected.
pub const INT_OUT_FRAME_MAX: usize = 4096;

/// Timeout for a command control transfer.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a synchronous interrupt-out (audio) transfer.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// The `wValue`/`wIndex` pair encoding one command on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandWords {
    pub value: u16,
    pub index: u16,
}

/// One of the seven actuator commands the firmware recognizes.
///
/// The numeric codes are single ASCII digits; anything outside the table
/// deliberately maps to [`ActuatorCommand::Neutral`] rather than erroring,
/// so [`ActuatorCommand::from_code`] is total and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorCommand {
    /// Idle posture, motors stopped.
    Neutral,
    /// Motors and both LEDs off.
    AllOff,
    /// Both eye LEDs on.
    LedsOn,
    /// Continuous wing flapping.
    FlapWings,
    /// Open and close the beak.
    MoveBeak,
    /// Tilt the head sideways.
    TiltHead,
    /// Single wing flap, then return to rest.
    FlapOnce,
}

impl ActuatorCommand {
    /// All recognized commands, in code order.
    pub const ALL: [ActuatorCommand; 7] = [
        ActuatorCommand::Neutral,
        ActuatorCommand::AllOff,
        ActuatorCommand::LedsOn,
        ActuatorCommand::FlapWings,
        ActuatorCommand::MoveBeak,
        ActuatorCommand::TiltHead,
        ActuatorCommand::FlapOnce,
    ];

    /// Map a raw command code to a command. Unrecognized codes fall back to
    /// `Neutral`; this is firmware policy, not an error.
    pub fn from_code(code: u8) -> Self {
        match code {
            b'0' => ActuatorCommand::Neutral,
            b'1' => ActuatorCommand::AllOff,
            b'2' => ActuatorCommand::LedsOn,
            b'3' => ActuatorCommand::FlapWings,
            b'4' => ActuatorCommand::MoveBeak,
            b'5' => ActuatorCommand::TiltHead,
            b'6' => ActuatorCommand::FlapOnce,
            _ => ActuatorCommand::Neutral,
        }
    }

    /// The command's raw code byte.
    pub fn code(&self) -> u8 {
        match self {
            ActuatorCommand::Neutral => b'0',
            ActuatorCommand::AllOff => b'1',
            ActuatorCommand::LedsOn => b'2',
            ActuatorCommand::FlapWings => b'3',
            ActuatorCommand::MoveBeak => b'4',
            ActuatorCommand::TiltHead => b'5',
            ActuatorCommand::FlapOnce => b'6',
        }
    }

    /// The setup-packet words for this command.
    ///
    /// All commands share index 5000 except `FlapOnce`, which uses its own
    /// index/value pair.
    pub fn words(&self) -> CommandWords {
        match self {
            ActuatorCommand::Neutral => CommandWords { value: 0xbc00, index: 5000 },
            ActuatorCommand::AllOff => CommandWords { value: 0xbc01, index: 5000 },
            ActuatorCommand::LedsOn => CommandWords { value: 0xbcc1, index: 5000 },
            ActuatorCommand::FlapWings => CommandWords { value: 0xbc05, index: 5000 },
            ActuatorCommand::MoveBeak => CommandWords { value: 0xbc03, index: 5000 },
            ActuatorCommand::TiltHead => CommandWords { value: 0xbc04, index: 5000 },
            ActuatorCommand::FlapOnce => CommandWords { value: 0xaf05, index: 55 },
        }
    }
}
