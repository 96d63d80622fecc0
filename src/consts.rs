//! Constants used across the controller and target sides of the protocol.
//!
//! This module defines buffer sizing, timing defaults, the command code map
//! and the protocol version. Both sides of the bus must agree on every value
//! here, so changing one is a wire-format change.
//!
//! ## Command code map
//!
//! | Range     | Owner                                   |
//! |-----------|-----------------------------------------|
//! | 000 - 009 | reserved                                |
//! | 010 - 049 | stepper module ([`stepper`])            |
//! | 050 - 239 | free for further peripheral modules     |
//! | 240 - 255 | transport commands (reset, address ...) |
//!
//! ## Key Concepts
//!
//! - **Frame**: `[crc8][command][unit][params...]`, at most [`MAX_FRAME_LEN`] bytes.
//! - **Response**: `[crc8][result...]`, result length fixed per command.
//! - **Unit**: index of a peripheral instance on the target, [`NO_UNIT`] for global commands.

use core::ops::RangeInclusive;

/// Upper limit of the send and receive buffers in bytes.
///
/// Includes one byte for the CRC-8 and, for frames sent by the controller,
/// two header bytes (command and unit).
pub const MAX_FRAME_LEN: usize = 20;

/// Number of header bytes in a request frame: CRC-8, command, unit.
pub const FRAME_HEADER_LEN: usize = 3;

/// Maximum number of parameter bytes a single request can carry.
pub const MAX_PARAM_LEN: usize = MAX_FRAME_LEN - FRAME_HEADER_LEN;

/// Default 7-bit bus address of a target device.
pub const DEFAULT_ADDRESS: u8 = 0x08;

/// Unit byte used by commands that are not addressed to a specific unit.
pub const NO_UNIT: u8 = u8::MAX;

/// Default pacing delay in milliseconds between two bus transactions.
///
/// Conservative, leaves room for debug output on the target. 4 to 6 ms is
/// usually enough, see
/// [`Controller::auto_adjust_delay`](crate::controller::Controller::auto_adjust_delay).
pub const DEFAULT_PACING_MS: u8 = 20;

/// Milliseconds to wait after a reset command so the target can reinitialize its modules.
pub const DEFAULT_RESET_DELAY_MS: u32 = 100;

/// Loopback repetitions per probed delay during calibration.
pub const AUTO_ADJUST_REPETITIONS: u8 = 3;

/// Default safety margin in milliseconds added to the calibrated delay.
pub const AUTO_ADJUST_SAFETY_MARGIN: u8 = 2;

/// Increment applied to each successive loopback test byte (wrapping).
pub const PING_BACK_INCREMENT: u8 = 73;

/// Value returned by the target for a clear-interrupt request when no event is pending.
pub const NO_INTERRUPT: u8 = 0xFF;

/// Command codes reserved for the transport itself.
pub const TRANSPORT_COMMANDS: RangeInclusive<u8> = 240..=255;

/// Reset all modules on the target to their power-up state.
pub const RESET_CMD: u8 = 241;
/// Stage a new bus address on the target, parameter: 1 `u8`.
pub const CHANGE_ADDRESS_CMD: u8 = 242;
/// Configure the interrupt line, parameters: `i8` pin (negative disables), `bool` active high.
pub const SET_INTERRUPT_PIN_CMD: u8 = 243;
/// Acknowledge the pending interrupt and return its packed reason.
pub const CLEAR_INTERRUPT_CMD: u8 = 244;
/// Ask the target for its protocol version.
pub const GET_VERSION_CMD: u8 = 245;
/// Echo the given bytes back, parameters: `u8` length followed by that many bytes.
pub const PING_BACK_CMD: u8 = 246;

/// Protocol major version.
pub const VERSION_MAJOR: u8 = 0;
/// Protocol minor version.
pub const VERSION_MINOR: u8 = 1;
/// Protocol patch version.
pub const VERSION_PATCH: u8 = 0;

/// Packed protocol version: `major << 16 | minor << 8 | patch`.
pub const VERSION: u32 =
    (VERSION_MAJOR as u32) << 16 | (VERSION_MINOR as u32) << 8 | VERSION_PATCH as u32;

/// Stepper module command codes, parameter layouts and result lengths.
///
/// Parameter layouts are listed as the little-endian values following the
/// frame header. Only commands documented with "Returns" produce a response,
/// its length is the size of the returned type.
pub mod stepper {
    use core::ops::RangeInclusive;

    /// First command code owned by the stepper module.
    pub const OFFSET: u8 = 10;
    /// All command codes owned by the stepper module.
    pub const COMMANDS: RangeInclusive<u8> = OFFSET..=OFFSET + 39;

    /// Maximum number of stepper units per target.
    pub const MAX_UNITS: usize = 8;
    /// Maximum number of limit switches per stepper unit.
    pub const MAX_ENDSTOPS: usize = 2;
    /// Milliseconds during which a limit switch change after a transition is ignored.
    pub const ENDSTOP_DEBOUNCE_MS: u32 = 5;

    /// `i32` absolute target.
    pub const MOVE_TO_CMD: u8 = OFFSET;
    /// `i32` relative distance.
    pub const MOVE_CMD: u8 = OFFSET + 1;
    /// Advance once with acceleration, returns `bool` still running.
    pub const RUN_CMD: u8 = OFFSET + 2;
    /// Advance once at constant speed, returns `bool` stepped.
    pub const RUN_SPEED_CMD: u8 = OFFSET + 3;
    /// `f32` steps per second.
    pub const SET_MAX_SPEED_CMD: u8 = OFFSET + 4;
    /// Returns `f32`.
    pub const MAX_SPEED_CMD: u8 = OFFSET + 5;
    /// `f32` steps per second per second.
    pub const SET_ACCELERATION_CMD: u8 = OFFSET + 6;
    /// `f32` steps per second.
    pub const SET_SPEED_CMD: u8 = OFFSET + 7;
    /// Returns `f32`.
    pub const SPEED_CMD: u8 = OFFSET + 8;
    /// Returns `i32`.
    pub const DISTANCE_TO_GO_CMD: u8 = OFFSET + 9;
    /// Returns `i32`.
    pub const TARGET_POSITION_CMD: u8 = OFFSET + 10;
    /// Returns `i32`.
    pub const CURRENT_POSITION_CMD: u8 = OFFSET + 11;
    /// `i32` new position, also resets target and speed.
    pub const SET_CURRENT_POSITION_CMD: u8 = OFFSET + 12;
    // OFFSET + 13 is reserved for the blocking run-to-position, which lives on the controller.
    /// Advance once at constant speed towards the target, returns `bool` stepped.
    pub const RUN_SPEED_TO_POSITION_CMD: u8 = OFFSET + 14;
    // OFFSET + 15 is reserved for the blocking run-to-new-position, which lives on the controller.
    /// Decelerate to a stop as quickly as the acceleration allows.
    pub const STOP_CMD: u8 = OFFSET + 16;
    /// Switch the driver outputs off.
    pub const DISABLE_OUTPUTS_CMD: u8 = OFFSET + 17;
    /// Switch the driver outputs on.
    pub const ENABLE_OUTPUTS_CMD: u8 = OFFSET + 18;
    /// `u16` microseconds.
    pub const SET_MIN_PULSE_WIDTH_CMD: u8 = OFFSET + 19;
    /// `u8` pin, `0xFF` for none.
    pub const SET_ENABLE_PIN_CMD: u8 = OFFSET + 20;
    /// `u8` bits: direction, step, enable.
    pub const SET_PINS_INVERTED_CMD: u8 = OFFSET + 21;
    /// `u8` bits: pin 1..4, enable.
    pub const SET_PINS_INVERTED_4_CMD: u8 = OFFSET + 22;
    /// Returns `bool`.
    pub const IS_RUNNING_CMD: u8 = OFFSET + 23;
    /// `u8` interface, 4 x `u8` pins, `bool` enable. Returns `i8` unit or -1.
    pub const ATTACH_CMD: u8 = OFFSET + 24;
    // OFFSET + 25 and OFFSET + 26 are reserved for target diagnostics.
    /// `bool`.
    pub const ENABLE_INTERRUPTS_CMD: u8 = OFFSET + 27;
    /// `u8` state, see [`MotionState`](crate::target::motion::MotionState).
    pub const SET_STATE_CMD: u8 = OFFSET + 28;
    /// Returns `u8` state.
    pub const GET_STATE_CMD: u8 = OFFSET + 29;
    /// `i8` pin, `bool` active low, `bool` internal pull-up.
    pub const SET_ENDSTOP_PIN_CMD: u8 = OFFSET + 30;
    /// `bool`.
    pub const ENABLE_ENDSTOPS_CMD: u8 = OFFSET + 31;
    /// Returns `u8` switch pattern.
    pub const ENDSTOPS_CMD: u8 = OFFSET + 32;
}
