//! Interrupt events raised by target modules.
//!
//! A target has one interrupt output line shared by all units. Modules
//! raise an event through the [`InterruptLatch`]; the controller notices the
//! line and fetches the `(unit, reason)` pair with a clear-interrupt request,
//! which also releases the line.

use crate::consts::NO_INTERRUPT;

/// Why a unit raised an interrupt.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum InterruptReason {
    /// No reason. Not raised by the bundled modules.
    None,
    /// A stepper in the run state reached its target.
    TargetReachedByRun,
    /// A stepper in the run-speed-to-position state reached its target.
    TargetReachedByRunSpeedToPosition,
    /// A stepper's limit switch became active.
    EndstopHit,
    /// Module specific reason.
    Module(ModuleReason),
}

/// A module specific interrupt reason, 4 to 15.
///
/// The reason shares a byte with the unit on the wire, so it has four bits
/// and must not collide with the built-in reasons.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ModuleReason(u8);

impl ModuleReason {
    /// Smallest module specific code.
    pub const FIRST: u8 = 4;
    /// Largest module specific code.
    pub const LAST: u8 = 15;

    /// Wraps `code`, `None` outside 4..=15.
    pub const fn new(code: u8) -> Option<Self> {
        if matches!(code, Self::FIRST..=Self::LAST) {
            Some(Self(code))
        } else {
            None
        }
    }

    /// The 4-bit code.
    pub const fn code(self) -> u8 {
        self.0
    }
}

impl From<InterruptReason> for u8 {
    fn from(reason: InterruptReason) -> u8 {
        match reason {
            InterruptReason::None => 0,
            InterruptReason::TargetReachedByRun => 1,
            InterruptReason::TargetReachedByRunSpeedToPosition => 2,
            InterruptReason::EndstopHit => 3,
            InterruptReason::Module(reason) => reason.code(),
        }
    }
}

impl From<u8> for InterruptReason {
    /// Decodes the low four bits, the rest is ignored.
    fn from(code: u8) -> Self {
        match code & 0x0f {
            0 => InterruptReason::None,
            1 => InterruptReason::TargetReachedByRun,
            2 => InterruptReason::TargetReachedByRunSpeedToPosition,
            3 => InterruptReason::EndstopHit,
            other => InterruptReason::Module(ModuleReason(other)),
        }
    }
}

/// A `(unit, reason)` pair as transported by the clear-interrupt command.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct InterruptEvent {
    /// The unit that raised the event.
    pub unit: u8,
    /// What happened.
    pub reason: InterruptReason,
}

impl InterruptEvent {
    /// Packs the event as `reason << 4 | unit % 16`.
    pub fn to_byte(self) -> u8 {
        (u8::from(self.reason) << 4) | (self.unit & 0x0f)
    }

    /// Unpacks a clear-interrupt result, `None` for the no-interrupt marker.
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte == NO_INTERRUPT {
            return None;
        }
        Some(Self {
            unit: byte & 0x0f,
            reason: InterruptReason::from(byte >> 4),
        })
    }
}

/// Holds at most one pending interrupt event.
///
/// Events are only latched while the interrupt line is enabled by the
/// controller. A newer event replaces one that has not been acknowledged yet.
#[derive(Debug, Default)]
pub struct InterruptLatch {
    pending: Option<InterruptEvent>,
    pin: Option<u8>,
    active_high: bool,
}

impl InterruptLatch {
    /// Creates a disabled latch.
    pub const fn new() -> Self {
        Self {
            pending: None,
            pin: None,
            active_high: true,
        }
    }

    /// Enables the line for `pin` (negative disables) with the given polarity.
    pub fn configure(&mut self, pin: i8, active_high: bool) {
        self.pin = u8::try_from(pin).ok();
        self.active_high = active_high;
        self.pending = None;
    }

    /// `true` if the controller has configured an interrupt pin.
    pub fn enabled(&self) -> bool {
        self.pin.is_some()
    }

    /// The pin number configured by the controller.
    pub fn pin(&self) -> Option<u8> {
        self.pin
    }

    /// `true` if the configured line is active high.
    pub fn active_high(&self) -> bool {
        self.active_high
    }

    /// Latches an event if the line is enabled.
    pub fn trigger(&mut self, unit: u8, reason: InterruptReason) {
        if !self.enabled() {
            return;
        }
        debug!("interrupt: unit {} reason {}", unit, u8::from(reason));
        self.pending = Some(InterruptEvent { unit, reason });
    }

    /// The pending event, if any.
    pub fn pending(&self) -> Option<InterruptEvent> {
        self.pending
    }

    /// Clears the pending event and returns its packed form or [`NO_INTERRUPT`].
    pub fn acknowledge(&mut self) -> u8 {
        self.pending
            .take()
            .map_or(NO_INTERRUPT, InterruptEvent::to_byte)
    }

    /// Drops the pending event and disables the line.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_packing() {
        let event = InterruptEvent {
            unit: 2,
            reason: InterruptReason::EndstopHit,
        };
        assert_eq!(event.to_byte(), 0x32);
        assert_eq!(InterruptEvent::from_byte(0x32), Some(event));
        assert_eq!(InterruptEvent::from_byte(NO_INTERRUPT), None);
    }

    #[test]
    fn test_unit_is_truncated_to_four_bits() {
        let event = InterruptEvent {
            unit: 17,
            reason: InterruptReason::TargetReachedByRun,
        };
        assert_eq!(event.to_byte(), 0x11);
    }

    #[test]
    fn test_module_reason_range() {
        assert_eq!(ModuleReason::new(3), None);
        assert_eq!(ModuleReason::new(16), None);
        assert_eq!(ModuleReason::new(0xff), None);
        let reason = ModuleReason::new(15).map(InterruptReason::Module);
        assert_eq!(reason, Some(InterruptReason::from(15)));

        let event = ModuleReason::new(4).map(|r| InterruptEvent {
            unit: 1,
            reason: InterruptReason::Module(r),
        });
        assert_eq!(event.map(InterruptEvent::to_byte), Some(0x41));
        assert_eq!(event.and_then(|e| InterruptEvent::from_byte(e.to_byte())), event);
    }

    #[test]
    fn test_reason_decoding_ignores_upper_bits() {
        assert_eq!(InterruptReason::from(0x13), InterruptReason::EndstopHit);
    }

    #[test]
    fn test_latch_ignores_events_while_disabled() {
        let mut latch = InterruptLatch::new();
        latch.trigger(0, InterruptReason::EndstopHit);
        assert_eq!(latch.pending(), None);
        assert_eq!(latch.acknowledge(), NO_INTERRUPT);
    }

    #[test]
    fn test_latch_keeps_latest_event_until_acknowledged() {
        let mut latch = InterruptLatch::new();
        latch.configure(3, true);
        latch.trigger(0, InterruptReason::TargetReachedByRun);
        latch.trigger(1, InterruptReason::EndstopHit);
        assert_eq!(latch.acknowledge(), 0x31);
        assert_eq!(latch.acknowledge(), NO_INTERRUPT);
    }

    #[test]
    fn test_negative_pin_disables() {
        let mut latch = InterruptLatch::new();
        latch.configure(5, false);
        assert!(latch.enabled());
        latch.configure(-1, true);
        assert!(!latch.enabled());
    }
}
