//! The interface between the dispatcher and peripheral modules.

use core::ops::RangeInclusive;

use super::interrupt::{InterruptLatch, InterruptReason};
use crate::buffer::Frame;

/// Header of a received request.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Command {
    /// Command code.
    pub code: u8,
    /// Addressed unit, [`NO_UNIT`](crate::consts::NO_UNIT) for global commands.
    pub unit: u8,
    /// Number of parameter bytes following the header.
    pub params: u8,
}

/// What a module may touch while handling a command or polling.
#[derive(Debug)]
pub struct Context<'a> {
    /// Clock reading at the start of this pass, microseconds.
    pub now_us: u32,
    /// Clock reading at the start of this pass, milliseconds.
    pub now_ms: u32,
    latch: &'a mut InterruptLatch,
}

impl<'a> Context<'a> {
    pub(crate) fn new(now_us: u32, now_ms: u32, latch: &'a mut InterruptLatch) -> Self {
        Self {
            now_us,
            now_ms,
            latch,
        }
    }

    /// Latches an interrupt event for `unit`, if the interrupt line is enabled.
    pub fn trigger_interrupt(&mut self, unit: u8, reason: InterruptReason) {
        self.latch.trigger(unit, reason);
    }
}

/// A peripheral type served by a [`Target`](super::Target).
///
/// Each module owns a disjoint range of command codes. The dispatcher hands
/// it every valid frame in that range; parameters are read from `input`
/// (cursor placed behind the header) and results written to `output`
/// (empty). If nothing is written, no response is staged.
///
/// Malformed requests (wrong parameter count, unknown unit) are ignored.
pub trait Module {
    /// Command codes handled by this module.
    fn commands(&self) -> RangeInclusive<u8>;

    /// Handles one request.
    fn process(
        &mut self,
        cmd: &Command,
        input: &mut Frame,
        output: &mut Frame,
        ctx: &mut Context<'_>,
    );

    /// Called once per main loop pass after all pending requests.
    fn poll(&mut self, _ctx: &mut Context<'_>) {}

    /// Returns to the power-up state: releases all claimed hardware and
    /// empties the unit table.
    fn reset(&mut self);
}
