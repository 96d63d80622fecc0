//! The subordinate side of the bus.
//!
//! A [`Target`] owns the main-loop half of a [`BusLink`] and a table of
//! registered [`Module`]s. Each call to [`poll()`](Target::poll)
//!
//! 1. drains the inbound queue, validating every frame (length, CRC-8),
//! 2. answers transport commands itself and routes everything else to the
//!    module owning the command code,
//! 3. stages the checksummed result, if any, for the next controller read,
//! 4. lets every module run its periodic work, and
//! 5. drives the interrupt line from the [`InterruptLatch`].
//!
//! ## Example
//!
//! ```rust
//! use embedded_hal_mock::eh1::digital::Mock as Pin;
//! use unitbus::target::{BusLink, Target};
//! use unitbus::timer::StdClock;
//!
//! let mut link: BusLink<4> = BusLink::new();
//! let (mut endpoint, mailbox) = link.split();
//! let mut target: Target<'_, _, Pin, 4> = Target::new(mailbox, StdClock::new(), None);
//!
//! // get version, unit 255, CRC-8 in byte 0
//! assert!(endpoint.on_receive(&[0x53, 245, 0xff]));
//! target.poll();
//!
//! let mut out = [0u8; 5];
//! assert_eq!(endpoint.on_request(&mut out), 5);
//! assert_eq!(&out[1..], &unitbus::consts::VERSION.to_le_bytes());
//! ```
//!
//! ## Reset
//!
//! A reset request asks every module to release its hardware and forget its
//! units, then disables the interrupt line. The bus address is unaffected.

pub mod interrupt;
pub mod link;
pub mod module;
pub mod motion;
pub mod registry;

use core::fmt;

use embedded_hal::digital::OutputPin;
use heapless::Vec;

use crate::buffer::Frame;
use crate::consts::*;
use crate::error::RegisterError;
use crate::timer::Clock;

pub use interrupt::{InterruptEvent, InterruptLatch, InterruptReason, ModuleReason};
pub use link::{BusEndpoint, BusLink, Mailbox, RawFrame, ResponseSlot};
pub use module::{Command, Context, Module};
pub use motion::{MotionModule, MotionState};
pub use registry::UnitRegistry;

/// Maximum number of modules per target.
pub const MAX_MODULES: usize = 8;

/// The request processing loop of a target device.
///
/// `C` is the time source handed to modules, `IRQ` the optional interrupt
/// output and `Q` the size of the inbound queue.
pub struct Target<'a, C, IRQ, const Q: usize> {
    mailbox: Mailbox<'a, Q>,
    clock: C,
    irq: Option<IRQ>,
    irq_level: Option<bool>,
    modules: Vec<&'a mut dyn Module, MAX_MODULES>,
    latch: InterruptLatch,
    new_address: Option<u8>,
    rx_good: u16,
    rx_bad: u16,
}

impl<C, IRQ, const Q: usize> fmt::Debug for Target<'_, C, IRQ, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("modules", &self.modules.len())
            .field("latch", &self.latch)
            .field("new_address", &self.new_address)
            .field("rx_good", &self.rx_good)
            .field("rx_bad", &self.rx_bad)
            .finish_non_exhaustive()
    }
}

impl<'a, C, IRQ, const Q: usize> Target<'a, C, IRQ, Q>
where
    C: Clock,
    IRQ: OutputPin,
{
    /// Creates a target without modules.
    ///
    /// `irq` is the interrupt output; it stays untouched until the controller
    /// enables interrupts.
    pub fn new(mailbox: Mailbox<'a, Q>, clock: C, irq: Option<IRQ>) -> Self {
        Self {
            mailbox,
            clock,
            irq,
            irq_level: None,
            modules: Vec::new(),
            latch: InterruptLatch::new(),
            new_address: None,
            rx_good: 0,
            rx_bad: 0,
        }
    }

    /// Adds a module.
    ///
    /// Fails if its command range touches the transport commands or another
    /// module's range, or if the module table is full.
    pub fn register(&mut self, module: &'a mut dyn Module) -> Result<(), RegisterError> {
        let range = module.commands();
        let (start, end) = (*range.start(), *range.end());
        let overlaps = |s: u8, e: u8| start <= e && s <= end;
        if overlaps(*TRANSPORT_COMMANDS.start(), *TRANSPORT_COMMANDS.end()) {
            return Err(RegisterError::Reserved);
        }
        if self.modules.iter().any(|m| {
            let other = m.commands();
            overlaps(*other.start(), *other.end())
        }) {
            return Err(RegisterError::Overlap { start, end });
        }
        self.modules.push(module).map_err(|_| RegisterError::Full)?;
        info!("registered module for commands {}..={}", start, end);
        Ok(())
    }

    /// Runs one pass of the main loop.
    pub fn poll(&mut self) {
        while let Some(raw) = self.mailbox.next_frame() {
            self.process_frame(&raw);
        }
        let mut ctx = Context::new(self.clock.now_us(), self.clock.now_ms(), &mut self.latch);
        for module in self.modules.iter_mut() {
            module.poll(&mut ctx);
        }
        self.drive_irq();
    }

    fn process_frame(&mut self, raw: &[u8]) {
        if raw.len() < FRAME_HEADER_LEN {
            self.rx_bad = self.rx_bad.wrapping_add(1);
            debug!("dropped short frame of {} bytes", raw.len());
            return;
        }
        let mut input = Frame::from_bytes(raw);
        if !input.check_crc8() {
            self.rx_bad = self.rx_bad.wrapping_add(1);
            debug!("dropped frame with bad checksum");
            return;
        }
        self.rx_good = self.rx_good.wrapping_add(1);

        input.reset();
        let cmd = Command {
            code: input.read(),
            unit: input.read(),
            params: (raw.len() - FRAME_HEADER_LEN) as u8,
        };
        trace!("command {} unit {} with {} parameter bytes", cmd.code, cmd.unit, cmd.params);

        let mut output = Frame::new();
        if TRANSPORT_COMMANDS.contains(&cmd.code) {
            self.process_transport(&cmd, &mut input, &mut output);
        } else {
            let mut ctx = Context::new(self.clock.now_us(), self.clock.now_ms(), &mut self.latch);
            match self
                .modules
                .iter_mut()
                .find(|m| m.commands().contains(&cmd.code))
            {
                Some(module) => module.process(&cmd, &mut input, &mut output, &mut ctx),
                None => debug!("no module for command {}", cmd.code),
            }
        }

        if output.position() > 1 {
            output.set_crc8();
            self.mailbox.publish(output.as_bytes());
        }
    }

    fn process_transport(&mut self, cmd: &Command, input: &mut Frame, output: &mut Frame) {
        match (cmd.code, cmd.params) {
            (RESET_CMD, _) => self.reset(),
            (CHANGE_ADDRESS_CMD, 1) => {
                let address: u8 = input.read();
                info!("new bus address {} staged", address);
                self.new_address = Some(address);
            }
            (SET_INTERRUPT_PIN_CMD, 2) => {
                let pin: i8 = input.read();
                let active_high: bool = input.read();
                self.latch.configure(pin, active_high);
                self.irq_level = None;
            }
            (CLEAR_INTERRUPT_CMD, 0) => output.write(self.latch.acknowledge()),
            (GET_VERSION_CMD, 0) => output.write(VERSION),
            (PING_BACK_CMD, params) => {
                let len: u8 = input.read();
                if params != len.wrapping_add(1) {
                    return;
                }
                for _ in 0..len {
                    output.write(input.read::<u8>());
                }
            }
            (code, params) => {
                debug!("malformed transport command {} with {} parameter bytes", code, params);
            }
        }
    }

    /// Returns every module and the interrupt line to the power-up state.
    pub fn reset(&mut self) {
        info!("reset");
        for module in self.modules.iter_mut() {
            module.reset();
        }
        self.latch.reset();
        self.drive_irq();
    }

    fn drive_irq(&mut self) {
        let Some(irq) = self.irq.as_mut() else {
            return;
        };
        let level = match self.latch.pin() {
            Some(_) => self.latch.pending().is_some() == self.latch.active_high(),
            // released lines idle low
            None => false,
        };
        if self.irq_level == Some(level) {
            return;
        }
        if level {
            let _ = irq.set_high();
        } else {
            let _ = irq.set_low();
        }
        self.irq_level = Some(level);
    }

    /// Takes the bus address requested by the controller, if any.
    ///
    /// The application should persist it and re-initialise its bus
    /// peripheral; the target itself keeps answering on the old address.
    pub fn take_new_address(&mut self) -> Option<u8> {
        self.new_address.take()
    }

    /// The interrupt state.
    pub fn latch(&self) -> &InterruptLatch {
        &self.latch
    }

    /// Frames that passed validation.
    pub fn rx_good(&self) -> u16 {
        self.rx_good
    }

    /// Frames dropped for being short or failing the checksum.
    pub fn rx_bad(&self) -> u16 {
        self.rx_bad
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Releases the clock and the interrupt pin. Modules stay borrowed until
    /// the target is dropped.
    pub fn release(self) -> (C, Option<IRQ>) {
        (self.clock, self.irq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc8_maxim;
    use crate::testing::{FakeClock, FakeFactory, FakeGpio};
    use core::cell::Cell;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    fn frame(code: u8, unit: u8, params: &[u8]) -> std::vec::Vec<u8> {
        let mut raw = std::vec![0, code, unit];
        raw.extend_from_slice(params);
        raw[0] = crc8_maxim(&raw[1..]);
        raw
    }

    fn response<const Q: usize>(endpoint: &BusEndpoint<'_, Q>, len: usize) -> std::vec::Vec<u8> {
        let mut out = std::vec![0u8; len + 1];
        let _ = endpoint.on_request(&mut out);
        out
    }

    struct Dummy(core::ops::RangeInclusive<u8>);

    impl Module for Dummy {
        fn commands(&self) -> core::ops::RangeInclusive<u8> {
            self.0.clone()
        }
        fn process(&mut self, _: &Command, _: &mut Frame, output: &mut Frame, _: &mut Context<'_>) {
            output.write(0x42u8);
        }
        fn reset(&mut self) {}
    }

    #[test]
    fn test_register_rejects_overlaps() {
        let mut a = Dummy(10..=49);
        let mut b = Dummy(40..=60);
        let mut c = Dummy(230..=240);
        let mut d = Dummy(50..=60);
        let mut link: BusLink<4> = BusLink::new();
        let (_, mailbox) = link.split();
        let time = Cell::new(0);
        let mut target: Target<'_, _, PinMock, 4> =
            Target::new(mailbox, FakeClock::new(&time), None);
        assert_eq!(target.register(&mut a), Ok(()));
        assert_eq!(target.register(&mut b), Err(RegisterError::Overlap { start: 40, end: 60 }));
        assert_eq!(target.register(&mut c), Err(RegisterError::Reserved));
        assert_eq!(target.register(&mut d), Ok(()));
    }

    #[test]
    fn test_bad_frames_are_dropped() {
        let mut dummy = Dummy(50..=59);
        let mut link: BusLink<8> = BusLink::new();
        let (mut endpoint, mailbox) = link.split();
        let time = Cell::new(0);
        let mut target: Target<'_, _, PinMock, 8> =
            Target::new(mailbox, FakeClock::new(&time), None);
        assert!(target.register(&mut dummy).is_ok());

        let mut corrupted = frame(50, 0, &[]);
        corrupted[1] ^= 0x04;
        assert!(endpoint.on_receive(&corrupted));
        assert!(endpoint.on_receive(&[0x00, 50]));
        target.poll();
        assert_eq!(target.rx_bad(), 2);
        assert_eq!(response(&endpoint, 1), [0xff, 0xff]);

        assert!(endpoint.on_receive(&frame(50, 0, &[])));
        target.poll();
        assert_eq!(target.rx_good(), 1);
        let out = response(&endpoint, 1);
        assert_eq!(out[1], 0x42);
        assert_eq!(out[0], crc8_maxim(&[0x42]));
    }

    #[test]
    fn test_unknown_command_stages_nothing() {
        let mut link: BusLink<4> = BusLink::new();
        let (mut endpoint, mailbox) = link.split();
        let time = Cell::new(0);
        let mut target: Target<'_, _, PinMock, 4> =
            Target::new(mailbox, FakeClock::new(&time), None);
        assert!(endpoint.on_receive(&frame(99, 0, &[])));
        target.poll();
        assert_eq!(target.rx_good(), 1);
        assert_eq!(response(&endpoint, 1), [0xff, 0xff]);
    }

    #[test]
    fn test_version_and_ping_back() {
        let mut link: BusLink<4> = BusLink::new();
        let (mut endpoint, mailbox) = link.split();
        let time = Cell::new(0);
        let mut target: Target<'_, _, PinMock, 4> =
            Target::new(mailbox, FakeClock::new(&time), None);

        assert!(endpoint.on_receive(&frame(GET_VERSION_CMD, NO_UNIT, &[])));
        target.poll();
        let out = response(&endpoint, 4);
        assert_eq!(out[1..], VERSION.to_le_bytes());

        assert!(endpoint.on_receive(&frame(PING_BACK_CMD, NO_UNIT, &[3, 7, 80, 153])));
        target.poll();
        assert_eq!(response(&endpoint, 3)[1..], [7, 80, 153]);

        // declared length does not match the parameters
        assert!(endpoint.on_receive(&frame(PING_BACK_CMD, NO_UNIT, &[4, 7, 80, 153])));
        target.poll();
        assert_eq!(response(&endpoint, 3), [0xff; 4]);
    }

    #[test]
    fn test_change_address_is_staged() {
        let mut link: BusLink<4> = BusLink::new();
        let (mut endpoint, mailbox) = link.split();
        let time = Cell::new(0);
        let mut target: Target<'_, _, PinMock, 4> =
            Target::new(mailbox, FakeClock::new(&time), None);
        assert!(endpoint.on_receive(&frame(CHANGE_ADDRESS_CMD, NO_UNIT, &[0x21])));
        target.poll();
        assert_eq!(target.take_new_address(), Some(0x21));
        assert_eq!(target.take_new_address(), None);
    }

    #[test]
    fn test_interrupt_line_follows_latch() {
        let mut link: BusLink<4> = BusLink::new();
        let (mut endpoint, mailbox) = link.split();
        let time = Cell::new(0);
        let levels = Cell::new(0);
        let irq = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ]);
        let mut module: MotionModule<_, _> =
            MotionModule::new(FakeFactory::default(), FakeGpio::new(&levels));
        let mut target = Target::new(mailbox, FakeClock::new(&time), Some(irq));
        assert!(target.register(&mut module).is_ok());

        use crate::consts::stepper::*;
        let speed = 1000.0f32.to_le_bytes();
        for raw in [
            frame(SET_INTERRUPT_PIN_CMD, NO_UNIT, &[3, 1]),
            frame(ATTACH_CMD, NO_UNIT, &[1, 2, 3, 0, 0, 1]),
            frame(ENABLE_INTERRUPTS_CMD, 0, &[1]),
            frame(SET_MAX_SPEED_CMD, 0, &speed),
            frame(MOVE_TO_CMD, 0, &2i32.to_le_bytes()),
            frame(SET_SPEED_CMD, 0, &speed),
            frame(SET_STATE_CMD, 0, &[MotionState::RunSpeedToPosition as u8]),
        ] {
            assert!(endpoint.on_receive(&raw));
            target.poll();
        }
        for _ in 0..5 {
            time.set(time.get() + 1000);
            target.poll();
        }
        assert_eq!(
            target.latch().pending(),
            Some(InterruptEvent {
                unit: 0,
                reason: InterruptReason::TargetReachedByRunSpeedToPosition
            })
        );

        assert!(endpoint.on_receive(&frame(CLEAR_INTERRUPT_CMD, NO_UNIT, &[])));
        target.poll();
        assert_eq!(response(&endpoint, 1)[1], 0x20);

        assert!(endpoint.on_receive(&frame(RESET_CMD, NO_UNIT, &[])));
        target.poll();
        assert!(!target.latch().enabled());

        let (_, irq) = target.release();
        if let Some(mut irq) = irq {
            irq.done();
        }
        assert!(module.is_empty());
    }
}
