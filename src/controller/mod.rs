//! The controller side of the bus.
//!
//! A [`Controller`] talks to one target device. Every request follows the
//! same pattern:
//!
//! ```text
//! prepare_command(cmd, unit) -> write(param)... -> send_command() [-> read_result(n) -> read()...]
//! ```
//!
//! Before each bus transaction the controller waits until the
//! [pacing delay](Controller::set_pacing_delay) has passed since the previous
//! one, so slow targets have time to process a request before the response
//! is read. [`auto_adjust_delay`](Controller::auto_adjust_delay) finds the
//! smallest reliable delay with loopback requests.
//!
//! Failed transactions are returned as [`TransportError`] and also counted;
//! the counters are drained with [`sent_errors`](Controller::sent_errors),
//! [`result_errors`](Controller::result_errors) and
//! [`transmission_errors`](Controller::transmission_errors).
//!
//! Peripheral clients such as [`StepperClient`] share one controller through
//! a `RefCell`.

pub mod calibrate;
pub mod stepper;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::buffer::{Frame, Wire};
use crate::consts::*;
use crate::error::TransportError;
use crate::target::InterruptEvent;
use crate::timer::Clock;

pub use calibrate::{DelayProbe, PingBackProbe, search_min_delay};
pub use stepper::StepperClient;

/// Result of a controller request, generic over the bus error.
pub type TransportResult<T, E> = Result<T, TransportError<E>>;

/// Request/response transport to a single target device.
///
/// ## Type Parameters
///
/// - `I2C`: the bus, an [`embedded_hal::i2c::I2c`] implementation
/// - `D`: a delay provider used for pacing and blocking waits
/// - `C`: the [`Clock`] the pacing delay is measured with
#[derive(Debug)]
pub struct Controller<I2C, D, C> {
    i2c: I2C,
    delay: D,
    clock: C,
    address: u8,
    buf: Frame,
    pacing_ms: u32,
    last_transmission: Option<u32>,
    sent_errors: u16,
    result_errors: u16,
}

impl<I2C, D, C> Controller<I2C, D, C>
where
    I2C: I2c,
    D: DelayNs,
    C: Clock,
{
    /// Creates a controller for the target at `address` with the default
    /// pacing delay of [`DEFAULT_PACING_MS`].
    pub fn new(i2c: I2C, delay: D, clock: C, address: u8) -> Self {
        Self {
            i2c,
            delay,
            clock,
            address,
            buf: Frame::new(),
            pacing_ms: u32::from(DEFAULT_PACING_MS),
            last_transmission: None,
            sent_errors: 0,
            result_errors: 0,
        }
    }

    /// Gives back the bus, the delay and the clock.
    pub fn release(self) -> (I2C, D, C) {
        (self.i2c, self.delay, self.clock)
    }

    /// The target's bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Starts a new request for `unit` ([`NO_UNIT`] for global commands).
    pub fn prepare_command(&mut self, cmd: u8, unit: u8) {
        self.buf.reset();
        self.buf.write(cmd);
        self.buf.write(unit);
    }

    /// Appends a parameter to the prepared request. Values that do not fit are dropped.
    pub fn write<T: Wire>(&mut self, value: T) {
        self.buf.write(value);
    }

    /// Reads the next value of the last result, zero past its end.
    pub fn read<T: Wire + Default>(&mut self) -> T {
        self.buf.read()
    }

    fn pace(&mut self) {
        let Some(last) = self.last_transmission else {
            return;
        };
        let elapsed = self.clock.now_ms().wrapping_sub(last);
        if elapsed < self.pacing_ms {
            self.delay.delay_ms(self.pacing_ms - elapsed);
        }
    }

    /// Checksums and transmits the prepared request.
    pub fn send_command(&mut self) -> TransportResult<(), I2C::Error> {
        self.pace();
        self.buf.set_crc8();
        trace!("sending {} bytes to {}", self.buf.position(), self.address);
        let sent = self.i2c.write(self.address, self.buf.as_bytes());
        self.last_transmission = Some(self.clock.now_ms());
        sent.map_err(|e| {
            self.sent_errors = self.sent_errors.wrapping_add(1);
            TransportError::Send(e)
        })
    }

    /// Reads a result of `n` bytes (without the checksum) and validates it.
    ///
    /// Afterwards the buffer is rewound for [`read`](Self::read), also on failure.
    pub fn read_result(&mut self, n: usize) -> TransportResult<(), I2C::Error> {
        self.pace();
        if n + 1 > self.buf.capacity() {
            self.result_errors = self.result_errors.wrapping_add(1);
            self.buf.reset();
            return Err(TransportError::ResultTooLong { expected: n });
        }
        let address = self.address;
        let received = self.i2c.read(address, self.buf.receive_slice(n + 1));
        let result = match received {
            Ok(()) => {
                self.last_transmission = Some(self.clock.now_ms());
                if self.buf.check_crc8() {
                    Ok(())
                } else {
                    debug!("checksum mismatch in result from {}", address);
                    Err(TransportError::Checksum)
                }
            }
            Err(e) => Err(TransportError::Receive(e)),
        };
        self.buf.reset();
        if result.is_err() {
            self.result_errors = self.result_errors.wrapping_add(1);
        }
        result
    }

    /// Sends the prepared request and reads a result of type `T`.
    pub fn request<T: Wire + Default>(&mut self) -> TransportResult<T, I2C::Error> {
        self.send_command()?;
        self.read_result(T::SIZE)?;
        Ok(self.read())
    }

    /// `true` if the target acknowledges its address.
    pub fn ping(&mut self) -> bool {
        self.i2c.write(self.address, &[]).is_ok()
    }

    /// Resets all modules on the target and waits [`DEFAULT_RESET_DELAY_MS`].
    pub fn reset(&mut self) -> TransportResult<(), I2C::Error> {
        self.reset_with_delay(DEFAULT_RESET_DELAY_MS)
    }

    /// Resets all modules on the target and waits `settle_ms`.
    pub fn reset_with_delay(&mut self, settle_ms: u32) -> TransportResult<(), I2C::Error> {
        self.prepare_command(RESET_CMD, NO_UNIT);
        self.send_command()?;
        self.delay.delay_ms(settle_ms);
        Ok(())
    }

    /// Asks the target to move to `new_address`.
    ///
    /// The target only stages the address; it takes effect once the target
    /// application applies it. This controller keeps using the old address.
    pub fn change_address(&mut self, new_address: u8) -> TransportResult<(), I2C::Error> {
        self.prepare_command(CHANGE_ADDRESS_CMD, NO_UNIT);
        self.write(new_address);
        self.send_command()
    }

    /// Configures the target's interrupt output, a negative `pin` disables it.
    pub fn set_interrupt_pin(
        &mut self,
        pin: i8,
        active_high: bool,
    ) -> TransportResult<(), I2C::Error> {
        self.prepare_command(SET_INTERRUPT_PIN_CMD, NO_UNIT);
        self.write(pin);
        self.write(active_high);
        self.send_command()
    }

    /// Acknowledges the pending interrupt and returns what caused it.
    pub fn clear_interrupt(&mut self) -> TransportResult<Option<InterruptEvent>, I2C::Error> {
        self.prepare_command(CLEAR_INTERRUPT_CMD, NO_UNIT);
        let byte: u8 = self.request()?;
        Ok(InterruptEvent::from_byte(byte))
    }

    /// The target's packed protocol version.
    pub fn get_version(&mut self) -> TransportResult<u32, I2C::Error> {
        self.prepare_command(GET_VERSION_CMD, NO_UNIT);
        self.request()
    }

    /// `true` if the target reports `expected`, usually [`VERSION`].
    pub fn check_version(&mut self, expected: u32) -> bool {
        self.get_version().is_ok_and(|version| version == expected)
    }

    /// Sends `len` test bytes, starting with `data` and counting up by
    /// [`PING_BACK_INCREMENT`], and checks that they come back unchanged.
    ///
    /// `len` is clamped to `1..=16` so the request fits a frame.
    pub fn ping_back(&mut self, data: u8, len: u8) -> bool {
        let len = len.clamp(1, (MAX_PARAM_LEN - 1) as u8);
        self.prepare_command(PING_BACK_CMD, NO_UNIT);
        self.write(len);
        let mut sent = data;
        for _ in 0..len {
            self.write(sent);
            sent = sent.wrapping_add(PING_BACK_INCREMENT);
        }
        if self.send_command().is_err() || self.read_result(usize::from(len)).is_err() {
            return false;
        }
        let mut expected = data;
        let mut ok = true;
        for _ in 0..len {
            ok &= self.read::<u8>() == expected;
            expected = expected.wrapping_add(PING_BACK_INCREMENT);
        }
        ok
    }

    /// Finds the smallest reliable pacing delay, adds `safety_margin` and
    /// makes it the new pacing delay.
    ///
    /// Delays are probed from `start` downwards with [`AUTO_ADJUST_REPETITIONS`]
    /// loopback requests of `max_len` bytes each. Error counters are drained
    /// along the way. Returns the committed delay in milliseconds.
    pub fn auto_adjust_delay(&mut self, max_len: u8, safety_margin: u8, start: u8) -> u8 {
        let delay = {
            let mut probe = PingBackProbe::new(self, max_len);
            search_min_delay(&mut probe, start, safety_margin)
        };
        let _ = self.set_pacing_delay(u32::from(delay));
        let _ = self.transmission_errors();
        info!("pacing delay calibrated to {} ms", delay);
        delay
    }

    /// Sets the pacing delay in milliseconds and returns the previous one.
    pub fn set_pacing_delay(&mut self, ms: u32) -> u32 {
        core::mem::replace(&mut self.pacing_ms, ms)
    }

    /// The pacing delay in milliseconds.
    pub fn pacing_delay(&self) -> u32 {
        self.pacing_ms
    }

    /// Blocks for `ms` milliseconds.
    pub fn pause_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Failed sends since the last call.
    pub fn sent_errors(&mut self) -> u16 {
        core::mem::take(&mut self.sent_errors)
    }

    /// Failed or corrupted results since the last call.
    pub fn result_errors(&mut self) -> u16 {
        core::mem::take(&mut self.result_errors)
    }

    /// Sum of [`sent_errors`](Self::sent_errors) and
    /// [`result_errors`](Self::result_errors), draining both.
    pub fn transmission_errors(&mut self) -> u16 {
        self.sent_errors().saturating_add(self.result_errors())
    }
}
