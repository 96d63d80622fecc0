//! Pacing delay calibration.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::Controller;
use crate::consts::AUTO_ADJUST_REPETITIONS;
use crate::timer::Clock;

/// Tells whether the bus works reliably with a given pacing delay.
pub trait DelayProbe {
    /// Tries `delay_ms` and reports success.
    fn probe(&mut self, delay_ms: u8) -> bool;
}

/// Probes `start`, `start - 1`, ... down to 0 and stops at the first failure.
///
/// Returns the smallest delay that passed plus `margin`, or `start + margin`
/// if `start` itself failed. Saturates at `u8::MAX`.
pub fn search_min_delay<P: DelayProbe + ?Sized>(probe: &mut P, start: u8, margin: u8) -> u8 {
    let mut last_good = None;
    let mut delay = start;
    while probe.probe(delay) {
        trace!("delay {} ms ok", delay);
        last_good = Some(delay);
        match delay.checked_sub(1) {
            Some(next) => delay = next,
            None => break,
        }
    }
    last_good.unwrap_or(start).saturating_add(margin)
}

/// A [`DelayProbe`] running loopback requests through a [`Controller`].
///
/// Each probe sets the pacing delay, drains the error counters and sends
/// [`AUTO_ADJUST_REPETITIONS`] loopback requests, failing on the first bad one.
#[derive(Debug)]
pub struct PingBackProbe<'c, I2C, D, C> {
    controller: &'c mut Controller<I2C, D, C>,
    max_len: u8,
}

impl<'c, I2C, D, C> PingBackProbe<'c, I2C, D, C>
where
    I2C: I2c,
    D: DelayNs,
    C: Clock,
{
    /// Probes with loopback requests of `max_len` bytes.
    pub fn new(controller: &'c mut Controller<I2C, D, C>, max_len: u8) -> Self {
        Self { controller, max_len }
    }
}

impl<I2C, D, C> DelayProbe for PingBackProbe<'_, I2C, D, C>
where
    I2C: I2c,
    D: DelayNs,
    C: Clock,
{
    fn probe(&mut self, delay_ms: u8) -> bool {
        let _ = self.controller.set_pacing_delay(u32::from(delay_ms));
        let _ = self.controller.transmission_errors();
        (0..AUTO_ADJUST_REPETITIONS).all(|rep| {
            self.controller
                .ping_back(rep.wrapping_add(delay_ms), self.max_len)
        })
    }
}
