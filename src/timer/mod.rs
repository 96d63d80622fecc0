//! Time sources for pacing, stepping and debouncing.
//!
//! Everything in this crate reads time through the [`Clock`] trait. Two
//! implementations ship with the crate: a [`TickClock`] advanced from a
//! hardware timer interrupt (`timer-isr` feature, default) and a
//! [`StdClock`] backed by `std::time::Instant` (`std` feature).
//!
//! Contains helpers for configuring the tick interrupt, including:
//! - `compute_ocr_value`: runtime OCR calculator
//! - `const_ocr_value`: compile-time OCR calculator
//! - `run_target_loop`: blocking target main loop for DelayNs (feature `delay-loop`)
//!
//! Common prescalers for a 16 MHz AVR: (For use with `compute_ocr_value` and `const_ocr_value`)
//!
//! | PRESCALER | TIMER_COUNTS | Overflow Interval |
//! |-----------|--------------|-------------------|
//! |        64 |          250 |              1 ms |
//! |       256 |          125 |              2 ms |
//! |       256 |          250 |              4 ms |
//! |      1024 |          125 |              8 ms |
//! |      1024 |          250 |             16 ms |
//!
//! Stepping at more than a few hundred steps per second needs a tick well
//! below one millisecond, e.g. 50 µs with prescaler 8.

use libm::round;

#[cfg(feature = "delay-loop")]
mod delay;
#[cfg_attr(feature = "delay-loop", allow(unused_imports))]
#[cfg(feature = "delay-loop")]
pub use delay::*;

#[cfg(feature = "timer-isr")]
mod isr;
#[cfg_attr(feature = "timer-isr", allow(unused_imports))]
#[cfg(feature = "timer-isr")]
pub use isr::*;

/// 1,000,000 microseconds = 1 second
pub const MICROSECONDS_PER_SECOND: u32 = 1_000_000;
/// 1,000 microseconds = 1 millisecond
pub const MICROSECONDS_PER_MILLISECOND: u32 = 1_000;

/// A monotonic time source.
///
/// Both readings wrap around on overflow; consumers compare them with
/// wrapping arithmetic (see [`time_reached`]).
pub trait Clock {
    /// Microseconds since an arbitrary epoch.
    fn now_us(&self) -> u32;

    /// Milliseconds since the same epoch.
    fn now_ms(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }

    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Returns `true` once `now` is at or past `deadline`, tolerating one wrap-around.
pub fn time_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// Computes the OCR value for an AVR timer (CTC mode)
///
/// # Arguments
/// - `f_cpu`: CPU frequency in Hz
/// - `prescaler`: timer prescaler (e.g., 8, 64, 256)
/// - `tick_us`: desired tick interval in microseconds (e.g., 50.0)
///
/// # Returns
/// - OCR value for OCRnA (rounds to nearest integer)
/// - Whole microseconds per tick (for initializing the [`TickClock`])
pub fn compute_ocr_value(f_cpu: u32, prescaler: u32, tick_us: f32) -> (u16, u32) {
    let ticks_per_second: f32 = f_cpu as f32 / prescaler as f32;
    let ticks_per_tick: f32 = ticks_per_second * (tick_us / MICROSECONDS_PER_SECOND as f32);
    (round(ticks_per_tick as f64) as u16, round(tick_us as f64) as u32)
}

/// Compile-time OCR value calculator
///
/// # Arguments
/// - `f_cpu`: CPU frequency in Hz
/// - `prescaler`: timer prescaler (e.g., 8, 64, 256)
/// - `tick_us`: desired tick interval in whole microseconds
///
/// # Returns
/// - OCR value for OCRnA (truncated)
/// - Microseconds per tick (for initializing the [`TickClock`])
pub const fn const_ocr_value(f_cpu: u32, prescaler: u32, tick_us: u32) -> (u16, u32) {
    let ticks_per_tick =
        (f_cpu / prescaler) as u64 * tick_us as u64 / MICROSECONDS_PER_SECOND as u64;
    (ticks_per_tick as u16, tick_us)
}

/// A [`Clock`] backed by `std::time::Instant`, for hosted targets and tests.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Starts a clock at zero.
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }
}
