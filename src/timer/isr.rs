use super::{Clock, MICROSECONDS_PER_MILLISECOND};
use core::cell::Cell;
use critical_section::Mutex;

/// A [`Clock`] advanced by a periodic timer interrupt.
///
/// The interrupt handler calls [`tick()`](TickClock::tick); readers on the
/// main loop get a consistent snapshot through `critical_section::with`.
///
/// # Example
/// ```rust
/// use unitbus::timer::{Clock, TickClock};
///
/// static CLOCK: TickClock = TickClock::new(50);
///
/// // #[interrupt]
/// fn timer_isr() {
///     CLOCK.tick();
/// }
///
/// timer_isr();
/// assert_eq!(CLOCK.now_us(), 50);
/// ```
#[derive(Debug)]
pub struct TickClock {
    ticks: Mutex<Cell<u64>>,
    tick_us: u32,
}

impl TickClock {
    /// Creates a stopped clock whose every tick represents `tick_us` microseconds.
    ///
    /// See [`compute_ocr_value`](super::compute_ocr_value) for matching timer settings.
    pub const fn new(tick_us: u32) -> Self {
        Self {
            ticks: Mutex::new(Cell::new(0)),
            tick_us,
        }
    }

    /// Advances the clock by one tick. Call from the timer ISR.
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let ticks = self.ticks.borrow(cs);
            ticks.set(ticks.get().wrapping_add(1));
        });
    }

    fn elapsed_us(&self) -> u64 {
        let ticks = critical_section::with(|cs| self.ticks.borrow(cs).get());
        ticks.wrapping_mul(u64::from(self.tick_us))
    }
}

impl Clock for TickClock {
    fn now_us(&self) -> u32 {
        self.elapsed_us() as u32
    }

    fn now_ms(&self) -> u32 {
        (self.elapsed_us() / u64::from(MICROSECONDS_PER_MILLISECOND)) as u32
    }
}
