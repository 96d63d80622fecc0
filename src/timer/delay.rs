use crate::target::Target;
use crate::timer::Clock;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Runs a blocking loop that repeatedly calls `poll()` on the provided target.
///
/// This is a simple main loop for firmware that has nothing else to do
/// besides serving the bus. Stepping resolution is bounded by `interval_us`
/// plus the time a poll takes, so keep it well below the step interval of
/// the fastest motor.
///
/// # Arguments
/// - `target`: the target to drive, with its modules registered.
/// - `delay`: a delay provider implementing `DelayNs`, typically from the HAL.
/// - `interval_us`: pause between two polls in microseconds.
///
/// # Example
/// ```rust,ignore
/// use unitbus::timer::run_target_loop;
/// let mut target = Target::new(mailbox, &CLOCK, Some(irq));
/// target.register(&mut steppers)?;
/// run_target_loop(&mut target, &mut delay, 20);
/// ```
///
/// # Notes
/// - This loop never returns.
/// - A staged address change is not applied here; firmware that supports it
///   should run its own loop and check [`Target::take_new_address`].
pub fn run_target_loop<C, IRQ, D, const Q: usize>(
    target: &mut Target<'_, C, IRQ, Q>,
    delay: &mut D,
    interval_us: u32,
) -> !
where
    C: Clock,
    IRQ: OutputPin,
    D: DelayNs,
{
    loop {
        target.poll();
        delay.delay_us(interval_us);
    }
}
