//! Numbered digital inputs for limit switches.
//!
//! The wire protocol names pins by number. A [`GpioBank`] maps those numbers
//! to real inputs on the target.

use embedded_hal::digital::InputPin;

/// Digital inputs addressed by pin number.
pub trait GpioBank {
    /// Prepares `pin` as an input. Returns `false` if the pin does not exist.
    fn configure_input(&mut self, pin: u8, pull_up: bool) -> bool;

    /// Reads the electrical level of `pin`, `false` for unknown pins.
    fn is_high(&mut self, pin: u8) -> bool;

    /// Returns `pin` to its idle configuration.
    fn release(&mut self, _pin: u8) {}
}

/// A [`GpioBank`] over a fixed array of `embedded-hal` input pins.
///
/// Pin numbers index the array. Pull-ups are part of the pin type in most
/// HALs, so the `pull_up` flag is ignored here. Read errors report low.
#[derive(Debug)]
pub struct InputPinBank<P, const N: usize> {
    pins: [P; N],
}

impl<P: InputPin, const N: usize> InputPinBank<P, N> {
    /// Wraps the given pins, pin `i` being `pins[i]`.
    pub fn new(pins: [P; N]) -> Self {
        Self { pins }
    }

    /// Gives back the pins.
    pub fn release_pins(self) -> [P; N] {
        self.pins
    }
}

impl<P: InputPin, const N: usize> GpioBank for InputPinBank<P, N> {
    fn configure_input(&mut self, pin: u8, _pull_up: bool) -> bool {
        usize::from(pin) < N
    }

    fn is_high(&mut self, pin: u8) -> bool {
        self.pins
            .get_mut(usize::from(pin))
            .is_some_and(|p| p.is_high().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    #[test]
    fn test_input_pin_bank_reads_by_number() {
        let a = PinMock::new(&[PinTransaction::get(PinState::High)]);
        let b = PinMock::new(&[PinTransaction::get(PinState::Low)]);
        let mut bank = InputPinBank::new([a, b]);
        assert!(bank.configure_input(1, true));
        assert!(!bank.configure_input(2, true));
        assert!(bank.is_high(0));
        assert!(!bank.is_high(1));
        assert!(!bank.is_high(9));
        for mut pin in bank.release_pins() {
            pin.done();
        }
    }
}
