//! Controller-side client for one remote stepper motor.
//!
//! Method names mirror [`AccelStepper`](crate::accel::AccelStepper); each
//! call becomes one request to the stepper module on the target. Several
//! clients, and clients for other modules, share a [`Controller`] through a
//! `RefCell`:
//!
//! ```rust,ignore
//! let bus = RefCell::new(Controller::new(i2c, delay, clock, DEFAULT_ADDRESS));
//! let config = DriverConfig { interface: 1, pins: [2, 3, 0, 0], enable: true };
//! let x = StepperClient::attach(&bus, &config)?;
//! x.set_max_speed(500.0)?;
//! x.set_acceleration(200.0)?;
//! x.run_to_new_position(1000)?;
//! ```
//!
//! The motion itself runs in the target's state machine. Use
//! [`run_state`](StepperClient::run_state) and friends to start it, then
//! either poll with [`poll_stopped`](StepperClient::poll_stopped) or wait for
//! the interrupt line.

use core::cell::RefCell;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::{Controller, TransportResult};
use crate::accel::DriverConfig;
use crate::buffer::Wire;
use crate::consts::NO_UNIT;
use crate::consts::stepper::*;
use crate::error::TransportError;
use crate::target::motion::MotionState;
use crate::timer::Clock;

/// Milliseconds between `is_running` polls of the blocking moves.
const RUN_TO_POSITION_POLL_MS: u32 = 100;

/// A stepper unit on a target device.
#[derive(Debug)]
pub struct StepperClient<'c, I2C, D, C> {
    bus: &'c RefCell<Controller<I2C, D, C>>,
    unit: u8,
}

impl<'c, I2C, D, C> StepperClient<'c, I2C, D, C>
where
    I2C: I2c,
    D: DelayNs,
    C: Clock,
{
    /// Attaches a new stepper on the target.
    ///
    /// Returns [`TransportError::Rejected`] if the target has no free unit or
    /// cannot claim the pins.
    pub fn attach(
        bus: &'c RefCell<Controller<I2C, D, C>>,
        config: &DriverConfig,
    ) -> TransportResult<Self, I2C::Error> {
        let unit: i8 = {
            let mut ctl = bus.borrow_mut();
            ctl.prepare_command(ATTACH_CMD, NO_UNIT);
            ctl.write(config.interface);
            for pin in config.pins {
                ctl.write(pin);
            }
            ctl.write(config.enable);
            ctl.request()?
        };
        let unit = u8::try_from(unit).map_err(|_| TransportError::Rejected)?;
        debug!("attached stepper unit {}", unit);
        Ok(Self { bus, unit })
    }

    /// The unit index assigned by the target.
    pub fn unit(&self) -> u8 {
        self.unit
    }

    fn command(&self, cmd: u8) -> TransportResult<(), I2C::Error> {
        let mut ctl = self.bus.borrow_mut();
        ctl.prepare_command(cmd, self.unit);
        ctl.send_command()
    }

    fn command_with<T: Wire>(&self, cmd: u8, value: T) -> TransportResult<(), I2C::Error> {
        let mut ctl = self.bus.borrow_mut();
        ctl.prepare_command(cmd, self.unit);
        ctl.write(value);
        ctl.send_command()
    }

    fn query<T: Wire + Default>(&self, cmd: u8) -> TransportResult<T, I2C::Error> {
        let mut ctl = self.bus.borrow_mut();
        ctl.prepare_command(cmd, self.unit);
        ctl.request()
    }

    /// Sets an absolute target position.
    pub fn move_to(&self, absolute: i32) -> TransportResult<(), I2C::Error> {
        self.command_with(MOVE_TO_CMD, absolute)
    }

    /// Sets a target relative to the current position.
    pub fn move_by(&self, relative: i32) -> TransportResult<(), I2C::Error> {
        self.command_with(MOVE_CMD, relative)
    }

    /// Advances the motor once with acceleration. Prefer [`run_state`](Self::run_state).
    pub fn run(&self) -> TransportResult<bool, I2C::Error> {
        self.query(RUN_CMD)
    }

    /// Advances the motor once at constant speed.
    /// Prefer [`run_speed_state`](Self::run_speed_state).
    pub fn run_speed(&self) -> TransportResult<bool, I2C::Error> {
        self.query(RUN_SPEED_CMD)
    }

    /// Advances the motor once at constant speed towards the target.
    /// Prefer [`run_speed_to_position_state`](Self::run_speed_to_position_state).
    pub fn run_speed_to_position(&self) -> TransportResult<bool, I2C::Error> {
        self.query(RUN_SPEED_TO_POSITION_CMD)
    }

    /// Sets the maximum speed in steps per second.
    pub fn set_max_speed(&self, speed: f32) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_MAX_SPEED_CMD, speed)
    }

    /// The maximum speed in steps per second.
    pub fn max_speed(&self) -> TransportResult<f32, I2C::Error> {
        self.query(MAX_SPEED_CMD)
    }

    /// Sets the acceleration in steps per second squared.
    pub fn set_acceleration(&self, acceleration: f32) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_ACCELERATION_CMD, acceleration)
    }

    /// Sets the constant speed for the run-speed states.
    pub fn set_speed(&self, speed: f32) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_SPEED_CMD, speed)
    }

    /// The current speed in steps per second.
    pub fn speed(&self) -> TransportResult<f32, I2C::Error> {
        self.query(SPEED_CMD)
    }

    /// Steps left to the target.
    pub fn distance_to_go(&self) -> TransportResult<i32, I2C::Error> {
        self.query(DISTANCE_TO_GO_CMD)
    }

    /// The target position.
    pub fn target_position(&self) -> TransportResult<i32, I2C::Error> {
        self.query(TARGET_POSITION_CMD)
    }

    /// The current position.
    pub fn current_position(&self) -> TransportResult<i32, I2C::Error> {
        self.query(CURRENT_POSITION_CMD)
    }

    /// Redefines the current position, stopping the motor.
    pub fn set_current_position(&self, position: i32) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_CURRENT_POSITION_CMD, position)
    }

    /// Decelerates to a stop.
    pub fn stop(&self) -> TransportResult<(), I2C::Error> {
        self.command(STOP_CMD)
    }

    /// Switches the driver outputs off.
    pub fn disable_outputs(&self) -> TransportResult<(), I2C::Error> {
        self.command(DISABLE_OUTPUTS_CMD)
    }

    /// Switches the driver outputs on.
    pub fn enable_outputs(&self) -> TransportResult<(), I2C::Error> {
        self.command(ENABLE_OUTPUTS_CMD)
    }

    /// Sets the minimum step pulse width in microseconds.
    pub fn set_min_pulse_width(&self, us: u16) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_MIN_PULSE_WIDTH_CMD, us)
    }

    /// Sets the driver's enable pin, `None` for none.
    pub fn set_enable_pin(&self, pin: Option<u8>) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_ENABLE_PIN_CMD, pin.unwrap_or(0xFF))
    }

    /// Inverts the step/direction driver signals.
    pub fn set_pins_inverted(
        &self,
        direction: bool,
        step: bool,
        enable: bool,
    ) -> TransportResult<(), I2C::Error> {
        let bits = u8::from(direction) | u8::from(step) << 1 | u8::from(enable) << 2;
        self.command_with(SET_PINS_INVERTED_CMD, bits)
    }

    /// Inverts the signals of a four-wire driver.
    pub fn set_pins_inverted_4(
        &self,
        pins: [bool; 4],
        enable: bool,
    ) -> TransportResult<(), I2C::Error> {
        let bits = pins
            .iter()
            .enumerate()
            .fold(u8::from(enable) << 4, |bits, (i, &inv)| bits | u8::from(inv) << i);
        self.command_with(SET_PINS_INVERTED_4_CMD, bits)
    }

    /// `true` while the motor moves or has not reached its target.
    pub fn is_running(&self) -> TransportResult<bool, I2C::Error> {
        self.query(IS_RUNNING_CMD)
    }

    /// Enables interrupts for this unit (arrival, limit switch).
    pub fn enable_interrupts(&self, enable: bool) -> TransportResult<(), I2C::Error> {
        self.command_with(ENABLE_INTERRUPTS_CMD, enable)
    }

    /// Switches the target's state machine.
    pub fn set_state(&self, state: MotionState) -> TransportResult<(), I2C::Error> {
        self.command_with(SET_STATE_CMD, state as u8)
    }

    /// The target's state machine phase.
    pub fn state(&self) -> TransportResult<MotionState, I2C::Error> {
        let raw: u8 = self.query(GET_STATE_CMD)?;
        MotionState::try_from(raw).map_err(|_| TransportError::Rejected)
    }

    /// Stops polling on the target. The motor halts abruptly.
    pub fn stop_state(&self) -> TransportResult<(), I2C::Error> {
        self.set_state(MotionState::Stopped)
    }

    /// Runs to the target position with acceleration.
    pub fn run_state(&self) -> TransportResult<(), I2C::Error> {
        self.set_state(MotionState::Run)
    }

    /// Runs at constant speed until stopped or a limit switch is hit.
    pub fn run_speed_state(&self) -> TransportResult<(), I2C::Error> {
        self.set_state(MotionState::RunSpeed)
    }

    /// Runs at constant speed to the target position.
    pub fn run_speed_to_position_state(&self) -> TransportResult<(), I2C::Error> {
        self.set_state(MotionState::RunSpeedToPosition)
    }

    /// Adds a limit switch on input `pin`.
    pub fn set_endstop_pin(
        &self,
        pin: i8,
        active_low: bool,
        pull_up: bool,
    ) -> TransportResult<(), I2C::Error> {
        let mut ctl = self.bus.borrow_mut();
        ctl.prepare_command(SET_ENDSTOP_PIN_CMD, self.unit);
        ctl.write(pin);
        ctl.write(active_low);
        ctl.write(pull_up);
        ctl.send_command()
    }

    /// Enables limit switch polling.
    pub fn enable_endstops(&self, enable: bool) -> TransportResult<(), I2C::Error> {
        self.command_with(ENABLE_ENDSTOPS_CMD, enable)
    }

    /// The current limit switch pattern, last added switch in bit 0.
    pub fn endstops(&self) -> TransportResult<u8, I2C::Error> {
        self.query(ENDSTOPS_CMD)
    }

    /// Polls once whether the motor came to rest.
    pub fn poll_stopped(&self) -> nb::Result<(), TransportError<I2C::Error>> {
        match self.is_running() {
            Ok(true) => Err(nb::Error::WouldBlock),
            Ok(false) => Ok(()),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    /// Starts the run state and blocks until the target is reached.
    pub fn run_to_position(&self) -> TransportResult<(), I2C::Error> {
        self.run_state()?;
        loop {
            match self.poll_stopped() {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {
                    self.bus.borrow_mut().pause_ms(RUN_TO_POSITION_POLL_MS);
                }
            }
        }
    }

    /// Moves to `position` and blocks until it is reached.
    pub fn run_to_new_position(&self, position: i32) -> TransportResult<(), I2C::Error> {
        self.move_to(position)?;
        self.run_to_position()
    }
}
