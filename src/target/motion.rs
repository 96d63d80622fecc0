//! Stepper motor module with a polled motion state machine.
//!
//! Every attached unit wraps an [`AccelStepper`] plus up to
//! [`MAX_ENDSTOPS`] limit switches. Besides forwarding the primitive's
//! commands, the module runs a small state machine on every
//! [`poll`](Module::poll) so the controller does not have to stream
//! individual `run` requests over the bus:
//!
//! | State                  | Per poll                    | Leaves when             |
//! |------------------------|-----------------------------|-------------------------|
//! | `Stopped`              | nothing                     | controller sets a state |
//! | `Run`                  | `run()` with acceleration   | target reached          |
//! | `RunSpeed`             | `run_speed()`               | limit switch or command |
//! | `RunSpeedToPosition`   | `run_speed_to_position()`   | target reached          |
//!
//! See [`MotionState`] for the wire values.
//!
//! After a (possible) step the limit switches are sampled. A changed switch
//! pattern is accepted once [`ENDSTOP_DEBOUNCE_MS`] have passed since the
//! previous accepted change; an active switch stops the motor on the spot.
//! Arrivals and limit hits raise interrupts for units that enabled them.

use core::fmt;

use heapless::Vec;

use super::interrupt::InterruptReason;
use super::module::{Command, Context, Module};
use super::registry::UnitRegistry;
use crate::accel::{AccelStepper, DriverConfig, DriverFactory, StepDriver};
use crate::buffer::Frame;
use crate::consts::stepper::*;
use crate::gpio::GpioBank;
use crate::timer::time_reached;

/// Phase of a unit's state machine. The discriminants are the wire values.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
#[repr(u8)]
pub enum MotionState {
    /// Not moving on its own.
    #[default]
    Stopped = 0,
    /// Accelerated move to the target position.
    Run = 1,
    /// Endless move at constant speed.
    RunSpeed = 2,
    /// Constant speed move to the target position.
    RunSpeedToPosition = 3,
}

impl TryFrom<u8> for MotionState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MotionState::Stopped),
            1 => Ok(MotionState::Run),
            2 => Ok(MotionState::RunSpeed),
            3 => Ok(MotionState::RunSpeedToPosition),
            other => Err(other),
        }
    }
}

/// A limit switch input.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Endstop {
    /// Input pin number.
    pub pin: u8,
    /// The switch is active when the pin reads low.
    pub active_low: bool,
}

/// State of one attached stepper.
#[derive(Debug)]
pub struct MotionUnit<D> {
    stepper: AccelStepper<D>,
    state: MotionState,
    endstops: Vec<Endstop, MAX_ENDSTOPS>,
    interrupts_enabled: bool,
    endstops_enabled: bool,
    last_endstops: u8,
    debounce_until: Option<u32>,
}

impl<D: StepDriver> MotionUnit<D> {
    fn new(stepper: AccelStepper<D>) -> Self {
        Self {
            stepper,
            state: MotionState::Stopped,
            endstops: Vec::new(),
            interrupts_enabled: false,
            endstops_enabled: false,
            last_endstops: 0,
            debounce_until: None,
        }
    }

    /// The motion primitive.
    pub fn stepper(&self) -> &AccelStepper<D> {
        &self.stepper
    }

    /// Current state machine phase.
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Configured limit switches, in the order they were added.
    pub fn endstops(&self) -> &[Endstop] {
        &self.endstops
    }

    /// Samples the switches, the most recently added one in the lowest bit.
    fn read_endstops<G: GpioBank>(&self, gpio: &mut G) -> u8 {
        self.endstops.iter().fold(0u8, |pattern, endstop| {
            let active = gpio.is_high(endstop.pin) ^ endstop.active_low;
            (pattern << 1) | u8::from(active)
        })
    }

    fn raise(&self, ctx: &mut Context<'_>, index: u8, reason: InterruptReason) {
        if self.interrupts_enabled {
            ctx.trigger_interrupt(index, reason);
        }
    }

    fn check_endstops<G: GpioBank>(&mut self, gpio: &mut G, ctx: &mut Context<'_>, index: u8) {
        let pattern = self.read_endstops(gpio);
        if pattern == self.last_endstops {
            return;
        }
        if let Some(deadline) = self.debounce_until {
            if !time_reached(ctx.now_ms, deadline) {
                return;
            }
        }
        self.debounce_until = Some(ctx.now_ms.wrapping_add(ENDSTOP_DEBOUNCE_MS));
        self.last_endstops = pattern;
        if pattern != 0 {
            info!("stepper {}: endstop hit at {}", index, self.stepper.current_position());
            self.stepper.set_speed(0.0);
            self.stepper.move_to(self.stepper.current_position());
            self.state = MotionState::Stopped;
            self.raise(ctx, index, InterruptReason::EndstopHit);
        }
    }

    fn step_state_machine(&mut self, ctx: &mut Context<'_>, index: u8) -> bool {
        match self.state {
            MotionState::Stopped => false,
            MotionState::Run => {
                if !self.stepper.run(ctx.now_us) {
                    self.state = MotionState::Stopped;
                    self.raise(ctx, index, InterruptReason::TargetReachedByRun);
                }
                // run() does not tell whether it stepped
                true
            }
            MotionState::RunSpeed => self.stepper.run_speed(ctx.now_us),
            MotionState::RunSpeedToPosition => {
                let stepped = self.stepper.run_speed_to_position(ctx.now_us);
                if self.stepper.distance_to_go() == 0 {
                    self.state = MotionState::Stopped;
                    self.raise(ctx, index, InterruptReason::TargetReachedByRunSpeedToPosition);
                }
                stepped
            }
        }
    }
}

/// The stepper [`Module`], serving command codes [`COMMANDS`].
///
/// `F` creates step drivers on attach requests, `G` provides the limit
/// switch inputs, `N` is the maximum number of units.
pub struct MotionModule<F: DriverFactory, G, const N: usize = MAX_UNITS> {
    factory: F,
    gpio: G,
    units: UnitRegistry<MotionUnit<F::Driver>, N>,
}

impl<F: DriverFactory, G, const N: usize> fmt::Debug for MotionModule<F, G, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionModule")
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

impl<F: DriverFactory, G: GpioBank, const N: usize> MotionModule<F, G, N> {
    /// Creates a module without units.
    pub fn new(factory: F, gpio: G) -> Self {
        Self {
            factory,
            gpio,
            units: UnitRegistry::new(),
        }
    }

    /// The unit at `index`, if attached.
    pub fn unit(&self, index: u8) -> Option<&MotionUnit<F::Driver>> {
        self.units.get(index)
    }

    /// Number of attached units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// `true` if no unit is attached.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The limit switch inputs.
    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }

    /// Attaches a new unit, returning its index.
    ///
    /// Fails if the unit table is full or the factory cannot provide a driver.
    pub fn attach(&mut self, config: &DriverConfig) -> Option<u8> {
        if self.units.is_full() {
            warn!("stepper: unit table full");
            return None;
        }
        let driver = self.factory.attach(config)?;
        let mut stepper = AccelStepper::new(driver);
        if config.enable {
            stepper.enable_outputs();
        }
        let index = self.units.attach(MotionUnit::new(stepper))?;
        debug!("stepper: attached unit {}", index);
        Some(index)
    }

    fn handle_attach(&mut self, cmd: &Command, input: &mut Frame, output: &mut Frame) {
        if cmd.params != 6 {
            return;
        }
        let config = DriverConfig {
            interface: input.read(),
            pins: [input.read(), input.read(), input.read(), input.read()],
            enable: input.read(),
        };
        let result = self
            .attach(&config)
            .and_then(|index| i8::try_from(index).ok())
            .unwrap_or(-1);
        output.write(result);
    }
}

impl<F: DriverFactory, G: GpioBank, const N: usize> Module for MotionModule<F, G, N> {
    fn commands(&self) -> core::ops::RangeInclusive<u8> {
        COMMANDS
    }

    fn process(
        &mut self,
        cmd: &Command,
        input: &mut Frame,
        output: &mut Frame,
        ctx: &mut Context<'_>,
    ) {
        if cmd.code == ATTACH_CMD {
            self.handle_attach(cmd, input, output);
            return;
        }
        let Self { factory, gpio, units } = self;
        let Some(unit) = units.get_mut(cmd.unit) else {
            debug!("stepper: command {} for unknown unit {}", cmd.code, cmd.unit);
            return;
        };
        let now = ctx.now_us;
        let s = &mut unit.stepper;
        match (cmd.code, cmd.params) {
            (MOVE_TO_CMD, 4) => s.move_to(input.read()),
            (MOVE_CMD, 4) => s.move_by(input.read()),
            (RUN_CMD, 0) => output.write(s.run(now)),
            (RUN_SPEED_CMD, 0) => output.write(s.run_speed(now)),
            (SET_MAX_SPEED_CMD, 4) => s.set_max_speed(input.read()),
            (MAX_SPEED_CMD, 0) => output.write(s.max_speed()),
            (SET_ACCELERATION_CMD, 4) => s.set_acceleration(input.read()),
            (SET_SPEED_CMD, 4) => s.set_speed(input.read()),
            (SPEED_CMD, 0) => output.write(s.speed()),
            (DISTANCE_TO_GO_CMD, 0) => output.write(s.distance_to_go()),
            (TARGET_POSITION_CMD, 0) => output.write(s.target_position()),
            (CURRENT_POSITION_CMD, 0) => output.write(s.current_position()),
            (SET_CURRENT_POSITION_CMD, 4) => s.set_current_position(input.read()),
            (RUN_SPEED_TO_POSITION_CMD, 0) => output.write(s.run_speed_to_position(now)),
            (STOP_CMD, 0) => s.stop(),
            (DISABLE_OUTPUTS_CMD, 0) => s.disable_outputs(),
            (ENABLE_OUTPUTS_CMD, 0) => s.enable_outputs(),
            (SET_MIN_PULSE_WIDTH_CMD, 2) => s.driver_mut().set_min_pulse_width(input.read()),
            (SET_ENABLE_PIN_CMD, 1) => {
                let pin: u8 = input.read();
                if !factory.set_enable_pin(s.driver_mut(), (pin != 0xFF).then_some(pin)) {
                    debug!("stepper: enable pin {} unavailable", pin);
                }
            }
            (SET_PINS_INVERTED_CMD, 1) => {
                let bits: u8 = input.read();
                s.driver_mut()
                    .set_pins_inverted(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            }
            (SET_PINS_INVERTED_4_CMD, 1) => {
                let bits: u8 = input.read();
                let pins = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0];
                s.driver_mut().set_pins_inverted_4(pins, bits & 16 != 0);
            }
            (IS_RUNNING_CMD, 0) => output.write(s.is_running()),
            (ENABLE_INTERRUPTS_CMD, 1) => unit.interrupts_enabled = input.read(),
            (SET_STATE_CMD, 1) => {
                if let Ok(state) = MotionState::try_from(input.read::<u8>()) {
                    unit.state = state;
                }
            }
            (GET_STATE_CMD, 0) => output.write(unit.state as u8),
            (SET_ENDSTOP_PIN_CMD, 3) => {
                let pin: i8 = input.read();
                let active_low: bool = input.read();
                let pull_up: bool = input.read();
                let Ok(pin) = u8::try_from(pin) else {
                    return;
                };
                if unit.endstops.is_full() || !gpio.configure_input(pin, pull_up) {
                    return;
                }
                let _ = unit.endstops.push(Endstop { pin, active_low });
            }
            (ENABLE_ENDSTOPS_CMD, 1) => {
                let enabled: bool = input.read();
                unit.endstops_enabled = enabled;
                if enabled {
                    unit.last_endstops = unit.read_endstops(gpio);
                }
            }
            (ENDSTOPS_CMD, 0) => output.write(unit.read_endstops(gpio)),
            (code, params) => {
                debug!("stepper: ignored command {} with {} parameter bytes", code, params);
            }
        }
    }

    fn poll(&mut self, ctx: &mut Context<'_>) {
        let Self { gpio, units, .. } = self;
        for (index, unit) in units.iter_mut() {
            let stepped = unit.step_state_machine(ctx, index);
            if stepped && unit.endstops_enabled {
                unit.check_endstops(gpio, ctx, index);
            }
        }
    }

    fn reset(&mut self) {
        let Self { factory, gpio, units } = self;
        units.clear(|mut unit| {
            unit.stepper.stop();
            unit.stepper.disable_outputs();
            for endstop in &unit.endstops {
                gpio.release(endstop.pin);
            }
            factory.release(unit.stepper.release());
        });
    }
}
