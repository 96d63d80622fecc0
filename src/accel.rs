//! Acceleration-profile stepper motion.
//!
//! [`AccelStepper`] models a stepper motor with a trapezoidal speed profile:
//! it accelerates towards the maximum speed, cruises, and decelerates so it
//! comes to rest exactly on the target position. Each call to
//! [`run`](AccelStepper::run) or [`run_speed`](AccelStepper::run_speed)
//! emits at most one step, so the caller has to poll it at least as often as
//! the step rate.
//!
//! Step intervals follow the incremental approximation from D. Austin,
//! "Generate stepper-motor speed profiles in real time" (2005):
//!
//! ```text
//! c0 = 0.676 * sqrt(2 / a) * 1e6
//! cn = cn-1 - 2 * cn-1 / (4 * n + 1)
//! ```
//!
//! Physical output is delegated to a [`StepDriver`]. [`StepDirDriver`]
//! drives a step/direction controller through `embedded-hal` pins.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use libm::{fabsf, sqrtf};

use crate::timer::MICROSECONDS_PER_SECOND;

/// Rotation direction of a step.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Direction {
    /// Towards larger positions.
    Clockwise,
    /// Towards smaller positions.
    #[default]
    CounterClockwise,
}

/// Output stage of a stepper motor.
pub trait StepDriver {
    /// Emits a single step in `direction`.
    fn step(&mut self, direction: Direction);

    /// Powers the motor coils.
    fn enable_outputs(&mut self);

    /// Releases the motor coils.
    fn disable_outputs(&mut self);

    /// Sets the minimum width of a step pulse.
    fn set_min_pulse_width(&mut self, _us: u16) {}

    /// Inverts the step/direction/enable signals.
    fn set_pins_inverted(&mut self, _direction: bool, _step: bool, _enable: bool) {}

    /// Inverts the signals of a four-wire driver.
    fn set_pins_inverted_4(&mut self, _pins: [bool; 4], _enable: bool) {}
}

/// How a motor is wired to the target, as sent by an attach request.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct DriverConfig {
    /// Interface type: 1 step/direction driver, 2/3/4 two to four wire full step,
    /// 6/8 three/four wire half step.
    pub interface: u8,
    /// Pin numbers, unused entries are ignored by the factory.
    pub pins: [u8; 4],
    /// Enable the outputs right after attaching.
    pub enable: bool,
}

/// Creates step drivers for attach requests and takes them back on reset.
///
/// The target application implements this to hand out its output pins.
pub trait DriverFactory {
    /// The driver type produced.
    type Driver: StepDriver;

    /// Claims the pins named in `config`, `None` if they are unavailable.
    fn attach(&mut self, config: &DriverConfig) -> Option<Self::Driver>;

    /// Connects output `pin` to the enable input of `driver`, `None`
    /// disconnects it. Returns `false` if the pin cannot be provided.
    ///
    /// Pins are numbered by the application, like the attach pins.
    fn set_enable_pin(&mut self, _driver: &mut Self::Driver, _pin: Option<u8>) -> bool {
        false
    }

    /// Returns a driver that is no longer used, with all its pins.
    fn release(&mut self, driver: Self::Driver);
}

/// Stepper motor position and speed model.
#[derive(Debug)]
pub struct AccelStepper<D> {
    driver: D,
    current_pos: i32,
    target_pos: i32,
    /// Steps per second, negative for counter-clockwise.
    speed: f32,
    max_speed: f32,
    acceleration: f32,
    /// Microseconds between steps, 0 when not moving.
    step_interval: u32,
    last_step_time: u32,
    /// Step counter of the current ramp, negative while decelerating.
    n: i32,
    c0: f32,
    cn: f32,
    cmin: f32,
    direction: Direction,
}

impl<D: StepDriver> AccelStepper<D> {
    /// Creates a stepper at position 0 with speed and acceleration of 1.
    pub fn new(driver: D) -> Self {
        let mut stepper = Self {
            driver,
            current_pos: 0,
            target_pos: 0,
            speed: 0.0,
            max_speed: 0.0,
            acceleration: 0.0,
            step_interval: 0,
            last_step_time: 0,
            n: 0,
            c0: 0.0,
            cn: 0.0,
            cmin: 1.0,
            direction: Direction::CounterClockwise,
        };
        stepper.set_acceleration(1.0);
        stepper.set_max_speed(1.0);
        stepper
    }

    /// Sets an absolute target and recomputes the speed.
    pub fn move_to(&mut self, absolute: i32) {
        if self.target_pos != absolute {
            self.target_pos = absolute;
            self.compute_new_speed();
        }
    }

    /// Sets a target relative to the current position.
    pub fn move_by(&mut self, relative: i32) {
        self.move_to(self.current_pos.wrapping_add(relative));
    }

    /// Steps at the current speed if a step is due.
    ///
    /// Returns `true` if a step was taken.
    pub fn run_speed(&mut self, now_us: u32) -> bool {
        if self.step_interval == 0 {
            return false;
        }
        if now_us.wrapping_sub(self.last_step_time) < self.step_interval {
            return false;
        }
        self.current_pos = match self.direction {
            Direction::Clockwise => self.current_pos.wrapping_add(1),
            Direction::CounterClockwise => self.current_pos.wrapping_sub(1),
        };
        self.driver.step(self.direction);
        self.last_step_time = now_us;
        true
    }

    /// Steps with acceleration towards the target if a step is due.
    ///
    /// Returns `true` while the motor is still moving or has not arrived.
    pub fn run(&mut self, now_us: u32) -> bool {
        if self.run_speed(now_us) {
            self.compute_new_speed();
        }
        self.speed != 0.0 || self.distance_to_go() != 0
    }

    /// Steps at the current speed towards the target, without acceleration.
    ///
    /// Returns `true` if a step was taken, `false` once the target is reached.
    pub fn run_speed_to_position(&mut self, now_us: u32) -> bool {
        if self.target_pos == self.current_pos {
            return false;
        }
        self.direction = if self.target_pos > self.current_pos {
            Direction::Clockwise
        } else {
            Direction::CounterClockwise
        };
        self.run_speed(now_us)
    }

    fn steps_to_stop(&self) -> i32 {
        ((self.speed * self.speed) / (2.0 * self.acceleration)) as i32
    }

    fn compute_new_speed(&mut self) {
        let distance_to = self.distance_to_go();
        let steps_to_stop = self.steps_to_stop();

        if distance_to == 0 && steps_to_stop <= 1 {
            self.step_interval = 0;
            self.speed = 0.0;
            self.n = 0;
            return;
        }

        // magnitudes as u32, the distance may be i32::MIN
        let remaining = distance_to.unsigned_abs();
        let stop_len = steps_to_stop.unsigned_abs();
        if distance_to > 0 {
            if self.n > 0 {
                if stop_len >= remaining || self.direction == Direction::CounterClockwise {
                    self.n = -steps_to_stop;
                }
            } else if self.n < 0 && stop_len < remaining && self.direction == Direction::Clockwise {
                self.n = self.n.saturating_neg();
            }
        } else if distance_to < 0 {
            if self.n > 0 {
                if stop_len >= remaining || self.direction == Direction::Clockwise {
                    self.n = -steps_to_stop;
                }
            } else if self.n < 0
                && stop_len < remaining
                && self.direction == Direction::CounterClockwise
            {
                self.n = self.n.saturating_neg();
            }
        }

        if self.n == 0 {
            self.cn = self.c0;
            self.direction = if distance_to > 0 {
                Direction::Clockwise
            } else {
                Direction::CounterClockwise
            };
        } else {
            self.cn -= (2.0 * self.cn) / ((4.0 * self.n as f32) + 1.0);
            self.cn = self.cn.max(self.cmin);
        }
        self.n += 1;
        self.step_interval = self.cn as u32;
        self.speed = MICROSECONDS_PER_SECOND as f32 / self.cn;
        if self.direction == Direction::CounterClockwise {
            self.speed = -self.speed;
        }
    }

    /// Sets the speed limit in steps per second. The sign is ignored.
    pub fn set_max_speed(&mut self, speed: f32) {
        let speed = fabsf(speed);
        if self.max_speed != speed && speed > 0.0 {
            self.max_speed = speed;
            self.cmin = MICROSECONDS_PER_SECOND as f32 / speed;
            if self.n > 0 {
                self.n = self.steps_to_stop();
                self.compute_new_speed();
            }
        }
    }

    /// The speed limit in steps per second.
    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    /// Sets the acceleration in steps per second squared. Zero is ignored,
    /// the sign is ignored.
    pub fn set_acceleration(&mut self, acceleration: f32) {
        if acceleration == 0.0 {
            return;
        }
        let acceleration = fabsf(acceleration);
        if self.acceleration != acceleration {
            self.n = (self.n as f32 * (self.acceleration / acceleration)) as i32;
            self.c0 = 0.676 * sqrtf(2.0 / acceleration) * MICROSECONDS_PER_SECOND as f32;
            self.acceleration = acceleration;
            self.compute_new_speed();
        }
    }

    /// The configured acceleration.
    pub fn acceleration(&self) -> f32 {
        self.acceleration
    }

    /// Sets a constant speed for [`run_speed`](Self::run_speed), clamped to the maximum speed.
    pub fn set_speed(&mut self, speed: f32) {
        if speed == self.speed {
            return;
        }
        let speed = speed.clamp(-self.max_speed, self.max_speed);
        if speed == 0.0 {
            self.step_interval = 0;
        } else {
            self.step_interval = fabsf(MICROSECONDS_PER_SECOND as f32 / speed) as u32;
            self.direction = if speed > 0.0 {
                Direction::Clockwise
            } else {
                Direction::CounterClockwise
            };
        }
        self.speed = speed;
    }

    /// Current speed in steps per second, negative for counter-clockwise.
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Steps between the current and the target position.
    pub fn distance_to_go(&self) -> i32 {
        self.target_pos.wrapping_sub(self.current_pos)
    }

    /// The most recently set target position.
    pub fn target_position(&self) -> i32 {
        self.target_pos
    }

    /// The current position.
    pub fn current_position(&self) -> i32 {
        self.current_pos
    }

    /// Redefines the current position, and the target, as `position`. Stops the motor.
    pub fn set_current_position(&mut self, position: i32) {
        self.current_pos = position;
        self.target_pos = position;
        self.n = 0;
        self.step_interval = 0;
        self.speed = 0.0;
    }

    /// Retargets so the motor decelerates to a stop as quickly as allowed.
    pub fn stop(&mut self) {
        if self.speed != 0.0 {
            let steps_to_stop = self.steps_to_stop() + 1;
            if self.speed > 0.0 {
                self.move_by(steps_to_stop);
            } else {
                self.move_by(-steps_to_stop);
            }
        }
    }

    /// `true` while the motor moves or has not reached its target.
    pub fn is_running(&self) -> bool {
        !(self.speed == 0.0 && self.target_pos == self.current_pos)
    }

    /// Direction of the last or next step.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The output stage.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Powers the motor coils.
    pub fn enable_outputs(&mut self) {
        self.driver.enable_outputs();
    }

    /// Releases the motor coils.
    pub fn disable_outputs(&mut self) {
        self.driver.disable_outputs();
    }

    /// Gives back the output stage.
    pub fn release(self) -> D {
        self.driver
    }
}

/// A [`StepDriver`] for step/direction controllers (A4988, DRV8825, ...).
///
/// Direction is written before every pulse; the step pin is held for the
/// minimum pulse width. The optional enable pin is driven high while the
/// outputs are enabled, unless inverted. Pin errors are ignored.
#[derive(Debug)]
pub struct StepDirDriver<STEP, DIR, EN, D> {
    step: STEP,
    dir: DIR,
    enable: Option<EN>,
    delay: D,
    pulse_us: u32,
    step_inverted: bool,
    dir_inverted: bool,
    enable_inverted: bool,
    outputs_enabled: bool,
}

impl<STEP, DIR, EN, D> StepDirDriver<STEP, DIR, EN, D>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
    D: DelayNs,
{
    /// Creates a driver with a 1 µs pulse width, idling the step pin low.
    ///
    /// The outputs start disabled.
    pub fn new(step: STEP, dir: DIR, enable: Option<EN>, delay: D) -> Self {
        let mut driver = Self {
            step,
            dir,
            enable,
            delay,
            pulse_us: 1,
            step_inverted: false,
            dir_inverted: false,
            enable_inverted: false,
            outputs_enabled: false,
        };
        driver.write_step(false);
        driver.write_enable();
        driver
    }

    fn write_step(&mut self, active: bool) {
        if active != self.step_inverted {
            let _ = self.step.set_high();
        } else {
            let _ = self.step.set_low();
        }
    }

    fn write_dir(&mut self, direction: Direction) {
        if (direction == Direction::Clockwise) != self.dir_inverted {
            let _ = self.dir.set_high();
        } else {
            let _ = self.dir.set_low();
        }
    }

    fn write_enable(&mut self) {
        let high = self.outputs_enabled != self.enable_inverted;
        if let Some(enable) = self.enable.as_mut() {
            if high {
                let _ = enable.set_high();
            } else {
                let _ = enable.set_low();
            }
        }
    }

    /// Swaps the enable pin and returns the previous one.
    ///
    /// A new pin is driven to the current output state right away.
    pub fn replace_enable_pin(&mut self, enable: Option<EN>) -> Option<EN> {
        let previous = core::mem::replace(&mut self.enable, enable);
        self.write_enable();
        previous
    }

    /// `true` while the outputs are enabled.
    pub fn outputs_enabled(&self) -> bool {
        self.outputs_enabled
    }

    /// Gives back the pins and the delay.
    pub fn release(self) -> (STEP, DIR, Option<EN>, D) {
        (self.step, self.dir, self.enable, self.delay)
    }
}

impl<STEP, DIR, EN, D> StepDriver for StepDirDriver<STEP, DIR, EN, D>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
    D: DelayNs,
{
    fn step(&mut self, direction: Direction) {
        self.write_dir(direction);
        self.write_step(true);
        self.delay.delay_us(self.pulse_us);
        self.write_step(false);
    }

    fn enable_outputs(&mut self) {
        self.outputs_enabled = true;
        self.write_enable();
    }

    fn disable_outputs(&mut self) {
        self.write_step(false);
        self.outputs_enabled = false;
        self.write_enable();
    }

    fn set_min_pulse_width(&mut self, us: u16) {
        self.pulse_us = u32::from(us);
    }

    fn set_pins_inverted(&mut self, direction: bool, step: bool, enable: bool) {
        self.dir_inverted = direction;
        self.step_inverted = step;
        if self.enable_inverted != enable {
            self.enable_inverted = enable;
            self.write_enable();
        }
    }
}
