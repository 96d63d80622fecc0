//! Test doubles shared by the unit tests, and end-to-end tests running a
//! [`Controller`] against a [`Target`] in the same process.

use core::cell::{Cell, RefCell};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use embedded_hal_mock::eh1::delay::NoopDelay;
use embedded_hal_mock::eh1::digital::Mock as PinMock;

use crate::accel::{Direction, DriverConfig, DriverFactory, StepDirDriver, StepDriver};
use crate::gpio::GpioBank;
use crate::target::{BusEndpoint, Target};
use crate::timer::{Clock, MICROSECONDS_PER_MILLISECOND};

/// A clock reading a shared microsecond counter.
#[derive(Debug, Clone, Copy)]
pub struct FakeClock<'a> {
    time_us: &'a Cell<u64>,
}

impl<'a> FakeClock<'a> {
    pub fn new(time_us: &'a Cell<u64>) -> Self {
        Self { time_us }
    }
}

impl Clock for FakeClock<'_> {
    fn now_us(&self) -> u32 {
        self.time_us.get() as u32
    }

    fn now_ms(&self) -> u32 {
        (self.time_us.get() / u64::from(MICROSECONDS_PER_MILLISECOND)) as u32
    }
}

/// A delay that advances the shared counter instead of sleeping.
#[derive(Debug)]
pub struct ClockDelay<'a> {
    time_us: &'a Cell<u64>,
}

impl<'a> ClockDelay<'a> {
    pub fn new(time_us: &'a Cell<u64>) -> Self {
        Self { time_us }
    }

    fn advance(&mut self, us: u64) {
        self.time_us.set(self.time_us.get() + us);
    }
}

impl DelayNs for ClockDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.advance(u64::from(ns).div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(u64::from(ms) * u64::from(MICROSECONDS_PER_MILLISECOND));
    }
}

/// Counts steps instead of pulsing pins.
#[derive(Debug, Default)]
pub struct FakeDriver {
    pub steps: i64,
    pub enabled: bool,
}

impl StepDriver for FakeDriver {
    fn step(&mut self, direction: Direction) {
        self.steps += match direction {
            Direction::Clockwise => 1,
            Direction::CounterClockwise => -1,
        };
    }

    fn enable_outputs(&mut self) {
        self.enabled = true;
    }

    fn disable_outputs(&mut self) {
        self.enabled = false;
    }
}

/// Hands out [`FakeDriver`]s for any interface but 0.
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub attached: usize,
    pub released: usize,
}

impl DriverFactory for FakeFactory {
    type Driver = FakeDriver;

    fn attach(&mut self, config: &DriverConfig) -> Option<FakeDriver> {
        if config.interface == 0 {
            return None;
        }
        self.attached += 1;
        Some(FakeDriver {
            steps: 0,
            enabled: config.enable,
        })
    }

    fn release(&mut self, _driver: FakeDriver) {
        self.released += 1;
    }
}

/// A step/direction driver on mock pins.
pub type MockStepDir = StepDirDriver<PinMock, PinMock, PinMock, NoopDelay>;

/// Pin number of the only enable pin a [`MockPinFactory`] owns.
pub const MOCK_ENABLE_PIN: u8 = 5;

/// Builds one [`MockStepDir`] from its pins and takes them back on release.
#[derive(Default)]
pub struct MockPinFactory {
    pub step: Option<PinMock>,
    pub dir: Option<PinMock>,
    pub enable: Option<PinMock>,
}

impl MockPinFactory {
    /// Checks every pin that is back in the pool.
    pub fn done(&mut self) {
        for pin in [&mut self.step, &mut self.dir, &mut self.enable] {
            if let Some(pin) = pin.as_mut() {
                pin.done();
            }
        }
    }
}

impl DriverFactory for MockPinFactory {
    type Driver = MockStepDir;

    fn attach(&mut self, config: &DriverConfig) -> Option<MockStepDir> {
        if config.interface != 1 || self.step.is_none() || self.dir.is_none() {
            return None;
        }
        let (step, dir) = (self.step.take()?, self.dir.take()?);
        Some(StepDirDriver::new(step, dir, None, NoopDelay::new()))
    }

    fn set_enable_pin(&mut self, driver: &mut MockStepDir, pin: Option<u8>) -> bool {
        match pin {
            Some(MOCK_ENABLE_PIN) => match self.enable.take() {
                Some(enable) => {
                    self.enable = driver.replace_enable_pin(Some(enable));
                    true
                }
                None => false,
            },
            Some(_) => false,
            None => {
                if let Some(enable) = driver.replace_enable_pin(None) {
                    self.enable = Some(enable);
                }
                true
            }
        }
    }

    fn release(&mut self, driver: MockStepDir) {
        let (step, dir, enable, _) = driver.release();
        self.step = Some(step);
        self.dir = Some(dir);
        if enable.is_some() {
            self.enable = enable;
        }
    }
}

/// 32 inputs whose levels are the bits of a shared word.
#[derive(Debug)]
pub struct FakeGpio<'a> {
    levels: &'a Cell<u32>,
    pub released: usize,
}

impl<'a> FakeGpio<'a> {
    pub fn new(levels: &'a Cell<u32>) -> Self {
        Self { levels, released: 0 }
    }
}

impl GpioBank for FakeGpio<'_> {
    fn configure_input(&mut self, pin: u8, _pull_up: bool) -> bool {
        pin < 32
    }

    fn is_high(&mut self, pin: u8) -> bool {
        pin < 32 && self.levels.get() & (1 << pin) != 0
    }

    fn release(&mut self, _pin: u8) {
        self.released += 1;
    }
}

/// An I2C bus wired straight into a [`Target`].
///
/// Writes land in the target's queue and are processed right away, reads
/// return the staged response.
pub struct LoopbackBus<'b, 'l, C, IRQ, const Q: usize> {
    address: u8,
    endpoint: BusEndpoint<'l, Q>,
    target: &'b RefCell<Target<'l, C, IRQ, Q>>,
}

impl<'b, 'l, C, IRQ, const Q: usize> LoopbackBus<'b, 'l, C, IRQ, Q> {
    pub fn new(
        address: u8,
        endpoint: BusEndpoint<'l, Q>,
        target: &'b RefCell<Target<'l, C, IRQ, Q>>,
    ) -> Self {
        Self {
            address,
            endpoint,
            target,
        }
    }
}

impl<C, IRQ, const Q: usize> ErrorType for LoopbackBus<'_, '_, C, IRQ, Q> {
    type Error = ErrorKind;
}

impl<C: Clock, IRQ: OutputPin, const Q: usize> I2c for LoopbackBus<'_, '_, C, IRQ, Q> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != self.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if !self.endpoint.on_receive(bytes) {
                        return Err(ErrorKind::Overrun);
                    }
                    self.target.borrow_mut().poll();
                }
                Operation::Read(buf) => {
                    let _ = self.endpoint.on_request(buf);
                }
            }
        }
        Ok(())
    }
}

#[test]
fn test_fakes_count() {
    let mut factory = FakeFactory::default();
    let config = DriverConfig {
        interface: 0,
        pins: [0; 4],
        enable: false,
    };
    assert!(factory.attach(&config).is_none());
    let driver = factory.attach(&DriverConfig { interface: 2, ..config });
    assert!(driver.is_some());
    if let Some(mut driver) = driver {
        driver.step(Direction::Clockwise);
        driver.step(Direction::Clockwise);
        driver.step(Direction::CounterClockwise);
        driver.enable_outputs();
        assert_eq!(driver.steps, 1);
        assert!(driver.enabled);
        factory.release(driver);
    }
    assert_eq!((factory.attached, factory.released), (1, 1));

    let time = Cell::new(0);
    let mut delay = ClockDelay::new(&time);
    delay.delay_ns(0);
    delay.delay_ns(1);
    delay.delay_us(10);
    assert_eq!(FakeClock::new(&time).now_us(), 11);
}

mod end_to_end {
    use super::*;
    use crate::consts::{AUTO_ADJUST_SAFETY_MARGIN, DEFAULT_ADDRESS, VERSION};
    use crate::controller::{Controller, StepperClient};
    use crate::target::{BusLink, InterruptEvent, InterruptReason, MotionModule, MotionState};

    const CONFIG: DriverConfig = DriverConfig {
        interface: 1,
        pins: [2, 3, 0, 0],
        enable: true,
    };

    #[test]
    fn test_move_over_the_bus() {
        let time = Cell::new(0u64);
        let levels = Cell::new(0u32);
        let mut module: MotionModule<_, _> =
            MotionModule::new(FakeFactory::default(), FakeGpio::new(&levels));
        let mut link: BusLink<4> = BusLink::new();
        let (endpoint, mailbox) = link.split();
        let target: RefCell<Target<'_, _, PinMock, 4>> =
            RefCell::new(Target::new(mailbox, FakeClock::new(&time), None));
        assert!(target.borrow_mut().register(&mut module).is_ok());

        let bus = LoopbackBus::new(DEFAULT_ADDRESS, endpoint, &target);
        let mut ctl =
            Controller::new(bus, ClockDelay::new(&time), FakeClock::new(&time), DEFAULT_ADDRESS);
        let _ = ctl.set_pacing_delay(0);
        assert!(ctl.ping());
        assert!(ctl.check_version(VERSION));
        let ctl = RefCell::new(ctl);

        let stepper = StepperClient::attach(&ctl, &CONFIG);
        assert!(stepper.is_ok());
        let Ok(stepper) = stepper else { return };
        assert_eq!(stepper.unit(), 0);
        assert_eq!(stepper.set_max_speed(1000.0), Ok(()));
        assert_eq!(stepper.set_acceleration(4000.0), Ok(()));
        assert_eq!(stepper.max_speed(), Ok(1000.0));
        assert_eq!(stepper.move_to(1000), Ok(()));
        assert_eq!(stepper.distance_to_go(), Ok(1000));
        assert_eq!(stepper.run_state(), Ok(()));
        assert_eq!(stepper.state(), Ok(MotionState::Run));

        for _ in 0..100_000 {
            time.set(time.get() + 100);
            target.borrow_mut().poll();
            if stepper.poll_stopped().is_ok() {
                break;
            }
        }
        assert_eq!(stepper.current_position(), Ok(1000));
        assert_eq!(stepper.state(), Ok(MotionState::Stopped));
        assert_eq!(target.borrow().rx_bad(), 0);
    }

    #[test]
    fn test_interrupt_acknowledged_by_controller() {
        let time = Cell::new(0u64);
        let levels = Cell::new(0u32);
        let mut module: MotionModule<_, _> =
            MotionModule::new(FakeFactory::default(), FakeGpio::new(&levels));
        let mut link: BusLink<4> = BusLink::new();
        let (endpoint, mailbox) = link.split();
        let target: RefCell<Target<'_, _, PinMock, 4>> =
            RefCell::new(Target::new(mailbox, FakeClock::new(&time), None));
        assert!(target.borrow_mut().register(&mut module).is_ok());

        let bus = LoopbackBus::new(DEFAULT_ADDRESS, endpoint, &target);
        let mut ctl =
            Controller::new(bus, ClockDelay::new(&time), FakeClock::new(&time), DEFAULT_ADDRESS);
        let _ = ctl.set_pacing_delay(0);
        assert_eq!(ctl.set_interrupt_pin(5, true), Ok(()));
        let ctl = RefCell::new(ctl);

        let Ok(stepper) = StepperClient::attach(&ctl, &CONFIG) else {
            panic!("attach failed");
        };
        assert_eq!(stepper.set_endstop_pin(9, false, false), Ok(()));
        assert_eq!(stepper.enable_endstops(true), Ok(()));
        assert_eq!(stepper.enable_interrupts(true), Ok(()));
        assert_eq!(stepper.set_max_speed(500.0), Ok(()));
        assert_eq!(stepper.set_speed(500.0), Ok(()));
        assert_eq!(stepper.run_speed_state(), Ok(()));

        for _ in 0..20 {
            time.set(time.get() + 1000);
            target.borrow_mut().poll();
        }
        assert_eq!(ctl.borrow_mut().clear_interrupt(), Ok(None));

        // switches are sampled after a step, one step takes 2 ms
        levels.set(1 << 9);
        for _ in 0..5 {
            time.set(time.get() + 1000);
            target.borrow_mut().poll();
        }
        assert_eq!(stepper.endstops(), Ok(1));
        assert_eq!(
            ctl.borrow_mut().clear_interrupt(),
            Ok(Some(InterruptEvent {
                unit: 0,
                reason: InterruptReason::EndstopHit,
            }))
        );
        assert_eq!(ctl.borrow_mut().clear_interrupt(), Ok(None));
        assert_eq!(stepper.state(), Ok(MotionState::Stopped));
    }

    #[test]
    fn test_auto_adjust_and_reset() {
        let time = Cell::new(0u64);
        let levels = Cell::new(0u32);
        let mut module: MotionModule<_, _> =
            MotionModule::new(FakeFactory::default(), FakeGpio::new(&levels));
        let mut link: BusLink<4> = BusLink::new();
        let (endpoint, mailbox) = link.split();
        let target: RefCell<Target<'_, _, PinMock, 4>> =
            RefCell::new(Target::new(mailbox, FakeClock::new(&time), None));
        assert!(target.borrow_mut().register(&mut module).is_ok());

        let bus = LoopbackBus::new(DEFAULT_ADDRESS, endpoint, &target);
        let mut ctl =
            Controller::new(bus, ClockDelay::new(&time), FakeClock::new(&time), DEFAULT_ADDRESS);

        // the loopback never fails, so the search runs down to zero
        assert_eq!(
            ctl.auto_adjust_delay(16, AUTO_ADJUST_SAFETY_MARGIN, 10),
            AUTO_ADJUST_SAFETY_MARGIN
        );
        assert_eq!(ctl.pacing_delay(), u32::from(AUTO_ADJUST_SAFETY_MARGIN));
        assert_eq!(ctl.transmission_errors(), 0);

        let ctl = RefCell::new(ctl);
        assert!(StepperClient::attach(&ctl, &CONFIG).is_ok());
        assert_eq!(ctl.borrow_mut().reset_with_delay(0), Ok(()));
        let again = StepperClient::attach(&ctl, &CONFIG).map(|s| s.unit());
        assert_eq!(again, Ok(0));

        let mut ctl = ctl.into_inner();
        assert_eq!(ctl.change_address(0x30), Ok(()));
        assert_eq!(target.borrow_mut().take_new_address(), Some(0x30));
        let (bus, _, _) = ctl.release();
        let mut wrong = LoopbackBus { address: 0x31, ..bus };
        assert!(wrong.write(DEFAULT_ADDRESS, &[]).is_err());
    }
}
