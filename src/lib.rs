//! # unitbus
//!
//! A portable, no_std command transport for driving peripherals that hang off
//! a small I2C target device, with a stepper motor module on top.
//!
//! One side of the bus is the **controller**: it frames requests, paces them
//! so slow targets keep up, checks every response and counts failures. The
//! other side is the **target**: it takes frames from its bus interrupt,
//! validates them in the main loop, routes them to registered modules and
//! stages their results for the next read.
//!
//! This crate implements both sides using:
//! - `embedded-hal` traits for the bus, digital I/O and delays
//! - `heapless` queues between the bus interrupt and the main loop
//! - interrupt-safe response staging with `critical-section`
//! - optional tick sources using either timer interrupts or blocking delay
//!
//! ## Crate features
//! | Feature               | Description |
//! |-----------------------|-------------|
//! | `std`                 | Disables `#![no_std]`, adds [`StdClock`](timer::StdClock) |
//! | `delay-loop`          | Adds a blocking target main loop over `DelayNs` |
//! | `timer-isr` (default) | Adds a [`TickClock`](timer::TickClock) fed by a timer interrupt |
//! | `defmt-0-3`           | Uses `defmt` logging |
//! | `log`                 | Uses `log` logging |
//!
//! ## Software Features
//!
//! - **CRC-8 framed** request/response frames of at most 20 bytes
//! - Up to 8 **units** per module, addressed by index
//! - A level-triggered **interrupt line** with acknowledgement over the bus
//! - **Pacing delay** calibration with loopback requests
//! - A **stepper module** running acceleration-limited moves and limit switches
//!   on the target, driven by [`StepperClient`](controller::StepperClient)
//!
//! ## Usage
//!
//! On the controller:
//!
//! ```rust,ignore
//! use core::cell::RefCell;
//! use unitbus::controller::{Controller, StepperClient};
//!
//! let bus = RefCell::new(Controller::new(i2c, delay, clock, 0x08));
//! let x = StepperClient::attach(&bus, &config)?;
//! x.set_max_speed(800.0)?;
//! x.set_acceleration(400.0)?;
//! x.move_to(2000)?;
//! x.run_state()?;
//! ```
//!
//! On the target, feed the bus interrupt into a [`BusEndpoint`](target::BusEndpoint)
//! and poll the [`Target`](target::Target) from the main loop:
//!
//! ```rust,ignore
//! let (endpoint, mailbox) = LINK.split();
//! let mut target = Target::new(mailbox, &CLOCK, Some(irq_pin));
//! target.register(&mut steppers)?;
//! loop {
//!     target.poll();
//! }
//! ```
//!
//! ## Integration Notes
//!
//! - Stepping happens in `poll()`, so the main loop must run faster than the
//!   fastest step rate
//! - Only the main loop touches modules; the bus interrupt only queues frames
//!   and copies out the staged response
//! - Controller and target must agree on every value in [`consts`]
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    unused_extern_crates,
    unused_import_braces
)]
#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub use critical_section;
pub use heapless;

#[macro_use]
mod fmt;

pub mod accel;
pub mod buffer;
pub mod consts;
pub mod controller;
pub(crate) mod crc;
pub mod error;
pub mod gpio;
pub mod target;
pub mod timer;

#[cfg(test)]
mod testing;
