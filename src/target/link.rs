//! The boundary between bus callbacks and the target main loop.
//!
//! Bus peripherals deliver received bytes and ask for response bytes from
//! interrupt context. Those callbacks only touch a [`BusEndpoint`]: received
//! frames are pushed into a single-producer/single-consumer queue and
//! responses are copied out of a critical-section protected slot. The main
//! loop owns the matching [`Mailbox`] through the [`Target`](super::Target).
//!
//! ```rust
//! use unitbus::target::BusLink;
//!
//! let mut link: BusLink<4> = BusLink::new();
//! let (mut endpoint, mailbox) = link.split();
//!
//! // I2C receive interrupt
//! assert!(endpoint.on_receive(&[0x00, 245, 0xff]));
//!
//! // I2C request interrupt, before the frame was processed
//! let mut out = [0u8; 5];
//! endpoint.on_request(&mut out);
//! assert_eq!(out, [0xff; 5]);
//! # drop(mailbox);
//! ```

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::Vec;
use heapless::spsc::{Consumer, Producer, Queue};

use crate::consts::MAX_FRAME_LEN;

/// A frame as received from or sent to the bus, checksum included.
pub type RawFrame = Vec<u8, MAX_FRAME_LEN>;

/// Byte clocked out when the response is shorter than the read or not ready.
pub const IDLE_BYTE: u8 = 0xFF;

/// The staged response, shared between the main loop and the request callback.
pub struct ResponseSlot {
    frame: Mutex<RefCell<RawFrame>>,
}

impl fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSlot").finish_non_exhaustive()
    }
}

impl Default for ResponseSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSlot {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self {
            frame: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Replaces the staged response.
    pub fn publish(&self, bytes: &[u8]) {
        critical_section::with(|cs| {
            let mut frame = self.frame.borrow_ref_mut(cs);
            frame.clear();
            let n = bytes.len().min(MAX_FRAME_LEN);
            let _ = frame.extend_from_slice(&bytes[..n]);
        });
    }

    /// Drops the staged response.
    pub fn clear(&self) {
        critical_section::with(|cs| self.frame.borrow_ref_mut(cs).clear());
    }

    /// Copies the staged response into `out`, padding with [`IDLE_BYTE`].
    ///
    /// Returns the number of response bytes copied.
    pub fn copy_into(&self, out: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let frame = self.frame.borrow_ref(cs);
            let n = frame.len().min(out.len());
            out[..n].copy_from_slice(&frame[..n]);
            out[n..].fill(IDLE_BYTE);
            n
        })
    }
}

/// Storage for the inbound queue and the response slot.
///
/// `Q` is the queue size; it holds up to `Q - 1` frames.
pub struct BusLink<const Q: usize> {
    queue: Queue<RawFrame, Q>,
    slot: ResponseSlot,
}

impl<const Q: usize> fmt::Debug for BusLink<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLink")
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl<const Q: usize> Default for BusLink<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const Q: usize> BusLink<Q> {
    /// Creates an empty link.
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            slot: ResponseSlot::new(),
        }
    }

    /// Splits the link into the callback half and the main loop half.
    pub fn split(&mut self) -> (BusEndpoint<'_, Q>, Mailbox<'_, Q>) {
        let Self { queue, slot } = self;
        let slot: &ResponseSlot = slot;
        let (producer, consumer) = queue.split();
        (
            BusEndpoint {
                producer,
                slot,
                dropped: 0,
            },
            Mailbox { consumer, slot },
        )
    }
}

/// The half of a [`BusLink`] driven by the bus callbacks.
pub struct BusEndpoint<'a, const Q: usize> {
    producer: Producer<'a, RawFrame, Q>,
    slot: &'a ResponseSlot,
    dropped: u16,
}

impl<const Q: usize> fmt::Debug for BusEndpoint<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEndpoint")
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl<const Q: usize> BusEndpoint<'_, Q> {
    /// Handles bytes written by the controller.
    ///
    /// Empty writes are presence probes and are acknowledged without
    /// queueing anything. Any other write invalidates the staged response.
    /// Returns `false` if the frame had to be dropped (too long or queue full).
    pub fn on_receive(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        self.slot.clear();
        let queued = RawFrame::from_slice(bytes)
            .ok()
            .and_then(|frame| self.producer.enqueue(frame).ok())
            .is_some();
        if !queued {
            self.dropped = self.dropped.wrapping_add(1);
        }
        queued
    }

    /// Fills `out` for a read by the controller, see [`ResponseSlot::copy_into`].
    pub fn on_request(&self, out: &mut [u8]) -> usize {
        self.slot.copy_into(out)
    }

    /// Number of frames dropped since the link was split.
    pub fn dropped(&self) -> u16 {
        self.dropped
    }
}

/// The half of a [`BusLink`] owned by the main loop.
pub struct Mailbox<'a, const Q: usize> {
    consumer: Consumer<'a, RawFrame, Q>,
    slot: &'a ResponseSlot,
}

impl<const Q: usize> fmt::Debug for Mailbox<'_, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("pending", &self.consumer.len())
            .finish_non_exhaustive()
    }
}

impl<const Q: usize> Mailbox<'_, Q> {
    /// Takes the oldest received frame.
    pub(crate) fn next_frame(&mut self) -> Option<RawFrame> {
        self.consumer.dequeue()
    }

    /// Stages a response for the next controller read.
    pub(crate) fn publish(&self, bytes: &[u8]) {
        self.slot.publish(bytes);
    }
}
