//! Error types.
//!
//! Transport failures are never raised as panics. They are returned from each
//! call and additionally counted by the [`Controller`](crate::controller::Controller),
//! so callers own any retry policy.

use core::fmt::Debug;
use thiserror::Error;

/// A failed request/response exchange with a target.
///
/// `E` is the error type of the underlying bus implementation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum TransportError<E: Debug> {
    /// The bus reported that the request could not be delivered.
    #[error("failed to send request: {0:?}")]
    Send(E),
    /// The bus reported that no (complete) response could be read.
    #[error("failed to read response: {0:?}")]
    Receive(E),
    /// A response arrived but its CRC-8 did not match.
    #[error("response checksum mismatch")]
    Checksum,
    /// The expected result does not fit into the frame buffer.
    #[error("result of {expected} bytes does not fit the frame buffer")]
    ResultTooLong {
        /// Requested result length, without the checksum byte.
        expected: usize,
    },
    /// The target answered with its failure sentinel, e.g. a full unit table.
    #[error("request rejected by target")]
    Rejected,
}

/// A typed write that did not fit into a [`FrameBuffer`](crate::buffer::FrameBuffer).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum BufferError {
    /// Not enough room left for the value.
    #[error("buffer overflow: {needed} bytes needed, {available} available")]
    Overflow {
        /// Size of the value being written.
        needed: usize,
        /// Bytes still free behind the cursor.
        available: usize,
    },
}

/// A module could not be registered with a [`Target`](crate::target::Target).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum RegisterError {
    /// The module claims command codes reserved for the transport.
    #[error("command range overlaps the transport commands")]
    Reserved,
    /// The module claims command codes already owned by another module.
    #[error("command range {start}..={end} overlaps a registered module")]
    Overlap {
        /// First code of the rejected range.
        start: u8,
        /// Last code of the rejected range.
        end: u8,
    },
    /// The module table is full.
    #[error("module table is full")]
    Full,
}
