//! Fixed-capacity serialization buffer shared by both sides of the bus.
//!
//! A [`FrameBuffer`] is a byte array plus a single cursor used for writing
//! *and* reading. Byte 0 always holds the CRC-8 checksum, so an empty buffer
//! has its cursor at 1. The usual sequences are:
//!
//! - sending: [`reset`](FrameBuffer::reset), [`write`](FrameBuffer::write) the
//!   payload, [`set_crc8`](FrameBuffer::set_crc8), transmit [`as_bytes`](FrameBuffer::as_bytes)
//! - receiving: load the raw bytes, [`check_crc8`](FrameBuffer::check_crc8),
//!   [`reset`](FrameBuffer::reset), [`read`](FrameBuffer::read) the payload
//!
//! Values are stored as their raw little-endian bytes, see [`Wire`].
//!
//! ## Overflow
//!
//! `write` silently drops values that do not fit and `read` yields zero past
//! the written length, which keeps the wire behavior of the protocol. Use
//! [`try_write`](FrameBuffer::try_write) and [`try_read`](FrameBuffer::try_read)
//! where the caller wants to know.

use crate::consts::MAX_FRAME_LEN;
use crate::crc::crc8_maxim;
use crate::error::BufferError;

/// A fixed-width value with a little-endian wire representation.
pub trait Wire: Sized {
    /// Number of bytes on the wire.
    const SIZE: usize;

    /// Writes the value into `out`, which is exactly [`Self::SIZE`] bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Reads a value from `bytes`, which is exactly [`Self::SIZE`] bytes long.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire {
    ($($t:ty),*) => {
        $(
            impl Wire for $t {
                const SIZE: usize = size_of::<$t>();

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire!(u8, i8, u16, i16, u32, i32, f32);

impl Wire for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Byte buffer with a read/write cursor and a leading CRC-8 slot.
///
/// `N` is the capacity including the checksum byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer<const N: usize = MAX_FRAME_LEN> {
    buf: [u8; N],
    /// Next position to write to or read from.
    idx: usize,
    /// End of the valid content (written or received).
    len: usize,
}

/// The buffer size used on the bus.
pub type Frame = FrameBuffer<MAX_FRAME_LEN>;

impl<const N: usize> Default for FrameBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameBuffer<N> {
    /// Creates an empty buffer with the cursor behind the checksum slot.
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            idx: 1,
            len: 1,
        }
    }

    /// Creates a buffer holding a received frame, checksum included.
    ///
    /// Bytes beyond the capacity are dropped. The cursor is placed at the end
    /// of the content so [`check_crc8`](Self::check_crc8) covers all of it.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut frame = Self::new();
        let n = bytes.len().min(N);
        frame.buf[..n].copy_from_slice(&bytes[..n]);
        frame.idx = n;
        frame.len = n;
        frame
    }

    /// Rewinds the cursor to the first payload byte without touching the contents.
    pub fn reset(&mut self) {
        self.idx = 1;
    }

    /// Total capacity in bytes, checksum included.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.idx
    }

    /// Number of payload bytes left to read behind the cursor.
    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.idx)
    }

    /// The used part of the buffer, `[crc][payload up to the cursor]`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.idx]
    }

    /// Appends `value`, silently doing nothing if it does not fit.
    pub fn write<T: Wire>(&mut self, value: T) {
        let _ = self.try_write(value);
    }

    /// Appends `value` or reports that it does not fit.
    pub fn try_write<T: Wire>(&mut self, value: T) -> Result<(), BufferError> {
        let end = self.idx + T::SIZE;
        if end > N {
            return Err(BufferError::Overflow {
                needed: T::SIZE,
                available: N.saturating_sub(self.idx),
            });
        }
        value.encode(&mut self.buf[self.idx..end]);
        self.idx = end;
        self.len = end;
        Ok(())
    }

    /// Consumes a value, yielding the type's zero value past the content.
    pub fn read<T: Wire + Default>(&mut self) -> T {
        self.try_read().unwrap_or_default()
    }

    /// Consumes a value or returns `None` if not enough content is left.
    pub fn try_read<T: Wire>(&mut self) -> Option<T> {
        let end = self.idx + T::SIZE;
        if end > self.len {
            return None;
        }
        let value = T::decode(&self.buf[self.idx..end]);
        self.idx = end;
        Some(value)
    }

    /// Computes the CRC-8 over `[1..cursor)` and stores it in byte 0.
    pub fn set_crc8(&mut self) {
        self.buf[0] = self.crc8();
    }

    /// Checks byte 0 against the CRC-8 over `[1..cursor)`.
    pub fn check_crc8(&self) -> bool {
        self.buf[0] == self.crc8()
    }

    fn crc8(&self) -> u8 {
        crc8_maxim(&self.buf[1..self.idx.max(1)])
    }

    /// Prepares the buffer to receive `len` raw bytes, checksum included,
    /// and returns the slice to fill. `len` is clamped to the capacity.
    pub(crate) fn receive_slice(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(N);
        self.idx = len;
        self.len = len;
        &mut self.buf[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_starts_after_crc_slot() {
        let buf = Frame::new();
        assert_eq!(buf.position(), 1);
        assert_eq!(buf.as_bytes().len(), 1);
        assert_eq!(buf.capacity(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_write_read_all_widths() {
        let mut buf = Frame::new();
        buf.write(0xabu8);
        buf.write(-5i8);
        buf.write(true);
        buf.write(0xbeefu16);
        buf.write(-1234i16);
        buf.write(0xdead_beefu32);
        buf.write(-100_000i32);
        buf.write(12.5f32);
        assert_eq!(buf.position(), 1 + 1 + 1 + 1 + 2 + 2 + 4 + 4 + 4);

        buf.reset();
        assert_eq!(buf.read::<u8>(), 0xab);
        assert_eq!(buf.read::<i8>(), -5);
        assert!(buf.read::<bool>());
        assert_eq!(buf.read::<u16>(), 0xbeef);
        assert_eq!(buf.read::<i16>(), -1234);
        assert_eq!(buf.read::<u32>(), 0xdead_beef);
        assert_eq!(buf.read::<i32>(), -100_000);
        assert_eq!(buf.read::<f32>(), 12.5);
    }

    #[test]
    fn test_values_are_little_endian() {
        let mut buf = Frame::new();
        buf.write(1000i32);
        assert_eq!(&buf.as_bytes()[1..], &[0xe8, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn test_overflow_is_silent() {
        let mut buf: FrameBuffer<4> = FrameBuffer::new();
        buf.write(0x0102u16);
        buf.write(0x03040506u32);
        assert_eq!(buf.position(), 3);
        assert_eq!(
            buf.try_write(0u16),
            Err(BufferError::Overflow {
                needed: 2,
                available: 1
            })
        );
        buf.write(7u8);
        assert_eq!(buf.as_bytes(), &[0, 0x02, 0x01, 7]);
    }

    #[test]
    fn test_read_past_content_yields_zero() {
        let mut buf = Frame::new();
        buf.write(9u8);
        buf.reset();
        assert_eq!(buf.read::<u8>(), 9);
        assert_eq!(buf.read::<i32>(), 0);
        assert_eq!(buf.try_read::<u8>(), None);
    }

    #[test]
    fn test_crc_roundtrip_and_single_bit_errors() {
        let mut buf = Frame::new();
        buf.write(10u8);
        buf.write(0u8);
        buf.write(1000i32);
        buf.set_crc8();
        assert!(buf.check_crc8());

        let sent = buf.as_bytes().to_vec();
        for byte in 1..sent.len() {
            for bit in 0..8 {
                let mut corrupted = sent.clone();
                corrupted[byte] ^= 1 << bit;
                let received = Frame::from_bytes(&corrupted);
                assert!(!received.check_crc8(), "undetected flip at {byte}:{bit}");
            }
        }
        assert!(Frame::from_bytes(&sent).check_crc8());
    }

    #[test]
    fn test_reset_keeps_contents() {
        let mut buf = Frame::new();
        buf.write(0x55u8);
        buf.set_crc8();
        let crc = buf.as_bytes()[0];
        buf.reset();
        assert_eq!(buf.read::<u8>(), 0x55);
        assert!(buf.check_crc8());
        assert_eq!(buf.as_bytes()[0], crc);
    }

    #[test]
    fn test_from_bytes_truncates_to_capacity() {
        let raw = [1u8; 8];
        let buf: FrameBuffer<4> = FrameBuffer::from_bytes(&raw);
        assert_eq!(buf.as_bytes().len(), 4);
    }
}
