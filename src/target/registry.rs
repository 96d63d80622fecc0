//! Bounded table of attached units.

use heapless::Vec;

/// Fixed-size table mapping unit indices to per-unit state.
///
/// Indices are handed out sequentially by [`attach`](UnitRegistry::attach) and
/// stay valid until [`clear`](UnitRegistry::clear) (i.e. until the target is
/// reset). There is no detach of single units.
#[derive(Debug)]
pub struct UnitRegistry<T, const N: usize> {
    units: Vec<T, N>,
}

impl<T, const N: usize> Default for UnitRegistry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> UnitRegistry<T, N> {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self { units: Vec::new() }
    }

    /// Stores `unit` and returns its index, or `None` if the table is full.
    pub fn attach(&mut self, unit: T) -> Option<u8> {
        let index = self.units.len();
        self.units.push(unit).ok()?;
        Some(index as u8)
    }

    /// The unit at `index`, if attached.
    pub fn get(&self, index: u8) -> Option<&T> {
        self.units.get(usize::from(index))
    }

    /// The unit at `index`, if attached.
    pub fn get_mut(&mut self, index: u8) -> Option<&mut T> {
        self.units.get_mut(usize::from(index))
    }

    /// Number of attached units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// `true` if no unit is attached.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// `true` if another [`attach`](Self::attach) would fail.
    pub fn is_full(&self) -> bool {
        self.units.is_full()
    }

    /// Iterates over `(index, unit)` in attachment order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u8, &mut T)> {
        self.units
            .iter_mut()
            .enumerate()
            .map(|(i, unit)| (i as u8, unit))
    }

    /// Removes all units, handing each one to `release` (last attached first).
    pub fn clear(&mut self, mut release: impl FnMut(T)) {
        while let Some(unit) = self.units.pop() {
            release(unit);
        }
    }
}
