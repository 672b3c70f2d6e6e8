//! Fixed-capacity registry of watched endpoints.
//!
//! Slots `0..len` are always exactly the live entries. Removal swaps the last
//! live entry into the vacated slot and shrinks by one, so an unrelated entry
//! is never dropped or duplicated. The registry performs no I/O.

use mio::Interest;
use mio::event::Event;
use thiserror::Error;

/// Errors returned by [`Registry`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry is full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },

    #[error("slot {index} is not occupied ({len} live slots)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Readiness observed for a slot during the current poll turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub read_closed: bool,
    pub error: bool,
}

impl Readiness {
    /// Folds one readiness event into the flags.
    pub fn observe(&mut self, event: &Event) {
        self.readable |= event.is_readable();
        self.read_closed |= event.is_read_closed();
        self.error |= event.is_error();
    }

    /// `true` when the slot needs servicing this turn.
    ///
    /// Hang-ups and errors count: the following read reports them.
    pub fn is_ready(&self) -> bool {
        self.readable || self.read_closed || self.error
    }
}

/// A watched entry: the handle, what it is watched for, and what was observed.
#[derive(Debug)]
pub struct Slot<T> {
    pub handle: T,
    pub interest: Interest,
    pub readiness: Readiness,
}

/// An ordered, fixed-capacity collection of watched handles.
///
/// # Examples
///
/// ```
/// use pollserve::registry::{Registry, RegistryError};
///
/// let mut registry = Registry::with_capacity(2);
/// assert_eq!(registry.add("a"), Ok(0));
/// assert_eq!(registry.add("b"), Ok(1));
/// assert_eq!(registry.add("c"), Err(RegistryError::CapacityExceeded { capacity: 2 }));
///
/// assert_eq!(registry.remove_at(0), Ok("a"));
/// assert_eq!(registry.get(0).map(|slot| slot.handle), Some("b"));
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
}

impl<T> Registry<T> {
    /// Creates an empty registry that will hold at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `handle` at index `len()`, watched for readability.
    ///
    /// # Errors
    ///
    /// [`RegistryError::CapacityExceeded`] when every slot is occupied; the
    /// handle is dropped.
    pub fn add(&mut self, handle: T) -> Result<usize, RegistryError> {
        if self.is_full() {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.slots.push(Slot {
            handle,
            interest: Interest::READABLE,
            readiness: Readiness::default(),
        });
        Ok(self.slots.len() - 1)
    }

    /// Removes the entry at `index` and returns its handle.
    ///
    /// The entry in the last occupied slot (`len() - 1`) moves into `index`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::IndexOutOfRange`] when `index` is not an occupied slot.
    pub fn remove_at(&mut self, index: usize) -> Result<T, RegistryError> {
        if index >= self.slots.len() {
            return Err(RegistryError::IndexOutOfRange {
                index,
                len: self.slots.len(),
            });
        }
        Ok(self.slots.swap_remove(index).handle)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot<T>> {
        self.slots.get_mut(index)
    }

    /// Index of the first slot whose handle satisfies `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots.iter().position(|slot| pred(&slot.handle))
    }

    /// Iterates live slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot<T>> {
        self.slots.iter()
    }

    /// Clears the observed readiness of every slot.
    pub fn clear_readiness(&mut self) {
        for slot in &mut self.slots {
            slot.readiness = Readiness::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> Registry<usize> {
        let mut registry = Registry::with_capacity(n);
        for i in 0..n {
            assert_eq!(registry.add(i), Ok(i));
        }
        registry
    }

    fn handles(registry: &Registry<usize>) -> Vec<usize> {
        registry.iter().map(|slot| slot.handle).collect()
    }

    #[test]
    fn add_watches_for_readable() {
        let mut registry = Registry::with_capacity(1);
        let index = registry.add(7).unwrap();
        let slot = registry.get(index).unwrap();
        assert_eq!(slot.interest, Interest::READABLE);
        assert!(!slot.readiness.is_ready());
    }

    #[test]
    fn add_fails_at_capacity() {
        let mut registry = filled(3);
        assert!(registry.is_full());
        assert_eq!(
            registry.add(99),
            Err(RegistryError::CapacityExceeded { capacity: 3 })
        );
        assert_eq!(registry.len(), 3);
        assert_eq!(handles(&registry), vec![0, 1, 2]);
    }

    #[test]
    fn remove_swaps_in_last_live_entry() {
        let mut registry = filled(4);
        assert_eq!(registry.remove_at(1), Ok(1));
        assert_eq!(handles(&registry), vec![0, 3, 2]);
    }

    #[test]
    fn remove_last_occupied_slot() {
        let mut registry = filled(4);
        assert_eq!(registry.remove_at(3), Ok(3));
        assert_eq!(handles(&registry), vec![0, 1, 2]);
        assert_eq!(registry.add(9), Ok(3));
        assert_eq!(handles(&registry), vec![0, 1, 2, 9]);
    }

    #[test]
    fn remove_in_partially_filled_registry() {
        let mut registry = Registry::with_capacity(8);
        for i in 0..3 {
            registry.add(i).unwrap();
        }
        assert_eq!(registry.remove_at(2), Ok(2));
        assert_eq!(registry.remove_at(0), Ok(0));
        assert_eq!(handles(&registry), vec![1]);
    }

    #[test]
    fn remove_out_of_range() {
        let mut registry = filled(2);
        assert_eq!(
            registry.remove_at(2),
            Err(RegistryError::IndexOutOfRange { index: 2, len: 2 })
        );
        registry.remove_at(0).unwrap();
        registry.remove_at(0).unwrap();
        assert_eq!(
            registry.remove_at(0),
            Err(RegistryError::IndexOutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn removing_any_slot_keeps_every_other_entry_exactly_once() {
        for capacity in 1..=6 {
            for index in 0..capacity {
                let mut registry = filled(capacity);
                assert_eq!(registry.remove_at(index), Ok(index));
                assert_eq!(registry.len(), capacity - 1);

                let mut remaining = handles(&registry);
                remaining.sort_unstable();
                let expected: Vec<_> = (0..capacity).filter(|&i| i != index).collect();
                assert_eq!(remaining, expected, "capacity {capacity}, removed {index}");
            }
        }
    }

    #[test]
    fn draining_from_the_front_visits_every_entry() {
        let mut registry = filled(5);
        let mut removed = Vec::new();
        while !registry.is_empty() {
            removed.push(registry.remove_at(0).unwrap());
        }
        removed.sort_unstable();
        assert_eq!(removed, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn position_and_clear_readiness() {
        let mut registry = filled(3);
        registry.get_mut(2).unwrap().readiness.readable = true;
        assert_eq!(registry.position(|&h| h == 2), Some(2));
        assert_eq!(registry.position(|&h| h == 5), None);
        registry.clear_readiness();
        assert!(registry.iter().all(|slot| !slot.readiness.is_ready()));
    }
}
