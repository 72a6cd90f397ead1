//! Bookkeeping of what is currently bound at each native slot.
//!
//! Slots are flat native indices: the logical `(set, binding)` address has
//! already been offset by the resource counts of the lower sets.

use fxhash::FxHashMap;

use crate::BufferAddress;

/// Remembers the value bound at each slot, by identity.
#[derive(Debug)]
pub(crate) struct SlotCache<T> {
    bound: FxHashMap<u32, T>,
}

impl<T> Default for SlotCache<T> {
    fn default() -> Self {
        Self {
            bound: FxHashMap::default(),
        }
    }
}

impl<T: Copy + PartialEq> SlotCache<T> {
    /// Records `value` at `slot`. Returns true if a native bind is needed.
    pub(crate) fn update(&mut self, slot: u32, value: T) -> bool {
        match self.bound.insert(slot, value) {
            Some(old) => old != value,
            None => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, slot: u32) -> Option<T> {
        self.bound.get(&slot).copied()
    }

    pub(crate) fn clear(&mut self) {
        self.bound.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

/// What native call a buffer binding needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BufferBind {
    /// Bind the buffer object and its offset.
    Full,
    /// Same buffer, only move the offset.
    OffsetOnly,
    Unchanged,
}

#[derive(Debug)]
pub(crate) struct BufferSlotCache<B> {
    bound: FxHashMap<u32, (B, BufferAddress)>,
}

impl<B> Default for BufferSlotCache<B> {
    fn default() -> Self {
        Self {
            bound: FxHashMap::default(),
        }
    }
}

impl<B: Copy + PartialEq> BufferSlotCache<B> {
    pub(crate) fn update(&mut self, slot: u32, buffer: B, offset: BufferAddress) -> BufferBind {
        match self.bound.insert(slot, (buffer, offset)) {
            Some((old_buffer, _)) if old_buffer != buffer => BufferBind::Full,
            Some((_, old_offset)) if old_offset != offset => BufferBind::OffsetOnly,
            Some(_) => BufferBind::Unchanged,
            None => BufferBind::Full,
        }
    }

    /// Forgets `slot` after it was overwritten behind the cache's back.
    pub(crate) fn invalidate(&mut self, slot: u32) {
        self.bound.remove(&slot);
    }

    pub(crate) fn clear(&mut self) {
        self.bound.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_cache_skips_identical_binds() {
        let mut cache = SlotCache::default();
        assert!(cache.update(0, 7u64));
        assert!(!cache.update(0, 7));
        assert!(cache.update(0, 8));
        assert!(cache.update(1, 8));
        assert_eq!(cache.get(0), Some(8));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.update(0, 8));
    }

    #[test]
    fn buffer_cache_distinguishes_offset_updates() {
        let mut cache = BufferSlotCache::default();
        assert_eq!(cache.update(3, 1u64, 0), BufferBind::Full);
        assert_eq!(cache.update(3, 1, 0), BufferBind::Unchanged);
        assert_eq!(cache.update(3, 1, 256), BufferBind::OffsetOnly);
        assert_eq!(cache.update(3, 2, 256), BufferBind::Full);
        assert_eq!(cache.update(4, 2, 256), BufferBind::Full);
        cache.invalidate(4);
        assert_eq!(cache.update(4, 2, 256), BufferBind::Full);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.update(3, 2, 256), BufferBind::Full);
    }
}
