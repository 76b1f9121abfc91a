//! Byte arena: fixed-width slot storage consumed by the packed data manager
//!
//! The manager only talks to the arena through [`ByteArena`]. Positional
//! accessors take `&self` so that optimistic readers can decode a slot while
//! a writer holds the value lock; implementations must therefore use interior
//! mutability that tolerates concurrent access (the default [`HeapArena`]
//! stores atomics).
//!
//! Multi-byte values are big-endian.

pub mod bitmap;

use crate::error::{PackError, Result};
use bitmap::SlotBitmap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Creates an arena from (slot width, capacity hint)
pub type ArenaFactory = Arc<dyn Fn(usize, usize) -> Box<dyn ByteArena> + Send + Sync>;

/// Slot allocator over a byte arena
///
/// Contract:
/// - `alloc` returns a slot id that stays valid until `free` or `clear`
/// - bytes added by `resize_slot_width` or by capacity growth read as zero
/// - `resize_slot_width` keeps the first `min(old, new)` bytes of every slot
pub trait ByteArena: Send + Sync + fmt::Debug {
    fn alloc(&mut self) -> Result<usize>;

    fn free(&mut self, slot: usize) -> Result<()>;

    /// Free every slot
    fn clear(&mut self);

    fn slot_width(&self) -> usize;

    fn resize_slot_width(&mut self, new_width: usize);

    /// Number of slots the arena can hold without growing
    fn capacity(&self) -> usize;

    fn used_slots(&self) -> usize;

    fn get_byte(&self, slot: usize, offset: usize) -> u8;

    fn set_byte(&self, slot: usize, offset: usize, value: u8);

    /// Zero every byte of one slot
    fn clear_slot(&self, slot: usize) {
        for offset in 0..self.slot_width() {
            self.set_byte(slot, offset, 0);
        }
    }

    /// Read an unsigned big-endian value of `n` bytes (1..=4)
    fn get_nbytes(&self, slot: usize, offset: usize, n: usize) -> u32 {
        debug_assert!((1..=4).contains(&n));
        (0..n).fold(0u32, |acc, i| {
            (acc << 8) | self.get_byte(slot, offset + i) as u32
        })
    }

    /// Write the low `n` bytes (1..=4) of `value` big-endian
    fn set_nbytes(&self, slot: usize, offset: usize, n: usize, value: u32) {
        debug_assert!((1..=4).contains(&n));
        for i in 0..n {
            let shift = 8 * (n - 1 - i);
            self.set_byte(slot, offset + i, (value >> shift) as u8);
        }
    }

    fn get_int(&self, slot: usize, offset: usize) -> i32 {
        self.get_nbytes(slot, offset, 4) as i32
    }

    fn set_int(&self, slot: usize, offset: usize, value: i32) {
        self.set_nbytes(slot, offset, 4, value as u32);
    }

    fn get_long(&self, slot: usize, offset: usize) -> i64 {
        let high = self.get_nbytes(slot, offset, 4) as u64;
        let low = self.get_nbytes(slot, offset + 4, 4) as u64;
        ((high << 32) | low) as i64
    }

    fn set_long(&self, slot: usize, offset: usize, value: i64) {
        let bits = value as u64;
        self.set_nbytes(slot, offset, 4, (bits >> 32) as u32);
        self.set_nbytes(slot, offset + 4, 4, bits as u32);
    }
}

/// Positional view of one slot
///
/// A plain `Copy` value living on the caller's stack, so each concurrent
/// caller owns its own cursor and no per-call allocation happens.
#[derive(Clone, Copy)]
pub struct SlotCursor<'a> {
    arena: &'a dyn ByteArena,
    slot: usize,
}

impl<'a> SlotCursor<'a> {
    pub fn new(arena: &'a dyn ByteArena, slot: usize) -> Self {
        SlotCursor { arena, slot }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn get_byte(&self, offset: usize) -> u8 {
        self.arena.get_byte(self.slot, offset)
    }

    pub fn set_byte(&self, offset: usize, value: u8) {
        self.arena.set_byte(self.slot, offset, value);
    }

    pub fn get_int(&self, offset: usize) -> i32 {
        self.arena.get_int(self.slot, offset)
    }

    pub fn set_int(&self, offset: usize, value: i32) {
        self.arena.set_int(self.slot, offset, value);
    }

    pub fn get_long(&self, offset: usize) -> i64 {
        self.arena.get_long(self.slot, offset)
    }

    pub fn set_long(&self, offset: usize, value: i64) {
        self.arena.set_long(self.slot, offset, value);
    }

    pub fn get_nbytes(&self, offset: usize, n: usize) -> u32 {
        self.arena.get_nbytes(self.slot, offset, n)
    }

    pub fn set_nbytes(&self, offset: usize, n: usize, value: u32) {
        self.arena.set_nbytes(self.slot, offset, n, value);
    }

    pub fn clear(&self) {
        self.arena.clear_slot(self.slot);
    }
}

impl fmt::Debug for SlotCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotCursor").field("slot", &self.slot).finish()
    }
}

/// Minimum number of slots a growing arena allocates
const MIN_GROWTH: usize = 16;

/// In-memory arena backed by a flat vector of atomic bytes
///
/// Slot ids are tracked by a [`SlotBitmap`]. When every slot is taken the
/// arena doubles its capacity, up to `max_slots` if one is set.
pub struct HeapArena {
    data: Vec<AtomicU8>,
    slot_width: usize,
    slots: SlotBitmap,
    max_slots: Option<usize>,
}

impl HeapArena {
    pub fn new(slot_width: usize, capacity: usize) -> Self {
        HeapArena {
            data: zeroed(slot_width * capacity),
            slot_width,
            slots: SlotBitmap::new(capacity),
            max_slots: None,
        }
    }

    /// Arena that never grows beyond `max_slots`
    pub fn bounded(slot_width: usize, capacity: usize, max_slots: usize) -> Self {
        let capacity = capacity.min(max_slots);
        HeapArena {
            max_slots: Some(max_slots),
            ..HeapArena::new(slot_width, capacity)
        }
    }

    pub fn factory() -> ArenaFactory {
        Arc::new(|width, capacity| Box::new(HeapArena::new(width, capacity)))
    }

    pub fn bounded_factory(max_slots: usize) -> ArenaFactory {
        Arc::new(move |width, capacity| {
            Box::new(HeapArena::bounded(width, capacity, max_slots))
        })
    }

    pub fn is_allocated(&self, slot: usize) -> bool {
        self.slots.is_allocated(slot)
    }

    fn grow(&mut self) -> Result<()> {
        let current = self.slots.total_slots();
        let mut target = (current * 2).max(MIN_GROWTH);
        if let Some(max) = self.max_slots {
            target = target.min(max);
        }
        if target <= current {
            return Err(PackError::OutOfCapacity);
        }

        tracing::debug!(from = current, to = target, "Growing heap arena");
        self.data
            .resize_with(target * self.slot_width, || AtomicU8::new(0));
        self.slots.extend_capacity(target);
        Ok(())
    }

    fn index(&self, slot: usize, offset: usize) -> usize {
        debug_assert!(offset < self.slot_width, "offset {offset} outside slot");
        slot * self.slot_width + offset
    }
}

fn zeroed(len: usize) -> Vec<AtomicU8> {
    (0..len).map(|_| AtomicU8::new(0)).collect()
}

impl ByteArena for HeapArena {
    fn alloc(&mut self) -> Result<usize> {
        match self.slots.allocate_slot() {
            Err(PackError::OutOfCapacity) => {
                self.grow()?;
                self.slots.allocate_slot()
            }
            other => other,
        }
    }

    fn free(&mut self, slot: usize) -> Result<()> {
        self.slots.free_slot(slot)
    }

    fn clear(&mut self) {
        self.slots.clear();
    }

    fn slot_width(&self) -> usize {
        self.slot_width
    }

    fn resize_slot_width(&mut self, new_width: usize) {
        if new_width == self.slot_width {
            return;
        }

        let capacity = self.slots.total_slots();
        let keep = self.slot_width.min(new_width);
        let mut data = zeroed(capacity * new_width);
        for slot in 0..capacity {
            for offset in 0..keep {
                let byte = self.data[slot * self.slot_width + offset].load(Ordering::Relaxed);
                data[slot * new_width + offset] = AtomicU8::new(byte);
            }
        }

        tracing::debug!(
            from = self.slot_width,
            to = new_width,
            slots = capacity,
            "Resized arena slot width"
        );
        self.data = data;
        self.slot_width = new_width;
    }

    fn capacity(&self) -> usize {
        self.slots.total_slots()
    }

    fn used_slots(&self) -> usize {
        self.slots.used_slots()
    }

    fn get_byte(&self, slot: usize, offset: usize) -> u8 {
        self.data[self.index(slot, offset)].load(Ordering::Relaxed)
    }

    fn set_byte(&self, slot: usize, offset: usize, value: u8) {
        self.data[self.index(slot, offset)].store(value, Ordering::Relaxed);
    }
}

impl fmt::Debug for HeapArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapArena")
            .field("slot_width", &self.slot_width)
            .field("capacity", &self.slots.total_slots())
            .field("used", &self.slots.used_slots())
            .field("max_slots", &self.max_slots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_and_long_are_big_endian() {
        let mut arena = HeapArena::new(12, 4);
        let slot = arena.alloc().unwrap();
        let cursor = SlotCursor::new(&arena, slot);

        cursor.set_int(0, 0x0102_0304);
        assert_eq!(cursor.get_byte(0), 0x01);
        assert_eq!(cursor.get_byte(3), 0x04);
        assert_eq!(cursor.get_int(0), 0x0102_0304);

        cursor.set_long(4, i64::MIN + 5);
        assert_eq!(cursor.get_long(4), i64::MIN + 5);
        assert_eq!(cursor.get_byte(4), 0x80);
    }

    #[test]
    fn test_nbytes() {
        let mut arena = HeapArena::new(4, 1);
        let slot = arena.alloc().unwrap();
        let cursor = SlotCursor::new(&arena, slot);

        cursor.set_nbytes(0, 3, 0x00AB_CDEF);
        assert_eq!(cursor.get_nbytes(0, 3), 0x00AB_CDEF);
        assert_eq!(cursor.get_byte(3), 0);

        cursor.set_nbytes(0, 2, 0xFFFF_1234);
        assert_eq!(cursor.get_nbytes(0, 2), 0x1234);
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let mut arena = HeapArena::new(4, 2);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        SlotCursor::new(&arena, a).set_int(0, -1);
        assert_eq!(SlotCursor::new(&arena, b).get_int(0), 0);
    }

    #[test]
    fn test_growth_and_bound() {
        let mut arena = HeapArena::new(2, 1);
        for _ in 0..40 {
            arena.alloc().unwrap();
        }
        assert!(arena.capacity() >= 40);

        let mut bounded = HeapArena::bounded(2, 8, 3);
        assert_eq!(bounded.capacity(), 3);
        for _ in 0..3 {
            bounded.alloc().unwrap();
        }
        assert!(matches!(bounded.alloc(), Err(PackError::OutOfCapacity)));
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut arena = HeapArena::new(4, 4);
        let slot = arena.alloc().unwrap();
        SlotCursor::new(&arena, slot).set_int(0, 77);

        arena.resize_slot_width(6);
        let cursor = SlotCursor::new(&arena, slot);
        assert_eq!(cursor.get_int(0), 77);
        assert_eq!(cursor.get_nbytes(4, 2), 0);

        arena.resize_slot_width(2);
        assert_eq!(SlotCursor::new(&arena, slot).get_nbytes(0, 2), 0);
        assert_eq!(arena.slot_width(), 2);
    }

    #[test]
    fn test_clear_slot_and_free() {
        let mut arena = HeapArena::new(3, 2);
        let slot = arena.alloc().unwrap();
        let cursor = SlotCursor::new(&arena, slot);
        cursor.set_nbytes(0, 3, 0xFF_FFFF);
        cursor.clear();
        assert_eq!(cursor.get_nbytes(0, 3), 0);

        arena.free(slot).unwrap();
        assert_eq!(arena.used_slots(), 0);
        assert_eq!(arena.alloc().unwrap(), slot);
    }
}
