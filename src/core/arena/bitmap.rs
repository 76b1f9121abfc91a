//! Bitmap slot allocator
//!
//! Tracks free/allocated slot ids with one bit per slot.
//! Allocation is first-fit, so freed ids are handed out again before
//! the bitmap grows.

use crate::error::{PackError, Result};

/// Bitmap allocator for slot ids
///
/// Represents free/allocated state with bits:
/// - 0 = free slot
/// - 1 = allocated slot
#[derive(Debug, Clone)]
pub struct SlotBitmap {
    /// Bitmap words (each word = 64 slots)
    bitmap: Vec<u64>,

    /// Total number of slots tracked
    total_slots: usize,

    /// Number of free slots available
    free_slots: usize,
}

impl SlotBitmap {
    pub fn new(total_slots: usize) -> Self {
        let num_words = total_slots.div_ceil(64);
        SlotBitmap {
            bitmap: vec![0u64; num_words],
            total_slots,
            free_slots: total_slots,
        }
    }

    /// Allocate the lowest free slot id
    pub fn allocate_slot(&mut self) -> Result<usize> {
        if self.free_slots == 0 {
            return Err(PackError::OutOfCapacity);
        }

        for (word_idx, word) in self.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }

            let bit_idx = (!*word).trailing_zeros() as usize;
            let slot_id = word_idx * 64 + bit_idx;
            if slot_id >= self.total_slots {
                break;
            }

            *word |= 1u64 << bit_idx;
            self.free_slots -= 1;
            return Ok(slot_id);
        }

        Err(PackError::OutOfCapacity)
    }

    /// Free a previously allocated slot id
    pub fn free_slot(&mut self, slot_id: usize) -> Result<()> {
        if slot_id >= self.total_slots {
            return Err(PackError::InvalidSlotId(slot_id));
        }

        let word_idx = slot_id / 64;
        let bit_idx = slot_id % 64;

        if (self.bitmap[word_idx] & (1u64 << bit_idx)) == 0 {
            tracing::warn!("Double-free detected for slot {}", slot_id);
            return Ok(());
        }

        self.bitmap[word_idx] &= !(1u64 << bit_idx);
        self.free_slots += 1;
        Ok(())
    }

    pub fn is_allocated(&self, slot_id: usize) -> bool {
        if slot_id >= self.total_slots {
            return false;
        }
        (self.bitmap[slot_id / 64] & (1u64 << (slot_id % 64))) != 0
    }

    /// Extend bitmap capacity to track more slots
    pub fn extend_capacity(&mut self, new_total_slots: usize) {
        if new_total_slots <= self.total_slots {
            return;
        }

        self.bitmap.resize(new_total_slots.div_ceil(64), 0u64);
        self.free_slots += new_total_slots - self.total_slots;
        self.total_slots = new_total_slots;
    }

    /// Mark every slot free
    pub fn clear(&mut self) {
        self.bitmap.iter_mut().for_each(|word| *word = 0);
        self.free_slots = self.total_slots;
    }

    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    pub fn free_slots(&self) -> usize {
        self.free_slots
    }

    pub fn used_slots(&self) -> usize {
        self.total_slots - self.free_slots
    }
}
