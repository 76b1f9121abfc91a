//! Version stamp for optimistic readers (sequence lock)
//!
//! Writers make the counter odd for the duration of a mutation and even
//! again afterwards. A reader that saw the same even value before and after
//! its read observed no concurrent mutation. Writers must already be
//! serialized by the caller; the stamp only publishes their progress.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{fence, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct VersionStamp {
    seq: CachePadded<AtomicU64>,
}

impl VersionStamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp to validate against later, `None` while a write is in progress
    pub fn read_begin(&self) -> Option<u64> {
        let seq = self.seq.load(Ordering::Acquire);
        (seq & 1 == 0).then_some(seq)
    }

    /// Whether no write started since `stamp` was taken
    pub fn validate(&self, stamp: u64) -> bool {
        fence(Ordering::Acquire);
        self.seq.load(Ordering::Relaxed) == stamp
    }

    /// Mark a write in progress until the returned guard drops
    pub fn write(&self) -> WriteSection<'_> {
        let seq = self.seq.load(Ordering::Relaxed);
        debug_assert!(seq & 1 == 0, "nested write section");
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        WriteSection { stamp: self, seq }
    }

    pub fn current(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

pub struct WriteSection<'a> {
    stamp: &'a VersionStamp,
    seq: u64,
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        self.stamp
            .seq
            .store(self.seq.wrapping_add(2), Ordering::Release);
    }
}
