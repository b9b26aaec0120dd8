//! Hashed wheel of buckets with per-timer rotation counters.
//!
//! A timer due at absolute tick `D` lives in bucket `D & mask`. The driver
//! visits that bucket once per revolution before `D`; the rotation counter
//! records how many of those visits to sit out, so storage stays O(timers)
//! however far ahead a timer is scheduled.
//!
//! NOT thread-safe - the wheel wraps it in a mutex.

use std::sync::Arc;

use super::timer::TimerInner;

pub(crate) struct Entry {
    pub timer: Arc<TimerInner>,
    pub deadline_tick: u64,
    pub rotations: u64,
    /// Occurrence number for recurring timers, 0 for one-shot.
    pub occurrence: u64,
}

pub(crate) struct Buckets {
    slots: Vec<Vec<Entry>>,
    mask: u64,
    current_tick: u64,
    len: usize,
}

impl Buckets {
    /// Create `count` buckets, rounded up to a power of two.
    pub fn new(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, Vec::new);
        Self {
            slots,
            mask: count as u64 - 1,
            current_tick: 0,
            len: 0,
        }
    }

    /// Last tick the driver processed.
    pub const fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    /// Timers stored, including cancelled ones not yet swept.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Insert a timer due at `deadline_tick`.
    ///
    /// A deadline at or before the current tick is moved to the next tick.
    pub fn insert(&mut self, timer: Arc<TimerInner>, deadline_tick: u64, occurrence: u64) {
        let deadline_tick = deadline_tick.max(self.current_tick + 1);
        let rotations = (deadline_tick - self.current_tick - 1) / self.slots.len() as u64;
        let index = self.index(deadline_tick);
        self.slots[index].push(Entry {
            timer,
            deadline_tick,
            rotations,
            occurrence,
        });
        self.len += 1;
    }

    /// Advance one tick and move every due entry into `due`.
    ///
    /// Cancelled entries in the visited bucket are dropped.
    pub fn advance(&mut self, due: &mut Vec<Entry>) {
        self.current_tick += 1;
        let index = self.index(self.current_tick);
        let bucket = &mut self.slots[index];

        let mut i = 0;
        while i < bucket.len() {
            if bucket[i].timer.is_finished() {
                bucket.swap_remove(i);
                self.len -= 1;
            } else if bucket[i].rotations > 0 {
                bucket[i].rotations -= 1;
                i += 1;
            } else {
                let entry = bucket.swap_remove(i);
                debug_assert_eq!(entry.deadline_tick, self.current_tick);
                due.push(entry);
                self.len -= 1;
            }
        }
    }

    /// Remove every stored entry.
    pub fn drain_all(&mut self) -> Vec<Entry> {
        self.len = 0;
        self.slots.iter_mut().flat_map(std::mem::take).collect()
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn index(&self, tick: u64) -> usize {
        (tick & self.mask) as usize
    }
}
