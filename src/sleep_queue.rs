//! Sleep queue and wakeup watermark.
//!
//! The watermark exists purely so the common tick (nothing due yet) costs
//! O(1): compare the clock to the watermark and return, instead of scanning
//! every sleeper on every tick.

use alloc::vec::Vec;

use crate::config::NO_DEADLINE;
use crate::thread::ThreadId;

#[derive(Debug, Default)]
pub struct SleepQueue {
    entries: Vec<(ThreadId, u64)>,
    watermark: u64,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            watermark: NO_DEADLINE,
        }
    }

    /// Add `id` to the set, blocked until `deadline`, and recompute the
    /// watermark.
    pub fn park(&mut self, id: ThreadId, deadline: u64) {
        debug_assert!(
            deadline != NO_DEADLINE,
            "sleep with the +infinity sentinel deadline is rejected"
        );
        self.entries.push((id, deadline));
        self.recompute_watermark();
    }

    /// Remove and return every thread whose deadline has elapsed
    /// (`wakeup_tick <= now`). Recomputes the watermark afterward.
    ///
    /// Ordering among simultaneously-due threads is not guaranteed;
    /// this drains in queue order.
    pub fn wake_due(&mut self, now: u64) -> Vec<ThreadId> {
        let mut due = Vec::new();
        self.entries.retain(|&(id, deadline)| {
            if deadline <= now {
                due.push(id);
                false
            } else {
                true
            }
        });
        if !due.is_empty() {
            self.recompute_watermark();
        }
        due
    }

    /// The minimum wakeup tick across the set, or `NO_DEADLINE` if empty
    /// ("+infinity" when empty).
    pub fn next_wakeup(&self) -> u64 {
        self.watermark
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.entries.iter().any(|&(t, _)| t == id)
    }

    fn recompute_watermark(&mut self) {
        self.watermark = self
            .entries
            .iter()
            .map(|&(_, deadline)| deadline)
            .min()
            .unwrap_or(NO_DEADLINE);
    }
}
