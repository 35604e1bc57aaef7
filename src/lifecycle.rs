//! Thread creation, exit, and reaping.
//!
//! `create`/`create_lottery` take the ticket count as an explicit parameter
//! rather than stashing it in a scheduler-wide "pending tickets" slot the
//! way the reference design does. That global is a bug
//! magnet (a second `create` before the first reads it clobbers the value)
//! and this crate doesn't reproduce it.

use crate::config::PAGE_SIZE;
use crate::error::SchedError;
use crate::intr::InterruptGuard;
use crate::scheduler::Scheduler;
use crate::thread::{EntryPoint, Priority, Thread, ThreadCategory, ThreadId, ThreadState};

impl Scheduler {
    /// Create a thread at the default (single) ticket count. It starts
    /// BLOCKED; call [`Scheduler::unblock`] to make it runnable.
    pub fn create(&mut self, name: &str, priority: Priority, entry: fn(usize), arg: usize) -> Result<ThreadId, SchedError> {
        self.create_inner(name, priority, 1, entry, arg)
    }

    /// Create a thread with an explicit ticket count for the lottery
    /// discipline. Also starts BLOCKED.
    pub fn create_lottery(
        &mut self,
        name: &str,
        priority: Priority,
        tickets: u32,
        entry: fn(usize),
        arg: usize,
    ) -> Result<ThreadId, SchedError> {
        self.create_inner(name, priority, tickets, entry, arg)
    }

    fn create_inner(
        &mut self,
        name: &str,
        priority: Priority,
        tickets: u32,
        entry: fn(usize),
        arg: usize,
    ) -> Result<ThreadId, SchedError> {
        let _guard = InterruptGuard::enter(self.platform());
        let (slot, id) = self.reserve()?;

        let stack = match self.alloc_page() {
            Ok(stack) => stack,
            Err(err) => {
                self.release_slot(slot);
                return Err(err);
            }
        };
        let stack_top = stack.as_ptr() as usize + PAGE_SIZE;
        let context = self.platform().prepare_context(entry, arg, stack_top);

        let thread = Thread::new(
            id,
            name,
            priority,
            tickets,
            ThreadCategory::User,
            stack,
            context,
            EntryPoint { function: entry, arg },
        );
        self.insert_thread(slot, thread);
        Ok(id)
    }

    /// Move a BLOCKED thread to READY and enqueue it. A no-op if the thread
    /// is not currently BLOCKED (e.g. a double-unblock), since that's always
    /// a caller bug rather than a condition the scheduler should paper over
    /// silently; debug builds catch it.
    pub fn unblock(&mut self, id: ThreadId) {
        let _guard = InterruptGuard::enter(self.platform());
        let Some(thread) = self.thread_mut(id) else {
            return;
        };
        debug_assert_eq!(
            thread.state(),
            ThreadState::Blocked,
            "unblock() called on a thread that wasn't BLOCKED"
        );
        if thread.state() != ThreadState::Blocked {
            return;
        }
        thread.set_state(ThreadState::Ready);
        let (priority, tickets) = (thread.priority(), thread.tickets());
        self.ready_mut().insert(id, priority, tickets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HostPlatform;
    use alloc::boxed::Box;

    fn new_scheduler(seed: u64) -> Scheduler {
        Scheduler::new(Box::new(HostPlatform::new(seed)))
    }

    fn noop(_: usize) {}

    #[test]
    fn create_allocates_a_distinct_id_each_time() {
        let mut s = new_scheduler(1);
        let a = s.create("a", Priority::default(), noop, 0).unwrap();
        let b = s.create("b", Priority::default(), noop, 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(s.lookup(a).unwrap().state(), ThreadState::Blocked);
    }

    #[test]
    fn create_lottery_stores_the_requested_ticket_count() {
        let mut s = new_scheduler(1);
        let a = s.create_lottery("a", Priority::default(), 17, noop, 0).unwrap();
        assert_eq!(s.lookup(a).unwrap().tickets(), 17);
    }

    #[test]
    fn create_fails_once_the_page_allocator_is_exhausted() {
        let platform = HostPlatform::new(1);
        platform.set_page_limit(1);
        let mut s = Scheduler::new(Box::new(platform));
        assert!(s.create("a", Priority::default(), noop, 0).is_ok());
        assert_eq!(
            s.create("b", Priority::default(), noop, 0),
            Err(SchedError::OutOfMemory)
        );
    }

    #[test]
    fn registry_fills_up_to_max_threads_then_reports_out_of_memory() {
        let mut s = new_scheduler(1);
        let mut created = alloc::vec::Vec::new();
        // One slot is already the idle thread.
        for i in 0..(crate::config::MAX_THREADS - 1) {
            created.push(s.create_lottery(&alloc::format!("t{i}"), Priority::default(), 1, noop, 0).unwrap());
        }
        assert_eq!(
            s.create("overflow", Priority::default(), noop, 0),
            Err(SchedError::OutOfMemory)
        );
        assert_eq!(created.len(), crate::config::MAX_THREADS - 1);
    }

    #[test]
    fn unblock_moves_thread_into_ready_queue() {
        let mut s = new_scheduler(1);
        let a = s.create("a", Priority::default(), noop, 0).unwrap();
        s.unblock(a);
        assert_eq!(s.lookup(a).unwrap().state(), ThreadState::Ready);
    }
}
