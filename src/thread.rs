//! Thread control block.

use core::fmt;

use heapless::String;

use crate::config::{self, MAX_THREAD_NAME, NO_DEADLINE};
use crate::platform::ThreadContext;

/// Magic value stamped at TCB creation and checked on every access to
/// [`crate::scheduler::Scheduler::current`]. A mismatch is `OverflowDetected`
/// and panics: it almost always means the thread's stack grew
/// into its own TCB.
pub const TCB_MAGIC: u32 = 0xC0FF_EE42;

/// Unique, monotonically increasing thread identifier.
///
/// Id 0 is reserved for the idle thread, giving callers an unambiguous
/// sentinel to compare against without an `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// The reserved identifier of the idle thread.
    pub const IDLE: ThreadId = ThreadId(0);
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid({})", self.0)
    }
}

/// Thread priority, clamped to `[PRI_MIN, PRI_MAX]` at construction.
///
/// Higher values run first. Immutable for a thread's lifetime except
/// through the scheduler's explicit `set_priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(i32);

impl Priority {
    /// Build a priority, clamping out-of-range values rather than rejecting
    /// them: a caller requesting a priority outside the legal band almost
    /// always means "as high/low as it gets", not a programming error.
    pub fn new(value: i32) -> Self {
        Priority(config::clamp_priority(value))
    }

    /// The default mid-range priority.
    pub const fn default_value() -> Self {
        Priority(config::PRI_DEFAULT)
    }

    /// The raw integer value.
    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::default_value()
    }
}

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Dying,
}

/// Which usage-counter bucket a thread's ticks are attributed to
/// ("increment usage counters (idle/kernel/user) per current thread
/// category").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCategory {
    Idle,
    Kernel,
    User,
}

/// A thread's entry point and the argument passed to it, captured at
/// creation so a real `Platform::prepare_context` can build the bootstrap
/// trampoline frame the platform describes.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    pub function: fn(usize),
    pub arg: usize,
}

/// The thread control block.
///
/// Owns its one-page stack ("a stack pointer and a fixed-size
/// stack (one page, TCB at the page base, stack growing down)"); the
/// scheduler frees this page on reap, never the ready/sleep queues, which
/// only ever hold a [`ThreadId`] back-reference.
pub struct Thread {
    magic: u32,
    id: ThreadId,
    name: String<MAX_THREAD_NAME>,
    state: ThreadState,
    priority: Priority,
    tickets: u32,
    wakeup_tick: u64,
    category: ThreadCategory,
    stack: Option<alloc::boxed::Box<[u8; config::PAGE_SIZE]>>,
    context: ThreadContext,
    entry: EntryPoint,
    /// Opaque instrumentation tag ("perf-identifier slot used only
    /// for instrumentation"). Never read by scheduling decisions.
    pub perf_id: u64,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        name: &str,
        priority: Priority,
        tickets: u32,
        category: ThreadCategory,
        stack: alloc::boxed::Box<[u8; config::PAGE_SIZE]>,
        context: ThreadContext,
        entry: EntryPoint,
    ) -> Self {
        let mut bounded = String::new();
        // Truncate rather than fail: a name is cosmetic, not load-bearing.
        for ch in name.chars().take(MAX_THREAD_NAME) {
            let _ = bounded.push(ch);
        }
        Thread {
            magic: TCB_MAGIC,
            id,
            name: bounded,
            state: ThreadState::Blocked,
            priority,
            tickets: tickets.max(1),
            wakeup_tick: NO_DEADLINE,
            category,
            stack: Some(stack),
            context,
            entry,
            perf_id: 0,
        }
    }

    /// Construct the distinguished idle thread, which owns no heap stack
    /// (the initial thread's page "was not obtained from
    /// the page allocator and is never freed").
    pub(crate) fn new_idle(context: ThreadContext, entry: EntryPoint) -> Self {
        Thread {
            magic: TCB_MAGIC,
            id: ThreadId::IDLE,
            name: String::try_from("idle").unwrap_or_default(),
            state: ThreadState::Running,
            priority: Priority::new(config::PRI_MIN),
            tickets: 1,
            wakeup_tick: NO_DEADLINE,
            category: ThreadCategory::Idle,
            stack: None,
            context,
            entry,
            perf_id: 0,
        }
    }

    /// Panics with an `OverflowDetected` diagnostic if the TCB magic has
    /// been clobbered.
    pub fn check_magic(&self) {
        assert_eq!(
            self.magic, TCB_MAGIC,
            "TCB magic mismatch for {}: stack overflow into TCB suspected",
            self.id
        );
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn tickets(&self) -> u32 {
        self.tickets
    }

    pub fn category(&self) -> ThreadCategory {
        self.category
    }

    pub fn wakeup_tick(&self) -> u64 {
        self.wakeup_tick
    }

    pub(crate) fn set_wakeup_tick(&mut self, tick: u64) {
        self.wakeup_tick = tick;
    }

    pub(crate) fn clear_wakeup_tick(&mut self) {
        self.wakeup_tick = NO_DEADLINE;
    }

    pub fn context(&self) -> &ThreadContext {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut ThreadContext {
        &mut self.context
    }

    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    /// Take ownership of the TCB's stack page, leaving the thread without
    /// one. Called exactly once, by the scheduler reaping a `Dying` thread
    /// from its successor's post-switch hook.
    pub(crate) fn take_stack(&mut self) -> Option<alloc::boxed::Box<[u8; config::PAGE_SIZE]>> {
        self.stack.take()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name.as_str())
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("tickets", &self.tickets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_clamps_out_of_range() {
        assert_eq!(Priority::new(-5).get(), config::PRI_MIN);
        assert_eq!(Priority::new(10_000).get(), config::PRI_MAX);
        assert_eq!(Priority::new(31).get(), 31);
    }

    #[test]
    fn name_truncates_instead_of_panicking() {
        let long = "a".repeat(64);
        let mut s: String<MAX_THREAD_NAME> = String::new();
        for ch in long.chars().take(MAX_THREAD_NAME) {
            let _ = s.push(ch);
        }
        assert_eq!(s.len(), MAX_THREAD_NAME);
    }
}
