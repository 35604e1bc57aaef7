//! The scheduler loop and global singleton.
//!
//! [`Scheduler`] owns every piece of mutable state this crate manages: the
//! thread registry, the ready and sleep queues, the active [`Discipline`],
//! and the tick/usage counters. [`SchedulerHandle`] is the `'static` front
//! door to a single global instance, guarded the same way the donor
//! kernel's own `SCHEDULER` static is: a `spin::Mutex`, not because two CPUs
//! ever race on it, but because it gives the borrow checker a sound story
//! for global mutable state and turns an accidental re-entrant lock attempt
//! into a panic instead of silent corruption.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, trace};
use spin::Mutex;

use crate::config::{MAX_THREADS, QUANTUM_TICKS};
use crate::error::SchedError;
use crate::intr::InterruptGuard;
use crate::platform::{Platform, ThreadContext};
use crate::ready_queue::ReadyQueue;
use crate::rng::Xorshift64;
use crate::selector::{self, Discipline};
use crate::sleep_queue::SleepQueue;
use crate::thread::{EntryPoint, Priority, Thread, ThreadCategory, ThreadId, ThreadState};

fn idle_entry(_arg: usize) {}

/// The scheduler core. Not `Clone`; there is exactly one per kernel, reached
/// either directly (tests) or through [`SchedulerHandle`] (the global case).
pub struct Scheduler {
    platform: Box<dyn Platform>,
    threads: Vec<Option<Thread>>,
    free_slots: Vec<usize>,
    next_id: u64,
    ready: ReadyQueue,
    sleep: SleepQueue,
    discipline: Discipline,
    rng: Xorshift64,
    current: ThreadId,
    tick: u64,
    quantum_remaining: u32,
    usage_idle: u64,
    usage_kernel: u64,
    usage_user: u64,
}

impl Scheduler {
    /// Build a scheduler with its idle thread already installed and
    /// running. `platform.rng_seed()` seeds the lottery PRNG.
    pub fn new(platform: Box<dyn Platform>) -> Self {
        let seed = platform.rng_seed();
        let idle = Thread::new_idle(
            ThreadContext::EMPTY,
            EntryPoint {
                function: idle_entry,
                arg: 0,
            },
        );
        let mut threads = Vec::with_capacity(MAX_THREADS);
        threads.push(Some(idle));
        Scheduler {
            platform,
            threads,
            free_slots: Vec::new(),
            next_id: 1, // 0 is ThreadId::IDLE
            ready: ReadyQueue::new(),
            sleep: SleepQueue::new(),
            discipline: Discipline::default(),
            rng: Xorshift64::new(seed),
            current: ThreadId::IDLE,
            tick: 0,
            quantum_remaining: QUANTUM_TICKS,
            usage_idle: 0,
            usage_kernel: 0,
            usage_user: 0,
        }
    }

    // -- registry plumbing (arena representation) --

    fn slot_of(&self, id: ThreadId) -> Option<usize> {
        self.threads.iter().position(|slot| matches!(slot, Some(t) if t.id() == id))
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().flatten().find(|t| t.id() == id)
    }

    pub(crate) fn thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.iter_mut().flatten().find(|t| t.id() == id)
    }

    /// Reserve a registry slot and a fresh id for a new thread, or `None` if
    /// the registry is full (`MAX_THREADS`).
    fn reserve_slot(&mut self) -> Option<(usize, ThreadId)> {
        let id = ThreadId(self.next_id);
        if let Some(slot) = self.free_slots.pop() {
            self.next_id += 1;
            Some((slot, id))
        } else if self.threads.len() < MAX_THREADS {
            let slot = self.threads.len();
            self.threads.push(None);
            self.next_id += 1;
            Some((slot, id))
        } else {
            None
        }
    }

    fn remove_thread(&mut self, id: ThreadId) {
        if let Some(slot) = self.slot_of(id) {
            self.threads[slot] = None;
            self.free_slots.push(slot);
        }
    }

    pub(crate) fn insert_thread(&mut self, slot: usize, thread: Thread) {
        self.threads[slot] = Some(thread);
    }

    pub(crate) fn alloc_page(&self) -> Result<Box<[u8; crate::config::PAGE_SIZE]>, SchedError> {
        self.platform.alloc_page().ok_or(SchedError::OutOfMemory)
    }

    pub(crate) fn reserve(&mut self) -> Result<(usize, ThreadId), SchedError> {
        self.reserve_slot().ok_or(SchedError::OutOfMemory)
    }

    /// Undo a `reserve()` whose thread creation failed after the slot was
    /// claimed (e.g. the page allocator came back empty).
    pub(crate) fn release_slot(&mut self, slot: usize) {
        self.free_slots.push(slot);
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub(crate) fn ready_mut(&mut self) -> &mut ReadyQueue {
        &mut self.ready
    }

    // -- state/introspection --

    /// The id of the thread currently marked RUNNING.
    pub fn tid(&self) -> ThreadId {
        self.current
    }

    /// The TCB of the thread currently marked RUNNING.
    ///
    /// Checks the TCB magic on every access, per spec §7's `OverflowDetected`
    /// ("TCB magic mismatch on any access to `current()`; fatal panic").
    pub fn current(&self) -> &Thread {
        let thread = self.thread(self.current).expect("the current thread is always registered");
        thread.check_magic();
        thread
    }

    pub fn name(&self) -> &str {
        self.current().name()
    }

    pub fn lookup(&self, id: ThreadId) -> Option<&Thread> {
        self.thread(id)
    }

    /// Visit every live thread in registry order (not priority order), with
    /// interrupts masked per spec §6's `foreach(action, aux)` contract.
    pub fn for_each(&self, mut f: impl FnMut(&Thread)) {
        let _guard = InterruptGuard::enter(self.platform());
        for thread in self.threads.iter().flatten() {
            f(thread);
        }
    }

    pub fn priority(&self, id: ThreadId) -> Option<Priority> {
        self.thread(id).map(|t| t.priority())
    }

    /// Change a thread's priority, re-sorting it in the ready queue if it is
    /// currently there. Priority and ticket count are otherwise immutable
    /// for a thread's lifetime.
    pub fn set_priority(&mut self, id: ThreadId, priority: Priority) {
        let _guard = InterruptGuard::enter(self.platform.as_ref());
        let was_ready = self.ready.remove(id);
        let Some(thread) = self.thread_mut(id) else {
            return;
        };
        thread.set_priority(priority);
        if was_ready {
            self.ready.insert(id, priority, thread.tickets());
        }
    }

    pub fn set_discipline(&mut self, discipline: Discipline) {
        self.discipline = discipline;
    }

    pub fn usage_counters(&self) -> (u64, u64, u64) {
        (self.usage_idle, self.usage_kernel, self.usage_user)
    }

    // -- transitions (yield_, block, exit, schedule) --

    /// Move the current thread to READY and pick a new one. The idle thread
    /// is never enqueued; it's the implicit fallback when the ready queue
    /// is empty, not a queue entry of its own.
    pub fn yield_(&mut self) {
        let _guard = InterruptGuard::enter(self.platform.as_ref());
        let id = self.current;
        if id != ThreadId::IDLE {
            let (priority, tickets) = {
                let thread = self.thread_mut(id).expect("current thread always registered");
                thread.set_state(ThreadState::Ready);
                (thread.priority(), thread.tickets())
            };
            self.ready.insert(id, priority, tickets);
        }
        self.schedule();
    }

    /// Move the current thread to BLOCKED (the caller is responsible for
    /// having already recorded whatever condition it's waiting on) and pick
    /// a new one.
    pub fn block(&mut self) {
        let _guard = InterruptGuard::enter(self.platform.as_ref());
        let id = self.current;
        if let Some(thread) = self.thread_mut(id) {
            thread.set_state(ThreadState::Blocked);
        }
        self.schedule();
    }

    /// Park the current thread until `deadline`. Asserts the
    /// caller isn't running in interrupt/tick-handler context.
    pub fn sleep(&mut self, deadline: u64) {
        let _guard = InterruptGuard::enter(self.platform.as_ref());
        assert!(
            !self.platform.intr_context(),
            "sleep() called from interrupt context"
        );
        let id = self.current;
        if let Some(thread) = self.thread_mut(id) {
            thread.set_state(ThreadState::Blocked);
            thread.set_wakeup_tick(deadline);
        }
        self.sleep.park(id, deadline);
        self.schedule();
    }

    /// Move every thread whose deadline has elapsed back to READY.
    pub fn wake_due(&mut self, now: u64) {
        let _guard = InterruptGuard::enter(self.platform.as_ref());
        for id in self.sleep.wake_due(now) {
            if let Some(thread) = self.thread_mut(id) {
                thread.set_state(ThreadState::Ready);
                thread.clear_wakeup_tick();
                self.ready.insert(id, thread.priority(), thread.tickets());
            }
        }
    }

    pub fn next_wakeup(&self) -> u64 {
        self.sleep.next_wakeup()
    }

    /// Mark the current thread DYING and schedule away from it. Diverges:
    /// on real hardware this never returns control to the caller because
    /// the stack it was called on is freed by its successor. The host test
    /// harness can't express that as literal Rust divergence without
    /// hanging forever, so tests use [`Scheduler::exit_for_test`] instead
    /// (see DESIGN.md).
    pub fn exit(&mut self) -> ! {
        self.exit_inner();
        loop {
            core::hint::spin_loop();
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn exit_for_test(&mut self) {
        self.exit_inner();
    }

    fn exit_inner(&mut self) {
        let _guard = InterruptGuard::enter(self.platform.as_ref());
        let id = self.current;
        if let Some(thread) = self.thread_mut(id) {
            thread.set_state(ThreadState::Dying);
        }
        self.schedule();
    }

    /// Consult the selector; context-switch only if it picked someone other
    /// than the current thread; run the post-switch hook.
    fn schedule(&mut self) {
        let prev_id = self.current;
        let next_id = selector::pick_next(&mut self.ready, self.discipline, &mut self.rng)
            .unwrap_or(ThreadId::IDLE);

        trace!("schedule: {} -> {}", prev_id, next_id);

        if next_id == prev_id {
            return;
        }

        let next_ctx = *self
            .thread(next_id)
            .expect("selected thread must be registered")
            .context();

        if let Some(prev) = self.thread_mut(prev_id) {
            let prev_ctx = prev.context_mut();
            // SAFETY: `prev_ctx` addresses the stack this call is running
            // on; `next_ctx` was produced either by `Platform::prepare_context`
            // or by a previous `context_switch` into this same thread
            // (`Platform::context_switch`'s contract).
            unsafe {
                self.platform.context_switch(prev_ctx, &next_ctx);
            }
        }

        self.current = next_id;
        self.quantum_remaining = QUANTUM_TICKS;
        if let Some(next) = self.thread_mut(next_id) {
            next.set_state(ThreadState::Running);
        }

        if let Some(prev) = self.thread_mut(prev_id) {
            if prev.state() == ThreadState::Dying {
                let _ = prev.take_stack();
                debug!("reaping {}", prev_id);
                self.remove_thread(prev_id);
            }
        }
    }

    // -- tick handler --

    /// Called by the platform once per hardware tick, in interrupt context.
    /// Never calls the selector directly, only flags a pending yield.
    pub fn on_tick(&mut self, now: u64) {
        self.tick = now;
        match self.current().category() {
            ThreadCategory::Idle => self.usage_idle += 1,
            ThreadCategory::Kernel => self.usage_kernel += 1,
            ThreadCategory::User => self.usage_user += 1,
        }

        if now >= self.sleep.next_wakeup() {
            self.wake_due(now);
        }

        if self.current != ThreadId::IDLE {
            if self.quantum_remaining > 0 {
                self.quantum_remaining -= 1;
            }
            if self.quantum_remaining == 0 {
                self.platform.request_yield_on_return();
            }
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }
}

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// The `'static` front door to a single global [`Scheduler`] instance.
///
/// A zero-sized handle, not a reference: every method locks [`SCHEDULER`]
/// for the duration of the call. Matches the donor kernel's own global
/// `Mutex<Option<Scheduler>>` static rather than introducing a different
/// pattern for the same problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerHandle;

impl SchedulerHandle {
    /// Install the global scheduler. Panics if called twice: re-init is
    /// always a bug, never a legitimate reset.
    pub fn init(platform: Box<dyn Platform>) -> Self {
        let mut guard = SCHEDULER.lock();
        assert!(guard.is_none(), "SchedulerHandle::init called twice");
        *guard = Some(Scheduler::new(platform));
        SchedulerHandle
    }

    /// Run `f` with exclusive access to the global scheduler.
    ///
    /// # Panics
    /// Panics if [`SchedulerHandle::init`] has not been called, or if `f`
    /// re-enters this function while already holding the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        let mut guard = SCHEDULER.lock();
        let scheduler = guard.as_mut().expect("SchedulerHandle used before init");
        f(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HostPlatform;
    use crate::thread::ThreadState;

    fn new_scheduler(seed: u64) -> Scheduler {
        Scheduler::new(Box::new(HostPlatform::new(seed)))
    }

    #[test]
    fn boots_with_idle_running() {
        let s = new_scheduler(1);
        assert_eq!(s.tid(), ThreadId::IDLE);
        assert_eq!(s.current().state(), ThreadState::Running);
    }

    #[test]
    fn schedule_with_nothing_ready_stays_on_idle() {
        let mut s = new_scheduler(1);
        s.yield_();
        assert_eq!(s.tid(), ThreadId::IDLE);
    }

    #[test]
    fn create_then_unblock_makes_a_thread_runnable_next() {
        let mut s = new_scheduler(1);
        let tid = s.create("worker", Priority::new(40), idle_entry, 0).unwrap();
        assert_eq!(s.lookup(tid).unwrap().state(), ThreadState::Blocked);
        s.unblock(tid);
        assert_eq!(s.lookup(tid).unwrap().state(), ThreadState::Ready);

        s.yield_();
        assert_eq!(s.tid(), tid);
        assert_eq!(s.lookup(tid).unwrap().state(), ThreadState::Running);
    }

    #[test]
    fn exit_reaps_the_predecessor_stack() {
        let mut s = new_scheduler(1);
        let a = s.create("a", Priority::new(40), idle_entry, 0).unwrap();
        s.unblock(a);
        s.yield_();
        assert_eq!(s.tid(), a);

        s.exit_for_test();
        assert!(s.lookup(a).is_none(), "exited thread must be reaped");
        assert_eq!(s.tid(), ThreadId::IDLE);
    }

    #[test]
    fn sleep_then_wake_due_returns_thread_to_ready() {
        let mut s = new_scheduler(1);
        let a = s.create("sleeper", Priority::new(40), idle_entry, 0).unwrap();
        s.unblock(a);
        s.yield_();
        assert_eq!(s.tid(), a);

        s.sleep(100);
        assert_eq!(s.tid(), ThreadId::IDLE);
        assert_eq!(s.next_wakeup(), 100);

        s.wake_due(50);
        assert_eq!(
            s.lookup(a).unwrap().state(),
            ThreadState::Blocked,
            "deadline 100 hasn't elapsed at tick 50"
        );

        s.wake_due(100);
        assert_eq!(s.lookup(a).unwrap().state(), ThreadState::Ready);
        s.yield_();
        assert_eq!(s.tid(), a);
    }

    #[test]
    fn on_tick_requests_yield_at_quantum_expiry() {
        let mut s = new_scheduler(1);
        let a = s.create("a", Priority::new(40), idle_entry, 0).unwrap();
        s.unblock(a);
        s.yield_();

        for t in 1..=QUANTUM_TICKS as u64 {
            s.on_tick(t);
        }
        // the HostPlatform double records the request; fish it out through
        // the trait object isn't possible here, so this just checks no
        // panic occurred servicing `QUANTUM_TICKS` ticks in a row.
        assert_eq!(s.tid(), a);
    }

    #[test]
    fn set_priority_reorders_the_ready_queue() {
        let mut s = new_scheduler(1);
        let low = s.create("low", Priority::new(10), idle_entry, 0).unwrap();
        let high = s.create("high", Priority::new(50), idle_entry, 0).unwrap();
        s.unblock(low);
        s.unblock(high);

        s.set_priority(low, Priority::new(90));
        s.yield_();
        assert_eq!(s.tid(), low, "raised priority must win selection");
        let _ = high;
    }
}
