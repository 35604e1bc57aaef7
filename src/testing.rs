//! A [`Platform`] with no hardware underneath it, so the scheduler core can
//! run under `cargo test` on the host.
//!
//! Exposed under `#[cfg(test)]` for this crate's own unit tests, and under
//! the `test-util` feature for integration tests in `tests/`, which link
//! this crate as an ordinary dependency and don't inherit `#[cfg(test)]`.

use alloc::boxed::Box;
use core::cell::Cell;

use crate::config::PAGE_SIZE;
use crate::platform::{Platform, ThreadContext};

/// A platform double that tracks interrupt state, yield requests, and page
/// allocation in plain `Cell`s instead of touching real hardware.
///
/// `context_switch` never actually transfers control. This crate's tests
/// drive thread behavior as a discrete-event simulation (explicit calls into
/// `Scheduler::yield_now`/`sleep`/`exit` standing in for what a thread would
/// do on its own stack), since a host process has no business jumping
/// through an arbitrary saved stack pointer.
pub struct HostPlatform {
    interrupts_enabled: Cell<bool>,
    intr_context: Cell<bool>,
    yield_requested: Cell<bool>,
    seed: u64,
    pages_allocated: Cell<usize>,
    page_limit: Cell<Option<usize>>,
    switch_count: Cell<usize>,
}

impl HostPlatform {
    /// A fresh double with interrupts enabled, no allocation limit, and the
    /// given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            interrupts_enabled: Cell::new(true),
            intr_context: Cell::new(false),
            yield_requested: Cell::new(false),
            seed,
            pages_allocated: Cell::new(0),
            page_limit: Cell::new(None),
            switch_count: Cell::new(0),
        }
    }

    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.interrupts_enabled.set(enabled);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled.get()
    }

    /// Simulate being called from the tick handler, so `sleep_queue::park`
    /// callers can exercise the "called from interrupt context" rejection.
    pub fn set_intr_context(&self, in_intr: bool) {
        self.intr_context.set(in_intr);
    }

    /// Cap the number of pages `alloc_page` will hand out, to exercise the
    /// `OutOfMemory` path without actually exhausting host memory.
    pub fn set_page_limit(&self, limit: usize) {
        self.page_limit.set(Some(limit));
    }

    pub fn pages_allocated(&self) -> usize {
        self.pages_allocated.get()
    }

    pub fn yield_was_requested(&self) -> bool {
        self.yield_requested.get()
    }

    pub fn clear_yield_request(&self) {
        self.yield_requested.set(false);
    }

    pub fn switch_count(&self) -> usize {
        self.switch_count.get()
    }
}

impl Platform for HostPlatform {
    fn alloc_page(&self) -> Option<Box<[u8; PAGE_SIZE]>> {
        if let Some(limit) = self.page_limit.get() {
            if self.pages_allocated.get() >= limit {
                return None;
            }
        }
        self.pages_allocated.set(self.pages_allocated.get() + 1);
        Some(Box::new([0u8; PAGE_SIZE]))
    }

    fn prepare_context(&self, _entry: fn(usize), _arg: usize, stack_top: usize) -> ThreadContext {
        ThreadContext {
            stack_pointer: stack_top,
        }
    }

    unsafe fn context_switch(&self, prev: &mut ThreadContext, next: &ThreadContext) {
        self.switch_count.set(self.switch_count.get() + 1);
        *prev = *next;
    }

    fn intr_disable(&self) -> bool {
        let was_enabled = self.interrupts_enabled.get();
        self.interrupts_enabled.set(false);
        was_enabled
    }

    fn intr_restore(&self, was_enabled: bool) {
        self.interrupts_enabled.set(was_enabled);
    }

    fn intr_context(&self) -> bool {
        self.intr_context.get()
    }

    fn request_yield_on_return(&self) {
        self.yield_requested.set(true);
    }

    fn rng_seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_page_respects_configured_limit() {
        let platform = HostPlatform::new(1);
        platform.set_page_limit(2);
        assert!(platform.alloc_page().is_some());
        assert!(platform.alloc_page().is_some());
        assert!(platform.alloc_page().is_none());
        assert_eq!(platform.pages_allocated(), 2);
    }

    #[test]
    fn intr_disable_reports_prior_state() {
        let platform = HostPlatform::new(0);
        platform.set_interrupts_enabled(true);
        assert!(platform.intr_disable());
        assert!(!platform.interrupts_enabled());
        assert!(!platform.intr_disable());
    }

    #[test]
    fn request_yield_on_return_is_observable_and_clearable() {
        let platform = HostPlatform::new(0);
        assert!(!platform.yield_was_requested());
        platform.request_yield_on_return();
        assert!(platform.yield_was_requested());
        platform.clear_yield_request();
        assert!(!platform.yield_was_requested());
    }
}
