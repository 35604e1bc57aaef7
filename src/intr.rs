//! Scoped interrupt masking.
//!
//! Every mutation of the ready queue, the sleep queue, or the wakeup
//! watermark happens while one of these guards is alive. The guard's `Drop`
//! restores the prior interrupt level on every exit path, including a
//! panic unwinding through it during a test, rather than requiring callers
//! to remember to re-enable interrupts on each early return.

use crate::platform::Platform;

/// RAII interrupt mask. Disables interrupts on construction, restores the
/// previous level on drop.
///
/// Holds a raw pointer rather than `&dyn Platform` on purpose: a borrow
/// held across the guard's `Drop` would stay live (via dropck) for the rest
/// of the enclosing scope, which would poison every later disjoint-field
/// access to the `Scheduler` that constructed it (`thread_mut`, `schedule`,
/// and friends all need their own `&mut self`). Every call site constructs
/// the guard from a reference it already holds — `self.platform.as_ref()` or
/// the `platform()` accessor — and that reference outlives the guard, so
/// the pointer stays valid for the guard's whole life.
pub struct InterruptGuard {
    platform: *const dyn Platform,
    was_enabled: bool,
}

impl InterruptGuard {
    /// Disable interrupts, remembering whether they were enabled.
    pub fn enter(platform: &dyn Platform) -> Self {
        let was_enabled = platform.intr_disable();
        Self {
            platform,
            was_enabled,
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // SAFETY: `platform` was derived from a live `&dyn Platform` in
        // `enter` and the caller that produced that reference (always a
        // `Scheduler`'s boxed `Platform`, never reassigned or moved out of
        // while a guard can be alive) outlives this guard.
        unsafe {
            (*self.platform).intr_restore(self.was_enabled);
        }
    }
}
