//! Compile-time scheduler constants.
//!
//! Values match the reference teaching kernel's own test fixtures: priorities
//! up to 31 appear in the lottery-priority-gate scenario, so `PRI_MAX` and
//! `PRI_DEFAULT` are chosen to keep that band roomy rather than tight.

/// Time-slice quantum, in ticks, before a running thread is considered for
/// preemption.
pub const QUANTUM_TICKS: u32 = 4;

/// Lowest legal priority.
pub const PRI_MIN: i32 = 0;

/// Highest legal priority.
pub const PRI_MAX: i32 = 63;

/// Priority assigned to a thread when none is requested.
pub const PRI_DEFAULT: i32 = 31;

/// Maximum length of a thread name, including no terminator (the name is a
/// `heapless::String`, not a C string).
pub const MAX_THREAD_NAME: usize = 16;

/// Maximum number of same-priority candidates the lottery selector will
/// consider in one draw. Implementers may raise this, but it must stay a
/// compile-time constant.
pub const LOTTERY_CAP: usize = 64;

/// Maximum number of live threads the registry will hold at once.
pub const MAX_THREADS: usize = 64;

/// Size, in bytes, of a thread's stack + TCB page.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel wakeup-tick value meaning "no deadline" / "+infinity".
pub const NO_DEADLINE: u64 = u64::MAX;

/// Clamp a requested priority into `[PRI_MIN, PRI_MAX]`.
pub const fn clamp_priority(p: i32) -> i32 {
    if p < PRI_MIN {
        PRI_MIN
    } else if p > PRI_MAX {
        PRI_MAX
    } else {
        p
    }
}
