//! `tinysched`: the scheduler and timed-sleep core of a teaching kernel.
//!
//! This crate answers one question, over and over, as cheaply as possible:
//! *which ready thread should own the CPU next?* It also runs a sleep
//! service that parks a thread until a tick deadline and wakes it without
//! scanning anything that isn't due.
//!
//! Everything that is genuinely hardware (the tick source, the low-level
//! register swap, the one-page allocator, interrupt masking) is reached
//! through the [`Platform`] trait (see `platform.rs`) rather than hardcoded,
//! so the scheduler's data structures and decision logic can be exercised on
//! the host. Outside `cargo test` the crate is `no_std` + `alloc`.
#![cfg_attr(not(test), no_std)]
#![allow(clippy::module_inception)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod intr;
pub mod lifecycle;
pub mod lottery;
pub mod platform;
pub mod ready_queue;
pub mod rbtree;
pub mod rng;
pub mod scheduler;
pub mod selector;
pub mod sleep_queue;
pub mod thread;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::SchedError;
pub use platform::Platform;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use selector::Discipline;
pub use thread::{Priority, ThreadId, ThreadState};
