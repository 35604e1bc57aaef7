//! Next-thread selection: round-robin or hybrid priority-lottery,
//! chosen by [`Discipline`].

use crate::lottery::{ListScanPool, LotteryPool};
use crate::ready_queue::ReadyQueue;
use crate::rng::Xorshift64;
use crate::thread::ThreadId;

/// Which policy `pick_next` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Always the ready queue's front (highest priority, then ticket count,
    /// then FIFO).
    RoundRobin,
    /// Among threads tied for the highest ready priority, draw a winner
    /// weighted by ticket count.
    Lottery,
}

impl Default for Discipline {
    fn default() -> Self {
        Discipline::RoundRobin
    }
}

/// Select and remove the next thread to run from `ready`, or `None` if it is
/// empty (the caller dispatches idle in that case).
pub fn pick_next(ready: &mut ReadyQueue, discipline: Discipline, rng: &mut Xorshift64) -> Option<ThreadId> {
    match discipline {
        Discipline::RoundRobin => ready.pop_front(),
        Discipline::Lottery => pick_lottery(ready, rng),
    }
}

/// Hybrid lottery draw.
fn pick_lottery(ready: &mut ReadyQueue, rng: &mut Xorshift64) -> Option<ThreadId> {
    let p_star = ready.max_priority()?;

    // The ready queue is sorted (priority desc, tickets desc, FIFO), so the
    // priority-P* band is exactly the leading run of `iter()`.
    let mut pool = ListScanPool::with_capacity(crate::config::LOTTERY_CAP);
    for (id, priority, tickets) in ready.iter() {
        if priority != p_star || pool.len() >= crate::config::LOTTERY_CAP {
            break;
        }
        pool.insert(id, tickets);
    }

    if pool.is_empty() || pool.total() == 0 {
        return ready.pop_front();
    }

    let r = rng.next_in_range_inclusive(pool.total());
    let winner = pool.pick(r).expect("r is in 1..=total by construction");
    let removed = ready.remove(winner);
    debug_assert!(removed, "lottery winner must have come from the ready queue");
    Some(winner)
}
