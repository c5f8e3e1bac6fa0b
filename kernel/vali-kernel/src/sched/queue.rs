//! Priority-tiered ready queue with starvation prevention and work
//! stealing (C5).
//!
//! Generalizes the teacher's `ReadyQueues` (`hadron-core::sched`) from
//! three tiers to [`Priority::COUNT`], and from task ids to [`ThreadId`].
//! `pop` always prefers `Realtime`, then alternates between `Normal` and
//! the lower tiers with the same starvation counter the teacher uses: a
//! run of [`BACKGROUND_STARVATION_LIMIT`] consecutive `Normal`-or-higher
//! dispatches forces the next pop to serve `Low`/`Idle` regardless of
//! tier ordering, so a steady stream of interactive work can never fully
//! starve background threads.

extern crate alloc;

use alloc::collections::VecDeque;

use vali_core::id::ThreadId;

use crate::config::BACKGROUND_STARVATION_LIMIT;
use crate::sched::thread::Priority;

/// A single core's run queue, one `VecDeque` per priority tier.
pub struct ReadyQueues {
    tiers: [VecDeque<ThreadId>; Priority::COUNT],
    starvation_counter: u64,
}

impl ReadyQueues {
    /// Creates an empty set of ready queues.
    pub fn new() -> Self {
        Self {
            tiers: core::array::from_fn(|_| VecDeque::new()),
            starvation_counter: 0,
        }
    }

    /// Appends `thread` to the back of its priority tier.
    pub fn push(&mut self, priority: Priority, thread: ThreadId) {
        self.tiers[priority.index()].push_back(thread);
    }

    /// Pops the next thread to run, honoring tier order unless the
    /// starvation counter has reached [`BACKGROUND_STARVATION_LIMIT`], in
    /// which case a non-empty `Low`/`Idle` tier is served instead.
    pub fn pop(&mut self) -> Option<ThreadId> {
        if let Some(t) = self.tiers[Priority::Realtime.index()].pop_front() {
            self.starvation_counter = 0;
            return Some(t);
        }

        if self.starvation_counter >= BACKGROUND_STARVATION_LIMIT {
            for tier in [Priority::Low, Priority::Idle] {
                if let Some(t) = self.tiers[tier.index()].pop_front() {
                    self.starvation_counter = 0;
                    return Some(t);
                }
            }
        }

        if let Some(t) = self.tiers[Priority::Normal.index()].pop_front() {
            self.starvation_counter += 1;
            return Some(t);
        }

        for tier in [Priority::Low, Priority::Idle] {
            if let Some(t) = self.tiers[tier.index()].pop_front() {
                self.starvation_counter = 0;
                return Some(t);
            }
        }
        None
    }

    /// Steals one thread from the back of the lowest-priority non-empty
    /// tier, for a neighboring core's idle loop to pick up. Refuses to
    /// take a victim's sole remaining runnable thread, the same
    /// "one-task rule" the teacher's executor uses to prevent threads
    /// bouncing endlessly between two idle cores.
    pub fn steal_one(&mut self) -> Option<ThreadId> {
        for tier in [Priority::Idle, Priority::Low, Priority::Normal, Priority::Realtime] {
            let queue = &mut self.tiers[tier.index()];
            if queue.len() > 1 {
                return queue.pop_back();
            }
        }
        None
    }

    /// Total runnable threads across every tier.
    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    /// Returns `true` if no tier has a runnable thread.
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Removes a specific thread from whichever tier holds it, e.g. when
    /// a sleeping/blocked thread that was mistakenly left on a ready
    /// queue must be pulled off before rescheduling it. Returns `true` if
    /// it was present.
    pub fn remove(&mut self, thread: ThreadId) -> bool {
        for queue in &mut self.tiers {
            if let Some(pos) = queue.iter().position(|&t| t == thread) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }
}

impl Default for ReadyQueues {
    fn default() -> Self {
        Self::new()
    }
}
