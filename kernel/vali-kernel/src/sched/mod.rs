//! Thread table and scheduler (C5).
//!
//! Owns every [`Thread`], one [`ReadyQueues`] per core, and a deadline-
//! ordered sleep list. Kept architecture-agnostic the same way [`crate::mm::vmm`]
//! is: nothing here switches a real CPU context or reads a real per-core
//! "current thread" register — the caller (the kernel's trap/dispatch
//! layer, outside this workspace) supplies the executing [`CpuId`]
//! explicitly to every method that needs one, and owns the actual context
//! switch once [`Scheduler::pick_next`] names the next thread to run.

pub mod queue;
pub mod thread;

pub use queue::ReadyQueues;
pub use thread::{Priority, Thread, ThreadState};

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use vali_core::id::{AddressSpaceId, CpuId, ThreadId};
use vali_core::sync::{IrqSpinLock, WaitQueue};

use crate::error::SchedError;

/// Thread table plus per-core ready queues and a deadline-ordered sleep
/// list, shared by every core.
pub struct Scheduler {
    threads: IrqSpinLock<BTreeMap<u64, Thread>>,
    queues: Vec<IrqSpinLock<ReadyQueues>>,
    /// Threads blocked in `thread_join`, keyed by the target being joined.
    join_waiters: IrqSpinLock<BTreeMap<u64, WaitQueue>>,
    /// Threads parked in `thread_sleep`, ordered by wake deadline.
    sleeping: IrqSpinLock<BTreeMap<u64, Vec<ThreadId>>>,
    next_id: AtomicU64,
    /// The thread [`Self::pick_next`] most recently dispatched on each core,
    /// one entry per core in `queues`' order. `0` (no [`ThreadId`] is ever
    /// born with that value, since `next_id` starts at 1) means the core
    /// has never dispatched anything.
    current: Vec<AtomicU64>,
}

impl Scheduler {
    /// Creates a scheduler with `cpu_count` per-core ready queues.
    pub fn new(cpu_count: usize) -> Self {
        Self {
            threads: IrqSpinLock::new(BTreeMap::new()),
            queues: (0..cpu_count).map(|_| IrqSpinLock::new(ReadyQueues::new())).collect(),
            join_waiters: IrqSpinLock::new(BTreeMap::new()),
            sleeping: IrqSpinLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            current: (0..cpu_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn queue_for(&self, cpu: CpuId) -> &IrqSpinLock<ReadyQueues> {
        &self.queues[cpu.as_usize() % self.queues.len()]
    }

    /// Creates a new thread at `priority`, enqueues it on `home_cpu` (or
    /// `home_cpu` itself if the thread is pinned), and returns its id.
    pub fn create_thread(
        &self,
        address_space: AddressSpaceId,
        name: String,
        priority: Priority,
        pinned_cpu: Option<CpuId>,
        cookie: u64,
        home_cpu: CpuId,
    ) -> ThreadId {
        let id = ThreadId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let thread = Thread::new(id, address_space, name, priority, pinned_cpu, cookie);
        self.threads.lock().insert(id.as_u64(), thread);
        let target = pinned_cpu.unwrap_or(home_cpu);
        self.queue_for(target).lock().push(priority, id);
        id
    }

    /// Enqueues an already-created thread back onto its home/pinned core,
    /// e.g. after a futex wake or handle-set notification returns it.
    pub fn requeue(&self, thread: ThreadId, cpu: CpuId) -> Result<(), SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        t.set_state(ThreadState::Ready);
        let priority = t.priority();
        let target = t.pinned_cpu().unwrap_or(cpu);
        drop(threads);
        self.queue_for(target).lock().push(priority, thread);
        Ok(())
    }

    /// Picks the next thread to run on `cpu`, marking it `Running`.
    pub fn pick_next(&self, cpu: CpuId) -> Option<ThreadId> {
        let id = self.queue_for(cpu).lock().pop().or_else(|| self.steal_for(cpu))?;
        if let Some(t) = self.threads.lock().get_mut(&id.as_u64()) {
            t.set_state(ThreadState::Running);
        }
        self.current[cpu.as_usize() % self.current.len()].store(id.as_u64(), Ordering::Relaxed);
        Some(id)
    }

    /// The thread [`Self::pick_next`] most recently dispatched on `cpu` —
    /// i.e. whichever thread trapped into the kernel on that core. `None`
    /// if that core has never dispatched anything.
    pub fn current(&self, cpu: CpuId) -> Option<ThreadId> {
        let raw = self.current[cpu.as_usize() % self.current.len()].load(Ordering::Relaxed);
        (raw != 0).then(|| ThreadId::new(raw))
    }

    /// The address space `thread` executes in.
    pub fn address_space_of(&self, thread: ThreadId) -> Result<AddressSpaceId, SchedError> {
        let threads = self.threads.lock();
        threads.get(&thread.as_u64()).map(Thread::address_space).ok_or(SchedError::NotFound)
    }

    fn steal_for(&self, cpu: CpuId) -> Option<ThreadId> {
        for (i, queue) in self.queues.iter().enumerate() {
            if i == cpu.as_usize() % self.queues.len() {
                continue;
            }
            if let Some(id) = queue.lock().steal_one() {
                return Some(id);
            }
        }
        None
    }

    /// Marks `thread` exited with `code`, waking every thread blocked in
    /// `thread_join` on it.
    pub fn exit(&self, thread: ThreadId, code: i32) -> Result<(), SchedError> {
        {
            let mut threads = self.threads.lock();
            let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
            t.set_exit_code(code);
        }
        if let Some(wq) = self.join_waiters.lock().get(&thread.as_u64()) {
            wq.wake_all();
        }
        Ok(())
    }

    /// The exit code of an already-exited thread, consumed once (a second
    /// `join` on a reaped thread returns `NotFound` since the entry is
    /// removed).
    pub fn reap(&self, thread: ThreadId) -> Result<i32, SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        if t.state() != ThreadState::Exited {
            return Err(SchedError::InvalidState);
        }
        let code = t.exit_code().expect("exited thread always carries a code");
        threads.remove(&thread.as_u64());
        Ok(code)
    }

    /// Returns `true` once `thread` has exited (join's poll condition).
    pub fn has_exited(&self, thread: ThreadId) -> Result<bool, SchedError> {
        let threads = self.threads.lock();
        let t = threads.get(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        Ok(t.state() == ThreadState::Exited)
    }

    /// Parks `waiter` on `target`'s join wait queue. [`Self::exit`] wakes
    /// everyone parked here once `target` exits; the caller is
    /// responsible for the actual suspend/retry loop (check
    /// [`Self::has_exited`] before parking, to avoid a lost wakeup if
    /// `target` exited between the check and this call).
    pub fn park_for_join(&self, target: ThreadId, waiter: ThreadId) {
        self.join_waiters.lock().entry(target.as_u64()).or_default().enqueue(waiter);
    }

    /// Detaching a thread only removes the bookkeeping that would have
    /// reaped it; an already-exited, now-detached thread is cleaned up
    /// immediately instead of waiting for a `join` that will never come.
    pub fn detach(&self, thread: ThreadId) -> Result<(), SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        if t.state() == ThreadState::Exited {
            threads.remove(&thread.as_u64());
        }
        self.join_waiters.lock().remove(&thread.as_u64());
        Ok(())
    }

    /// Queues `signal` for delivery to `target` at its next suspension
    /// point.
    pub fn signal(&self, target: ThreadId, signal: u32) -> Result<(), SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get_mut(&target.as_u64()).ok_or(SchedError::NotFound)?;
        t.set_pending_signal(signal);
        Ok(())
    }

    /// Takes (clearing) `thread`'s pending signal, if any.
    pub fn take_pending_signal(&self, thread: ThreadId) -> Result<Option<u32>, SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        Ok(t.take_pending_signal())
    }

    /// Marks `thread` blocked (on a futex, handle-set, or IPC wait) and
    /// removes it from whichever ready queue it might still be on.
    pub fn mark_blocked(&self, thread: ThreadId, cpu: CpuId) -> Result<(), SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        t.set_state(ThreadState::Blocked);
        drop(threads);
        self.queue_for(cpu).lock().remove(thread);
        Ok(())
    }

    /// Parks `thread` until `deadline_ticks`, to be woken by
    /// [`Self::wake_sleepers`] once the clock reaches that tick.
    pub fn sleep_until(&self, thread: ThreadId, deadline_ticks: u64) -> Result<(), SchedError> {
        {
            let mut threads = self.threads.lock();
            let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
            t.set_state(ThreadState::Sleeping);
        }
        self.sleeping.lock().entry(deadline_ticks).or_default().push(thread);
        Ok(())
    }

    /// Removes and returns every thread whose sleep deadline has elapsed
    /// by `now_ticks`, ready for the caller to [`Self::requeue`].
    pub fn wake_sleepers(&self, now_ticks: u64) -> Vec<ThreadId> {
        let mut sleeping = self.sleeping.lock();
        let due: Vec<u64> = sleeping.range(..=now_ticks).map(|(&k, _)| k).collect();
        let mut woken = Vec::new();
        for deadline in due {
            if let Some(threads) = sleeping.remove(&deadline) {
                woken.extend(threads);
            }
        }
        woken
    }

    /// Current effective priority of `thread`.
    pub fn priority_of(&self, thread: ThreadId) -> Result<Priority, SchedError> {
        let threads = self.threads.lock();
        threads.get(&thread.as_u64()).map(Thread::priority).ok_or(SchedError::NotFound)
    }

    /// Temporarily boosts `thread`'s priority (priority inheritance: a
    /// high-priority thread is blocked on a resource a lower-priority
    /// thread holds, so the holder is boosted to the waiter's priority
    /// until it releases the resource).
    pub fn boost_priority(&self, thread: ThreadId, priority: Priority) -> Result<(), SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        if priority < t.priority() {
            t.set_priority(priority);
        }
        Ok(())
    }

    /// Restores `thread`'s priority to its original, un-boosted value.
    pub fn restore_priority(&self, thread: ThreadId) -> Result<(), SchedError> {
        let mut threads = self.threads.lock();
        let t = threads.get_mut(&thread.as_u64()).ok_or(SchedError::NotFound)?;
        t.restore_base_priority();
        Ok(())
    }

    /// Total threads tracked (any state), for diagnostics/tests.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu0() -> CpuId {
        CpuId::new(0)
    }

    #[test]
    fn create_then_pick_next_returns_it() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Normal, None, 0, cpu0());
        assert_eq!(sched.pick_next(cpu0()), Some(id));
        assert_eq!(sched.pick_next(cpu0()), None);
    }

    #[test]
    fn exit_then_reap_returns_code() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Normal, None, 0, cpu0());
        sched.exit(id, 7).unwrap();
        assert!(sched.has_exited(id).unwrap());
        assert_eq!(sched.reap(id), Ok(7));
        assert_eq!(sched.reap(id), Err(SchedError::NotFound));
    }

    #[test]
    fn detach_of_exited_thread_reaps_immediately() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Normal, None, 0, cpu0());
        sched.exit(id, 0).unwrap();
        sched.detach(id).unwrap();
        assert_eq!(sched.thread_count(), 0);
    }

    #[test]
    fn signal_is_pending_until_taken() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Normal, None, 0, cpu0());
        sched.signal(id, 9).unwrap();
        assert_eq!(sched.take_pending_signal(id), Ok(Some(9)));
        assert_eq!(sched.take_pending_signal(id), Ok(None));
    }

    #[test]
    fn sleep_wakes_only_once_deadline_reached() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Normal, None, 0, cpu0());
        sched.pick_next(cpu0());
        sched.sleep_until(id, 100).unwrap();
        assert!(sched.wake_sleepers(50).is_empty());
        assert_eq!(sched.wake_sleepers(100), alloc::vec![id]);
        assert!(sched.wake_sleepers(200).is_empty());
    }

    #[test]
    fn priority_inheritance_boosts_then_restores() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Low, None, 0, cpu0());
        sched.boost_priority(id, Priority::Realtime).unwrap();
        assert_eq!(sched.priority_of(id), Ok(Priority::Realtime));
        sched.restore_priority(id).unwrap();
        assert_eq!(sched.priority_of(id), Ok(Priority::Low));
    }

    #[test]
    fn current_tracks_the_last_dispatched_thread() {
        let sched = Scheduler::new(1);
        assert_eq!(sched.current(cpu0()), None);
        let id = sched.create_thread(AddressSpaceId::new(1), String::from("t"), Priority::Normal, None, 0, cpu0());
        sched.pick_next(cpu0());
        assert_eq!(sched.current(cpu0()), Some(id));
    }

    #[test]
    fn address_space_of_reports_the_thread_home_space() {
        let sched = Scheduler::new(1);
        let id = sched.create_thread(AddressSpaceId::new(3), String::from("t"), Priority::Normal, None, 0, cpu0());
        assert_eq!(sched.address_space_of(id), Ok(AddressSpaceId::new(3)));
    }

    #[test]
    fn work_stealing_crosses_cores_when_home_is_empty() {
        let sched = Scheduler::new(2);
        let a = sched.create_thread(AddressSpaceId::new(1), String::from("a"), Priority::Normal, None, 0, CpuId::new(0));
        let b = sched.create_thread(AddressSpaceId::new(1), String::from("b"), Priority::Normal, None, 0, CpuId::new(0));
        let _ = (a, b);
        // Core 1 has nothing of its own; it should steal from core 0.
        assert!(sched.pick_next(CpuId::new(1)).is_some());
    }
}
