//! Thread control blocks and scheduling priority (C5).
//!
//! `Priority` generalizes the teacher's three-tier `Critical`/`Normal`/
//! `Background` split (`hadron-core::task::Priority`) with a fourth,
//! dedicated `Idle` tier below `Low`, matching [`crate::config::PRIORITY_COUNT`].

extern crate alloc;

use vali_core::id::{AddressSpaceId, CpuId, ThreadId};

/// A thread's scheduling priority tier. Lower-numbered tiers are always
/// preferred by [`crate::sched::queue::ReadyQueues::pop`], subject to the
/// starvation guard on `Low`/`Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    /// Realtime/interrupt-adjacent work; never starved.
    Realtime = 0,
    /// The default tier for ordinary application threads.
    Normal = 1,
    /// Background work; can be starved briefly by `Realtime`/`Normal`.
    Low = 2,
    /// Only runs when nothing else is ready.
    Idle = 3,
}

impl Priority {
    /// Number of priority tiers, matching [`crate::config::PRIORITY_COUNT`].
    pub const COUNT: usize = 4;

    /// Converts a raw tier index, clamping out-of-range values to `Idle`
    /// rather than rejecting them — an out-of-range syscall argument
    /// degrades a thread's scheduling rather than failing outright.
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Realtime,
            1 => Self::Normal,
            2 => Self::Low,
            _ => Self::Idle,
        }
    }

    /// This tier's index into a `[T; Priority::COUNT]` array.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Where a thread currently stands with respect to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// On a ready queue, waiting for a core.
    Ready,
    /// Currently executing on some core.
    Running,
    /// Parked on a futex, handle-set, join, or IPC wait.
    Blocked,
    /// Parked until a deadline tick via `thread_sleep`.
    Sleeping,
    /// Has called `thread_exit` or been torn down; `join` will return
    /// immediately and `detach` is a no-op.
    Exited,
}

/// A single schedulable thread.
pub struct Thread {
    id: ThreadId,
    address_space: AddressSpaceId,
    name: alloc::string::String,
    priority: Priority,
    base_priority: Priority,
    state: ThreadState,
    pinned_cpu: Option<CpuId>,
    pending_signal: Option<u32>,
    exit_code: Option<i32>,
    cookie: u64,
}

impl Thread {
    /// Creates a new thread in [`ThreadState::Ready`] at `priority`.
    pub fn new(
        id: ThreadId,
        address_space: AddressSpaceId,
        name: alloc::string::String,
        priority: Priority,
        pinned_cpu: Option<CpuId>,
        cookie: u64,
    ) -> Self {
        Self {
            id,
            address_space,
            name,
            priority,
            base_priority: priority,
            state: ThreadState::Ready,
            pinned_cpu,
            pending_signal: None,
            exit_code: None,
            cookie,
        }
    }

    /// This thread's identity.
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    /// The address space this thread executes in.
    pub const fn address_space(&self) -> AddressSpaceId {
        self.address_space
    }

    /// The thread's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current effective priority (may differ from [`Self::base_priority`]
    /// under priority inheritance).
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// The priority this thread was created with, restored once it no
    /// longer holds an inheritance-boosting resource.
    pub const fn base_priority(&self) -> Priority {
        self.base_priority
    }

    pub(crate) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub(crate) fn restore_base_priority(&mut self) {
        self.priority = self.base_priority;
    }

    /// Current scheduling state.
    pub const fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    /// The core this thread is pinned to, if any.
    pub const fn pinned_cpu(&self) -> Option<CpuId> {
        self.pinned_cpu
    }

    /// A caller-defined cookie surfaced via `thread_cookie` (e.g. a
    /// thread-local storage base address).
    pub const fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Sets a signal pending delivery at the thread's next suspension
    /// point. Overwrites any previously pending, undelivered signal.
    pub(crate) fn set_pending_signal(&mut self, signal: u32) {
        self.pending_signal = Some(signal);
    }

    /// Takes (clearing) the pending signal, if any.
    pub(crate) fn take_pending_signal(&mut self) -> Option<u32> {
        self.pending_signal.take()
    }

    pub(crate) fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.state = ThreadState::Exited;
    }

    /// The thread's exit code, once it has exited.
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}
