//! Handle-set event queue (C12): the `poll`/`epoll`-equivalent primitive
//! every blocking wait in this kernel is eventually built from.
//!
//! `vali-kernel`'s `HandleTable` holds an `Arc<HandleSet>` in each
//! subscribed object's weak back-reference list and calls [`HandleSet::notify`]
//! from `mark_activity`; this crate never touches the handle table or the
//! scheduler directly; it only tracks subscriptions and a ready-event
//! queue, and hands back the [`ThreadId`] of one parked waiter for the
//! caller to hand to the scheduler. Deadline/timeout handling needs the
//! time wheel (`vali-kernel`'s `TimeBase`, C8) and so lives one layer up:
//! [`HandleSet::wait_once`] is the non-blocking drain; a blocking `wait`
//! syscall composes it with a `WaitQueue` park/retry loop using
//! `vali-kernel`'s own deadline machinery.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use vali_core::handle::ActivityBits;
use vali_core::id::{HandleId, ObjectId, ThreadId};
use vali_core::sync::{IrqSpinLock, WaitQueue};

/// Reuses [`ActivityBits`] as the set of events a subscription cares about.
pub type EventMask = ActivityBits;

/// Identifies a handle-set, backed by the kernel's global object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HandleSetId(ObjectId);

impl HandleSetId {
    /// Wraps an object table entry as a handle-set id.
    pub const fn new(id: ObjectId) -> Self {
        Self(id)
    }

    /// The backing object identity.
    pub const fn object_id(self) -> ObjectId {
        self.0
    }
}

impl fmt::Display for HandleSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handleset:{}", self.0)
    }
}

/// The operation a `ctrl` call performs on a handle-set's subscription list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSetOp {
    /// Subscribe a handle that is not already in the set.
    Add,
    /// Change an existing subscription's interest mask/user context.
    Modify,
    /// Drop an existing subscription.
    Remove,
}

/// A subscription request passed to [`HandleSet::ctrl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// The handle being subscribed to.
    pub handle: HandleId,
    /// Events this subscription cares about.
    pub interest: EventMask,
    /// Opaque value echoed back in matching [`ReadyEvent`]s.
    pub user_context: u64,
}

/// One delivered event, returned from [`HandleSet::wait_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    /// The handle the event occurred on.
    pub handle: HandleId,
    /// The events that fired (a subset of the subscription's interest).
    pub events: EventMask,
    /// The subscription's opaque user context.
    pub user_context: u64,
}

/// Errors reported by handle-set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSetError {
    /// No subscription exists for the given handle.
    NotFound,
    /// A subscription for this handle already exists (`Add` only).
    AlreadyExists,
    /// An argument was malformed.
    InvalidParameters,
}

impl fmt::Display for HandleSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "no such subscription",
            Self::AlreadyExists => "subscription already exists",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

struct SubscriptionEntry {
    handle: HandleId,
    interest: EventMask,
    user_context: u64,
    /// Bits that have fired but have not yet been delivered (or were
    /// delivered under level semantics and remain set).
    pending: EventMask,
    /// Whether this handle currently has an entry sitting in `ready`.
    queued: bool,
}

struct Inner {
    subscriptions: Vec<SubscriptionEntry>,
    ready: VecDeque<HandleId>,
}

/// A set of handle subscriptions plus the ready-event queue waiters drain.
pub struct HandleSet {
    id: HandleSetId,
    inner: IrqSpinLock<Inner>,
    waiters: WaitQueue,
}

impl HandleSet {
    /// Creates an empty handle-set identified by `id`.
    pub const fn new(id: HandleSetId) -> Self {
        Self {
            id,
            inner: IrqSpinLock::new(Inner {
                subscriptions: Vec::new(),
                ready: VecDeque::new(),
            }),
            waiters: WaitQueue::new(),
        }
    }

    /// This set's identity.
    pub const fn id(&self) -> HandleSetId {
        self.id
    }

    /// The wait queue a blocking `wait` syscall parks the calling thread
    /// on when [`HandleSet::wait_once`] drains nothing.
    pub const fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// Adds, modifies, or removes a subscription.
    pub fn ctrl(&self, op: HandleSetOp, sub: Subscription) -> Result<(), HandleSetError> {
        let mut inner = self.inner.lock();
        let pos = inner.subscriptions.iter().position(|e| e.handle == sub.handle);
        match (op, pos) {
            (HandleSetOp::Add, Some(_)) => Err(HandleSetError::AlreadyExists),
            (HandleSetOp::Add, None) => {
                inner.subscriptions.push(SubscriptionEntry {
                    handle: sub.handle,
                    interest: sub.interest,
                    user_context: sub.user_context,
                    pending: EventMask::empty(),
                    queued: false,
                });
                Ok(())
            }
            (HandleSetOp::Modify, Some(i)) => {
                inner.subscriptions[i].interest = sub.interest;
                inner.subscriptions[i].user_context = sub.user_context;
                Ok(())
            }
            (HandleSetOp::Modify, None) => Err(HandleSetError::NotFound),
            (HandleSetOp::Remove, Some(i)) => {
                inner.subscriptions.remove(i);
                Ok(())
            }
            (HandleSetOp::Remove, None) => Err(HandleSetError::NotFound),
        }
    }

    /// Called by `vali-kernel`'s `HandleTable::mark_activity` when a
    /// subscribed handle's activity bits change. Returns one waiting
    /// thread the caller should hand back to the scheduler, if any.
    pub fn notify(&self, handle: HandleId, bits: EventMask) -> Option<ThreadId> {
        let mut inner = self.inner.lock();
        let mut should_wake = false;
        for entry in &mut inner.subscriptions {
            if entry.handle != handle {
                continue;
            }
            let matched = bits & entry.interest;
            if matched.is_empty() {
                continue;
            }
            entry.pending |= matched;
            if !entry.queued {
                entry.queued = true;
                should_wake = true;
            }
        }
        if should_wake {
            inner.ready.push_back(handle);
        }
        drop(inner);
        if should_wake {
            self.waiters.wake_one()
        } else {
            None
        }
    }

    /// Drains up to `out.len()` ready events without blocking.
    ///
    /// Bits in `poll_mask` are cleared from a delivered handle's pending
    /// word (edge semantics); any remaining pending bits re-queue the
    /// handle at the *back* of the ready list, so a high-frequency handle
    /// cannot monopolize the front of the queue ahead of others (§8
    /// invariant 7).
    pub fn wait_once(&self, out: &mut [ReadyEvent], poll_mask: EventMask) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        let mut delivered = 0;
        let rounds = inner.ready.len();
        for _ in 0..rounds {
            if delivered == out.len() {
                break;
            }
            let Some(handle) = inner.ready.pop_front() else {
                break;
            };
            let Some(entry) = inner.subscriptions.iter_mut().find(|e| e.handle == handle) else {
                // Subscription was removed after this event was queued.
                continue;
            };
            let events = entry.pending;
            entry.pending &= !poll_mask;
            let requeue = !entry.pending.is_empty();
            if !requeue {
                entry.queued = false;
            }
            out[delivered] = ReadyEvent {
                handle,
                events,
                user_context: entry.user_context,
            };
            delivered += 1;
            if requeue {
                inner.ready.push_back(handle);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> HandleSet {
        HandleSet::new(HandleSetId::new(ObjectId::from_parts(0, 0)))
    }

    #[test]
    fn add_then_notify_delivers_matching_bits() {
        let hs = set();
        let h = HandleId::new(1);
        hs.ctrl(HandleSetOp::Add, Subscription { handle: h, interest: ActivityBits::READABLE, user_context: 42 })
            .unwrap();
        hs.notify(h, ActivityBits::READABLE | ActivityBits::WRITABLE);

        let mut out = [ReadyEvent { handle: h, events: ActivityBits::empty(), user_context: 0 }; 4];
        let n = hs.wait_once(&mut out, ActivityBits::READABLE);
        assert_eq!(n, 1);
        assert_eq!(out[0].events, ActivityBits::READABLE);
        assert_eq!(out[0].user_context, 42);
    }

    #[test]
    fn add_twice_is_already_exists() {
        let hs = set();
        let h = HandleId::new(1);
        let sub = Subscription { handle: h, interest: ActivityBits::READABLE, user_context: 0 };
        hs.ctrl(HandleSetOp::Add, sub).unwrap();
        assert_eq!(hs.ctrl(HandleSetOp::Add, sub), Err(HandleSetError::AlreadyExists));
    }

    #[test]
    fn modify_missing_is_not_found() {
        let hs = set();
        let sub = Subscription { handle: HandleId::new(9), interest: ActivityBits::READABLE, user_context: 0 };
        assert_eq!(hs.ctrl(HandleSetOp::Modify, sub), Err(HandleSetError::NotFound));
    }

    #[test]
    fn level_semantics_redeliver_unmasked_bits() {
        let hs = set();
        let h = HandleId::new(1);
        hs.ctrl(
            HandleSetOp::Add,
            Subscription { handle: h, interest: ActivityBits::READABLE | ActivityBits::ERROR, user_context: 0 },
        )
        .unwrap();
        hs.notify(h, ActivityBits::READABLE | ActivityBits::ERROR);

        let mut out = [ReadyEvent { handle: h, events: ActivityBits::empty(), user_context: 0 }; 1];
        // Poll only for READABLE: ERROR should remain pending and re-queue.
        assert_eq!(hs.wait_once(&mut out, ActivityBits::READABLE), 1);
        assert_eq!(out[0].events, ActivityBits::READABLE | ActivityBits::ERROR);

        let n = hs.wait_once(&mut out, ActivityBits::READABLE | ActivityBits::ERROR);
        assert_eq!(n, 1);
        assert_eq!(out[0].events, ActivityBits::ERROR);
    }

    #[test]
    fn notify_with_no_interest_overlap_does_not_queue() {
        let hs = set();
        let h = HandleId::new(1);
        hs.ctrl(HandleSetOp::Add, Subscription { handle: h, interest: ActivityBits::READABLE, user_context: 0 })
            .unwrap();
        assert_eq!(hs.notify(h, ActivityBits::HANGUP), None);
        let mut out = [ReadyEvent { handle: h, events: ActivityBits::empty(), user_context: 0 }; 1];
        assert_eq!(hs.wait_once(&mut out, ActivityBits::READABLE), 0);
    }

    #[test]
    fn removed_subscription_is_skipped_if_already_queued() {
        let hs = set();
        let h = HandleId::new(1);
        hs.ctrl(HandleSetOp::Add, Subscription { handle: h, interest: ActivityBits::READABLE, user_context: 0 })
            .unwrap();
        hs.notify(h, ActivityBits::READABLE);
        hs.ctrl(HandleSetOp::Remove, Subscription { handle: h, interest: ActivityBits::READABLE, user_context: 0 })
            .unwrap();
        let mut out = [ReadyEvent { handle: h, events: ActivityBits::empty(), user_context: 0 }; 1];
        assert_eq!(hs.wait_once(&mut out, ActivityBits::READABLE), 0);
    }
}
