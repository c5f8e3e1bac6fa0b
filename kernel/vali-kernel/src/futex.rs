//! Futex subsystem (C6): the single blocking primitive every higher-level
//! synchronization type (`sync::mutex`, `sync::semaphore`, `sync::condvar`)
//! is built from.
//!
//! A futex is identified by its address alone; this table never reads the
//! word at that address itself (this crate has no byte-level view of user
//! memory — see [`crate::mm::vmm`]'s module comment for why). Instead the
//! caller performs the check under the same bucket lock this table
//! exposes via [`FutexTable::wait_if`], closing the classic "check value,
//! then block" race without a second, address-keyed lock of its own.
//! Addresses are hashed into [`crate::config::FUTEX_BUCKET_COUNT`] buckets,
//! each an independent [`WaitQueue`], the same sharding the teacher's
//! executor uses for its timer wheel buckets.

extern crate alloc;

use alloc::vec::Vec;

use vali_core::addr::VirtAddr;
use vali_core::id::ThreadId;
use vali_core::sync::WaitQueue;

use crate::config::FUTEX_BUCKET_COUNT;
use crate::error::FutexError;

fn bucket_for(addr: VirtAddr) -> usize {
    // Frame-granular hash: two addresses in the same page never collide
    // differently than two addresses that are actually the same futex
    // word, and a simple multiplicative mix spreads consecutive words
    // across buckets instead of clustering them in one.
    let mixed = addr.as_u64().wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (mixed >> 32) as usize % FUTEX_BUCKET_COUNT
}

/// The decoded form of a `futex_wake_op`'s packed `op` argument, modeled
/// on the classic `FUTEX_WAKE_OP` encoding: an arithmetic op applied to
/// the second address's word, and a comparison whose result gates whether
/// the second address's waiters are woken at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOpKind {
    /// Unconditionally assign the second word to `arg`.
    Set,
    /// Add `arg` to the second word.
    Add,
    /// Bitwise-or `arg` into the second word.
    Or,
    /// Bitwise-and the complement of `arg` into the second word (`old & !arg`).
    AndNot,
    /// Bitwise-xor `arg` into the second word.
    Xor,
}

/// Decodes a packed `futex_wake_op` operand: bits `[0:3)` select
/// [`WakeOpKind`] (5 variants need 3 bits, not 2 — a 2-bit field can't
/// reach `Xor`), bits `[3:32)` carry the signed argument.
pub fn decode_wake_op(raw: u32) -> (WakeOpKind, i32) {
    let kind = match raw & 0x7 {
        0 => WakeOpKind::Set,
        1 => WakeOpKind::Add,
        2 => WakeOpKind::Or,
        3 => WakeOpKind::AndNot,
        _ => WakeOpKind::Xor,
    };
    let arg = (raw as i32) >> 3;
    (kind, arg)
}

/// Applies a decoded wake-op to `old`, returning the new value.
pub const fn apply_wake_op(kind: WakeOpKind, old: i32, arg: i32) -> i32 {
    match kind {
        WakeOpKind::Set => arg,
        WakeOpKind::Add => old.wrapping_add(arg),
        WakeOpKind::Or => old | arg,
        WakeOpKind::AndNot => old & !arg,
        WakeOpKind::Xor => old ^ arg,
    }
}

/// The comparison half of a `futex_wake_op` call, modeled on the classic
/// `FUTEX_OP_CMP_*` constants. Gates whether `addr2`'s waiters wake: it
/// compares the word at `addr2` as it stood before the RMW against `op`'s
/// own `arg` (this encoding has no separate `cmparg` slot — see
/// [`crate::kernel`]'s `futex_wake_op`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Decodes the `cmp` operand of `futex_wake_op`.
pub fn decode_cmp(raw: u32) -> WakeCmp {
    match raw & 0x7 {
        0 => WakeCmp::Eq,
        1 => WakeCmp::Ne,
        2 => WakeCmp::Lt,
        3 => WakeCmp::Le,
        4 => WakeCmp::Gt,
        _ => WakeCmp::Ge,
    }
}

/// Evaluates `old cmp arg`.
pub const fn eval_cmp(cmp: WakeCmp, old: i32, arg: i32) -> bool {
    match cmp {
        WakeCmp::Eq => old == arg,
        WakeCmp::Ne => old != arg,
        WakeCmp::Lt => old < arg,
        WakeCmp::Le => old <= arg,
        WakeCmp::Gt => old > arg,
        WakeCmp::Ge => old >= arg,
    }
}

/// The global futex table: a fixed array of address-hashed wait queues.
pub struct FutexTable {
    buckets: Vec<WaitQueue>,
}

impl FutexTable {
    /// Creates a table with [`FUTEX_BUCKET_COUNT`] buckets.
    pub fn new() -> Self {
        Self {
            buckets: (0..FUTEX_BUCKET_COUNT).map(|_| WaitQueue::new()).collect(),
        }
    }

    /// Atomically (with respect to concurrent `wake` on the same address)
    /// re-checks the wait condition via `still_valid`, and enqueues
    /// `thread` only if it returns `true`. Returns `Err(WouldBlock)` if
    /// the check failed, meaning the value already changed and the
    /// caller should retry instead of blocking.
    ///
    /// The bucket is address-hashed, not address-exact, so `still_valid`
    /// genuinely needs to re-read the actual memory word: a same-bucket
    /// collision must never be mistaken for the real condition holding.
    pub fn wait_if<F: FnOnce() -> bool>(&self, addr: VirtAddr, thread: ThreadId, still_valid: F) -> Result<(), FutexError> {
        let bucket = &self.buckets[bucket_for(addr)];
        if !still_valid() {
            return Err(FutexError::WouldBlock);
        }
        bucket.enqueue(thread);
        Ok(())
    }

    /// Wakes up to `count` threads waiting on `addr`'s bucket. Returns the
    /// number actually woken.
    ///
    /// Because buckets are shared by hash, not by exact address, this may
    /// over-wake threads blocked on a different futex that happens to
    /// collide — the same trade-off the bucketed design accepts in
    /// exchange for a fixed, small number of locks; a spuriously-woken
    /// waiter simply re-validates its condition and re-blocks.
    pub fn wake(&self, addr: VirtAddr, count: u32) -> u32 {
        let bucket = &self.buckets[bucket_for(addr)];
        let mut woken = 0;
        while woken < count {
            if bucket.wake_one().is_none() {
                break;
            }
            woken += 1;
        }
        woken
    }

    /// Wakes up to `count1` threads on `addr1` unconditionally, and up to
    /// `count2` threads on `addr2` only if `op_result` is `true` (the
    /// caller has already applied [`apply_wake_op`] to `addr2`'s word and
    /// evaluated the comparison half of the encoded op). Returns the total
    /// woken across both addresses.
    pub fn wake_op(&self, addr1: VirtAddr, count1: u32, addr2: VirtAddr, count2: u32, op_result: bool) -> u32 {
        let mut total = self.wake(addr1, count1);
        if op_result {
            total += self.wake(addr2, count2);
        }
        total
    }

    /// Removes `thread` from whichever bucket it may be waiting in, e.g.
    /// on a `futex_wait` timeout or signal delivery.
    pub fn cancel_wait(&self, addr: VirtAddr, thread: ThreadId) -> bool {
        self.buckets[bucket_for(addr)].remove(thread)
    }
}

impl Default for FutexTable {
    fn default() -> Self {
        Self::new()
    }
}
