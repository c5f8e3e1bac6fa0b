//! The one-method-per-syscall trait the kernel implements.
//!
//! Methods take typed arguments (newtypes from `vali_core`, not raw
//! registers) — [`crate::dispatch::dispatch`] is the layer that unpacks a
//! [`crate::args::SyscallArgs`] trap frame into these.

use vali_core::addr::VirtAddr;
use vali_core::error::SysError;
use vali_core::id::{HandleId, ThreadId};

/// Implemented by whatever owns kernel state and can service a syscall.
///
/// Kept object-safe (no generics, no `async fn`) so the kernel can hold a
/// single `&dyn SyscallHandler` behind the trap entry point.
pub trait SyscallHandler {
    /// `thread_create`
    fn thread_create(&self, entry: VirtAddr, stack_top: VirtAddr, arg: u64) -> Result<ThreadId, SysError>;
    /// `thread_exit`
    fn thread_exit(&self, code: i32) -> Result<(), SysError>;
    /// `thread_join`
    fn thread_join(&self, target: ThreadId) -> Result<i32, SysError>;
    /// `thread_detach`
    fn thread_detach(&self, target: ThreadId) -> Result<(), SysError>;
    /// `thread_signal`
    fn thread_signal(&self, target: ThreadId, signal: u32) -> Result<(), SysError>;
    /// `thread_yield`
    fn thread_yield(&self);
    /// `thread_sleep`
    fn thread_sleep(&self, deadline_ticks: u64) -> Result<(), SysError>;
    /// `thread_cookie`
    fn thread_cookie(&self) -> u64;

    /// `futex_wait`
    fn futex_wait(&self, addr: VirtAddr, expected: u32, deadline_ticks: u64) -> Result<(), SysError>;
    /// `futex_wake`
    fn futex_wake(&self, addr: VirtAddr, count: u32) -> Result<u32, SysError>;
    /// `futex_wake_op`: wakes up to `count1` threads on `addr1`
    /// unconditionally, applies the packed `op` to `addr2`'s word, and — if
    /// the prior value satisfies `cmp` — also wakes up to `count2` threads
    /// on `addr2`. Returns the total woken across both addresses.
    fn futex_wake_op(
        &self,
        addr1: VirtAddr,
        addr2: VirtAddr,
        op: u32,
        cmp: u32,
        count1: u32,
        count2: u32,
    ) -> Result<u32, SysError>;

    /// `mem_alloc`
    fn mem_alloc(&self, len: u64, flags: u32) -> Result<VirtAddr, SysError>;
    /// `mem_free`
    fn mem_free(&self, addr: VirtAddr, len: u64) -> Result<(), SysError>;
    /// `mem_protect`
    fn mem_protect(&self, addr: VirtAddr, len: u64, flags: u32) -> Result<u32, SysError>;
    /// `mem_query`
    fn mem_query(&self, addr: VirtAddr) -> Result<u32, SysError>;

    /// `shm_create`
    fn shm_create(&self, len: u64, flags: u32) -> Result<HandleId, SysError>;
    /// `shm_export`
    fn shm_export(&self, handle: HandleId) -> Result<u64, SysError>;
    /// `shm_attach`
    fn shm_attach(&self, token: u64) -> Result<HandleId, SysError>;
    /// `shm_map`
    fn shm_map(&self, handle: HandleId, addr_hint: VirtAddr) -> Result<VirtAddr, SysError>;
    /// `shm_commit`
    fn shm_commit(&self, handle: HandleId, offset: u64, len: u64) -> Result<(), SysError>;
    /// `shm_unmap`
    fn shm_unmap(&self, handle: HandleId) -> Result<(), SysError>;
    /// `shm_detach`
    fn shm_detach(&self, handle: HandleId) -> Result<(), SysError>;
    /// `shm_sg_table`
    fn shm_sg_table(&self, handle: HandleId) -> Result<HandleId, SysError>;

    /// `handle_create`
    fn handle_create(&self, kind: u32) -> Result<HandleId, SysError>;
    /// `handle_destroy`
    fn handle_destroy(&self, handle: HandleId) -> Result<(), SysError>;
    /// `handle_set_path`
    fn handle_set_path(&self, handle: HandleId, path_ptr: VirtAddr, path_len: u64) -> Result<(), SysError>;
    /// `handle_lookup_path`
    fn handle_lookup_path(&self, path_ptr: VirtAddr, path_len: u64) -> Result<HandleId, SysError>;
    /// `handle_mark_activity`
    fn handle_mark_activity(&self, handle: HandleId, bits: u32) -> Result<(), SysError>;

    /// `hset_create`
    fn hset_create(&self) -> Result<HandleId, SysError>;
    /// `hset_ctrl`
    fn hset_ctrl(&self, hset: HandleId, op: u32, target: HandleId, mask: u32) -> Result<(), SysError>;
    /// `hset_wait`
    fn hset_wait(&self, hset: HandleId, deadline_ticks: u64) -> Result<HandleId, SysError>;

    /// `ipc_context_create`
    fn ipc_context_create(&self, target: HandleId) -> Result<HandleId, SysError>;
    /// `ipc_send`
    fn ipc_send(&self, ctx: HandleId, buf: VirtAddr, len: u64) -> Result<(), SysError>;
    /// `ipc_recv`
    fn ipc_recv(&self, ctx: HandleId, buf: VirtAddr, len: u64) -> Result<u64, SysError>;

    /// `interrupt_add`
    fn interrupt_add(&self, line: u32, flags: u32) -> Result<HandleId, SysError>;
    /// `interrupt_remove`
    fn interrupt_remove(&self, handle: HandleId) -> Result<(), SysError>;
    /// `interrupt_ack`
    fn interrupt_ack(&self, handle: HandleId) -> Result<(), SysError>;

    /// `clock_tick`
    fn clock_tick(&self, source: u32) -> u64;
    /// `clock_freq`
    fn clock_freq(&self, source: u32) -> u64;
    /// `wall_clock`
    fn wall_clock(&self) -> u64;
    /// `sleep`
    fn sleep(&self, abs_deadline: u64) -> Result<(), SysError>;
    /// `stall`
    fn stall(&self, ns: u64);
}
