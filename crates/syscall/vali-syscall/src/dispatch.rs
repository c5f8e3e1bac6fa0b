//! Unpacks a raw trap frame and calls through to a [`SyscallHandler`].

use vali_core::addr::VirtAddr;
use vali_core::error::SysError;
use vali_core::id::{HandleId, ThreadId};

use crate::args::SyscallArgs;
use crate::handler::SyscallHandler;
use crate::numbers::{SyscallNumber, UnknownSyscall};

/// Converts a successful call's typed return value into the single
/// register a trap frame carries back to user mode.
trait IntoSyscallReturn {
    fn into_syscall_return(self) -> u64;
}

impl IntoSyscallReturn for () {
    fn into_syscall_return(self) -> u64 {
        0
    }
}
impl IntoSyscallReturn for u64 {
    fn into_syscall_return(self) -> u64 {
        self
    }
}
impl IntoSyscallReturn for u32 {
    fn into_syscall_return(self) -> u64 {
        u64::from(self)
    }
}
impl IntoSyscallReturn for i32 {
    fn into_syscall_return(self) -> u64 {
        u64::from(self as u32)
    }
}
impl IntoSyscallReturn for HandleId {
    fn into_syscall_return(self) -> u64 {
        u64::from(self.as_u32())
    }
}
impl IntoSyscallReturn for ThreadId {
    fn into_syscall_return(self) -> u64 {
        self.as_u64()
    }
}
impl IntoSyscallReturn for VirtAddr {
    fn into_syscall_return(self) -> u64 {
        self.as_u64()
    }
}

/// Dispatches one trap-frame worth of arguments to `handler`.
///
/// Returns `Err(UnknownSyscall)` if `number` does not name a registered
/// call — the caller is expected to have already resolved the raw
/// register into a [`SyscallNumber`] via `TryFrom`; this function exists
/// separately so a caller holding only the raw `u32` can dispatch in one
/// step instead.
pub fn dispatch(
    handler: &dyn SyscallHandler,
    number: u32,
    args: SyscallArgs,
) -> Result<Result<u64, SysError>, UnknownSyscall> {
    let number = SyscallNumber::try_from(number)?;
    Ok(dispatch_typed(handler, number, args))
}

/// Dispatches an already-resolved [`SyscallNumber`] to `handler`.
pub fn dispatch_typed(
    handler: &dyn SyscallHandler,
    number: SyscallNumber,
    args: SyscallArgs,
) -> Result<u64, SysError> {
    use SyscallNumber as N;
    match number {
        N::ThreadCreate => handler
            .thread_create(VirtAddr::new(args.a0), VirtAddr::new(args.a1), args.a2)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ThreadExit => handler
            .thread_exit(args.a0 as i32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ThreadJoin => handler
            .thread_join(ThreadId::new(args.a0))
            .map(IntoSyscallReturn::into_syscall_return),
        N::ThreadDetach => handler
            .thread_detach(ThreadId::new(args.a0))
            .map(IntoSyscallReturn::into_syscall_return),
        N::ThreadSignal => handler
            .thread_signal(ThreadId::new(args.a0), args.a1 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ThreadYield => {
            handler.thread_yield();
            Ok(0)
        }
        N::ThreadSleep => handler
            .thread_sleep(args.a0)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ThreadCookie => Ok(handler.thread_cookie()),

        N::FutexWait => handler
            .futex_wait(VirtAddr::new(args.a0), args.a1 as u32, args.a2)
            .map(IntoSyscallReturn::into_syscall_return),
        N::FutexWake => handler
            .futex_wake(VirtAddr::new(args.a0), args.a1 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::FutexWakeOp => handler
            .futex_wake_op(
                VirtAddr::new(args.a0),
                VirtAddr::new(args.a1),
                args.a2 as u32,
                args.a3 as u32,
                args.a4 as u32,
                args.a5 as u32,
            )
            .map(IntoSyscallReturn::into_syscall_return),

        N::MemAlloc => handler
            .mem_alloc(args.a0, args.a1 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::MemFree => handler
            .mem_free(VirtAddr::new(args.a0), args.a1)
            .map(IntoSyscallReturn::into_syscall_return),
        N::MemProtect => handler
            .mem_protect(VirtAddr::new(args.a0), args.a1, args.a2 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::MemQuery => handler
            .mem_query(VirtAddr::new(args.a0))
            .map(IntoSyscallReturn::into_syscall_return),

        N::ShmCreate => handler
            .shm_create(args.a0, args.a1 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmExport => handler
            .shm_export(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmAttach => handler
            .shm_attach(args.a0)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmMap => handler
            .shm_map(HandleId::new(args.a0 as u32), VirtAddr::new(args.a1))
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmCommit => handler
            .shm_commit(HandleId::new(args.a0 as u32), args.a1, args.a2)
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmUnmap => handler
            .shm_unmap(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmDetach => handler
            .shm_detach(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),
        N::ShmSgTable => handler
            .shm_sg_table(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),

        N::HandleCreate => handler
            .handle_create(args.a0 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::HandleDestroy => handler
            .handle_destroy(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),
        N::HandleSetPath => handler
            .handle_set_path(HandleId::new(args.a0 as u32), VirtAddr::new(args.a1), args.a2)
            .map(IntoSyscallReturn::into_syscall_return),
        N::HandleLookupPath => handler
            .handle_lookup_path(VirtAddr::new(args.a0), args.a1)
            .map(IntoSyscallReturn::into_syscall_return),
        N::HandleMarkActivity => handler
            .handle_mark_activity(HandleId::new(args.a0 as u32), args.a1 as u32)
            .map(IntoSyscallReturn::into_syscall_return),

        N::HsetCreate => handler
            .hset_create()
            .map(IntoSyscallReturn::into_syscall_return),
        N::HsetCtrl => handler
            .hset_ctrl(
                HandleId::new(args.a0 as u32),
                args.a1 as u32,
                HandleId::new(args.a2 as u32),
                args.a3 as u32,
            )
            .map(IntoSyscallReturn::into_syscall_return),
        N::HsetWait => handler
            .hset_wait(HandleId::new(args.a0 as u32), args.a1)
            .map(IntoSyscallReturn::into_syscall_return),

        N::IpcContextCreate => handler
            .ipc_context_create(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),
        N::IpcSend => handler
            .ipc_send(HandleId::new(args.a0 as u32), VirtAddr::new(args.a1), args.a2)
            .map(IntoSyscallReturn::into_syscall_return),
        N::IpcRecv => handler
            .ipc_recv(HandleId::new(args.a0 as u32), VirtAddr::new(args.a1), args.a2)
            .map(IntoSyscallReturn::into_syscall_return),

        N::InterruptAdd => handler
            .interrupt_add(args.a0 as u32, args.a1 as u32)
            .map(IntoSyscallReturn::into_syscall_return),
        N::InterruptRemove => handler
            .interrupt_remove(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),
        N::InterruptAck => handler
            .interrupt_ack(HandleId::new(args.a0 as u32))
            .map(IntoSyscallReturn::into_syscall_return),

        N::ClockTick => Ok(handler.clock_tick(args.a0 as u32)),
        N::ClockFreq => Ok(handler.clock_freq(args.a0 as u32)),
        N::WallClock => Ok(handler.wall_clock()),
        N::Sleep => handler
            .sleep(args.a0)
            .map(IntoSyscallReturn::into_syscall_return),
        N::Stall => {
            handler.stall(args.a0);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture;

    impl SyscallHandler for Fixture {
        fn thread_create(&self, _e: VirtAddr, _s: VirtAddr, _a: u64) -> Result<ThreadId, SysError> {
            Ok(ThreadId::new(7))
        }
        fn thread_exit(&self, _code: i32) -> Result<(), SysError> {
            Ok(())
        }
        fn thread_join(&self, _t: ThreadId) -> Result<i32, SysError> {
            Ok(0)
        }
        fn thread_detach(&self, _t: ThreadId) -> Result<(), SysError> {
            Ok(())
        }
        fn thread_signal(&self, _t: ThreadId, _s: u32) -> Result<(), SysError> {
            Ok(())
        }
        fn thread_yield(&self) {}
        fn thread_sleep(&self, _d: u64) -> Result<(), SysError> {
            Ok(())
        }
        fn thread_cookie(&self) -> u64 {
            42
        }
        fn futex_wait(&self, _a: VirtAddr, _e: u32, _d: u64) -> Result<(), SysError> {
            Err(SysError::Timeout)
        }
        fn futex_wake(&self, _a: VirtAddr, _c: u32) -> Result<u32, SysError> {
            Ok(1)
        }
        fn futex_wake_op(
            &self,
            _a1: VirtAddr,
            _a2: VirtAddr,
            _o: u32,
            _c: u32,
            _c1: u32,
            _c2: u32,
        ) -> Result<u32, SysError> {
            Ok(0)
        }
        fn mem_alloc(&self, _l: u64, _f: u32) -> Result<VirtAddr, SysError> {
            Ok(VirtAddr::new(0x1000))
        }
        fn mem_free(&self, _a: VirtAddr, _l: u64) -> Result<(), SysError> {
            Ok(())
        }
        fn mem_protect(&self, _a: VirtAddr, _l: u64, _f: u32) -> Result<u32, SysError> {
            Ok(0)
        }
        fn mem_query(&self, _a: VirtAddr) -> Result<u32, SysError> {
            Ok(0)
        }
        fn shm_create(&self, _l: u64, _f: u32) -> Result<HandleId, SysError> {
            Ok(HandleId::new(1))
        }
        fn shm_export(&self, _h: HandleId) -> Result<u64, SysError> {
            Ok(0)
        }
        fn shm_attach(&self, _t: u64) -> Result<HandleId, SysError> {
            Ok(HandleId::new(1))
        }
        fn shm_map(&self, _h: HandleId, _a: VirtAddr) -> Result<VirtAddr, SysError> {
            Ok(VirtAddr::zero())
        }
        fn shm_commit(&self, _h: HandleId, _o: u64, _l: u64) -> Result<(), SysError> {
            Ok(())
        }
        fn shm_unmap(&self, _h: HandleId) -> Result<(), SysError> {
            Ok(())
        }
        fn shm_detach(&self, _h: HandleId) -> Result<(), SysError> {
            Ok(())
        }
        fn shm_sg_table(&self, _h: HandleId) -> Result<HandleId, SysError> {
            Ok(HandleId::new(2))
        }
        fn handle_create(&self, _k: u32) -> Result<HandleId, SysError> {
            Ok(HandleId::new(3))
        }
        fn handle_destroy(&self, _h: HandleId) -> Result<(), SysError> {
            Ok(())
        }
        fn handle_set_path(&self, _h: HandleId, _p: VirtAddr, _l: u64) -> Result<(), SysError> {
            Ok(())
        }
        fn handle_lookup_path(&self, _p: VirtAddr, _l: u64) -> Result<HandleId, SysError> {
            Ok(HandleId::new(4))
        }
        fn handle_mark_activity(&self, _h: HandleId, _b: u32) -> Result<(), SysError> {
            Ok(())
        }
        fn hset_create(&self) -> Result<HandleId, SysError> {
            Ok(HandleId::new(5))
        }
        fn hset_ctrl(&self, _h: HandleId, _o: u32, _t: HandleId, _m: u32) -> Result<(), SysError> {
            Ok(())
        }
        fn hset_wait(&self, _h: HandleId, _d: u64) -> Result<HandleId, SysError> {
            Ok(HandleId::new(6))
        }
        fn ipc_context_create(&self, _t: HandleId) -> Result<HandleId, SysError> {
            Ok(HandleId::new(7))
        }
        fn ipc_send(&self, _c: HandleId, _b: VirtAddr, _l: u64) -> Result<(), SysError> {
            Ok(())
        }
        fn ipc_recv(&self, _c: HandleId, _b: VirtAddr, _l: u64) -> Result<u64, SysError> {
            Ok(16)
        }
        fn interrupt_add(&self, _l: u32, _f: u32) -> Result<HandleId, SysError> {
            Ok(HandleId::new(8))
        }
        fn interrupt_remove(&self, _h: HandleId) -> Result<(), SysError> {
            Ok(())
        }
        fn interrupt_ack(&self, _h: HandleId) -> Result<(), SysError> {
            Ok(())
        }
        fn clock_tick(&self, _s: u32) -> u64 {
            123
        }
        fn clock_freq(&self, _s: u32) -> u64 {
            1_000_000
        }
        fn wall_clock(&self) -> u64 {
            0
        }
        fn sleep(&self, _d: u64) -> Result<(), SysError> {
            Ok(())
        }
        fn stall(&self, _n: u64) {}
    }

    #[test]
    fn thread_create_returns_packed_thread_id() {
        let result = dispatch_typed(
            &Fixture,
            SyscallNumber::ThreadCreate,
            SyscallArgs::new(0x2000, 0x3000, 0, 0, 0, 0),
        );
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn futex_wait_propagates_error() {
        let result = dispatch_typed(
            &Fixture,
            SyscallNumber::FutexWait,
            SyscallArgs::default(),
        );
        assert_eq!(result, Err(SysError::Timeout));
    }

    #[test]
    fn unknown_number_is_rejected_before_dispatch() {
        assert!(dispatch(&Fixture, 0xffff, SyscallArgs::default()).is_err());
    }

    #[test]
    fn clock_tick_bypasses_result_wrapping() {
        let result = dispatch(&Fixture, SyscallNumber::ClockTick.as_u32(), SyscallArgs::default());
        assert_eq!(result, Ok(Ok(123)));
    }
}
