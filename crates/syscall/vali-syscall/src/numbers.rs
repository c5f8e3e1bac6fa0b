//! Stable syscall number table.
//!
//! Numbers are grouped the way the table in the external-interfaces
//! section groups them, each group given a 0x100-wide range with room to
//! grow without renumbering a neighboring group.

/// A stable syscall identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    // Process/thread — 0x000..0x100
    /// `thread_create`
    ThreadCreate = 0x000,
    /// `thread_exit`
    ThreadExit = 0x001,
    /// `thread_join`
    ThreadJoin = 0x002,
    /// `thread_detach`
    ThreadDetach = 0x003,
    /// `thread_signal`
    ThreadSignal = 0x004,
    /// `thread_yield`
    ThreadYield = 0x005,
    /// `thread_sleep`
    ThreadSleep = 0x006,
    /// `thread_cookie`
    ThreadCookie = 0x007,

    // Sync — 0x100..0x200
    /// `futex_wait`
    FutexWait = 0x100,
    /// `futex_wake`
    FutexWake = 0x101,
    /// `futex_wake_op`
    FutexWakeOp = 0x102,

    // Memory — 0x200..0x300
    /// `mem_alloc`
    MemAlloc = 0x200,
    /// `mem_free`
    MemFree = 0x201,
    /// `mem_protect`
    MemProtect = 0x202,
    /// `mem_query`
    MemQuery = 0x203,

    // SHM — 0x300..0x400
    /// `shm_create`
    ShmCreate = 0x300,
    /// `shm_export`
    ShmExport = 0x301,
    /// `shm_attach`
    ShmAttach = 0x302,
    /// `shm_map`
    ShmMap = 0x303,
    /// `shm_commit`
    ShmCommit = 0x304,
    /// `shm_unmap`
    ShmUnmap = 0x305,
    /// `shm_detach`
    ShmDetach = 0x306,
    /// `shm_sg_table`
    ShmSgTable = 0x307,

    // Handles — 0x400..0x500
    /// `handle_create`
    HandleCreate = 0x400,
    /// `handle_destroy`
    HandleDestroy = 0x401,
    /// `handle_set_path`
    HandleSetPath = 0x402,
    /// `handle_lookup_path`
    HandleLookupPath = 0x403,
    /// `handle_mark_activity`
    HandleMarkActivity = 0x404,

    // Handle-set — 0x500..0x600
    /// `hset_create`
    HsetCreate = 0x500,
    /// `hset_ctrl`
    HsetCtrl = 0x501,
    /// `hset_wait`
    HsetWait = 0x502,

    // IPC — 0x600..0x700
    /// `ipc_context_create`
    IpcContextCreate = 0x600,
    /// `ipc_send`
    IpcSend = 0x601,
    /// `ipc_recv`
    IpcRecv = 0x602,

    // Interrupts — 0x700..0x800
    /// `interrupt_add`
    InterruptAdd = 0x700,
    /// `interrupt_remove`
    InterruptRemove = 0x701,
    /// `interrupt_ack`
    InterruptAck = 0x702,

    // Time — 0x800..0x900
    /// `clock_tick`
    ClockTick = 0x800,
    /// `clock_freq`
    ClockFreq = 0x801,
    /// `wall_clock`
    WallClock = 0x802,
    /// `sleep`
    Sleep = 0x803,
    /// `stall`
    Stall = 0x804,
}

impl SyscallNumber {
    /// All syscall numbers, in table order, for iteration/testing.
    pub const ALL: &'static [SyscallNumber] = &[
        Self::ThreadCreate,
        Self::ThreadExit,
        Self::ThreadJoin,
        Self::ThreadDetach,
        Self::ThreadSignal,
        Self::ThreadYield,
        Self::ThreadSleep,
        Self::ThreadCookie,
        Self::FutexWait,
        Self::FutexWake,
        Self::FutexWakeOp,
        Self::MemAlloc,
        Self::MemFree,
        Self::MemProtect,
        Self::MemQuery,
        Self::ShmCreate,
        Self::ShmExport,
        Self::ShmAttach,
        Self::ShmMap,
        Self::ShmCommit,
        Self::ShmUnmap,
        Self::ShmDetach,
        Self::ShmSgTable,
        Self::HandleCreate,
        Self::HandleDestroy,
        Self::HandleSetPath,
        Self::HandleLookupPath,
        Self::HandleMarkActivity,
        Self::HsetCreate,
        Self::HsetCtrl,
        Self::HsetWait,
        Self::IpcContextCreate,
        Self::IpcSend,
        Self::IpcRecv,
        Self::InterruptAdd,
        Self::InterruptRemove,
        Self::InterruptAck,
        Self::ClockTick,
        Self::ClockFreq,
        Self::WallClock,
        Self::Sleep,
        Self::Stall,
    ];

    /// Raw numeric value.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Error returned when a raw register value names no syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownSyscall(pub u32);

impl TryFrom<u32> for SyscallNumber {
    type Error = UnknownSyscall;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        SyscallNumber::ALL
            .iter()
            .copied()
            .find(|n| n.as_u32() == value)
            .ok_or(UnknownSyscall(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_number_is_unique() {
        let mut seen = alloc::vec::Vec::new();
        for n in SyscallNumber::ALL {
            let v = n.as_u32();
            assert!(!seen.contains(&v), "duplicate syscall number {v:#x}");
            seen.push(v);
        }
    }

    #[test]
    fn try_from_roundtrips() {
        for n in SyscallNumber::ALL {
            assert_eq!(SyscallNumber::try_from(n.as_u32()), Ok(*n));
        }
    }

    #[test]
    fn unknown_number_is_rejected() {
        assert_eq!(SyscallNumber::try_from(0xffff), Err(UnknownSyscall(0xffff)));
    }

    #[test]
    fn groups_stay_within_their_0x100_window() {
        assert!(SyscallNumber::ThreadCookie.as_u32() < 0x100);
        assert!(SyscallNumber::FutexWakeOp.as_u32() < 0x200);
        assert!(SyscallNumber::Stall.as_u32() < 0x900);
    }
}
