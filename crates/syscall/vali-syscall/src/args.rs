//! Raw register arguments, matching the six-register syscall ABI.

/// The raw argument registers a trap frame hands to the dispatcher.
///
/// Each syscall uses a prefix of these six slots; unused trailing slots
/// are ignored by [`crate::dispatch::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArgs {
    /// First argument register.
    pub a0: u64,
    /// Second argument register.
    pub a1: u64,
    /// Third argument register.
    pub a2: u64,
    /// Fourth argument register.
    pub a3: u64,
    /// Fifth argument register.
    pub a4: u64,
    /// Sixth argument register.
    pub a5: u64,
}

impl SyscallArgs {
    /// Builds a `SyscallArgs` from up to six raw values, zero-filling the rest.
    pub const fn new(a0: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64) -> Self {
        Self {
            a0,
            a1,
            a2,
            a3,
            a4,
            a5,
        }
    }
}
