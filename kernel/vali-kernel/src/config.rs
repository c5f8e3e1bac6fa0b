//! Compile-time kernel constants.
//!
//! Mirrors the teacher's `hadron-config`-style constants module: a single
//! place every other module pulls its tunables from, instead of scattering
//! magic numbers across `mm`, `sched`, and `log`.

/// Maximum number of CPUs this build supports; bounds every per-CPU array.
pub const MAX_CPUS: usize = 64;

/// Base page size in bytes, shared with [`vali_core::addr::PAGE_SIZE`].
pub const PAGE_SIZE: u64 = vali_core::addr::PAGE_SIZE;

/// Size of the kernel heap's initial mapping, in bytes.
pub const KERNEL_HEAP_SIZE: u64 = 16 * 1024 * 1024;

/// Upper bound on the buddy pool's largest block size.
pub const BUDDY_MAX_BLOCK: u64 = 4 * 1024 * 1024;

/// Smallest buddy pool block size.
pub const BUDDY_MIN_BLOCK: u64 = 64;

/// Compile-time ceiling on emitted log verbosity (runtime can only lower it).
pub const MAX_LOG_LEVEL: vali_core::log::LogLevel = vali_core::log::LogLevel::Trace;

/// Number of scheduler priority tiers, including the dedicated idle tier.
pub const PRIORITY_COUNT: usize = 4;

/// Quantum length unit; actual quantum is `BASE_QUANTUM_TICKS * (PRIORITY_COUNT - priority)`.
pub const BASE_QUANTUM_TICKS: u64 = 4;

/// Consecutive same-tier dispatches before a `Low`/`Idle` thread is forced
/// onto the CPU, preventing starvation (mirrors the teacher executor's
/// `BACKGROUND_STARVATION_LIMIT`).
pub const BACKGROUND_STARVATION_LIMIT: u64 = 100;

/// Spin iterations `FutexMutex::lock` tries before parking via `futex_wait`.
pub const MUTEX_SPIN_LIMIT: u32 = 100;

/// Number of buckets in the global futex hash table.
pub const FUTEX_BUCKET_COUNT: usize = 256;

/// Consecutive unhandled IRQs on a line before it is masked as spurious.
pub const SPURIOUS_THRESHOLD: u32 = 64;

/// First architectural interrupt vector the kernel may hand out to a
/// driver; vectors below this are reserved for CPU exceptions.
pub const FIRST_ALLOCATABLE_VECTOR: u8 = 32;

/// Last architectural interrupt vector the kernel may hand out; above this
/// is reserved for the local APIC's own housekeeping vectors (spurious,
/// timer, IPIs).
pub const LAST_ALLOCATABLE_VECTOR: u8 = 238;

/// Width of the time base's calibration window, used when a registered
/// clock source's frequency is not known precisely at registration time.
pub const CLOCK_CALIBRATION_WINDOW_MS: u64 = 100;

/// Target build string, surfaced in panic banners and version queries.
pub const TARGET: &str = "x86_64-unknown-vali";

/// Crate version, re-exported from Cargo metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
