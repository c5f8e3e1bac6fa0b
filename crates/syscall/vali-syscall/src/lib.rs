//! The syscall number table and dispatch surface for the Vali kernel.
//!
//! Hand-written rather than generated: the teacher corpus has a DSL
//! macro crate for this (grouped ranges, compile-time uniqueness checks),
//! but pulling in a proc-macro crate for a fixed, already-small table
//! wasn't worth the build-time cost here, so [`numbers::SyscallNumber`]
//! is a plain enum and its invariants (uniqueness, range containment)
//! are checked by ordinary unit tests instead of at compile time.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod args;
pub mod dispatch;
pub mod handler;
pub mod numbers;

pub use args::SyscallArgs;
pub use dispatch::{dispatch, dispatch_typed};
pub use handler::SyscallHandler;
pub use numbers::{SyscallNumber, UnknownSyscall};
