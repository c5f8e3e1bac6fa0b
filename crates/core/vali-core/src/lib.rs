//! Core types and synchronization primitives for the Vali kernel.
//!
//! Host-testable abstractions shared by every other crate in the
//! workspace: address newtypes, resource identifiers, the logging
//! facade, and the locking/wait primitives everything else is built on.
//! None of this module requires a kernel target to compile or test.

#![cfg_attr(not(test), no_std)]
#![feature(negative_impls)]
#![warn(missing_docs)]

extern crate alloc;

pub mod addr;
pub mod error;
pub mod handle;
pub mod id;
pub mod log;
pub mod sync;
