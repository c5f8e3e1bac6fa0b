//! Driver-facing resource and clock-source types for the Vali kernel.
//!
//! Defines the resource claim types ([`resource::IoPortRange`],
//! [`resource::MmioRegion`], [`resource::IrqLine`]) the interrupt plumbing
//! and virtual memory manager hand out to drivers, the [`clock::ClockSource`]
//! trait timer drivers implement, and the small [`error::DriverError`]
//! taxonomy. Concrete hardware drivers are out of scope for this crate and
//! for the kernel this workspace builds — it owns only the interface they
//! would be written against.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod clock;
pub mod driver;
pub mod error;
pub mod resource;

pub use clock::{ClockCaps, ClockSource, TimeError};
pub use driver::{DriverInfo, DriverState};
pub use error::DriverError;
pub use resource::{ClaimedResource, IoPortRange, IrqLine, MmioRegion};
