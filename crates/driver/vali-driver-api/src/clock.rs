//! The clock-source interface timer drivers implement.
//!
//! Selection policy and calibration live in the kernel's time base; this
//! crate only defines the trait and capability flags a concrete timer
//! (PIT, HPET, TSC, APIC timer, ...) implements to register itself.

use bitflags::bitflags;

bitflags! {
    /// Capabilities a registered [`ClockSource`] advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockCaps: u32 {
        /// A free-running counter suitable for tick accounting.
        const COUNTER = 1 << 0;
        /// Has been calibrated against a known-periodic reference.
        const CALIBRATED = 1 << 1;
        /// Sub-microsecond resolution, suitable as the HPC source.
        const HIGH_PRECISION = 1 << 2;
    }
}

/// A hardware or virtual time source.
///
/// Object-safe so the time base can hold a heterogeneous set of sources
/// behind `Box<dyn ClockSource>`.
pub trait ClockSource: Send {
    /// Reads the current counter value.
    fn read(&self) -> u64;

    /// The counter's frequency in Hz.
    fn frequency_hz(&self) -> u64;

    /// Re-measures the source's frequency, if it drifts or was not known
    /// precisely at registration time.
    fn recalibrate(&mut self);
}

/// Errors reported by the time base when no suitable source is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeError {
    /// No registered source satisfies the request.
    NotAvailable,
}

impl core::fmt::Display for TimeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("no clock source available")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        ticks: u64,
        freq: u64,
    }

    impl ClockSource for Fake {
        fn read(&self) -> u64 {
            self.ticks
        }
        fn frequency_hz(&self) -> u64 {
            self.freq
        }
        fn recalibrate(&mut self) {
            self.freq = 1_000_000;
        }
    }

    #[test]
    fn clock_caps_combine_as_bitflags() {
        let caps = ClockCaps::COUNTER | ClockCaps::CALIBRATED;
        assert!(caps.contains(ClockCaps::COUNTER));
        assert!(caps.contains(ClockCaps::CALIBRATED));
        assert!(!caps.contains(ClockCaps::HIGH_PRECISION));
    }

    #[test]
    fn boxed_clock_source_is_object_safe() {
        let mut boxed: Box<dyn ClockSource> = Box::new(Fake {
            ticks: 42,
            freq: 100,
        });
        assert_eq!(boxed.read(), 42);
        boxed.recalibrate();
        assert_eq!(boxed.frequency_hz(), 1_000_000);
    }
}
