//! Time base (C8): pluggable clock sources, selected per query by the
//! capability the caller needs, and the `sleep`/`stall` primitives built
//! on top.
//!
//! Sources register against [`vali_driver_api::clock::ClockSource`] the
//! same way [`crate::interrupt`] lets a driver claim a line — ownership of
//! the actual hardware (PIT, HPET, TSC, APIC timer, RTC) stays with the
//! arch-specific caller; this module only tracks which registered source
//! best satisfies each kind of query.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use vali_core::sync::IrqSpinLock;
use vali_driver_api::clock::{ClockCaps, ClockSource};

use crate::config::CLOCK_CALIBRATION_WINDOW_MS;
use crate::error::TimeError;

struct Source {
    clock: Box<dyn ClockSource>,
    caps: ClockCaps,
}

struct Inner {
    sources: Vec<Source>,
    /// Wall-clock epoch offset in nanoseconds, set once at registration of
    /// a source capable of standing in for the RTC and advanced by clock
    /// ticks thereafter rather than re-read every query.
    wall_clock_ns: u64,
}

/// The kernel's time base: every registered [`ClockSource`], plus the
/// wall-clock cache it advances.
pub struct TimeBase {
    inner: IrqSpinLock<Inner>,
}

impl TimeBase {
    /// Creates an empty time base with no registered sources.
    pub const fn new() -> Self {
        Self {
            inner: IrqSpinLock::new(Inner {
                sources: Vec::new(),
                wall_clock_ns: 0,
            }),
        }
    }

    /// Registers a clock source with its advertised capabilities.
    pub fn register(&self, clock: Box<dyn ClockSource>, caps: ClockCaps) {
        self.inner.lock().sources.push(Source { clock, caps });
    }

    fn best(inner: &Inner, required: ClockCaps) -> Option<usize> {
        inner
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.caps.contains(required))
            .max_by_key(|(_, s)| s.caps.bits().count_ones())
            .map(|(i, _)| i)
    }

    /// Reads the best available free-running counter (any source
    /// advertising [`ClockCaps::COUNTER`]).
    pub fn clock_tick(&self) -> Result<u64, TimeError> {
        let inner = self.inner.lock();
        let idx = Self::best(&inner, ClockCaps::COUNTER).ok_or(TimeError::NotAvailable)?;
        Ok(inner.sources[idx].clock.read())
    }

    /// The frequency, in Hz, of the same source [`Self::clock_tick`] would
    /// read from.
    pub fn clock_freq(&self) -> Result<u64, TimeError> {
        let inner = self.inner.lock();
        let idx = Self::best(&inner, ClockCaps::COUNTER).ok_or(TimeError::NotAvailable)?;
        Ok(inner.sources[idx].clock.frequency_hz())
    }

    /// The cached wall-clock time in nanoseconds since epoch.
    pub fn wall_clock(&self) -> u64 {
        self.inner.lock().wall_clock_ns
    }

    /// Advances the cached wall clock by `ticks` at the counter source's
    /// frequency, the way a CMOS/RTC-less build tracks time purely off
    /// clock ticks between readings.
    pub fn advance_wall_clock(&self, ticks: u64) -> Result<(), TimeError> {
        let mut inner = self.inner.lock();
        let idx = Self::best(&inner, ClockCaps::COUNTER).ok_or(TimeError::NotAvailable)?;
        let freq = inner.sources[idx].clock.frequency_hz();
        if freq == 0 {
            return Err(TimeError::NotAvailable);
        }
        let delta_ns = ticks.saturating_mul(1_000_000_000) / freq;
        inner.wall_clock_ns = inner.wall_clock_ns.saturating_add(delta_ns);
        Ok(())
    }

    /// The best high-precision counter (any source advertising both
    /// [`ClockCaps::COUNTER`] and [`ClockCaps::HIGH_PRECISION`]), used by
    /// [`Self::stall`].
    fn hpc(&self) -> Result<u64, TimeError> {
        let inner = self.inner.lock();
        let idx = Self::best(&inner, ClockCaps::COUNTER | ClockCaps::HIGH_PRECISION).ok_or(TimeError::NotAvailable)?;
        Ok(inner.sources[idx].clock.read())
    }

    /// Busy-waits for approximately `ns` nanoseconds against the
    /// high-precision source, spinning on [`Self::hpc`] deltas. The caller
    /// is expected to run this with interrupts enabled; there is nothing
    /// here that requires otherwise, but a long stall under a spinlock
    /// elsewhere would violate the bounded-critical-section discipline
    /// every other subsystem in this crate follows.
    pub fn stall(&self, ns: u64) -> Result<(), TimeError> {
        let freq = {
            let inner = self.inner.lock();
            let idx = Self::best(&inner, ClockCaps::COUNTER | ClockCaps::HIGH_PRECISION).ok_or(TimeError::NotAvailable)?;
            inner.sources[idx].clock.frequency_hz()
        };
        if freq == 0 {
            return Err(TimeError::NotAvailable);
        }
        let target_delta = ns.saturating_mul(freq) / 1_000_000_000;
        let start = self.hpc()?;
        loop {
            let now = self.hpc()?;
            if now.wrapping_sub(start) >= target_delta {
                return Ok(());
            }
            core::hint::spin_loop();
        }
    }

    /// Re-measures every registered source's frequency against whichever
    /// source is treated as the calibration reference (the first
    /// `CALIBRATED` one found; falls back to leaving uncalibrated sources
    /// alone if none exists yet), over
    /// [`CLOCK_CALIBRATION_WINDOW_MS`].
    ///
    /// The actual act of waiting out the window is the caller's
    /// responsibility (it owns the reference source's real hardware);
    /// this only drives each source's `recalibrate` hook once that window
    /// has elapsed.
    pub fn recalibrate_all(&self) {
        let mut inner = self.inner.lock();
        for source in inner.sources.iter_mut() {
            source.clock.recalibrate();
        }
    }

    /// Number of registered sources, for diagnostics/tests.
    pub fn source_count(&self) -> usize {
        self.inner.lock().sources.len()
    }

    /// Width of the calibration window callers should wait out between
    /// successive [`Self::recalibrate_all`] calls.
    pub const fn calibration_window_ms(&self) -> u64 {
        CLOCK_CALIBRATION_WINDOW_MS
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}
