//! Interrupt plumbing (C7): vector allocation, fast-handler dispatch, and
//! the fast/deferred split that lets a user-space driver service hardware
//! without running in IRQ context itself.
//!
//! Mirrors the teacher's `drivers::irq`/`arch::x86_64::interrupts::dispatch`
//! split, generalized from "one handler per vector, always EOI" to the
//! richer contract this kernel needs: several fast handlers may share a
//! line (tried in registration order until one reports [`DispatchResult::Handled`]),
//! EOI only follows a `Handled` result, and a line that stays unhandled
//! past [`crate::config::SPURIOUS_THRESHOLD`] consecutive IRQs is masked.
//! Vector bookkeeping never touches real hardware (no APIC/IOAPIC
//! register writes) for the same reason [`crate::mm::vmm`] takes a
//! `PageTableMapper`: that belongs to the arch-specific caller, not this
//! crate.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use bitflags::bitflags;

use vali_core::id::HandleId;
use vali_core::sync::IrqSpinLock;

use crate::config::{FIRST_ALLOCATABLE_VECTOR, LAST_ALLOCATABLE_VECTOR, SPURIOUS_THRESHOLD};
use crate::error::InterruptError;

bitflags! {
    /// Constraints a driver's interrupt descriptor places on vector
    /// selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        /// The descriptor names an exact vector; [`InterruptTable::register`]
        /// must use it or fail, rather than picking one.
        const VECTOR_FIXED = 1 << 0;
        /// This registration may not share its line with any other.
        const NOT_SHARABLE = 1 << 1;
        /// The line is an MSI/MSI-X vector, not a legacy PIN-routed one.
        const MSI = 1 << 2;
        /// A software-only (non-hardware) interrupt line, e.g. for testing
        /// or inter-processor signaling that reuses this same dispatch path.
        const SOFT = 1 << 3;
    }
}

/// What a fast handler (or the dispatcher, on behalf of a plain deferred
/// registration with no fast handler of its own) reports after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// This handler serviced the interrupt; EOI follows, no further
    /// handlers on the line run, and the deferred handle (if any) is
    /// marked active.
    Handled,
    /// Not this handler's device; the next registration on the line is
    /// tried.
    NotHandled,
}

/// A fast interrupt service routine: runs with interrupts disabled, must
/// complete within a bounded number of memory references, and must touch
/// only resources declared at registration time.
pub type FastHandler = Box<dyn Fn() -> DispatchResult + Send>;

struct Registration {
    handle: HandleId,
    flags: IrqFlags,
    handler: Option<FastHandler>,
    deferred: Option<HandleId>,
}

struct Line {
    registrations: Vec<Registration>,
    spurious: u32,
    masked: bool,
}

impl Line {
    const fn new() -> Self {
        Self {
            registrations: Vec::new(),
            spurious: 0,
            masked: false,
        }
    }
}

fn offset_of(vector: u8) -> Option<usize> {
    if vector < FIRST_ALLOCATABLE_VECTOR || vector > LAST_ALLOCATABLE_VECTOR {
        return None;
    }
    Some((vector - FIRST_ALLOCATABLE_VECTOR) as usize)
}

/// The system-wide interrupt table: one [`Line`] per allocatable vector.
pub struct InterruptTable {
    lines: IrqSpinLock<Vec<Line>>,
}

impl InterruptTable {
    /// Creates a table covering every vector in
    /// `[FIRST_ALLOCATABLE_VECTOR, LAST_ALLOCATABLE_VECTOR]`.
    pub fn new() -> Self {
        let count = (LAST_ALLOCATABLE_VECTOR - FIRST_ALLOCATABLE_VECTOR) as usize + 1;
        Self {
            lines: IrqSpinLock::new((0..count).map(|_| Line::new()).collect()),
        }
    }

    /// Registers an interrupt descriptor, returning the vector it was
    /// routed to.
    ///
    /// `requested_vector` is consulted (and required) only when `flags`
    /// carries [`IrqFlags::VECTOR_FIXED`]; otherwise the first line with
    /// room is picked. A line already holding a [`IrqFlags::NOT_SHARABLE`]
    /// registration, or asked to host one while non-empty, refuses with
    /// [`InterruptError::Busy`].
    pub fn register(
        &self,
        handle: HandleId,
        requested_vector: Option<u8>,
        flags: IrqFlags,
        handler: Option<FastHandler>,
        deferred: Option<HandleId>,
    ) -> Result<u8, InterruptError> {
        let mut lines = self.lines.lock();

        let idx = if flags.contains(IrqFlags::VECTOR_FIXED) {
            let vector = requested_vector.ok_or(InterruptError::InvalidParameters)?;
            let idx = offset_of(vector).ok_or(InterruptError::InvalidParameters)?;
            if !Self::line_accepts(&lines[idx], flags) {
                return Err(InterruptError::Busy);
            }
            idx
        } else {
            lines
                .iter()
                .position(|line| Self::line_accepts(line, flags))
                .ok_or(InterruptError::NoVector)?
        };

        lines[idx].registrations.push(Registration {
            handle,
            flags,
            handler,
            deferred,
        });
        lines[idx].spurious = 0;
        Ok(FIRST_ALLOCATABLE_VECTOR + idx as u8)
    }

    fn line_accepts(line: &Line, incoming: IrqFlags) -> bool {
        if line.registrations.is_empty() {
            return true;
        }
        if incoming.contains(IrqFlags::NOT_SHARABLE) {
            return false;
        }
        !line.registrations.iter().any(|r| r.flags.contains(IrqFlags::NOT_SHARABLE))
    }

    /// Runs every fast handler on `vector` in registration order until one
    /// reports [`DispatchResult::Handled`], returning that registration's
    /// deferred handle (if any) for the caller to mark active. A
    /// registration with no fast handler of its own (a plain deferred
    /// registration) always reports `Handled`.
    ///
    /// Returns `Ok(None)` if the line is masked or carries no
    /// registrations; the caller should skip EOI in that case. If every
    /// handler reports `NotHandled`, the line's spurious counter advances
    /// and, past [`SPURIOUS_THRESHOLD`], the line is masked.
    pub fn dispatch(&self, vector: u8) -> Result<Option<HandleId>, InterruptError> {
        let idx = offset_of(vector).ok_or(InterruptError::InvalidParameters)?;
        let mut lines = self.lines.lock();
        let line = &mut lines[idx];
        if line.masked || line.registrations.is_empty() {
            return Ok(None);
        }

        for reg in &line.registrations {
            let result = reg.handler.as_ref().map_or(DispatchResult::Handled, |h| h());
            if result == DispatchResult::Handled {
                line.spurious = 0;
                return Ok(reg.deferred);
            }
        }

        line.spurious += 1;
        if line.spurious >= SPURIOUS_THRESHOLD {
            line.masked = true;
        }
        Ok(None)
    }

    /// Removes `handle`'s registration, freeing its line once empty.
    pub fn remove(&self, handle: HandleId) -> Result<(), InterruptError> {
        let mut lines = self.lines.lock();
        for line in lines.iter_mut() {
            if let Some(pos) = line.registrations.iter().position(|r| r.handle == handle) {
                line.registrations.remove(pos);
                if line.registrations.is_empty() {
                    line.spurious = 0;
                    line.masked = false;
                }
                return Ok(());
            }
        }
        Err(InterruptError::NotFound)
    }

    /// Acknowledges servicing of the deferred work for `handle`'s
    /// registration, re-arming its line: clears the spurious counter and
    /// lifts the mask if the line had been masked. Called by the
    /// deferred-dispatch thread once it has re-read device state and
    /// completed I/O, distinct from the hardware EOI the kernel already
    /// sent on the `Handled` return from [`Self::dispatch`].
    pub fn ack(&self, handle: HandleId) -> Result<(), InterruptError> {
        let mut lines = self.lines.lock();
        for line in lines.iter_mut() {
            if line.registrations.iter().any(|r| r.handle == handle) {
                line.spurious = 0;
                line.masked = false;
                return Ok(());
            }
        }
        Err(InterruptError::NotFound)
    }

    /// Returns `true` if the line carrying `vector` is currently masked
    /// due to exceeding the spurious-interrupt threshold.
    pub fn is_masked(&self, vector: u8) -> bool {
        offset_of(vector).is_some_and(|idx| self.lines.lock()[idx].masked)
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_registration_picks_first_free_line() {
        let table = InterruptTable::new();
        let vector = table.register(HandleId::new(1), None, IrqFlags::empty(), None, None).unwrap();
        assert_eq!(vector, FIRST_ALLOCATABLE_VECTOR);
    }

    #[test]
    fn fixed_vector_out_of_range_is_rejected() {
        let table = InterruptTable::new();
        let err = table
            .register(HandleId::new(1), Some(5), IrqFlags::VECTOR_FIXED, None, None)
            .unwrap_err();
        assert_eq!(err, InterruptError::InvalidParameters);
    }

    #[test]
    fn not_sharable_line_refuses_second_registration() {
        let table = InterruptTable::new();
        let vector = table
            .register(HandleId::new(1), None, IrqFlags::NOT_SHARABLE, None, None)
            .unwrap();
        let err = table
            .register(HandleId::new(2), Some(vector), IrqFlags::VECTOR_FIXED, None, None)
            .unwrap_err();
        assert_eq!(err, InterruptError::Busy);
    }

    #[test]
    fn dispatch_stops_at_first_handled_and_returns_its_deferred_handle() {
        let table = InterruptTable::new();
        let deferred = HandleId::new(99);
        let vector = table
            .register(
                HandleId::new(1),
                None,
                IrqFlags::empty(),
                Some(Box::new(|| DispatchResult::NotHandled)),
                None,
            )
            .unwrap();
        table
            .register(
                HandleId::new(2),
                Some(vector),
                IrqFlags::VECTOR_FIXED,
                Some(Box::new(|| DispatchResult::Handled)),
                Some(deferred),
            )
            .unwrap();

        assert_eq!(table.dispatch(vector), Ok(Some(deferred)));
    }

    #[test]
    fn unhandled_past_threshold_masks_the_line() {
        let table = InterruptTable::new();
        let vector = table
            .register(
                HandleId::new(1),
                None,
                IrqFlags::empty(),
                Some(Box::new(|| DispatchResult::NotHandled)),
                None,
            )
            .unwrap();

        for _ in 0..SPURIOUS_THRESHOLD {
            assert_eq!(table.dispatch(vector), Ok(None));
        }
        assert!(table.is_masked(vector));
    }

    #[test]
    fn ack_clears_mask_and_spurious_counter() {
        let table = InterruptTable::new();
        let vector = table
            .register(
                HandleId::new(1),
                None,
                IrqFlags::empty(),
                Some(Box::new(|| DispatchResult::NotHandled)),
                None,
            )
            .unwrap();
        for _ in 0..SPURIOUS_THRESHOLD {
            table.dispatch(vector).unwrap();
        }
        assert!(table.is_masked(vector));
        table.ack(HandleId::new(1)).unwrap();
        assert!(!table.is_masked(vector));
    }

    #[test]
    fn remove_frees_the_line_for_a_future_not_sharable_claim() {
        let table = InterruptTable::new();
        let vector = table.register(HandleId::new(1), None, IrqFlags::empty(), None, None).unwrap();
        table.remove(HandleId::new(1)).unwrap();
        table
            .register(HandleId::new(2), Some(vector), IrqFlags::VECTOR_FIXED | IrqFlags::NOT_SHARABLE, None, None)
            .unwrap();
    }

    #[test]
    fn remove_unknown_handle_errors() {
        let table = InterruptTable::new();
        assert_eq!(table.remove(HandleId::new(404)), Err(InterruptError::NotFound));
    }
}
