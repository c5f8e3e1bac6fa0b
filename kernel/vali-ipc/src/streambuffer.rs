//! Single-producer/single-consumer packet ring (C10).
//!
//! Two monotonically-increasing `AtomicU32` cursors (`head`, `tail`) index a
//! fixed, power-of-two-sized byte array; the index into the backing array
//! is always `cursor & mask`. Framing follows §4.10: each packet is
//! `[u32 length-and-committed][u32 sender handle][payload]`, with the top
//! bit of the length word acting as a release-ordered "this packet is
//! fully written" flag a consumer acquire-loads before trusting the rest
//! of the header.
//!
//! Grounded on the teacher's pipe ring
//! (`kernel/hadron-kernel/src/ipc/pipe.rs`'s `CircularBuffer`) for the
//! wraparound index arithmetic, generalized from a `SpinLock`-guarded byte
//! counter to the lock-free CAS-reservation scheme §4.10 specifies — this
//! ring has exactly one producer and one consumer, so no lock is needed,
//! only the commit-flag handshake to stop the consumer from reading a
//! partially written packet.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::boxed::Box;
use alloc::vec;
use bitflags::bitflags;

use vali_core::id::HandleId;

/// Bytes of fixed framing overhead per packet: the length-and-committed
/// word plus the sender handle word.
const HEADER_LEN: u32 = 8;
/// Top bit of the length word: set once the packet is fully written.
const COMMITTED_BIT: u32 = 1 << 31;
const LENGTH_MASK: u32 = COMMITTED_BIT - 1;

bitflags! {
    /// Per-call options for stream-buffer packet operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamBufferOptions: u32 {
        /// Fail immediately with [`StreamBufferError::WouldBlock`] instead
        /// of leaving it to the caller's retry loop to wait.
        const NO_BLOCK = 1 << 0;
    }
}

/// Errors reported by stream-buffer packet operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBufferError {
    /// The ring could not satisfy the request without waiting.
    WouldBlock,
    /// A blocking wait's deadline elapsed.
    Timeout,
    /// The wait was cancelled (e.g. by `ActivityBits::CANCELLED`).
    Cancelled,
    /// An argument was malformed, or the packet exceeds ring capacity.
    InvalidParameters,
}

impl fmt::Display for StreamBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WouldBlock => "would block",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

/// A fixed-capacity SPSC packet ring.
///
/// Lives in a `ShmCreateInfo`-backed allocation in the real kernel (one
/// ring per `IpcContext`); this type owns only the ring algorithm, not the
/// memory-mapping decision.
pub struct StreamBuffer {
    data: UnsafeCell<Box<[u8]>>,
    capacity: u32,
    mask: u32,
    head: AtomicU32,
    tail: AtomicU32,
}

// SAFETY: all concurrent access is mediated by the `head`/`tail` cursors
// and the per-packet committed-bit handshake; the producer and consumer
// never touch overlapping byte ranges at the same time as long as there
// is exactly one of each, which `WriteCursor`/`ReadCursor` enforce by
// being move-only and borrowing `&StreamBuffer` for their lifetime.
unsafe impl Sync for StreamBuffer {}

impl StreamBuffer {
    /// Creates a ring of `capacity` bytes, which must be a power of two.
    pub fn new(capacity: u32) -> Result<Self, StreamBufferError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(StreamBufferError::InvalidParameters);
        }
        Ok(Self {
            data: UnsafeCell::new(vec![0u8; capacity as usize].into_boxed_slice()),
            capacity,
            mask: capacity - 1,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
        })
    }

    /// Ring capacity in bytes.
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The producer-side cursor, exposed as a futex key for `vali-kernel`'s
    /// blocking `ipc_send` retry loop (consumer wakes producer by waking
    /// this address once it has freed space).
    pub fn head_addr(&self) -> &AtomicU32 {
        &self.head
    }

    /// The consumer-side cursor, exposed as a futex key for `ipc_recv`
    /// (producer wakes the consumer by waking this address once it has
    /// committed a packet).
    pub fn tail_addr(&self) -> &AtomicU32 {
        &self.tail
    }

    fn slot(&self, cursor: u32) -> u32 {
        cursor & self.mask
    }

    /// # Safety
    /// Caller guarantees the `[start, start + len)` window (mod capacity)
    /// is exclusively owned by the calling cursor.
    unsafe fn write_bytes(&self, start: u32, src: &[u8]) {
        let buf = unsafe { &mut *self.data.get() };
        let cap = self.capacity as usize;
        for (i, &b) in src.iter().enumerate() {
            let idx = (self.slot(start) as usize + i) % cap;
            buf[idx] = b;
        }
    }

    /// # Safety
    /// Caller guarantees the window being read was already committed and
    /// is not concurrently written (SPSC with the committed-flag handshake
    /// upholds this).
    unsafe fn read_bytes(&self, start: u32, dst: &mut [u8]) -> usize {
        let buf = unsafe { &*self.data.get() };
        let cap = self.capacity as usize;
        for (i, slot) in dst.iter_mut().enumerate() {
            let idx = (self.slot(start) as usize + i) % cap;
            *slot = buf[idx];
        }
        dst.len()
    }

    fn header_word(&self, offset: u32) -> &AtomicU32 {
        let buf = unsafe { &mut *self.data.get() };
        let idx = self.slot(offset) as usize;
        debug_assert!(idx as u32 + 4 <= self.capacity, "header word must not wrap");
        let ptr = buf[idx..idx + 4].as_mut_ptr().cast::<u32>();
        // SAFETY: `idx` is 4-byte aligned because every reservation begins
        // at a multiple of `HEADER_LEN` (8) from an originally 8-aligned
        // ring start, and the slice above is within the backing buffer.
        unsafe { AtomicU32::from_ptr(ptr) }
    }

    /// Begins writing a packet. Reserves `HEADER_LEN + len` bytes and
    /// writes the sender field immediately; the length/committed word is
    /// cleared (not yet committed) so a consumer racing to this slot on a
    /// prior wraparound never observes stale data.
    pub fn write_packet_start(
        &self,
        sender: HandleId,
        len: u32,
        opts: StreamBufferOptions,
    ) -> Result<WriteCursor<'_>, StreamBufferError> {
        // Pad the reservation to a multiple of 4 bytes so the *next*
        // packet's header word always lands 4-byte aligned, regardless of
        // this packet's (possibly odd) payload length. The padding is
        // reserved ring space only; the committed length word still
        // records the true, unpadded `len`.
        let padded_len = len.next_multiple_of(4);
        let total = HEADER_LEN
            .checked_add(padded_len)
            .ok_or(StreamBufferError::InvalidParameters)?;
        if HEADER_LEN.checked_add(len).is_none_or(|n| n > self.capacity) || total > self.capacity {
            return Err(StreamBufferError::InvalidParameters);
        }
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            let used = head.wrapping_sub(tail);
            let free = self.capacity - used;
            if free < total {
                return Err(StreamBufferError::WouldBlock);
            }
            let new_head = head.wrapping_add(total);
            if self
                .head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.header_word(head).store(0, Ordering::Relaxed);
                // SAFETY: the CAS above grants exclusive ownership of
                // `[head, head + total)` to this call.
                unsafe { self.write_bytes(head + 4, &sender.as_u32().to_le_bytes()) };
                return Ok(WriteCursor {
                    buf: self,
                    start: head,
                    len,
                    written: 0,
                });
            }
            if opts.contains(StreamBufferOptions::NO_BLOCK) {
                return Err(StreamBufferError::WouldBlock);
            }
        }
    }

    /// Begins reading the next packet, if one has been fully committed.
    pub fn read_packet_start(
        &self,
        opts: StreamBufferOptions,
    ) -> Result<ReadCursor<'_>, StreamBufferError> {
        let tail = self.tail.load(Ordering::Relaxed);
        let header = self.header_word(tail).load(Ordering::Acquire);
        if header & COMMITTED_BIT == 0 {
            if opts.contains(StreamBufferOptions::NO_BLOCK) {
                return Err(StreamBufferError::WouldBlock);
            }
            return Err(StreamBufferError::WouldBlock);
        }
        let len = header & LENGTH_MASK;
        let mut sender_bytes = [0u8; 4];
        // SAFETY: the committed load above Acquire-synchronizes with the
        // producer's Release store, making the sender/payload bytes
        // written before that store visible here.
        unsafe { self.read_bytes(tail + 4, &mut sender_bytes) };
        let sender = HandleId::new(u32::from_le_bytes(sender_bytes));
        Ok(ReadCursor {
            buf: self,
            start: tail,
            len,
            sender,
            read: 0,
        })
    }
}

/// A move-only handle to an in-progress packet write.
///
/// Move-only so the type system — not a runtime check — enforces the
/// single-producer invariant: nothing else can reserve ring space while
/// this cursor is live, because `write_packet_start` always allocates a
/// fresh region and this cursor is the only way to finish (or abandon,
/// leaking the reservation) the one it holds.
pub struct WriteCursor<'a> {
    buf: &'a StreamBuffer,
    start: u32,
    len: u32,
    written: u32,
}

impl WriteCursor<'_> {
    /// Appends `bytes` to the packet payload. Panics if it would overflow
    /// the length declared at `write_packet_start` — a loader bug, not a
    /// runtime condition callers are expected to handle.
    pub fn write_packet_data(&mut self, bytes: &[u8]) {
        assert!(
            self.written + bytes.len() as u32 <= self.len,
            "packet payload exceeds declared length"
        );
        let offset = self.start + HEADER_LEN + self.written;
        // SAFETY: within the region this cursor reserved.
        unsafe { self.buf.write_bytes(offset, bytes) };
        self.written += bytes.len() as u32;
    }

    /// Finalizes the packet: stores the committed flag with `Release`
    /// ordering, making the header and payload visible to the consumer.
    pub fn write_packet_end(self) {
        let value = (self.len & LENGTH_MASK) | COMMITTED_BIT;
        self.buf.header_word(self.start).store(value, Ordering::Release);
    }
}

/// A move-only handle to an in-progress packet read.
pub struct ReadCursor<'a> {
    buf: &'a StreamBuffer,
    start: u32,
    len: u32,
    sender: HandleId,
    read: u32,
}

impl ReadCursor<'_> {
    /// The handle that sent this packet.
    pub const fn sender(&self) -> HandleId {
        self.sender
    }

    /// Total payload length.
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Reads up to `out.len()` remaining payload bytes. Returns the number
    /// of bytes actually copied.
    pub fn read_packet_data(&mut self, out: &mut [u8]) -> usize {
        let remaining = (self.len - self.read).min(out.len() as u32);
        if remaining == 0 {
            return 0;
        }
        let offset = self.start + HEADER_LEN + self.read;
        // SAFETY: within the region this cursor is reading, already
        // synchronized by the committed-flag Acquire load that produced
        // this cursor.
        let n = unsafe { self.buf.read_bytes(offset, &mut out[..remaining as usize]) };
        self.read += n as u32;
        n
    }

    /// Finalizes the read, advancing the ring's tail past this packet and
    /// freeing its space for the producer.
    pub fn read_packet_end(self) {
        let total = HEADER_LEN + self.len.next_multiple_of(4);
        self.buf.tail.store(self.start.wrapping_add(total), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_packet() {
        let ring = StreamBuffer::new(64).unwrap();
        let mut w = ring
            .write_packet_start(HandleId::new(7), 5, StreamBufferOptions::empty())
            .unwrap();
        w.write_packet_data(b"hello");
        w.write_packet_end();

        let mut r = ring.read_packet_start(StreamBufferOptions::empty()).unwrap();
        assert_eq!(r.sender(), HandleId::new(7));
        let mut out = [0u8; 5];
        assert_eq!(r.read_packet_data(&mut out), 5);
        assert_eq!(&out, b"hello");
        r.read_packet_end();
    }

    #[test]
    fn empty_ring_would_block() {
        let ring = StreamBuffer::new(64).unwrap();
        assert_eq!(
            ring.read_packet_start(StreamBufferOptions::empty()),
            Err(StreamBufferError::WouldBlock)
        );
    }

    #[test]
    fn oversized_packet_rejected_immediately() {
        let ring = StreamBuffer::new(64).unwrap();
        // Ring holds 64 bytes total; header is 8, so max payload is 56.
        let err = ring
            .write_packet_start(HandleId::new(1), 57, StreamBufferOptions::empty())
            .unwrap_err();
        assert_eq!(err, StreamBufferError::InvalidParameters);
    }

    #[test]
    fn packet_exactly_filling_ring_succeeds() {
        let ring = StreamBuffer::new(64).unwrap();
        let mut w = ring
            .write_packet_start(HandleId::new(1), 56, StreamBufferOptions::empty())
            .unwrap();
        w.write_packet_data(&[0xAAu8; 56]);
        w.write_packet_end();
    }

    #[test]
    fn non_power_of_two_capacity_rejected() {
        assert_eq!(StreamBuffer::new(100), Err(StreamBufferError::InvalidParameters));
    }

    #[test]
    fn full_ring_reports_would_block_for_next_write() {
        let ring = StreamBuffer::new(16).unwrap();
        let w = ring
            .write_packet_start(HandleId::new(1), 8, StreamBufferOptions::empty())
            .unwrap();
        w.write_packet_end();
        let err = ring
            .write_packet_start(HandleId::new(1), 8, StreamBufferOptions::NO_BLOCK)
            .unwrap_err();
        assert_eq!(err, StreamBufferError::WouldBlock);
    }

    #[test]
    fn wraparound_does_not_leak_stale_packet() {
        let ring = StreamBuffer::new(16).unwrap();
        for i in 0..4u8 {
            let mut w = ring
                .write_packet_start(HandleId::new(u32::from(i)), 0, StreamBufferOptions::empty())
                .unwrap();
            w.write_packet_data(&[]);
            w.write_packet_end();
            let r = ring.read_packet_start(StreamBufferOptions::empty()).unwrap();
            assert_eq!(r.sender(), HandleId::new(u32::from(i)));
            r.read_packet_end();
        }
        assert_eq!(
            ring.read_packet_start(StreamBufferOptions::empty()),
            Err(StreamBufferError::WouldBlock)
        );
    }
}
