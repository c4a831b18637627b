//! Firmware-side ring access
//!
//! [`RingIndices`] is the pair of index words embedded in every descriptor
//! revision. [`SharedRing`] binds a pair to its storage and implements the
//! firmware side of [`RingPort`]: atomics for the indices, full fences around
//! every publish, and a self-healing reset when the probe leaves an index out
//! of range. [`Outbound`] and [`Inbound`] are the handles firmware code
//! actually holds.

use core::convert::Infallible;
use core::ptr;
use core::sync::atomic::{fence, AtomicU32, Ordering};

use crate::layout::Direction;
use crate::ring::{self, RingPort};

/// Tail and head of one ring, in descriptor order
#[repr(C)]
#[derive(Debug)]
pub struct RingIndices {
    /// Consumer-owned read position
    pub(crate) tail: AtomicU32,
    /// Producer-owned write position
    pub(crate) head: AtomicU32,
}

impl RingIndices {
    pub(crate) const fn new() -> Self {
        Self {
            tail: AtomicU32::new(0),
            head: AtomicU32::new(0),
        }
    }

    /// Current `(head, tail)` snapshot
    pub(crate) fn snapshot(&self) -> (u32, u32) {
        (
            self.head.load(Ordering::Acquire),
            self.tail.load(Ordering::Acquire),
        )
    }

    pub(crate) fn reset(&self) {
        self.tail.store(0, Ordering::Relaxed);
        self.head.store(0, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }
}

/// One ring as seen from the firmware
///
/// The storage pointer and exponent come from the firmware's own copies,
/// never from the probe-visible descriptor fields.
#[derive(Clone, Copy)]
pub(crate) struct SharedRing<'a> {
    direction: Direction,
    indices: &'a RingIndices,
    storage: *mut u8,
    exponent: u32,
    overflow: Option<&'a AtomicU32>,
}

impl<'a> SharedRing<'a> {
    pub(crate) const fn new(
        direction: Direction,
        indices: &'a RingIndices,
        storage: *mut u8,
        exponent: u32,
        overflow: Option<&'a AtomicU32>,
    ) -> Self {
        Self {
            direction,
            indices,
            storage,
            exponent,
            overflow,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        ring::usable_capacity(self.exponent) as usize
    }

    /// Free bytes; 0 while the indices are out of range
    pub(crate) fn free(&self) -> usize {
        let (head, tail) = self.indices.snapshot();
        let capacity = ring::capacity(self.exponent);
        if !ring::in_bounds(head, tail, capacity) {
            return 0;
        }
        ring::free_space(head, tail, capacity) as usize
    }

    /// Queued bytes; 0 while the indices are out of range
    pub(crate) fn used(&self) -> usize {
        let (head, tail) = self.indices.snapshot();
        let capacity = ring::capacity(self.exponent);
        if !ring::in_bounds(head, tail, capacity) {
            return 0;
        }
        ring::used_space(head, tail, capacity) as usize
    }

    pub(crate) fn overflow_count(&self) -> Option<u32> {
        self.overflow.map(|counter| counter.load(Ordering::Relaxed))
    }

    pub(crate) fn produce(&mut self, src: &[u8]) -> usize {
        settle(ring::produce(self, src))
    }

    pub(crate) fn consume(&mut self, dst: &mut [u8]) -> usize {
        settle(ring::consume(self, dst))
    }
}

impl RingPort for SharedRing<'_> {
    type Error = Infallible;

    fn capacity_exponent(&self) -> u32 {
        self.exponent
    }

    fn load_head(&mut self) -> Result<u32, Infallible> {
        Ok(self.indices.head.load(Ordering::Acquire))
    }

    fn load_tail(&mut self) -> Result<u32, Infallible> {
        Ok(self.indices.tail.load(Ordering::Acquire))
    }

    fn store_head(&mut self, head: u32) -> Result<(), Infallible> {
        self.indices.head.store(head, Ordering::Release);
        Ok(())
    }

    fn store_tail(&mut self, tail: u32) -> Result<(), Infallible> {
        self.indices.tail.store(tail, Ordering::Release);
        Ok(())
    }

    fn copy_in(&mut self, offset: u32, src: &[u8]) -> Result<(), Infallible> {
        debug_assert!(offset as usize + src.len() <= ring::capacity(self.exponent) as usize);
        // SAFETY: the engine only passes runs inside 0..capacity, the storage
        // spans the full capacity, and the run lies in the free region that
        // the consumer does not read until the head is published.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.storage.add(offset as usize), src.len());
        }
        Ok(())
    }

    fn copy_out(&mut self, offset: u32, dst: &mut [u8]) -> Result<(), Infallible> {
        debug_assert!(offset as usize + dst.len() <= ring::capacity(self.exponent) as usize);
        // SAFETY: as for `copy_in`; the run lies in the queued region that the
        // producer does not rewrite until the tail is published.
        unsafe {
            ptr::copy_nonoverlapping(self.storage.add(offset as usize), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn fence(&mut self) {
        fence(Ordering::SeqCst);
    }

    fn on_full(&mut self) -> Result<(), Infallible> {
        if let Some(counter) = self.overflow {
            // Single writer: a plain load/store pair, thumbv6m has no RMW.
            let next = counter.load(Ordering::Relaxed).wrapping_add(1);
            counter.store(next, Ordering::Release);
        }
        Ok(())
    }

    fn on_corruption(&mut self, head: u32, tail: u32) -> Result<(), Infallible> {
        log::warn!(
            "buffy: {} ring index out of range (head {head}, tail {tail}, capacity {}), resetting",
            self.direction,
            ring::capacity(self.exponent)
        );
        self.indices.reset();
        Ok(())
    }
}

fn settle(result: Result<usize, Infallible>) -> usize {
    match result {
        Ok(count) => count,
        Err(never) => match never {},
    }
}

/// Firmware handle for the target -> host ring
///
/// Owns the producer side (`head`). Obtained from a channel's `split`.
pub struct Outbound<'a> {
    ring: SharedRing<'a>,
}

// SAFETY: the handle is the only firmware-side accessor of its ring storage.
unsafe impl Send for Outbound<'_> {}

impl<'a> Outbound<'a> {
    pub(crate) const fn new(ring: SharedRing<'a>) -> Self {
        Self { ring }
    }

    /// Queue bytes for the host
    ///
    /// Returns how many bytes fit, possibly 0. A call that finds the ring full
    /// bumps the overflow counter once, however many bytes it dropped. An
    /// out-of-range index resets the ring and drops the whole call.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.ring.produce(bytes)
    }

    /// Read back bytes the host has not consumed yet
    ///
    /// This advances the host-owned tail and competes with a live probe for
    /// the same bytes. Only use it when no probe is draining the ring.
    pub fn drain(&mut self, buf: &mut [u8]) -> usize {
        self.ring.consume(buf)
    }

    /// Usable capacity in bytes
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes that a `write` could queue right now
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    /// Bytes waiting for the host
    pub fn pending(&self) -> usize {
        self.ring.used()
    }

    /// Number of `write` calls that found the ring full, if the layout has a counter
    pub fn overflow_count(&self) -> Option<u32> {
        self.ring.overflow_count()
    }
}

/// Firmware handle for the host -> target ring
///
/// Owns the consumer side (`tail`).
pub struct Inbound<'a> {
    ring: SharedRing<'a>,
}

// SAFETY: the handle is the only firmware-side accessor of its ring storage.
unsafe impl Send for Inbound<'_> {}

impl<'a> Inbound<'a> {
    pub(crate) const fn new(ring: SharedRing<'a>) -> Self {
        Self { ring }
    }

    /// Read bytes the host has written
    ///
    /// Returns how many bytes were available, up to `buf.len()`. An empty ring
    /// is not an error and returns 0.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.ring.consume(buf)
    }

    /// Usable capacity in bytes
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes ready to be read
    pub fn available(&self) -> usize {
        self.ring.used()
    }
}
