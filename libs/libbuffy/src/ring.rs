//! # Ring Transfer Engine
//!
//! Index arithmetic and the copy loop shared by every ring in the system:
//! both directions of a channel, and both sides of the link (firmware and
//! debug probe).
//!
//! ## Index discipline
//!
//! Each ring has a `head` (producer-owned write position) and a `tail`
//! (consumer-owned read position), both in `0..capacity`. One slot is always
//! left empty so that `head == tail` means "empty" and never "full"; the
//! usable capacity is therefore `capacity - 1`.
//!
//! The engine never holds a live reference to the foreign index. Every pass
//! snapshots both indices, checks them against the capacity, computes the
//! longest contiguous run, copies it, and only then publishes the advanced
//! owned index between two fences:
//!
//! ```text
//! snapshot(head, tail) -> guard -> run -> copy -> fence -> store(index) -> fence
//! ```
//!
//! How an index is loaded, stored, or fenced, and what happens on a full
//! ring or a corrupted index, is decided by the [`RingPort`] implementation.

/// Access to one ring's indices and storage
///
/// The firmware implements this over atomics in its own memory; the probe
/// implements it over a debug memory interface. Errors are the port's own
/// (`Infallible` on the firmware side).
pub trait RingPort {
    /// Port-specific failure (memory access, reported corruption)
    type Error;

    /// Ring capacity as log2 of the size in bytes
    fn capacity_exponent(&self) -> u32;

    /// Snapshot the producer-owned index
    fn load_head(&mut self) -> Result<u32, Self::Error>;

    /// Snapshot the consumer-owned index
    fn load_tail(&mut self) -> Result<u32, Self::Error>;

    /// Publish a new producer index
    fn store_head(&mut self, head: u32) -> Result<(), Self::Error>;

    /// Publish a new consumer index
    fn store_tail(&mut self, tail: u32) -> Result<(), Self::Error>;

    /// Copy `src` into ring storage starting at `offset`
    ///
    /// The engine guarantees `offset + src.len() <= capacity`.
    fn copy_in(&mut self, offset: u32, src: &[u8]) -> Result<(), Self::Error>;

    /// Copy ring storage starting at `offset` into `dst`
    ///
    /// The engine guarantees `offset + dst.len() <= capacity`.
    fn copy_out(&mut self, offset: u32, dst: &mut [u8]) -> Result<(), Self::Error>;

    /// Order all prior memory writes before any later one
    fn fence(&mut self) {}

    /// Called once per produce call that found the ring full
    ///
    /// The engine fences after it returns.
    fn on_full(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called when a snapshot is out of range; the transfer then returns 0
    fn on_corruption(&mut self, head: u32, tail: u32) -> Result<(), Self::Error>;
}

/// Ring size in bytes for a capacity exponent
#[inline]
pub const fn capacity(exponent: u32) -> u32 {
    1 << exponent
}

/// Bytes a ring can hold at once (one slot is sacrificed)
#[inline]
pub const fn usable_capacity(exponent: u32) -> u32 {
    capacity(exponent) - 1
}

/// Wrap an index into `0..capacity` with a mask
#[inline]
pub const fn wrap(index: u32, exponent: u32) -> u32 {
    index & (capacity(exponent) - 1)
}

/// Corruption guard: both indices must lie inside the ring
#[inline]
pub const fn in_bounds(head: u32, tail: u32, capacity: u32) -> bool {
    head < capacity && tail < capacity
}

/// Longest contiguous run writable at `head` without reaching `tail`
///
/// With `tail == 0` the run stops one short of the end, otherwise `head`
/// would wrap onto `tail` and the full ring would read as empty.
#[inline]
pub const fn writable_run(head: u32, tail: u32, capacity: u32) -> u32 {
    if head >= tail {
        if tail == 0 {
            capacity - head - 1
        } else {
            capacity - head
        }
    } else {
        tail - head - 1
    }
}

/// Longest contiguous run readable at `tail` without passing `head`
#[inline]
pub const fn readable_run(head: u32, tail: u32, capacity: u32) -> u32 {
    if head >= tail {
        head - tail
    } else {
        capacity - tail
    }
}

/// Total free bytes, counting the part behind the wrap point
#[inline]
pub const fn free_space(head: u32, tail: u32, capacity: u32) -> u32 {
    if head >= tail {
        if tail == 0 {
            capacity - head - 1
        } else {
            (capacity - head) + (tail - 1)
        }
    } else {
        tail - head - 1
    }
}

/// Total queued bytes
#[inline]
pub const fn used_space(head: u32, tail: u32, capacity: u32) -> u32 {
    head.wrapping_sub(tail) & (capacity - 1)
}

/// Copy as much of `src` into the ring as currently fits
///
/// Returns the number of bytes queued, which is less than `src.len()` when
/// the ring filled up (the port's `on_full` then ran exactly once) and 0
/// when the guard tripped.
pub fn produce<P: RingPort + ?Sized>(port: &mut P, src: &[u8]) -> Result<usize, P::Error> {
    let exponent = port.capacity_exponent();
    let capacity = capacity(exponent);
    let mut pos = 0;

    port.fence();
    while pos < src.len() {
        let head = port.load_head()?;
        let tail = port.load_tail()?;

        if !in_bounds(head, tail, capacity) {
            port.on_corruption(head, tail)?;
            return Ok(0);
        }

        #[cfg(feature = "trace")]
        log::trace!("produce: head {head} tail {tail} pos {pos}/{}", src.len());

        let run = writable_run(head, tail, capacity) as usize;
        if run == 0 {
            port.on_full()?;
            port.fence();
            break;
        }

        let len = run.min(src.len() - pos);
        port.copy_in(head, &src[pos..pos + len])?;
        port.fence();
        port.store_head(wrap(head + len as u32, exponent))?;
        port.fence();

        pos += len;
    }

    Ok(pos)
}

/// Move up to `dst.len()` queued bytes out of the ring
///
/// Returns the number of bytes read; 0 means the ring was empty or the guard
/// tripped.
pub fn consume<P: RingPort + ?Sized>(port: &mut P, dst: &mut [u8]) -> Result<usize, P::Error> {
    let exponent = port.capacity_exponent();
    let capacity = capacity(exponent);
    let mut pos = 0;

    port.fence();
    while pos < dst.len() {
        let head = port.load_head()?;
        let tail = port.load_tail()?;

        if !in_bounds(head, tail, capacity) {
            port.on_corruption(head, tail)?;
            return Ok(0);
        }

        #[cfg(feature = "trace")]
        log::trace!("consume: head {head} tail {tail} pos {pos}/{}", dst.len());

        if head == tail {
            break;
        }

        let run = readable_run(head, tail, capacity) as usize;
        let len = run.min(dst.len() - pos);
        port.copy_out(tail, &mut dst[pos..pos + len])?;
        port.fence();
        port.store_tail(wrap(tail + len as u32, exponent))?;
        port.fence();

        pos += len;
    }

    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Plain in-memory port for exercising the loop without atomics
    struct VecPort {
        exponent: u32,
        head: u32,
        tail: u32,
        data: Vec<u8>,
        full_hits: u32,
        resets: u32,
        events: Vec<&'static str>,
    }

    impl VecPort {
        fn new(exponent: u32) -> Self {
            Self {
                exponent,
                head: 0,
                tail: 0,
                data: vec![0; capacity(exponent) as usize],
                full_hits: 0,
                resets: 0,
                events: Vec::new(),
            }
        }
    }

    impl RingPort for VecPort {
        type Error = core::convert::Infallible;

        fn capacity_exponent(&self) -> u32 {
            self.exponent
        }
        fn load_head(&mut self) -> Result<u32, Self::Error> {
            Ok(self.head)
        }
        fn load_tail(&mut self) -> Result<u32, Self::Error> {
            Ok(self.tail)
        }
        fn store_head(&mut self, head: u32) -> Result<(), Self::Error> {
            self.head = head;
            self.events.push("head");
            Ok(())
        }
        fn store_tail(&mut self, tail: u32) -> Result<(), Self::Error> {
            self.tail = tail;
            Ok(())
        }
        fn copy_in(&mut self, offset: u32, src: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            self.data[start..start + src.len()].copy_from_slice(src);
            Ok(())
        }
        fn copy_out(&mut self, offset: u32, dst: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            dst.copy_from_slice(&self.data[start..start + dst.len()]);
            Ok(())
        }
        fn fence(&mut self) {
            self.events.push("fence");
        }
        fn on_full(&mut self) -> Result<(), Self::Error> {
            self.full_hits += 1;
            self.events.push("full");
            Ok(())
        }
        fn on_corruption(&mut self, _head: u32, _tail: u32) -> Result<(), Self::Error> {
            self.resets += 1;
            self.head = 0;
            self.tail = 0;
            Ok(())
        }
    }

    fn ok<T>(result: Result<T, core::convert::Infallible>) -> T {
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    #[test]
    fn test_writable_run_cases() {
        // Empty ring, tail at zero: stop one short of the end
        assert_eq!(writable_run(0, 0, 16), 15);
        // Tail elsewhere: run to the end of the buffer
        assert_eq!(writable_run(8, 4, 16), 8);
        // Head behind tail: stop one short of tail
        assert_eq!(writable_run(2, 6, 16), 3);
        // Full
        assert_eq!(writable_run(15, 0, 16), 0);
        assert_eq!(writable_run(5, 6, 16), 0);
    }

    #[test]
    fn test_readable_run_cases() {
        assert_eq!(readable_run(0, 0, 8), 0);
        assert_eq!(readable_run(5, 2, 8), 3);
        // Wrapped: read to the end first
        assert_eq!(readable_run(1, 2, 8), 6);
    }

    #[test]
    fn test_free_space_wrapped() {
        // 2 bytes queued at 14..16
        assert_eq!(free_space(0, 14, 16), 13);
        // head 15, tail 1: slots 15 and 0 are empty, one of them is sacrificed
        assert_eq!(free_space(15, 1, 16), 1);
        assert_eq!(used_space(15, 1, 16), 14);
    }

    #[test]
    fn test_wrap_masks() {
        assert_eq!(wrap(16, 4), 0);
        assert_eq!(wrap(17, 4), 1);
        assert_eq!(wrap(15, 4), 15);
    }

    #[test]
    fn test_produce_wraps_in_two_passes() {
        let mut port = VecPort::new(3);
        port.head = 6;
        port.tail = 6;

        let written = ok(produce(&mut port, b"abcd"));
        assert_eq!(written, 4);
        assert_eq!(port.head, 2);
        assert_eq!(&port.data[6..8], b"ab");
        assert_eq!(&port.data[0..2], b"cd");
        assert_eq!(port.full_hits, 0);
    }

    #[test]
    fn test_full_counted_once_per_call() {
        let mut port = VecPort::new(2);
        assert_eq!(ok(produce(&mut port, b"0123456789")), 3);
        assert_eq!(port.full_hits, 1);
    }

    #[test]
    fn test_overflow_count_fenced_before_return() {
        let mut port = VecPort::new(2);
        port.head = 3;
        assert_eq!(ok(produce(&mut port, b"x")), 0);
        assert_eq!(port.events, ["fence", "full", "fence"]);

        port.events.clear();
        port.head = 0;
        assert_eq!(ok(produce(&mut port, b"0123")), 3);
        assert_eq!(port.events, ["fence", "fence", "head", "fence", "full", "fence"]);
    }

    #[test]
    fn test_empty_request_touches_nothing() {
        let mut port = VecPort::new(2);
        port.head = 3;
        port.tail = 0;
        assert_eq!(ok(produce(&mut port, b"")), 0);
        assert_eq!(port.full_hits, 0);
    }

    #[test]
    fn test_corruption_aborts_whole_call() {
        let mut port = VecPort::new(4);
        port.head = 3;
        port.tail = 99;
        assert_eq!(ok(produce(&mut port, b"data")), 0);
        assert_eq!(port.resets, 1);
        assert_eq!((port.head, port.tail), (0, 0));

        port.head = 16;
        let mut buf = [0u8; 4];
        assert_eq!(ok(consume(&mut port, &mut buf)), 0);
        assert_eq!(port.resets, 2);
        assert_eq!((port.head, port.tail), (0, 0));
    }

    proptest! {
        #[test]
        fn prop_free_plus_used_is_usable(exponent in 1u32..=16, head in any::<u32>(), tail in any::<u32>()) {
            let cap = capacity(exponent);
            let (head, tail) = (head % cap, tail % cap);
            prop_assert_eq!(free_space(head, tail, cap) + used_space(head, tail, cap), usable_capacity(exponent));
        }

        #[test]
        fn prop_runs_never_exceed_totals(exponent in 1u32..=16, head in any::<u32>(), tail in any::<u32>()) {
            let cap = capacity(exponent);
            let (head, tail) = (head % cap, tail % cap);
            prop_assert!(writable_run(head, tail, cap) <= free_space(head, tail, cap));
            prop_assert!(readable_run(head, tail, cap) <= used_space(head, tail, cap));
            prop_assert!(head + writable_run(head, tail, cap) <= cap);
            prop_assert!(tail + readable_run(head, tail, cap) <= cap);
        }

        #[test]
        fn prop_round_trip_preserves_order(
            exponent in 1u32..=10,
            start in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..1024),
        ) {
            let mut port = VecPort::new(exponent);
            let start = start % capacity(exponent);
            port.head = start;
            port.tail = start;

            let n = payload.len().min(usable_capacity(exponent) as usize);
            prop_assert_eq!(ok(produce(&mut port, &payload[..n])), n);

            let mut out = vec![0u8; n];
            prop_assert_eq!(ok(consume(&mut port, &mut out)), n);
            prop_assert_eq!(&out[..], &payload[..n]);
            prop_assert_eq!(port.full_hits, 0);
        }
    }
}
