//! Inline-buffer channel descriptors (revision 1)
//!
//! The first layouts: control words followed directly by both buffers, no
//! revision word. [`InlineChannel`] has no overflow counter;
//! [`CountedInlineChannel`] puts one in front of the buffers, which is the
//! form older host scripts expect. Both carry the same signature. Geometry
//! comes from the const generics, never from the descriptor words.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::layout::{Direction, INLINE_SIGNATURE};
use crate::ring;
use crate::shared::{Inbound, Outbound, RingIndices, SharedRing};
use crate::storage::RingStorage;

/// Inline descriptor with `TX` outbound and `RX` inbound bytes, no counter
#[repr(C)]
pub struct InlineChannel<const TX: usize, const RX: usize> {
    signature: u32,
    outbound_exponent: u32,
    inbound_exponent: u32,
    outbound: RingIndices,
    inbound: RingIndices,
    outbound_buffer: RingStorage<TX>,
    inbound_buffer: RingStorage<RX>,
    #[cfg_attr(not(target_has_atomic = "8"), allow(dead_code))]
    claimed: AtomicBool,
}

const _: () = {
    use crate::layout::inline as off;
    use core::mem::offset_of;

    type C = InlineChannel<16, 8>;
    let tail = offset_of!(RingIndices, tail);
    let head = offset_of!(RingIndices, head);

    assert!(offset_of!(C, signature) == off::SIGNATURE);
    assert!(offset_of!(C, outbound_exponent) == off::OUTBOUND_EXPONENT);
    assert!(offset_of!(C, inbound_exponent) == off::INBOUND_EXPONENT);
    assert!(offset_of!(C, outbound) + tail == off::OUTBOUND_TAIL);
    assert!(offset_of!(C, outbound) + head == off::OUTBOUND_HEAD);
    assert!(offset_of!(C, inbound) + tail == off::INBOUND_TAIL);
    assert!(offset_of!(C, inbound) + head == off::INBOUND_HEAD);
    assert!(offset_of!(C, outbound_buffer) == off::OUTBOUND_BUFFER);
    assert!(offset_of!(C, inbound_buffer) == off::OUTBOUND_BUFFER + 16);
};

/// Inline descriptor with an overflow counter ahead of the buffers
#[repr(C)]
pub struct CountedInlineChannel<const TX: usize, const RX: usize> {
    signature: u32,
    outbound_exponent: u32,
    inbound_exponent: u32,
    outbound: RingIndices,
    inbound: RingIndices,
    overflow: AtomicU32,
    outbound_buffer: RingStorage<TX>,
    inbound_buffer: RingStorage<RX>,
    #[cfg_attr(not(target_has_atomic = "8"), allow(dead_code))]
    claimed: AtomicBool,
}

const _: () = {
    use crate::layout::inline_counted as off;
    use core::mem::offset_of;

    type C = CountedInlineChannel<16, 8>;
    let tail = offset_of!(RingIndices, tail);
    let head = offset_of!(RingIndices, head);

    assert!(offset_of!(C, signature) == off::SIGNATURE);
    assert!(offset_of!(C, outbound_exponent) == off::OUTBOUND_EXPONENT);
    assert!(offset_of!(C, inbound_exponent) == off::INBOUND_EXPONENT);
    assert!(offset_of!(C, outbound) + tail == off::OUTBOUND_TAIL);
    assert!(offset_of!(C, outbound) + head == off::OUTBOUND_HEAD);
    assert!(offset_of!(C, inbound) + tail == off::INBOUND_TAIL);
    assert!(offset_of!(C, inbound) + head == off::INBOUND_HEAD);
    assert!(offset_of!(C, overflow) == off::OVERFLOW_COUNTER);
    assert!(offset_of!(C, outbound_buffer) == off::OUTBOUND_BUFFER);
    assert!(offset_of!(C, inbound_buffer) == off::OUTBOUND_BUFFER + 16);
};

/// Handle and query methods shared by both inline descriptors
macro_rules! inline_channel_common {
    ($name:ident) => {
        impl<const TX: usize, const RX: usize> $name<TX, RX> {
            /// Claim the firmware handles; `None` if already claimed
            #[cfg(target_has_atomic = "8")]
            pub fn split(&self) -> Option<(Outbound<'_>, Inbound<'_>)> {
                if self.claimed.swap(true, Ordering::AcqRel) {
                    return None;
                }
                // SAFETY: the flag guarantees this is the only pair.
                Some(unsafe { self.split_unchecked() })
            }

            /// Create the firmware handles without claiming them
            ///
            /// # Safety
            ///
            /// At most one `Outbound` and one `Inbound` for this channel may
            /// exist at any time.
            pub unsafe fn split_unchecked(&self) -> (Outbound<'_>, Inbound<'_>) {
                (
                    Outbound::new(self.ring(Direction::Outbound)),
                    Inbound::new(self.ring(Direction::Inbound)),
                )
            }

            /// Usable outbound capacity in bytes
            pub const fn outbound_capacity(&self) -> usize {
                ring::usable_capacity(RingStorage::<TX>::EXPONENT) as usize
            }

            /// Bytes a write could queue right now
            pub fn outbound_free(&self) -> usize {
                self.ring(Direction::Outbound).free()
            }

            /// Usable inbound capacity in bytes
            pub const fn inbound_capacity(&self) -> usize {
                ring::usable_capacity(RingStorage::<RX>::EXPONENT) as usize
            }

            /// Bytes the host has written and firmware has not read
            pub fn inbound_available(&self) -> usize {
                self.ring(Direction::Inbound).used()
            }
        }

        impl<const TX: usize, const RX: usize> Default for $name<TX, RX> {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

inline_channel_common!(InlineChannel);
inline_channel_common!(CountedInlineChannel);

impl<const TX: usize, const RX: usize> InlineChannel<TX, RX> {
    /// Build an empty descriptor; usable in `static` initializers
    pub const fn new() -> Self {
        Self {
            signature: INLINE_SIGNATURE,
            outbound_exponent: RingStorage::<TX>::EXPONENT,
            inbound_exponent: RingStorage::<RX>::EXPONENT,
            outbound: RingIndices::new(),
            inbound: RingIndices::new(),
            outbound_buffer: RingStorage::new(),
            inbound_buffer: RingStorage::new(),
            claimed: AtomicBool::new(false),
        }
    }

    fn ring(&self, direction: Direction) -> SharedRing<'_> {
        match direction {
            Direction::Outbound => SharedRing::new(
                direction,
                &self.outbound,
                self.outbound_buffer.as_mut_ptr(),
                RingStorage::<TX>::EXPONENT,
                None,
            ),
            Direction::Inbound => SharedRing::new(
                direction,
                &self.inbound,
                self.inbound_buffer.as_mut_ptr(),
                RingStorage::<RX>::EXPONENT,
                None,
            ),
        }
    }

    /// Reset both rings to empty
    ///
    /// Requires `&mut self`, so no handles can be alive.
    pub fn reset(&mut self) {
        self.outbound.reset();
        self.inbound.reset();
        log::debug!("buffy: inline channel reset");
    }
}

impl<const TX: usize, const RX: usize> CountedInlineChannel<TX, RX> {
    /// Build an empty descriptor; usable in `static` initializers
    pub const fn new() -> Self {
        Self {
            signature: INLINE_SIGNATURE,
            outbound_exponent: RingStorage::<TX>::EXPONENT,
            inbound_exponent: RingStorage::<RX>::EXPONENT,
            outbound: RingIndices::new(),
            inbound: RingIndices::new(),
            overflow: AtomicU32::new(0),
            outbound_buffer: RingStorage::new(),
            inbound_buffer: RingStorage::new(),
            claimed: AtomicBool::new(false),
        }
    }

    fn ring(&self, direction: Direction) -> SharedRing<'_> {
        match direction {
            Direction::Outbound => SharedRing::new(
                direction,
                &self.outbound,
                self.outbound_buffer.as_mut_ptr(),
                RingStorage::<TX>::EXPONENT,
                Some(&self.overflow),
            ),
            Direction::Inbound => SharedRing::new(
                direction,
                &self.inbound,
                self.inbound_buffer.as_mut_ptr(),
                RingStorage::<RX>::EXPONENT,
                None,
            ),
        }
    }

    /// Writes that found the outbound ring full (wrapping)
    pub fn overflow_count(&self) -> u32 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Reset both rings to empty and clear the overflow counter
    pub fn reset(&mut self) {
        self.outbound.reset();
        self.inbound.reset();
        self.overflow.store(0, Ordering::Release);
        log::debug!("buffy: counted inline channel reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_capacity_8_scenario() {
        let channel = InlineChannel::<16, 8>::new();
        let (_tx, mut rx) = channel.split().unwrap();
        let mut buf = [0u8; 16];

        assert_eq!(rx.read(&mut buf), 0);

        let data = channel.inbound_buffer.as_mut_ptr();
        // SAFETY: firmware reads nothing past the head published below
        unsafe { core::ptr::copy_nonoverlapping(b"abcdefgh".as_ptr(), data, 8) };

        channel.inbound.head.store(2, Ordering::Release);
        assert_eq!(rx.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(channel.inbound.tail.load(Ordering::Relaxed), 2);

        // Host filled the ring and wrapped to 1
        channel.inbound.head.store(1, Ordering::Release);
        assert_eq!(rx.available(), 7);
        assert_eq!(rx.read(&mut buf), 7);
        assert_eq!(&buf[..7], b"cdefgha");
        assert_eq!(rx.read(&mut buf), 0);
    }

    #[test]
    fn test_outbound_lands_inline() {
        let channel = InlineChannel::<16, 8>::new();
        let (mut tx, _rx) = channel.split().unwrap();

        assert_eq!(tx.write(b"hello"), 5);
        assert_eq!(tx.overflow_count(), None);
        assert_eq!(channel.outbound.head.load(Ordering::Relaxed), 5);

        let data = channel.outbound_buffer.as_mut_ptr();
        // SAFETY: the bytes below the head are published and not rewritten
        let written = unsafe { core::slice::from_raw_parts(data, 5) };
        assert_eq!(written, b"hello");
    }

    #[test]
    fn test_full_ring_without_counter() {
        let channel = InlineChannel::<4, 2>::new();
        let (mut tx, _rx) = channel.split().unwrap();
        assert_eq!(tx.write(b"abcdef"), 3);
        assert_eq!(tx.write(b"g"), 0);
        assert_eq!(channel.outbound_free(), 0);
    }

    #[test]
    fn test_reset_empties_rings() {
        let mut channel = InlineChannel::<16, 8>::new();
        {
            // SAFETY: the only handles, dropped before `reset`
            let (mut tx, _rx) = unsafe { channel.split_unchecked() };
            tx.write(b"stale");
        }
        channel.inbound.head.store(3, Ordering::Relaxed);
        channel.reset();
        assert_eq!(channel.outbound_free(), 15);
        assert_eq!(channel.inbound_available(), 0);
    }

    #[test]
    fn test_header_words() {
        let channel = InlineChannel::<512, 64>::new();
        assert_eq!(channel.signature, INLINE_SIGNATURE);
        assert_eq!(channel.outbound_exponent, 9);
        assert_eq!(channel.inbound_exponent, 6);
        assert_eq!(channel.outbound_capacity(), 511);
        assert_eq!(channel.inbound_capacity(), 63);
    }

    #[test]
    fn test_counted_overflow_precedes_buffers() {
        let channel = CountedInlineChannel::<16, 8>::new();
        let (mut tx, _rx) = channel.split().unwrap();

        assert_eq!(tx.write(b"hi"), 2);
        let base = &channel as *const _ as *const u8;
        // SAFETY: offsets 28..34 lie inside the descriptor
        let (counter, data) = unsafe {
            (
                core::slice::from_raw_parts(base.add(28), 4),
                core::slice::from_raw_parts(base.add(32), 2),
            )
        };
        assert_eq!(counter, &[0, 0, 0, 0]);
        assert_eq!(data, b"hi");

        assert_eq!(tx.write(&[0u8; 20]), 13);
        assert_eq!(tx.write(b"x"), 0);
        assert_eq!(channel.overflow_count(), 2);
        assert_eq!(tx.overflow_count(), Some(2));
    }

    #[test]
    fn test_counted_reset_clears_counter() {
        let mut channel = CountedInlineChannel::<4, 2>::new();
        {
            // SAFETY: the only handles, dropped before `reset`
            let (mut tx, _rx) = unsafe { channel.split_unchecked() };
            tx.write(b"overflowing");
        }
        assert_eq!(channel.overflow_count(), 1);
        channel.reset();
        assert_eq!(channel.overflow_count(), 0);
        assert_eq!(channel.outbound_free(), 3);
    }
}
