//! Referenced-buffer channel descriptor (revision 2)
//!
//! The descriptor carries the control words a probe reads and the addresses
//! of two [`RingStorage`] blocks that live elsewhere, so the descriptor size
//! does not depend on the ring sizes. The length fields double as an
//! initialization flag: a probe that reads 0 there knows startup code has not
//! finished and must not trust the rest of the header.
//!
//! ```ignore
//! static OUT: RingStorage<512> = RingStorage::new();
//! static IN: RingStorage<64> = RingStorage::new();
//! static CHANNEL: Channel<'static> = Channel::new(&OUT, &IN);
//!
//! let (mut tx, mut rx) = CHANNEL.split().unwrap();
//! tx.write(b"boot\n");
//! ```

use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};

use crate::layout::{Direction, REFERENCED_REVISION, REFERENCED_SIGNATURE};
use crate::ring;
use crate::shared::{Inbound, Outbound, RingIndices, SharedRing};
use crate::storage::RingStorage;

/// Revision 2 descriptor
///
/// Everything up to the inbound buffer address is the probe-visible header
/// (see [`crate::layout`]). The trailing fields are the firmware's own
/// copies of geometry; transfers never trust what the probe can overwrite.
#[repr(C)]
pub struct Channel<'a> {
    signature: u32,
    revision: u32,
    outbound_exponent: u32,
    inbound_exponent: u32,
    outbound: RingIndices,
    inbound: RingIndices,
    overflow: AtomicU32,
    outbound_len: AtomicU32,
    inbound_len: AtomicU32,
    reserved: u32,
    outbound_buffer: *mut u8,
    inbound_buffer: *mut u8,

    // Firmware-private from here on
    outbound_storage: *mut u8,
    inbound_storage: *mut u8,
    outbound_exp: u32,
    inbound_exp: u32,
    #[cfg_attr(not(target_has_atomic = "8"), allow(dead_code))]
    claimed: AtomicBool,
    _storage: PhantomData<&'a [u8]>,
}

// SAFETY: all fields shared with the probe or with handles are atomics; the
// raw pointers are only dereferenced by the single pair of handles.
unsafe impl Sync for Channel<'_> {}
// SAFETY: as above, nothing is tied to the creating thread.
unsafe impl Send for Channel<'_> {}

const _: () = {
    use crate::layout::{referenced as off, PointerWidth};
    use core::mem::offset_of;

    type C = Channel<'static>;
    let tail = offset_of!(RingIndices, tail);
    let head = offset_of!(RingIndices, head);

    assert!(offset_of!(C, signature) == off::SIGNATURE);
    assert!(offset_of!(C, revision) == off::REVISION);
    assert!(offset_of!(C, outbound_exponent) == off::OUTBOUND_EXPONENT);
    assert!(offset_of!(C, inbound_exponent) == off::INBOUND_EXPONENT);
    assert!(offset_of!(C, outbound) + tail == off::OUTBOUND_TAIL);
    assert!(offset_of!(C, outbound) + head == off::OUTBOUND_HEAD);
    assert!(offset_of!(C, inbound) + tail == off::INBOUND_TAIL);
    assert!(offset_of!(C, inbound) + head == off::INBOUND_HEAD);
    assert!(offset_of!(C, overflow) == off::OVERFLOW_COUNTER);
    assert!(offset_of!(C, outbound_len) == off::OUTBOUND_LEN);
    assert!(offset_of!(C, inbound_len) == off::INBOUND_LEN);
    assert!(offset_of!(C, reserved) == off::RESERVED);
    assert!(offset_of!(C, outbound_buffer) == off::OUTBOUND_BUFFER);
    assert!(offset_of!(C, inbound_buffer) == off::inbound_buffer(PointerWidth::NATIVE));
};

impl<'a> Channel<'a> {
    /// Build a descriptor over two storage blocks
    ///
    /// Usable in `static` initializers. Capacities are checked when the
    /// storage types are instantiated.
    pub const fn new<const TX: usize, const RX: usize>(
        outbound: &'a RingStorage<TX>,
        inbound: &'a RingStorage<RX>,
    ) -> Self {
        Self::with_lengths(outbound, inbound, TX as u32, RX as u32)
    }

    const fn with_lengths<const TX: usize, const RX: usize>(
        outbound: &'a RingStorage<TX>,
        inbound: &'a RingStorage<RX>,
        outbound_len: u32,
        inbound_len: u32,
    ) -> Self {
        Self {
            signature: REFERENCED_SIGNATURE,
            revision: REFERENCED_REVISION,
            outbound_exponent: RingStorage::<TX>::EXPONENT,
            inbound_exponent: RingStorage::<RX>::EXPONENT,
            outbound: RingIndices::new(),
            inbound: RingIndices::new(),
            overflow: AtomicU32::new(0),
            outbound_len: AtomicU32::new(outbound_len),
            inbound_len: AtomicU32::new(inbound_len),
            reserved: 0,
            outbound_buffer: outbound.as_mut_ptr(),
            inbound_buffer: inbound.as_mut_ptr(),
            outbound_storage: outbound.as_mut_ptr(),
            inbound_storage: inbound.as_mut_ptr(),
            outbound_exp: RingStorage::<TX>::EXPONENT,
            inbound_exp: RingStorage::<RX>::EXPONENT,
            claimed: AtomicBool::new(false),
            _storage: PhantomData,
        }
    }

    /// Initialize a descriptor in place
    ///
    /// For descriptors in memory that survives a warm reset without being
    /// zeroed: the header is written with both lengths at 0, fenced, and only
    /// then are the lengths published, so a probe never sees a half-written
    /// header marked as initialized. Indices and the overflow counter start
    /// at 0.
    pub fn init<const TX: usize, const RX: usize>(
        slot: &'a mut MaybeUninit<Self>,
        outbound: &'a RingStorage<TX>,
        inbound: &'a RingStorage<RX>,
    ) -> &'a Self {
        let channel = slot.write(Self::with_lengths(outbound, inbound, 0, 0));
        fence(Ordering::SeqCst);
        channel.outbound_len.store(TX as u32, Ordering::Release);
        channel.inbound_len.store(RX as u32, Ordering::Release);
        fence(Ordering::SeqCst);

        log::debug!(
            "buffy: channel initialized at {:p} (outbound {} bytes, inbound {} bytes)",
            channel as *const Self,
            TX,
            RX
        );
        channel
    }

    /// Claim the firmware handles
    ///
    /// Returns `None` if they were already handed out.
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
    /// At most one `Outbound` and one `Inbound` for this channel may exist at
    /// any time, including handles from [`split`](Self::split).
    pub unsafe fn split_unchecked(&self) -> (Outbound<'_>, Inbound<'_>) {
        (
            Outbound::new(self.ring(Direction::Outbound)),
            Inbound::new(self.ring(Direction::Inbound)),
        )
    }

    fn ring(&self, direction: Direction) -> SharedRing<'_> {
        match direction {
            Direction::Outbound => SharedRing::new(
                direction,
                &self.outbound,
                self.outbound_storage,
                self.outbound_exp,
                Some(&self.overflow),
            ),
            Direction::Inbound => SharedRing::new(
                direction,
                &self.inbound,
                self.inbound_storage,
                self.inbound_exp,
                None,
            ),
        }
    }

    /// Usable outbound capacity in bytes
    pub fn outbound_capacity(&self) -> usize {
        ring::usable_capacity(self.outbound_exp) as usize
    }

    /// Bytes a write could queue right now
    pub fn outbound_free(&self) -> usize {
        self.ring(Direction::Outbound).free()
    }

    /// Bytes queued for the host
    pub fn outbound_used(&self) -> usize {
        self.ring(Direction::Outbound).used()
    }

    /// Usable inbound capacity in bytes
    pub fn inbound_capacity(&self) -> usize {
        ring::usable_capacity(self.inbound_exp) as usize
    }

    /// Bytes the host has written and firmware has not read
    pub fn inbound_available(&self) -> usize {
        self.ring(Direction::Inbound).used()
    }

    /// Writes that found the outbound ring full (wrapping)
    pub fn overflow_count(&self) -> u32 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Whether both length fields have been published
    pub fn is_initialized(&self) -> bool {
        self.outbound_len.load(Ordering::Acquire) != 0
            && self.inbound_len.load(Ordering::Acquire) != 0
    }
}

impl core::fmt::Debug for Channel<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("outbound_capacity", &self.outbound_capacity())
            .field("outbound_used", &self.outbound_used())
            .field("inbound_capacity", &self.inbound_capacity())
            .field("inbound_available", &self.inbound_available())
            .field("overflow", &self.overflow_count())
            .finish()
    }
}
