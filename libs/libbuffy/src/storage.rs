//! Ring storage
//!
//! Byte arrays backing a ring. The capacity is a const generic checked at
//! compile time: instantiating `RingStorage::<N>::new()` with an `N` that is
//! not a power of two in `2..=65536` fails the build.

use core::cell::UnsafeCell;

/// Smallest ring (one usable byte)
pub const MIN_CAPACITY: usize = 2;

/// Largest ring the probe tooling accepts
pub const MAX_CAPACITY: usize = 1 << MAX_CAPACITY_EXPONENT;

/// Largest capacity exponent the probe tooling accepts
pub const MAX_CAPACITY_EXPONENT: u32 = 16;

/// Backing bytes for one ring
///
/// `#[repr(transparent)]` so that an inline ring is laid out exactly as a
/// `[u8; N]`.
#[repr(transparent)]
pub struct RingStorage<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
}

// SAFETY: the bytes are only touched through a ring port, and the index
// protocol gives producer and consumer disjoint regions at any time.
unsafe impl<const N: usize> Sync for RingStorage<N> {}

impl<const N: usize> RingStorage<N> {
    const VALID: () = assert!(
        N.is_power_of_two() && N >= MIN_CAPACITY && N <= MAX_CAPACITY,
        "ring capacity must be a power of two between 2 and 65536"
    );

    /// log2 of the capacity
    pub const EXPONENT: u32 = {
        let () = Self::VALID;
        N.trailing_zeros()
    };

    /// Create zeroed storage
    pub const fn new() -> Self {
        let () = Self::VALID;
        Self {
            bytes: UnsafeCell::new([0; N]),
        }
    }

    /// Raw size in bytes (usable capacity is one less)
    pub const fn len(&self) -> usize {
        N
    }

    /// Always false; storage has at least two bytes
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Pointer to the first byte
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.bytes.get().cast()
    }
}

impl<const N: usize> Default for RingStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}
