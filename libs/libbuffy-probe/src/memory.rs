//! Target memory access
//!
//! The observer never touches target memory directly; it goes through
//! [`TargetMemory`], which a debug-probe backend implements over its
//! read/write-memory commands. Two implementations ship here:
//!
//! - [`MemoryImage`]: an owned copy of a RAM region at a base address, for
//!   offline dumps and tests
//! - [`LocalMemory`]: the observer's own address space, for running against a
//!   live descriptor in the same process

use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Byte-granular access to target memory
pub trait TargetMemory {
    /// Backend failure type
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fill `buf` from `address`
    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Store `bytes` at `address`
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), Self::Error>;
}

impl<M: TargetMemory + ?Sized> TargetMemory for &mut M {
    type Error = M::Error;

    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), Self::Error> {
        (**self).write(address, bytes)
    }
}

/// Access outside a [`MemoryImage`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access of {len} bytes at {address:#x} is outside the image {base:#x}..{end:#x}")]
pub struct ImageError {
    /// Requested address
    pub address: u64,
    /// Requested length
    pub len: usize,
    /// Image start
    pub base: u64,
    /// Image end (exclusive)
    pub end: u64,
}

/// RAM image at a fixed base address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    base: u64,
    bytes: Vec<u8>,
}

impl MemoryImage {
    /// Wrap a dump taken at `base`
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Zeroed image of `len` bytes
    pub fn zeroed(base: u64, len: usize) -> Self {
        Self::new(base, vec![0; len])
    }

    /// Start address
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Raw contents
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw contents, mutably
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>, ImageError> {
        let error = || ImageError {
            address,
            len,
            base: self.base,
            end: self.base + self.bytes.len() as u64,
        };
        let start = address.checked_sub(self.base).ok_or_else(error)? as usize;
        let end = start.checked_add(len).ok_or_else(error)?;
        if end > self.bytes.len() {
            return Err(error());
        }
        Ok(start..end)
    }
}

impl TargetMemory for MemoryImage {
    type Error = ImageError;

    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<(), ImageError> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), ImageError> {
        let range = self.range(address, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Address does not fit the host pointer width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address {0:#x} is not addressable on this host")]
pub struct AddressError(pub u64);

/// The observer's own address space
///
/// Aligned 4-byte accesses go through `AtomicU32`, since the index and
/// counter words are atomics on the other side. Everything else is a
/// volatile byte copy.
#[derive(Debug)]
pub struct LocalMemory {
    _private: (),
}

impl LocalMemory {
    /// Access the current process's memory
    ///
    /// # Safety
    ///
    /// Every address later passed to `read` or `write` must be valid for the
    /// access for as long as this value is used, and writes must only target
    /// memory the other side expects a probe to write.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn pointer(address: u64) -> Result<*mut u8, AddressError> {
        usize::try_from(address)
            .map(|addr| addr as *mut u8)
            .map_err(|_| AddressError(address))
    }

    /// The word at `ptr`, if a `len`-byte access there is one aligned word
    fn word(ptr: *mut u8, len: usize) -> Option<&'static AtomicU32> {
        if len != 4 || ptr.align_offset(std::mem::align_of::<AtomicU32>()) != 0 {
            return None;
        }
        // SAFETY: aligned, valid for 4 bytes per the contract of `new`
        Some(unsafe { AtomicU32::from_ptr(ptr.cast()) })
    }
}

impl TargetMemory for LocalMemory {
    type Error = AddressError;

    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<(), AddressError> {
        let src = Self::pointer(address)?;
        if let Some(word) = Self::word(src, buf.len()) {
            buf.copy_from_slice(&word.load(Ordering::Acquire).to_ne_bytes());
            return Ok(());
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: validity of the address range is the contract of `new`
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
        Ok(())
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), AddressError> {
        let dst = Self::pointer(address)?;
        if let Some(word) = Self::word(dst, bytes.len()) {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(bytes);
            word.store(u32::from_ne_bytes(raw), Ordering::Release);
            return Ok(());
        }
        for (i, &byte) in bytes.iter().enumerate() {
            // SAFETY: as for `read`
            unsafe { ptr::write_volatile(dst.add(i), byte) };
        }
        Ok(())
    }
}
